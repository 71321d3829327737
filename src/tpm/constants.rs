/* SPDX-License-Identifier: MIT */

//! TPM 2.0 constants: command codes, response codes, tags and
//! implementation limits.

use bitflags::bitflags;

/// Size of a command/response header: tag (2) + size (4) + code (4)
pub const HEADER_SIZE: usize = 10;

/// Maximum accepted command size
pub const MAX_COMMAND_SIZE: usize = 4096;

/// Maximum response size the core will produce
pub const MAX_RESPONSE_SIZE: usize = 4096;

/// Size of a hierarchy primary seed
pub const SEED_SIZE: usize = 32;

/// Size of a hierarchy proof value
pub const PROOF_SIZE: usize = 32;

/// SHA-256 digest size, the only hash bank implemented
pub const DIGEST_SIZE: usize = 32;

/// Number of PCRs in the SHA-256 bank
pub const PCR_COUNT: usize = 24;

/// Maximum bytes returned by a single TPM2_GetRandom
pub const MAX_RANDOM_BYTES: usize = 64;

/// Maximum bytes accepted by TPM2_StirRandom
pub const MAX_STIR_BYTES: usize = 128;

/// Maximum data block for hash and sequence commands
pub const MAX_DATA_BLOCK: usize = 1024;

/// Loaded authorization sessions
pub const MAX_LOADED_SESSIONS: usize = 3;

/// Loaded hash sequence objects
pub const MAX_LOADED_SEQUENCES: usize = 3;

/// Caller nonce size bounds for TPM2_StartAuthSession
pub const MIN_NONCE_SIZE: usize = 16;
pub const MAX_NONCE_SIZE: usize = 32;

/// TPM 2.0 structure tags (TPM_ST)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmSt {
    NoSessions = 0x8001,
    Sessions = 0x8002,
    HashCheck = 0x8024,
}

impl TpmSt {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x8001 => Some(TpmSt::NoSessions),
            0x8002 => Some(TpmSt::Sessions),
            0x8024 => Some(TpmSt::HashCheck),
            _ => None,
        }
    }
}

/// Startup types (TPM_SU)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmSu {
    Clear = 0x0000,
    State = 0x0001,
}

impl TpmSu {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x0000 => Some(TpmSu::Clear),
            0x0001 => Some(TpmSu::State),
            _ => None,
        }
    }
}

/// Session types (TPM_SE)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TpmSe {
    Hmac = 0x00,
    Policy = 0x01,
    Trial = 0x03,
}

impl TpmSe {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(TpmSe::Hmac),
            0x01 => Some(TpmSe::Policy),
            0x03 => Some(TpmSe::Trial),
            _ => None,
        }
    }
}

/// TPM 2.0 command codes (TPM_CC) implemented by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TpmCc {
    ChangeEps = 0x0000_0124,
    Clear = 0x0000_0126,
    ChangePps = 0x0000_0127,
    SequenceComplete = 0x0000_013E,
    SelfTest = 0x0000_0143,
    Startup = 0x0000_0144,
    Shutdown = 0x0000_0145,
    StirRandom = 0x0000_0146,
    SequenceUpdate = 0x0000_015C,
    ContextLoad = 0x0000_0161,
    ContextSave = 0x0000_0162,
    FlushContext = 0x0000_0165,
    StartAuthSession = 0x0000_0176,
    GetCapability = 0x0000_017A,
    GetRandom = 0x0000_017B,
    Hash = 0x0000_017D,
    PcrRead = 0x0000_017E,
    PcrExtend = 0x0000_0182,
    HashSequenceStart = 0x0000_0186,
    VendorTcgTest = 0x2000_0000,
}

impl TpmCc {
    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

/// TPM 2.0 algorithm identifiers (TPM_ALG_ID)
pub mod tpm_alg {
    pub const SHA256: u16 = 0x000B;
    pub const NULL: u16 = 0x0010;
}

/// Permanent handles (TPM_RH) and the password session handle (TPM_RS_PW)
pub mod tpm_rh {
    pub const OWNER: u32 = 0x4000_0001;
    pub const NULL: u32 = 0x4000_0007;
    pub const PW: u32 = 0x4000_0009;
    pub const LOCKOUT: u32 = 0x4000_000A;
    pub const ENDORSEMENT: u32 = 0x4000_000B;
    pub const PLATFORM: u32 = 0x4000_000C;
}

/// Handle type octets (TPM_HT), the most significant byte of a handle
pub mod tpm_ht {
    pub const PCR: u8 = 0x00;
    pub const HMAC_SESSION: u8 = 0x02;
    pub const POLICY_SESSION: u8 = 0x03;
    pub const PERMANENT: u8 = 0x40;
    pub const TRANSIENT: u8 = 0x80;
}

/// Capability selectors (TPM_CAP)
pub mod tpm_cap {
    pub const COMMANDS: u32 = 0x0000_0002;
    pub const TPM_PROPERTIES: u32 = 0x0000_0006;
}

/// Tagged properties (TPM_PT) reported by TPM2_GetCapability
pub mod tpm_pt {
    pub const FAMILY_INDICATOR: u32 = 0x0000_0100;
    pub const LEVEL: u32 = 0x0000_0101;
    pub const REVISION: u32 = 0x0000_0102;
    pub const MANUFACTURER: u32 = 0x0000_0105;
    pub const MAX_COMMAND_SIZE: u32 = 0x0000_011E;
    pub const MAX_RESPONSE_SIZE: u32 = 0x0000_011F;
}

/// TPM 2.0 response codes (TPM_RC), base values only. Format-1 handle,
/// parameter and session modifiers are applied by [`ResponseCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TpmRc {
    Success = 0x0000_0000,
    BadTag = 0x0000_001E,
    // Format-0 errors
    Initialize = 0x0000_0100,
    Failure = 0x0000_0101,
    Sequence = 0x0000_0103,
    AuthMissing = 0x0000_0125,
    CommandSize = 0x0000_0142,
    CommandCode = 0x0000_0143,
    AuthSize = 0x0000_0144,
    // Format-1 errors, qualified by a handle/parameter/session number
    Attributes = 0x0000_0082,
    Hash = 0x0000_0083,
    Value = 0x0000_0084,
    Handle = 0x0000_008B,
    Size = 0x0000_0095,
    Symmetric = 0x0000_0096,
    Insufficient = 0x0000_009A,
    Integrity = 0x0000_009F,
    // Warnings
    ObjectMemory = 0x0000_0902,
    SessionMemory = 0x0000_0903,
    ReferenceH0 = 0x0000_0910,
    ReferenceS0 = 0x0000_0918,
}

const RC_FMT1: u32 = 0x080;
const RC_P: u32 = 0x040;
const RC_S: u32 = 0x800;
const RC_N_SHIFT: u32 = 8;

/// A fully qualified response code as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseCode(u32);

impl ResponseCode {
    pub const SUCCESS: ResponseCode = ResponseCode(0);

    /// A response code with no handle/parameter/session qualifier
    pub fn new(rc: TpmRc) -> Self {
        ResponseCode(rc as u32)
    }

    /// Format-1 code qualified with a one-based handle number
    pub fn with_handle(rc: TpmRc, n: u8) -> Self {
        debug_assert!(rc as u32 & RC_FMT1 != 0);
        ResponseCode(rc as u32 | u32::from(n) << RC_N_SHIFT)
    }

    /// Format-1 code qualified with a one-based parameter number
    pub fn with_parameter(rc: TpmRc, n: u8) -> Self {
        debug_assert!(rc as u32 & RC_FMT1 != 0);
        ResponseCode(rc as u32 | RC_P | u32::from(n) << RC_N_SHIFT)
    }

    /// Format-1 code qualified with a one-based session number
    pub fn with_session(rc: TpmRc, n: u8) -> Self {
        debug_assert!(rc as u32 & RC_FMT1 != 0);
        ResponseCode(rc as u32 | RC_S | u32::from(n) << RC_N_SHIFT)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl From<TpmRc> for ResponseCode {
    fn from(rc: TpmRc) -> Self {
        ResponseCode::new(rc)
    }
}

bitflags! {
    /// Command attribute bits (TPMA_CC). The command index and handle
    /// count fields share the same word; see [`command_attributes`].
    pub struct TpmaCc: u32 {
        const NV = 1 << 22;
        const EXTENSIVE = 1 << 23;
        const FLUSHED = 1 << 24;
        const R_HANDLE = 1 << 28;
        const V = 1 << 29;
    }
}

const TPMA_CC_INDEX_MASK: u32 = 0x0000_FFFF;
const TPMA_CC_CHANDLES_SHIFT: u32 = 25;

/// Assemble a TPMA_CC word from a command code, its handle count and
/// its attribute flags, as reported by TPM_CAP_COMMANDS.
pub fn command_attributes(code: TpmCc, c_handles: u8, flags: TpmaCc) -> u32 {
    (code.to_u32() & TPMA_CC_INDEX_MASK)
        | (u32::from(c_handles & 0x7) << TPMA_CC_CHANDLES_SHIFT)
        | flags.bits()
}

bitflags! {
    /// Session attribute bits (TPMA_SESSION)
    pub struct TpmaSession: u8 {
        const CONTINUE_SESSION = 1 << 0;
        const AUDIT_EXCLUSIVE = 1 << 1;
        const AUDIT_RESET = 1 << 2;
        const DECRYPT = 1 << 5;
        const ENCRYPT = 1 << 6;
        const AUDIT = 1 << 7;
    }
}
