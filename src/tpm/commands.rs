/* SPDX-License-Identifier: MIT */

//! Command handlers and the dispatch table.
//!
//! Each entry declares its command code, the number of handles in the
//! handle area, whether an authorization area is required, and the
//! TPMA_CC flags reported by TPM2_GetCapability. Handlers parse their
//! parameter area from a [`CommandReader`], write response parameters
//! into a [`ResponseWriter`] and may return a response handle.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::Fault;
use crate::tpm::buffer::{CommandReader, ResponseWriter};
use crate::tpm::constants::{
    command_attributes, tpm_alg, tpm_cap, tpm_pt, tpm_rh, ResponseCode, TpmCc, TpmRc, TpmSe,
    TpmSt, TpmSu, TpmaCc, DIGEST_SIZE, MAX_DATA_BLOCK, MAX_NONCE_SIZE, MAX_RANDOM_BYTES,
    MAX_STIR_BYTES, MIN_NONCE_SIZE, PCR_COUNT,
};
use crate::tpm::seeds::{Hierarchy, PersistentData};
use crate::tpm::state::{Session, VolatileState};

type HmacSha256 = Hmac<Sha256>;

/// Maximum PCR values returned by one TPM2_PCR_Read
const PCR_READ_QUOTA: usize = 8;

/// Maximum selections in a TPML_PCR_SELECTION
const MAX_PCR_SELECTIONS: usize = 8;

/// Octets of select bitmap per selection
const MAX_PCR_SELECT_SIZE: usize = 4;

/// Why a handler could not produce a success response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandFailure {
    /// In-band outcome, encoded into the response buffer
    Code(ResponseCode),
    /// Internal fault, escalated to failure mode by the dispatcher
    Fault(Fault),
}

impl From<TpmRc> for CommandFailure {
    fn from(rc: TpmRc) -> Self {
        CommandFailure::Code(ResponseCode::new(rc))
    }
}

impl From<ResponseCode> for CommandFailure {
    fn from(rc: ResponseCode) -> Self {
        CommandFailure::Code(rc)
    }
}

impl From<Fault> for CommandFailure {
    fn from(fault: Fault) -> Self {
        CommandFailure::Fault(fault)
    }
}

/// Mutable TPM state handed to a handler
pub(crate) struct TpmContext<'a> {
    pub persistent: &'a mut PersistentData,
    pub volatile: &'a mut VolatileState,
}

pub(crate) type HandlerResult = Result<Option<u32>, CommandFailure>;

pub(crate) type Handler = fn(
    ctx: &mut TpmContext<'_>,
    handles: &[u32],
    params: &mut CommandReader<'_>,
    reply: &mut ResponseWriter,
) -> HandlerResult;

pub(crate) struct CommandEntry {
    pub code: TpmCc,
    pub c_handles: u8,
    pub auth_required: bool,
    pub flags: TpmaCc,
    pub handler: Handler,
}

/// Dispatch table, sorted by command code. TPM2_GetCapability relies on
/// the ordering when paging through TPM_CAP_COMMANDS.
pub(crate) const COMMAND_TABLE: &[CommandEntry] = &[
    CommandEntry {
        code: TpmCc::ChangeEps,
        c_handles: 1,
        auth_required: true,
        flags: TpmaCc::NV,
        handler: cmd_change_eps,
    },
    CommandEntry {
        code: TpmCc::Clear,
        c_handles: 1,
        auth_required: true,
        flags: TpmaCc::NV,
        handler: cmd_clear,
    },
    CommandEntry {
        code: TpmCc::ChangePps,
        c_handles: 1,
        auth_required: true,
        flags: TpmaCc::NV,
        handler: cmd_change_pps,
    },
    CommandEntry {
        code: TpmCc::SequenceComplete,
        c_handles: 1,
        auth_required: true,
        flags: TpmaCc::FLUSHED,
        handler: cmd_sequence_complete,
    },
    CommandEntry {
        code: TpmCc::SelfTest,
        c_handles: 0,
        auth_required: false,
        flags: TpmaCc::empty(),
        handler: cmd_self_test,
    },
    CommandEntry {
        code: TpmCc::Startup,
        c_handles: 0,
        auth_required: false,
        flags: TpmaCc::NV,
        handler: cmd_startup,
    },
    CommandEntry {
        code: TpmCc::Shutdown,
        c_handles: 0,
        auth_required: false,
        flags: TpmaCc::NV,
        handler: cmd_shutdown,
    },
    CommandEntry {
        code: TpmCc::StirRandom,
        c_handles: 0,
        auth_required: false,
        flags: TpmaCc::empty(),
        handler: cmd_stir_random,
    },
    CommandEntry {
        code: TpmCc::SequenceUpdate,
        c_handles: 1,
        auth_required: true,
        flags: TpmaCc::empty(),
        handler: cmd_sequence_update,
    },
    CommandEntry {
        code: TpmCc::ContextLoad,
        c_handles: 0,
        auth_required: false,
        flags: TpmaCc::R_HANDLE,
        handler: cmd_context_load,
    },
    CommandEntry {
        code: TpmCc::ContextSave,
        c_handles: 1,
        auth_required: false,
        flags: TpmaCc::empty(),
        handler: cmd_context_save,
    },
    CommandEntry {
        code: TpmCc::FlushContext,
        c_handles: 0,
        auth_required: false,
        flags: TpmaCc::FLUSHED,
        handler: cmd_flush_context,
    },
    CommandEntry {
        code: TpmCc::StartAuthSession,
        c_handles: 2,
        auth_required: false,
        flags: TpmaCc::R_HANDLE,
        handler: cmd_start_auth_session,
    },
    CommandEntry {
        code: TpmCc::GetCapability,
        c_handles: 0,
        auth_required: false,
        flags: TpmaCc::empty(),
        handler: cmd_get_capability,
    },
    CommandEntry {
        code: TpmCc::GetRandom,
        c_handles: 0,
        auth_required: false,
        flags: TpmaCc::empty(),
        handler: cmd_get_random,
    },
    CommandEntry {
        code: TpmCc::Hash,
        c_handles: 0,
        auth_required: false,
        flags: TpmaCc::empty(),
        handler: cmd_hash,
    },
    CommandEntry {
        code: TpmCc::PcrRead,
        c_handles: 0,
        auth_required: false,
        flags: TpmaCc::empty(),
        handler: cmd_pcr_read,
    },
    CommandEntry {
        code: TpmCc::PcrExtend,
        c_handles: 1,
        auth_required: true,
        flags: TpmaCc::NV,
        handler: cmd_pcr_extend,
    },
    CommandEntry {
        code: TpmCc::HashSequenceStart,
        c_handles: 0,
        auth_required: false,
        flags: TpmaCc::R_HANDLE,
        handler: cmd_hash_sequence_start,
    },
    CommandEntry {
        code: TpmCc::VendorTcgTest,
        c_handles: 0,
        auth_required: false,
        flags: TpmaCc::V,
        handler: cmd_vendor_tcg_test,
    },
];

pub(crate) fn lookup(code: u32) -> Option<&'static CommandEntry> {
    COMMAND_TABLE.iter().find(|e| e.code.to_u32() == code)
}

fn cmd_startup(
    ctx: &mut TpmContext<'_>,
    _handles: &[u32],
    params: &mut CommandReader<'_>,
    _reply: &mut ResponseWriter,
) -> HandlerResult {
    if ctx.volatile.started {
        return Err(TpmRc::Initialize.into());
    }
    let su = TpmSu::from_u16(params.get_u16()?)
        .ok_or(ResponseCode::with_parameter(TpmRc::Value, 1))?;
    // No state is ever saved across resets, so a TPM_SU_STATE startup
    // cannot be honored.
    if su == TpmSu::State {
        return Err(ResponseCode::with_parameter(TpmRc::Value, 1).into());
    }
    ctx.volatile.started = true;
    log::info!("TPM2_Startup(CLEAR)");
    Ok(None)
}

fn cmd_shutdown(
    _ctx: &mut TpmContext<'_>,
    _handles: &[u32],
    params: &mut CommandReader<'_>,
    _reply: &mut ResponseWriter,
) -> HandlerResult {
    let su = TpmSu::from_u16(params.get_u16()?)
        .ok_or(ResponseCode::with_parameter(TpmRc::Value, 1))?;
    log::info!("TPM2_Shutdown({:?})", su);
    Ok(None)
}

fn cmd_self_test(
    _ctx: &mut TpmContext<'_>,
    _handles: &[u32],
    params: &mut CommandReader<'_>,
    _reply: &mut ResponseWriter,
) -> HandlerResult {
    let full_test = params.get_u8()?;
    if full_test > 1 {
        return Err(ResponseCode::with_parameter(TpmRc::Value, 1).into());
    }
    // Software algorithms have nothing to self-test; always passes.
    Ok(None)
}

fn cmd_get_random(
    ctx: &mut TpmContext<'_>,
    _handles: &[u32],
    params: &mut CommandReader<'_>,
    reply: &mut ResponseWriter,
) -> HandlerResult {
    let requested = usize::from(params.get_u16()?);
    // Larger requests are satisfied partially, not rejected.
    let len = requested.min(MAX_RANDOM_BYTES);
    let bytes = ctx.volatile.drbg.random_bytes(len);
    reply.put_tpm2b(&bytes);
    Ok(None)
}

fn cmd_stir_random(
    ctx: &mut TpmContext<'_>,
    _handles: &[u32],
    params: &mut CommandReader<'_>,
    _reply: &mut ResponseWriter,
) -> HandlerResult {
    let in_data = params.get_tpm2b()?;
    if in_data.len() > MAX_STIR_BYTES {
        return Err(ResponseCode::with_parameter(TpmRc::Size, 1).into());
    }
    ctx.volatile.drbg.stir(in_data);
    Ok(None)
}

/// Simulator identification reported via TPM_CAP_TPM_PROPERTIES
const TAGGED_PROPERTIES: &[(u32, u32)] = &[
    (tpm_pt::FAMILY_INDICATOR, 0x322E_3000), // "2.0"
    (tpm_pt::LEVEL, 0),
    (tpm_pt::REVISION, 164),
    (tpm_pt::MANUFACTURER, u32::from_be_bytes(*b"SIML")),
    (tpm_pt::MAX_COMMAND_SIZE, crate::tpm::constants::MAX_COMMAND_SIZE as u32),
    (tpm_pt::MAX_RESPONSE_SIZE, crate::tpm::constants::MAX_RESPONSE_SIZE as u32),
];

fn cmd_get_capability(
    _ctx: &mut TpmContext<'_>,
    _handles: &[u32],
    params: &mut CommandReader<'_>,
    reply: &mut ResponseWriter,
) -> HandlerResult {
    let capability = params.get_u32()?;
    let property = params.get_u32()?;
    let count = params.get_u32()? as usize;

    match capability {
        tpm_cap::COMMANDS => {
            let matching: Vec<u32> = COMMAND_TABLE
                .iter()
                .filter(|e| e.code.to_u32() >= property)
                .map(|e| command_attributes(e.code, e.c_handles, e.flags))
                .collect();
            let returned = matching.len().min(count);
            let more_data = matching.len() > returned;

            reply.put_u8(more_data.into());
            reply.put_u32(tpm_cap::COMMANDS);
            reply.put_u32(returned as u32);
            for attrs in &matching[..returned] {
                reply.put_u32(*attrs);
            }
        }
        tpm_cap::TPM_PROPERTIES => {
            let matching: Vec<(u32, u32)> = TAGGED_PROPERTIES
                .iter()
                .copied()
                .filter(|(prop, _)| *prop >= property)
                .collect();
            let returned = matching.len().min(count);
            let more_data = matching.len() > returned;

            reply.put_u8(more_data.into());
            reply.put_u32(tpm_cap::TPM_PROPERTIES);
            reply.put_u32(returned as u32);
            for (prop, value) in &matching[..returned] {
                reply.put_u32(*prop);
                reply.put_u32(*value);
            }
        }
        _ => return Err(ResponseCode::with_parameter(TpmRc::Value, 1).into()),
    }
    Ok(None)
}

fn cmd_pcr_read(
    ctx: &mut TpmContext<'_>,
    _handles: &[u32],
    params: &mut CommandReader<'_>,
    reply: &mut ResponseWriter,
) -> HandlerResult {
    let count = params.get_u32()? as usize;
    if count > MAX_PCR_SELECTIONS {
        return Err(ResponseCode::with_parameter(TpmRc::Size, 1).into());
    }

    let mut selections: Vec<(u16, Vec<u8>)> = Vec::with_capacity(count);
    for _ in 0..count {
        let alg = params.get_u16()?;
        let select_size = usize::from(params.get_u8()?);
        if select_size == 0 || select_size > MAX_PCR_SELECT_SIZE {
            return Err(ResponseCode::with_parameter(TpmRc::Value, 1).into());
        }
        let select = params.get_bytes(select_size)?.to_vec();
        selections.push((alg, select));
    }

    let mut digests: Vec<[u8; DIGEST_SIZE]> = Vec::new();
    let mut out_selections: Vec<(u16, Vec<u8>)> = Vec::with_capacity(selections.len());

    for (alg, select) in &selections {
        let mut out_select = vec![0u8; select.len()];
        // Only the SHA-256 bank is allocated; other banks echo an
        // empty selection.
        if *alg == tpm_alg::SHA256 {
            for index in 0..select.len() * 8 {
                let bit = 1u8 << (index % 8);
                if select[index / 8] & bit == 0 {
                    continue;
                }
                if index >= PCR_COUNT || digests.len() >= PCR_READ_QUOTA {
                    continue;
                }
                if let Some(value) = ctx.volatile.pcr.value(index) {
                    digests.push(*value);
                    out_select[index / 8] |= bit;
                }
            }
        }
        out_selections.push((*alg, out_select));
    }

    reply.put_u32(ctx.volatile.pcr.update_counter());
    reply.put_u32(out_selections.len() as u32);
    for (alg, select) in &out_selections {
        reply.put_u16(*alg);
        reply.put_u8(select.len() as u8);
        reply.put_bytes(select);
    }
    reply.put_u32(digests.len() as u32);
    for digest in &digests {
        reply.put_tpm2b(digest);
    }
    Ok(None)
}

fn cmd_pcr_extend(
    ctx: &mut TpmContext<'_>,
    handles: &[u32],
    params: &mut CommandReader<'_>,
    _reply: &mut ResponseWriter,
) -> HandlerResult {
    let pcr_handle = handles[0];
    if pcr_handle as usize >= PCR_COUNT {
        return Err(ResponseCode::with_handle(TpmRc::Value, 1).into());
    }

    // TPML_DIGEST_VALUES. The whole list is parsed before the first
    // extend, so a bad entry rejects the command without touching any PCR.
    let count = params.get_u32()? as usize;
    if count > 8 {
        return Err(ResponseCode::with_parameter(TpmRc::Size, 1).into());
    }
    let mut digests: Vec<[u8; DIGEST_SIZE]> = Vec::with_capacity(count);
    for _ in 0..count {
        let alg = params.get_u16()?;
        if alg != tpm_alg::SHA256 {
            return Err(ResponseCode::with_parameter(TpmRc::Hash, 1).into());
        }
        let bytes = params.get_bytes(DIGEST_SIZE)?;
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(bytes);
        digests.push(digest);
    }
    for digest in &digests {
        ctx.volatile
            .pcr
            .extend(pcr_handle as usize, digest)
            .map_err(|rc| ResponseCode::with_handle(rc, 1))?;
    }
    Ok(None)
}

/// Write a null TPMT_TK_HASHCHECK: the simulator does not bind tickets
/// to hierarchy proofs.
fn put_null_hashcheck_ticket(reply: &mut ResponseWriter) {
    reply.put_u16(TpmSt::HashCheck.to_u16());
    reply.put_u32(tpm_rh::NULL);
    reply.put_tpm2b(&[]);
}

fn validate_hierarchy_param(handle: u32, param: u8) -> Result<(), CommandFailure> {
    match handle {
        tpm_rh::OWNER | tpm_rh::ENDORSEMENT | tpm_rh::PLATFORM | tpm_rh::NULL => Ok(()),
        _ => Err(ResponseCode::with_parameter(TpmRc::Value, param).into()),
    }
}

fn cmd_hash(
    _ctx: &mut TpmContext<'_>,
    _handles: &[u32],
    params: &mut CommandReader<'_>,
    reply: &mut ResponseWriter,
) -> HandlerResult {
    let data = params.get_tpm2b()?;
    if data.len() > MAX_DATA_BLOCK {
        return Err(ResponseCode::with_parameter(TpmRc::Size, 1).into());
    }
    let alg = params.get_u16()?;
    if alg != tpm_alg::SHA256 {
        return Err(ResponseCode::with_parameter(TpmRc::Hash, 2).into());
    }
    let hierarchy = params.get_u32()?;
    validate_hierarchy_param(hierarchy, 3)?;

    let digest = Sha256::digest(data);
    reply.put_tpm2b(digest.as_slice());
    put_null_hashcheck_ticket(reply);
    Ok(None)
}

fn cmd_hash_sequence_start(
    ctx: &mut TpmContext<'_>,
    _handles: &[u32],
    params: &mut CommandReader<'_>,
    _reply: &mut ResponseWriter,
) -> HandlerResult {
    let auth = params.get_tpm2b()?;
    if auth.len() > DIGEST_SIZE * 2 {
        return Err(ResponseCode::with_parameter(TpmRc::Size, 1).into());
    }
    let alg = params.get_u16()?;
    if alg != tpm_alg::SHA256 {
        return Err(ResponseCode::with_parameter(TpmRc::Hash, 2).into());
    }
    let handle = ctx.volatile.sequences.create()?;
    Ok(Some(handle))
}

fn cmd_sequence_update(
    ctx: &mut TpmContext<'_>,
    handles: &[u32],
    params: &mut CommandReader<'_>,
    _reply: &mut ResponseWriter,
) -> HandlerResult {
    let data = params.get_tpm2b()?;
    if data.len() > MAX_DATA_BLOCK {
        return Err(ResponseCode::with_parameter(TpmRc::Size, 1).into());
    }
    let sequence = ctx
        .volatile
        .sequences
        .get_mut(handles[0])
        .ok_or(TpmRc::ReferenceH0)?;
    sequence.hash.update(data);
    Ok(None)
}

fn cmd_sequence_complete(
    ctx: &mut TpmContext<'_>,
    handles: &[u32],
    params: &mut CommandReader<'_>,
    reply: &mut ResponseWriter,
) -> HandlerResult {
    let data = params.get_tpm2b()?;
    if data.len() > MAX_DATA_BLOCK {
        return Err(ResponseCode::with_parameter(TpmRc::Size, 1).into());
    }
    let hierarchy = params.get_u32()?;
    validate_hierarchy_param(hierarchy, 2)?;

    let mut sequence = ctx
        .volatile
        .sequences
        .remove(handles[0])
        .ok_or(TpmRc::ReferenceH0)?;
    sequence.hash.update(data);
    let digest = sequence.hash.finalize();

    reply.put_tpm2b(digest.as_slice());
    put_null_hashcheck_ticket(reply);
    Ok(None)
}

fn cmd_start_auth_session(
    ctx: &mut TpmContext<'_>,
    handles: &[u32],
    params: &mut CommandReader<'_>,
    reply: &mut ResponseWriter,
) -> HandlerResult {
    // Salted and bound sessions need loaded key objects, which the core
    // does not implement; both handles must be TPM_RH_NULL.
    if handles[0] != tpm_rh::NULL {
        return Err(ResponseCode::with_handle(TpmRc::Value, 1).into());
    }
    if handles[1] != tpm_rh::NULL {
        return Err(ResponseCode::with_handle(TpmRc::Value, 2).into());
    }

    let nonce_caller = params.get_tpm2b()?;
    if nonce_caller.len() < MIN_NONCE_SIZE || nonce_caller.len() > MAX_NONCE_SIZE {
        return Err(ResponseCode::with_parameter(TpmRc::Size, 1).into());
    }
    let encrypted_salt = params.get_tpm2b()?;
    if !encrypted_salt.is_empty() {
        return Err(ResponseCode::with_parameter(TpmRc::Value, 2).into());
    }
    let session_type = TpmSe::from_u8(params.get_u8()?)
        .ok_or(ResponseCode::with_parameter(TpmRc::Value, 3))?;
    let symmetric = params.get_u16()?;
    if symmetric != tpm_alg::NULL {
        return Err(ResponseCode::with_parameter(TpmRc::Symmetric, 4).into());
    }
    let auth_hash = params.get_u16()?;
    if auth_hash != tpm_alg::SHA256 {
        return Err(ResponseCode::with_parameter(TpmRc::Hash, 5).into());
    }

    let nonce_tpm = ctx.volatile.drbg.random_bytes(nonce_caller.len());
    let handle = ctx
        .volatile
        .sessions
        .create(session_type, auth_hash, nonce_tpm.clone())?;

    reply.put_tpm2b(&nonce_tpm);
    Ok(Some(handle))
}

fn cmd_flush_context(
    ctx: &mut TpmContext<'_>,
    _handles: &[u32],
    params: &mut CommandReader<'_>,
    _reply: &mut ResponseWriter,
) -> HandlerResult {
    let flush_handle = params.get_u32()?;
    if ctx.volatile.sessions.remove(flush_handle).is_some() {
        return Ok(None);
    }
    if ctx.volatile.sequences.remove(flush_handle).is_some() {
        return Ok(None);
    }
    Err(ResponseCode::with_parameter(TpmRc::Value, 1).into())
}

/// Integrity HMAC over a saved context, keyed by the Storage hierarchy
/// proof. Rotating the Storage seed (TPM2_Clear) therefore invalidates
/// every previously saved context.
fn context_integrity(
    persistent: &PersistentData,
    sequence: u64,
    saved_handle: u32,
    body: &[u8],
) -> Result<[u8; DIGEST_SIZE], Fault> {
    let mut mac = HmacSha256::new_from_slice(persistent.proof(Hierarchy::Storage))
        .map_err(|_| Fault::crypto_failure())?;
    mac.update(&sequence.to_be_bytes());
    mac.update(&saved_handle.to_be_bytes());
    mac.update(body);
    Ok(mac.finalize().into_bytes().into())
}

fn cmd_context_save(
    ctx: &mut TpmContext<'_>,
    handles: &[u32],
    _params: &mut CommandReader<'_>,
    reply: &mut ResponseWriter,
) -> HandlerResult {
    let session = ctx
        .volatile
        .sessions
        .remove(handles[0])
        .ok_or(TpmRc::ReferenceH0)?;

    ctx.volatile.context_counter += 1;
    let sequence = ctx.volatile.context_counter;

    let mut body = ResponseWriter::new();
    body.put_u8(session.session_type.to_u8());
    body.put_u16(session.hash_alg);
    body.put_tpm2b(&session.nonce_tpm);
    let body = body.into_vec();

    let mac = context_integrity(ctx.persistent, sequence, session.handle, &body)?;

    // TPMS_CONTEXT
    reply.put_u64(sequence);
    reply.put_u32(session.handle);
    reply.put_u32(tpm_rh::NULL);
    let mut blob = body;
    blob.extend_from_slice(&mac);
    reply.put_tpm2b(&blob);
    Ok(None)
}

fn cmd_context_load(
    ctx: &mut TpmContext<'_>,
    _handles: &[u32],
    params: &mut CommandReader<'_>,
    _reply: &mut ResponseWriter,
) -> HandlerResult {
    let sequence = params.get_u64()?;
    let saved_handle = params.get_u32()?;
    let hierarchy = params.get_u32()?;
    if hierarchy != tpm_rh::NULL {
        return Err(ResponseCode::with_parameter(TpmRc::Value, 1).into());
    }
    let handle_type = (saved_handle >> 24) as u8;
    if handle_type != crate::tpm::constants::tpm_ht::HMAC_SESSION
        && handle_type != crate::tpm::constants::tpm_ht::POLICY_SESSION
    {
        return Err(ResponseCode::with_parameter(TpmRc::Value, 1).into());
    }

    let blob = params.get_tpm2b()?;
    if blob.len() < DIGEST_SIZE {
        return Err(ResponseCode::with_parameter(TpmRc::Integrity, 1).into());
    }
    let (body, mac) = blob.split_at(blob.len() - DIGEST_SIZE);
    let expected = context_integrity(ctx.persistent, sequence, saved_handle, body)?;
    if mac != expected.as_slice() {
        return Err(ResponseCode::with_parameter(TpmRc::Integrity, 1).into());
    }

    let mut body_reader = CommandReader::new(body);
    let session_type = TpmSe::from_u8(
        body_reader
            .get_u8()
            .map_err(|_| ResponseCode::with_parameter(TpmRc::Integrity, 1))?,
    )
    .ok_or(ResponseCode::with_parameter(TpmRc::Integrity, 1))?;
    let hash_alg = body_reader
        .get_u16()
        .map_err(|_| ResponseCode::with_parameter(TpmRc::Integrity, 1))?;
    let nonce_tpm = body_reader
        .get_tpm2b()
        .map_err(|_| ResponseCode::with_parameter(TpmRc::Integrity, 1))?
        .to_vec();
    if !body_reader.is_done() {
        return Err(ResponseCode::with_parameter(TpmRc::Integrity, 1).into());
    }

    ctx.volatile
        .sessions
        .insert(Session {
            handle: saved_handle,
            session_type,
            hash_alg,
            nonce_tpm,
        })
        .map_err(|rc| match rc {
            TpmRc::SessionMemory => CommandFailure::from(TpmRc::SessionMemory),
            _ => ResponseCode::with_parameter(TpmRc::Value, 1).into(),
        })?;

    Ok(Some(saved_handle))
}

fn cmd_clear(
    ctx: &mut TpmContext<'_>,
    handles: &[u32],
    _params: &mut CommandReader<'_>,
    _reply: &mut ResponseWriter,
) -> HandlerResult {
    if handles[0] != tpm_rh::LOCKOUT && handles[0] != tpm_rh::PLATFORM {
        return Err(ResponseCode::with_handle(TpmRc::Value, 1).into());
    }
    ctx.persistent
        .regenerate(Hierarchy::Storage, &mut rand::rngs::OsRng)?;
    Ok(None)
}

fn cmd_change_eps(
    ctx: &mut TpmContext<'_>,
    handles: &[u32],
    _params: &mut CommandReader<'_>,
    _reply: &mut ResponseWriter,
) -> HandlerResult {
    if handles[0] != tpm_rh::PLATFORM {
        return Err(ResponseCode::with_handle(TpmRc::Value, 1).into());
    }
    ctx.persistent
        .regenerate(Hierarchy::Endorsement, &mut rand::rngs::OsRng)?;
    Ok(None)
}

fn cmd_change_pps(
    ctx: &mut TpmContext<'_>,
    handles: &[u32],
    _params: &mut CommandReader<'_>,
    _reply: &mut ResponseWriter,
) -> HandlerResult {
    if handles[0] != tpm_rh::PLATFORM {
        return Err(ResponseCode::with_handle(TpmRc::Value, 1).into());
    }
    ctx.persistent
        .regenerate(Hierarchy::Platform, &mut rand::rngs::OsRng)?;
    Ok(None)
}

/// Vendor introspection used by the platform test harness: report the
/// SHA-256 digest of each hierarchy seed. Seed material itself never
/// leaves the core.
fn cmd_vendor_tcg_test(
    ctx: &mut TpmContext<'_>,
    _handles: &[u32],
    _params: &mut CommandReader<'_>,
    reply: &mut ResponseWriter,
) -> HandlerResult {
    for hierarchy in [Hierarchy::Endorsement, Hierarchy::Storage, Hierarchy::Platform] {
        reply.put_tpm2b(&ctx.persistent.seed_digest(hierarchy));
    }
    Ok(None)
}
