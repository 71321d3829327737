/* SPDX-License-Identifier: MIT */

//! Volatile state, rebuilt from scratch on every reset.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};

use crate::tpm::constants::{
    tpm_ht, TpmRc, TpmSe, DIGEST_SIZE, MAX_LOADED_SEQUENCES, MAX_LOADED_SESSIONS, PCR_COUNT,
};

/// Deterministic random bit generator, reseeded from the OS on reset
#[derive(Debug, Clone)]
pub struct Drbg {
    rng: StdRng,
}

impl Drbg {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn fill(&mut self, buf: &mut [u8]) {
        self.rng.fill_bytes(buf);
    }

    pub fn random_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.fill(&mut out);
        out
    }

    /// Mix caller-provided entropy into the generator (TPM2_StirRandom).
    /// The new state depends on both the old state and the stir data.
    pub fn stir(&mut self, data: &[u8]) {
        let mut carry = [0u8; DIGEST_SIZE];
        self.rng.fill_bytes(&mut carry);

        let mut hasher = Sha256::new();
        hasher.update(carry);
        hasher.update(data);
        self.rng = StdRng::from_seed(hasher.finalize().into());
    }
}

impl Default for Drbg {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 PCR bank
#[derive(Debug, Clone)]
pub struct PcrBank {
    pcrs: [[u8; DIGEST_SIZE]; PCR_COUNT],
    update_counter: u32,
}

impl PcrBank {
    pub fn new() -> Self {
        Self {
            pcrs: [[0u8; DIGEST_SIZE]; PCR_COUNT],
            update_counter: 0,
        }
    }

    pub fn value(&self, index: usize) -> Option<&[u8; DIGEST_SIZE]> {
        self.pcrs.get(index)
    }

    /// PCR[n] = H(PCR[n] || digest)
    pub fn extend(&mut self, index: usize, digest: &[u8; DIGEST_SIZE]) -> Result<(), TpmRc> {
        let pcr = self.pcrs.get_mut(index).ok_or(TpmRc::Value)?;
        let mut hasher = Sha256::new();
        hasher.update(&*pcr);
        hasher.update(digest);
        pcr.copy_from_slice(hasher.finalize().as_slice());
        self.update_counter = self.update_counter.wrapping_add(1);
        Ok(())
    }

    pub fn update_counter(&self) -> u32 {
        self.update_counter
    }
}

impl Default for PcrBank {
    fn default() -> Self {
        Self::new()
    }
}

/// A loaded authorization session
#[derive(Debug, Clone)]
pub struct Session {
    pub handle: u32,
    pub session_type: TpmSe,
    pub hash_alg: u16,
    pub nonce_tpm: Vec<u8>,
}

/// Loaded session table with a fixed capacity. Session handles carry the
/// handle-type octet (HMAC or policy) and a per-reset allocation counter,
/// so a handle is never reused within one reset epoch.
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    sessions: Vec<Session>,
    next_index: u32,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: Vec::with_capacity(MAX_LOADED_SESSIONS),
            next_index: 0,
        }
    }

    pub fn create(
        &mut self,
        session_type: TpmSe,
        hash_alg: u16,
        nonce_tpm: Vec<u8>,
    ) -> Result<u32, TpmRc> {
        if self.sessions.len() >= MAX_LOADED_SESSIONS {
            return Err(TpmRc::SessionMemory);
        }
        let ht = match session_type {
            TpmSe::Hmac => tpm_ht::HMAC_SESSION,
            TpmSe::Policy | TpmSe::Trial => tpm_ht::POLICY_SESSION,
        };
        let handle = u32::from(ht) << 24 | (self.next_index & 0x00FF_FFFF);
        self.next_index = self.next_index.wrapping_add(1);

        self.sessions.push(Session {
            handle,
            session_type,
            hash_alg,
            nonce_tpm,
        });
        Ok(handle)
    }

    pub fn contains(&self, handle: u32) -> bool {
        self.sessions.iter().any(|s| s.handle == handle)
    }

    pub fn remove(&mut self, handle: u32) -> Option<Session> {
        let idx = self.sessions.iter().position(|s| s.handle == handle)?;
        Some(self.sessions.remove(idx))
    }

    /// Reinsert a session restored by TPM2_ContextLoad
    pub fn insert(&mut self, session: Session) -> Result<(), TpmRc> {
        if self.sessions.len() >= MAX_LOADED_SESSIONS {
            return Err(TpmRc::SessionMemory);
        }
        if self.contains(session.handle) {
            return Err(TpmRc::Value);
        }
        self.sessions.push(session);
        Ok(())
    }
}

/// An in-flight hash sequence (TPM2_HashSequenceStart)
#[derive(Debug, Clone)]
pub struct HashSequence {
    pub handle: u32,
    pub hash: Sha256,
}

/// Transient sequence objects, fixed capacity, handles in the transient
/// range.
#[derive(Debug, Clone, Default)]
pub struct SequenceTable {
    sequences: Vec<HashSequence>,
    next_index: u32,
}

impl SequenceTable {
    pub fn new() -> Self {
        Self {
            sequences: Vec::with_capacity(MAX_LOADED_SEQUENCES),
            next_index: 0,
        }
    }

    pub fn create(&mut self) -> Result<u32, TpmRc> {
        if self.sequences.len() >= MAX_LOADED_SEQUENCES {
            return Err(TpmRc::ObjectMemory);
        }
        let handle = u32::from(tpm_ht::TRANSIENT) << 24 | (self.next_index & 0x00FF_FFFF);
        self.next_index = self.next_index.wrapping_add(1);

        self.sequences.push(HashSequence {
            handle,
            hash: Sha256::new(),
        });
        Ok(handle)
    }

    pub fn get_mut(&mut self, handle: u32) -> Option<&mut HashSequence> {
        self.sequences.iter_mut().find(|s| s.handle == handle)
    }

    pub fn remove(&mut self, handle: u32) -> Option<HashSequence> {
        let idx = self.sequences.iter().position(|s| s.handle == handle)?;
        Some(self.sequences.remove(idx))
    }
}

/// Everything cleared by a reset
#[derive(Debug, Clone)]
pub struct VolatileState {
    pub drbg: Drbg,
    pub pcr: PcrBank,
    pub sessions: SessionTable,
    pub sequences: SequenceTable,
    /// TPM2_Startup seen since the last reset
    pub started: bool,
    /// Monotonic sequence number for saved contexts
    pub context_counter: u64,
}

impl VolatileState {
    pub fn new() -> Self {
        Self {
            drbg: Drbg::new(),
            pcr: PcrBank::new(),
            sessions: SessionTable::new(),
            sequences: SequenceTable::new(),
            started: false,
            context_counter: 0,
        }
    }
}

impl Default for VolatileState {
    fn default() -> Self {
        Self::new()
    }
}
