/* SPDX-License-Identifier: MIT */

//! The command core: reset handling, header validation, authorization
//! area parsing, dispatch and response assembly.
//!
//! One [`TpmSimulator`] value is one independent TPM instance. Command
//! processing is strictly synchronous; the `&mut self` receiver makes the
//! one-command-at-a-time rule a compile-time property instead of a
//! convention the caller has to remember.

use rand::rngs::OsRng;

use crate::error::Fault;
use crate::tpm::buffer::{CommandReader, ResponseWriter};
use crate::tpm::commands::{lookup, CommandFailure, TpmContext};
use crate::tpm::constants::{
    tpm_rh, ResponseCode, TpmCc, TpmRc, TpmSt, TpmaSession, HEADER_SIZE, MAX_COMMAND_SIZE,
    MAX_NONCE_SIZE, MAX_RESPONSE_SIZE,
};
use crate::tpm::seeds::PersistentData;
use crate::tpm::state::VolatileState;

/// A software TPM instance.
///
/// Lifecycle: a fresh instance is uninitialized and answers every command
/// with TPM_RC_INITIALIZE until the first [`reset`](Self::reset). An
/// internal fault moves it to failure mode, where every command gets the
/// fixed failure response until the next reset.
#[derive(Debug)]
pub struct TpmSimulator {
    persistent: Option<PersistentData>,
    volatile: VolatileState,
    failed: bool,
}

impl TpmSimulator {
    pub fn new() -> Self {
        Self {
            persistent: None,
            volatile: VolatileState::new(),
            failed: false,
        }
    }

    /// Reset the TPM. Clears all volatile state including the failure
    /// flag. With `force_manufacture` the hierarchy seeds are regenerated
    /// from OS randomness; otherwise they are preserved. The first reset
    /// of an instance always manufactures. A manufacture fault latches
    /// failure mode instead of propagating.
    pub fn reset(&mut self, force_manufacture: bool) {
        self.volatile = VolatileState::new();
        self.failed = false;

        if force_manufacture || self.persistent.is_none() {
            match PersistentData::manufacture(&mut OsRng) {
                Ok(persistent) => {
                    self.persistent = Some(persistent);
                    log::info!("TPM manufactured");
                }
                Err(fault) => {
                    log::error!("manufacture failed, entering failure mode: {}", fault);
                    self.failed = true;
                }
            }
        } else {
            log::info!("TPM warm reset");
        }
    }

    /// Whether the core is in failure mode
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Export the marshalled persistent seeds, if manufactured. Storing
    /// the blob is the platform's responsibility.
    pub fn export_seeds(&self) -> Option<Vec<u8>> {
        self.persistent.as_ref().map(PersistentData::marshal)
    }

    /// Replace the persistent seeds from a previously exported blob.
    /// A following `reset(false)` keeps them.
    pub fn import_seeds(&mut self, blob: &[u8]) -> Result<(), Fault> {
        self.persistent = Some(PersistentData::unmarshal(blob)?);
        Ok(())
    }

    /// Process one command buffer and produce the response buffer.
    ///
    /// All outcomes are encoded in the returned buffer; this function
    /// never panics on hostile input. A command that answers with an
    /// error leaves persistent and volatile state exactly as it found
    /// them. Internal faults flip the core into failure mode and degrade
    /// this and all subsequent calls to the fixed failure response.
    pub fn run_command(&mut self, request: &[u8]) -> Vec<u8> {
        if self.failed {
            return error_response(ResponseCode::new(TpmRc::Failure));
        }
        if self.persistent.is_none() {
            return error_response(ResponseCode::new(TpmRc::Initialize));
        }

        match self.dispatch(request) {
            Ok(response) => response,
            Err(CommandFailure::Code(rc)) => error_response(rc),
            Err(CommandFailure::Fault(fault)) => {
                log::error!("entering failure mode: {}", fault);
                self.failed = true;
                error_response(ResponseCode::new(TpmRc::Failure))
            }
        }
    }

    fn dispatch(&mut self, request: &[u8]) -> Result<Vec<u8>, CommandFailure> {
        if request.len() < HEADER_SIZE || request.len() > MAX_COMMAND_SIZE {
            return Err(TpmRc::CommandSize.into());
        }

        let mut reader = CommandReader::new(request);
        let tag = match TpmSt::from_u16(reader.get_u16()?) {
            Some(t @ (TpmSt::NoSessions | TpmSt::Sessions)) => t,
            _ => return Err(TpmRc::BadTag.into()),
        };
        let declared_size = reader.get_u32()? as usize;
        if declared_size != request.len() {
            return Err(TpmRc::CommandSize.into());
        }
        let code = reader.get_u32()?;
        let entry = lookup(code).ok_or(TpmRc::CommandCode)?;

        if !self.volatile.started && entry.code != TpmCc::Startup {
            return Err(TpmRc::Initialize.into());
        }

        let mut handles = [0u32; 2];
        let handle_count = usize::from(entry.c_handles);
        for slot in handles.iter_mut().take(handle_count) {
            *slot = reader.get_u32()?;
        }
        let handles = &handles[..handle_count];

        // (handle, attributes) of each authorization session
        let mut auth_sessions: Vec<(u32, TpmaSession)> = Vec::new();
        if tag == TpmSt::Sessions {
            let auth_size = reader.get_u32().map_err(|_| TpmRc::AuthSize)? as usize;
            let mut auth = reader.sub_reader(auth_size).map_err(|_| TpmRc::AuthSize)?;
            while !auth.is_done() {
                let session_handle = auth.get_u32().map_err(|_| TpmRc::AuthSize)?;
                let nonce = auth.get_tpm2b().map_err(|_| TpmRc::AuthSize)?;
                if nonce.len() > MAX_NONCE_SIZE {
                    return Err(TpmRc::AuthSize.into());
                }
                let attrs = TpmaSession::from_bits_truncate(
                    auth.get_u8().map_err(|_| TpmRc::AuthSize)?,
                );
                let _hmac = auth.get_tpm2b().map_err(|_| TpmRc::AuthSize)?;

                if session_handle != tpm_rh::PW
                    && !self.volatile.sessions.contains(session_handle)
                {
                    return Err(TpmRc::ReferenceS0.into());
                }
                auth_sessions.push((session_handle, attrs));
            }
        }
        if entry.auth_required && auth_sessions.is_empty() {
            return Err(TpmRc::AuthMissing.into());
        }

        // Remaining bytes are the parameter area. The handler runs
        // against a staged copy of the state; the copy replaces the live
        // state only once the command has fully succeeded, so an error
        // response never carries committed side effects.
        let mut persistent = self
            .persistent
            .clone()
            .ok_or_else(Fault::table_corrupt)?;
        let mut volatile = self.volatile.clone();
        let mut ctx = TpmContext {
            persistent: &mut persistent,
            volatile: &mut volatile,
        };

        let mut body = ResponseWriter::new();
        let out_handle = (entry.handler)(&mut ctx, handles, &mut reader, &mut body)?;

        if !reader.is_done() {
            // trailing octets after the parameter area
            return Err(TpmRc::Size.into());
        }

        // Sessions without continueSession are closed once the command
        // has succeeded.
        for (handle, attrs) in &auth_sessions {
            if *handle != tpm_rh::PW && !attrs.contains(TpmaSession::CONTINUE_SESSION) {
                volatile.sessions.remove(*handle);
            }
        }

        let mut response = ResponseWriter::with_capacity(HEADER_SIZE + body.len());
        response.put_u16(tag.to_u16());
        response.put_u32(0); // size, patched below
        response.put_u32(ResponseCode::SUCCESS.value());
        if let Some(handle) = out_handle {
            response.put_u32(handle);
        }
        if tag == TpmSt::Sessions {
            response.put_u32(body.len() as u32); // parameterSize
            response.put_bytes(body.as_bytes());
            for (_, attrs) in &auth_sessions {
                response.put_u16(0); // nonceTPM
                response.put_u8((*attrs & TpmaSession::CONTINUE_SESSION).bits());
                response.put_u16(0); // hmac
            }
        } else {
            response.put_bytes(body.as_bytes());
        }

        if response.len() > MAX_RESPONSE_SIZE {
            return Err(Fault::response_overflow().into());
        }
        response.update_u32(2, response.len() as u32);

        self.persistent = Some(persistent);
        self.volatile = volatile;
        Ok(response.into_vec())
    }

    #[cfg(test)]
    pub(crate) fn inject_fault(&mut self) {
        self.failed = true;
    }
}

impl Default for TpmSimulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Error responses carry no handles, parameters or auth area: a 10-byte
/// header with TPM_ST_NO_SESSIONS.
fn error_response(rc: ResponseCode) -> Vec<u8> {
    let mut response = ResponseWriter::with_capacity(HEADER_SIZE);
    response.put_u16(TpmSt::NoSessions.to_u16());
    response.put_u32(HEADER_SIZE as u32);
    response.put_u32(rc.value());
    response.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpm::constants::{tpm_alg, tpm_cap, DIGEST_SIZE};
    use sha2::{Digest, Sha256};

    fn build_command(tag: TpmSt, code: u32, handles: &[u32], params: &[u8]) -> Vec<u8> {
        let mut w = ResponseWriter::new();
        w.put_u16(tag.to_u16());
        w.put_u32(0);
        w.put_u32(code);
        for h in handles {
            w.put_u32(*h);
        }
        if tag == TpmSt::Sessions {
            // password authorization with an empty auth value
            w.put_u32(9);
            w.put_u32(tpm_rh::PW);
            w.put_u16(0);
            w.put_u8(TpmaSession::CONTINUE_SESSION.bits());
            w.put_u16(0);
        }
        w.put_bytes(params);
        let size = w.len() as u32;
        w.update_u32(2, size);
        w.into_vec()
    }

    fn response_code(response: &[u8]) -> u32 {
        u32::from_be_bytes(response[6..10].try_into().unwrap())
    }

    /// Parameter area of a success response, skipping parameterSize and
    /// response handles
    fn parameters(response: &[u8], out_handles: usize) -> &[u8] {
        assert_eq!(response_code(response), 0);
        let tag = u16::from_be_bytes(response[0..2].try_into().unwrap());
        let mut start = HEADER_SIZE + out_handles * 4;
        let mut end = response.len();
        if tag == TpmSt::Sessions.to_u16() {
            let param_size =
                u32::from_be_bytes(response[start..start + 4].try_into().unwrap()) as usize;
            start += 4;
            end = start + param_size;
        }
        &response[start..end]
    }

    fn ready_tpm() -> TpmSimulator {
        let mut tpm = TpmSimulator::new();
        tpm.reset(true);
        let startup = build_command(
            TpmSt::NoSessions,
            TpmCc::Startup.to_u32(),
            &[],
            &0u16.to_be_bytes(),
        );
        let response = tpm.run_command(&startup);
        assert_eq!(response_code(&response), 0);
        tpm
    }

    fn seed_digests(tpm: &mut TpmSimulator) -> Vec<Vec<u8>> {
        let cmd = build_command(TpmSt::NoSessions, TpmCc::VendorTcgTest.to_u32(), &[], &[]);
        let response = tpm.run_command(&cmd);
        assert_eq!(response_code(&response), 0);
        let mut params = CommandReader::new(parameters(&response, 0));
        (0..3).map(|_| params.get_tpm2b().unwrap().to_vec()).collect()
    }

    #[test]
    fn uninitialized_core_reports_initialize() {
        let mut tpm = TpmSimulator::new();
        let cmd = build_command(TpmSt::NoSessions, TpmCc::GetRandom.to_u32(), &[], &[0, 16]);
        let response = tpm.run_command(&cmd);
        assert_eq!(response_code(&response), TpmRc::Initialize as u32);
    }

    #[test]
    fn startup_gate_and_duplicate_startup() {
        let mut tpm = TpmSimulator::new();
        tpm.reset(true);

        let get_random = build_command(
            TpmSt::NoSessions,
            TpmCc::GetRandom.to_u32(),
            &[],
            &16u16.to_be_bytes(),
        );
        let response = tpm.run_command(&get_random);
        assert_eq!(response_code(&response), TpmRc::Initialize as u32);

        let startup = build_command(
            TpmSt::NoSessions,
            TpmCc::Startup.to_u32(),
            &[],
            &0u16.to_be_bytes(),
        );
        assert_eq!(response_code(&tpm.run_command(&startup)), 0);
        // a second TPM2_Startup without a reset is refused
        assert_eq!(
            response_code(&tpm.run_command(&startup)),
            TpmRc::Initialize as u32
        );
    }

    #[test]
    fn malformed_size_is_rejected_not_fatal() {
        let mut tpm = ready_tpm();
        let mut cmd = build_command(
            TpmSt::NoSessions,
            TpmCc::GetRandom.to_u32(),
            &[],
            &16u16.to_be_bytes(),
        );
        // declared size disagrees with the actual buffer length
        cmd[5] = cmd[5].wrapping_add(4);
        let response = tpm.run_command(&cmd);
        assert_eq!(response_code(&response), TpmRc::CommandSize as u32);
        assert_eq!(response.len(), HEADER_SIZE);

        // the core keeps working afterwards
        let ok = build_command(
            TpmSt::NoSessions,
            TpmCc::GetRandom.to_u32(),
            &[],
            &16u16.to_be_bytes(),
        );
        assert_eq!(response_code(&tpm.run_command(&ok)), 0);
    }

    #[test]
    fn truncated_and_oversized_buffers() {
        let mut tpm = ready_tpm();
        assert_eq!(
            response_code(&tpm.run_command(&[0x80, 0x01, 0x00])),
            TpmRc::CommandSize as u32
        );
        let huge = vec![0u8; MAX_COMMAND_SIZE + 1];
        assert_eq!(
            response_code(&tpm.run_command(&huge)),
            TpmRc::CommandSize as u32
        );
    }

    #[test]
    fn bad_tag_is_rejected() {
        let mut tpm = ready_tpm();
        let mut cmd = build_command(
            TpmSt::NoSessions,
            TpmCc::GetRandom.to_u32(),
            &[],
            &16u16.to_be_bytes(),
        );
        cmd[0] = 0x12;
        cmd[1] = 0x34;
        assert_eq!(response_code(&tpm.run_command(&cmd)), TpmRc::BadTag as u32);
    }

    #[test]
    fn unknown_command_code_leaves_seeds_alone() {
        let mut tpm = TpmSimulator::new();
        tpm.reset(true);
        let before = tpm.export_seeds().unwrap();

        let cmd = build_command(TpmSt::NoSessions, 0xFFFF, &[], &[]);
        let response = tpm.run_command(&cmd);

        assert_eq!(response_code(&response), TpmRc::CommandCode as u32);
        assert_eq!(tpm.export_seeds().unwrap(), before);
    }

    #[test]
    fn warm_reset_preserves_seeds_manufacture_replaces_them() {
        let mut tpm = ready_tpm();
        let first = seed_digests(&mut tpm);

        tpm.reset(false);
        let startup = build_command(
            TpmSt::NoSessions,
            TpmCc::Startup.to_u32(),
            &[],
            &0u16.to_be_bytes(),
        );
        tpm.run_command(&startup);
        assert_eq!(seed_digests(&mut tpm), first);

        tpm.reset(true);
        tpm.run_command(&startup);
        let fresh = seed_digests(&mut tpm);
        for (old, new) in first.iter().zip(&fresh) {
            assert_ne!(old, new);
        }
    }

    #[test]
    fn failure_mode_short_circuits_until_reset() {
        let mut tpm = ready_tpm();
        tpm.inject_fault();
        assert!(tpm.is_failed());

        let cmd = build_command(
            TpmSt::NoSessions,
            TpmCc::GetRandom.to_u32(),
            &[],
            &16u16.to_be_bytes(),
        );
        let degraded = tpm.run_command(&cmd);
        assert_eq!(response_code(&degraded), TpmRc::Failure as u32);
        assert_eq!(degraded.len(), HEADER_SIZE);

        // identical response regardless of input, even garbage
        assert_eq!(tpm.run_command(&[]), degraded);
        assert_eq!(tpm.run_command(&[0xFF; 64]), degraded);

        tpm.reset(false);
        assert!(!tpm.is_failed());
        let startup = build_command(
            TpmSt::NoSessions,
            TpmCc::Startup.to_u32(),
            &[],
            &0u16.to_be_bytes(),
        );
        assert_eq!(response_code(&tpm.run_command(&startup)), 0);
    }

    #[test]
    fn get_random_returns_requested_bytes() {
        let mut tpm = ready_tpm();
        let cmd = build_command(
            TpmSt::NoSessions,
            TpmCc::GetRandom.to_u32(),
            &[],
            &32u16.to_be_bytes(),
        );
        let response = tpm.run_command(&cmd);
        let mut params = CommandReader::new(parameters(&response, 0));
        let bytes = params.get_tpm2b().unwrap();
        assert_eq!(bytes.len(), 32);

        // oversized requests are clamped, not rejected
        let cmd = build_command(
            TpmSt::NoSessions,
            TpmCc::GetRandom.to_u32(),
            &[],
            &1000u16.to_be_bytes(),
        );
        let response = tpm.run_command(&cmd);
        let mut params = CommandReader::new(parameters(&response, 0));
        assert_eq!(params.get_tpm2b().unwrap().len(), 64);
    }

    #[test]
    fn seed_rotation_observed_by_query() {
        let mut tpm = ready_tpm();
        let before = seed_digests(&mut tpm);

        // TPM2_ChangeEPS under the platform hierarchy
        let cmd = build_command(
            TpmSt::Sessions,
            TpmCc::ChangeEps.to_u32(),
            &[tpm_rh::PLATFORM],
            &[],
        );
        assert_eq!(response_code(&tpm.run_command(&cmd)), 0);

        let after = seed_digests(&mut tpm);
        assert_ne!(before[0], after[0], "endorsement seed must rotate");
        assert_eq!(before[1], after[1], "storage seed untouched");
        assert_eq!(before[2], after[2], "platform seed untouched");
    }

    #[test]
    fn hierarchy_commands_require_authorization() {
        let mut tpm = ready_tpm();
        let cmd = build_command(
            TpmSt::NoSessions,
            TpmCc::ChangeEps.to_u32(),
            &[tpm_rh::PLATFORM],
            &[],
        );
        assert_eq!(
            response_code(&tpm.run_command(&cmd)),
            TpmRc::AuthMissing as u32
        );

        // wrong authorization handle
        let cmd = build_command(
            TpmSt::Sessions,
            TpmCc::ChangeEps.to_u32(),
            &[tpm_rh::OWNER],
            &[],
        );
        assert_eq!(
            response_code(&tpm.run_command(&cmd)),
            ResponseCode::with_handle(TpmRc::Value, 1).value()
        );
    }

    #[test]
    fn clear_rotates_storage_seed_only() {
        let mut tpm = ready_tpm();
        let before = seed_digests(&mut tpm);

        let cmd = build_command(
            TpmSt::Sessions,
            TpmCc::Clear.to_u32(),
            &[tpm_rh::LOCKOUT],
            &[],
        );
        assert_eq!(response_code(&tpm.run_command(&cmd)), 0);

        let after = seed_digests(&mut tpm);
        assert_eq!(before[0], after[0]);
        assert_ne!(before[1], after[1]);
        assert_eq!(before[2], after[2]);
    }

    #[test]
    fn pcr_extend_and_read_round_trip() {
        let mut tpm = ready_tpm();

        // read PCR 0 before the extend
        let mut selection = Vec::new();
        selection.extend_from_slice(&1u32.to_be_bytes());
        selection.extend_from_slice(&tpm_alg::SHA256.to_be_bytes());
        selection.push(3);
        selection.extend_from_slice(&[0x01, 0x00, 0x00]); // PCR 0
        let read = build_command(TpmSt::NoSessions, TpmCc::PcrRead.to_u32(), &[], &selection);

        let response = tpm.run_command(&read);
        let mut params = CommandReader::new(parameters(&response, 0));
        let counter_before = params.get_u32().unwrap();

        // TPML_DIGEST_VALUES with one SHA-256 digest
        let mut extend_params = Vec::new();
        extend_params.extend_from_slice(&1u32.to_be_bytes());
        extend_params.extend_from_slice(&tpm_alg::SHA256.to_be_bytes());
        extend_params.extend_from_slice(&[0xAB; DIGEST_SIZE]);
        let extend = build_command(
            TpmSt::Sessions,
            TpmCc::PcrExtend.to_u32(),
            &[0],
            &extend_params,
        );
        assert_eq!(response_code(&tpm.run_command(&extend)), 0);

        let response = tpm.run_command(&read);
        let mut params = CommandReader::new(parameters(&response, 0));
        assert_eq!(params.get_u32().unwrap(), counter_before + 1);
        // skip pcrSelectionOut
        let count = params.get_u32().unwrap();
        for _ in 0..count {
            params.get_u16().unwrap();
            let size = params.get_u8().unwrap();
            params.get_bytes(usize::from(size)).unwrap();
        }
        assert_eq!(params.get_u32().unwrap(), 1);
        let value = params.get_tpm2b().unwrap();

        let mut expected = Sha256::new();
        expected.update([0u8; DIGEST_SIZE]);
        expected.update([0xAB; DIGEST_SIZE]);
        assert_eq!(value, expected.finalize().as_slice());
    }

    #[test]
    fn hash_sequence_matches_one_shot_hash() {
        let mut tpm = ready_tpm();

        let mut start_params = Vec::new();
        start_params.extend_from_slice(&0u16.to_be_bytes()); // empty auth
        start_params.extend_from_slice(&tpm_alg::SHA256.to_be_bytes());
        let start = build_command(
            TpmSt::NoSessions,
            TpmCc::HashSequenceStart.to_u32(),
            &[],
            &start_params,
        );
        let response = tpm.run_command(&start);
        assert_eq!(response_code(&response), 0);
        let handle = u32::from_be_bytes(response[10..14].try_into().unwrap());

        let mut update_params = Vec::new();
        update_params.extend_from_slice(&5u16.to_be_bytes());
        update_params.extend_from_slice(b"hello");
        let update = build_command(
            TpmSt::Sessions,
            TpmCc::SequenceUpdate.to_u32(),
            &[handle],
            &update_params,
        );
        assert_eq!(response_code(&tpm.run_command(&update)), 0);

        let mut complete_params = Vec::new();
        complete_params.extend_from_slice(&6u16.to_be_bytes());
        complete_params.extend_from_slice(b" world");
        complete_params.extend_from_slice(&tpm_rh::NULL.to_be_bytes());
        let complete = build_command(
            TpmSt::Sessions,
            TpmCc::SequenceComplete.to_u32(),
            &[handle],
            &complete_params,
        );
        let response = tpm.run_command(&complete);
        assert_eq!(response_code(&response), 0);
        let mut params = CommandReader::new(parameters(&response, 0));
        let digest = params.get_tpm2b().unwrap();
        assert_eq!(digest, Sha256::digest(b"hello world").as_slice());

        // the sequence object is flushed on completion
        assert_eq!(
            response_code(&tpm.run_command(&complete)),
            TpmRc::ReferenceH0 as u32
        );
    }

    #[test]
    fn session_context_save_and_load() {
        let mut tpm = ready_tpm();

        let mut params = Vec::new();
        params.extend_from_slice(&16u16.to_be_bytes());
        params.extend_from_slice(&[0x11; 16]); // nonceCaller
        params.extend_from_slice(&0u16.to_be_bytes()); // encryptedSalt
        params.push(0x01); // TPM_SE_POLICY
        params.extend_from_slice(&tpm_alg::NULL.to_be_bytes());
        params.extend_from_slice(&tpm_alg::SHA256.to_be_bytes());
        let start = build_command(
            TpmSt::NoSessions,
            TpmCc::StartAuthSession.to_u32(),
            &[tpm_rh::NULL, tpm_rh::NULL],
            &params,
        );
        let response = tpm.run_command(&start);
        assert_eq!(response_code(&response), 0);
        let session = u32::from_be_bytes(response[10..14].try_into().unwrap());

        let save = build_command(TpmSt::NoSessions, TpmCc::ContextSave.to_u32(), &[session], &[]);
        let response = tpm.run_command(&save);
        assert_eq!(response_code(&response), 0);
        let context = parameters(&response, 0).to_vec();

        // the session is gone until the context is loaded back
        let flush_params = session.to_be_bytes();
        let flush = build_command(
            TpmSt::NoSessions,
            TpmCc::FlushContext.to_u32(),
            &[],
            &flush_params,
        );
        assert_eq!(
            response_code(&tpm.run_command(&flush)),
            ResponseCode::with_parameter(TpmRc::Value, 1).value()
        );

        let load = build_command(TpmSt::NoSessions, TpmCc::ContextLoad.to_u32(), &[], &context);
        let response = tpm.run_command(&load);
        assert_eq!(response_code(&response), 0);
        assert_eq!(
            u32::from_be_bytes(response[10..14].try_into().unwrap()),
            session
        );

        // a tampered context blob fails the integrity check
        let mut tampered = context.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        // reload attempt: flush the loaded session first
        assert_eq!(response_code(&tpm.run_command(&flush)), 0);
        let load_tampered = build_command(
            TpmSt::NoSessions,
            TpmCc::ContextLoad.to_u32(),
            &[],
            &tampered,
        );
        assert_eq!(
            response_code(&tpm.run_command(&load_tampered)),
            ResponseCode::with_parameter(TpmRc::Integrity, 1).value()
        );
    }

    #[test]
    fn clear_invalidates_saved_session_contexts() {
        let mut tpm = ready_tpm();

        let mut params = Vec::new();
        params.extend_from_slice(&16u16.to_be_bytes());
        params.extend_from_slice(&[0x22; 16]);
        params.extend_from_slice(&0u16.to_be_bytes());
        params.push(0x00); // TPM_SE_HMAC
        params.extend_from_slice(&tpm_alg::NULL.to_be_bytes());
        params.extend_from_slice(&tpm_alg::SHA256.to_be_bytes());
        let start = build_command(
            TpmSt::NoSessions,
            TpmCc::StartAuthSession.to_u32(),
            &[tpm_rh::NULL, tpm_rh::NULL],
            &params,
        );
        let response = tpm.run_command(&start);
        let session = u32::from_be_bytes(response[10..14].try_into().unwrap());

        let save = build_command(TpmSt::NoSessions, TpmCc::ContextSave.to_u32(), &[session], &[]);
        let response = tpm.run_command(&save);
        let context = parameters(&response, 0).to_vec();

        // rotate the storage seed; the context HMAC key dies with it
        let clear = build_command(
            TpmSt::Sessions,
            TpmCc::Clear.to_u32(),
            &[tpm_rh::PLATFORM],
            &[],
        );
        assert_eq!(response_code(&tpm.run_command(&clear)), 0);

        let load = build_command(TpmSt::NoSessions, TpmCc::ContextLoad.to_u32(), &[], &context);
        assert_eq!(
            response_code(&tpm.run_command(&load)),
            ResponseCode::with_parameter(TpmRc::Integrity, 1).value()
        );
    }

    #[test]
    fn get_capability_lists_commands_with_paging() {
        let mut tpm = ready_tpm();

        let mut params = Vec::new();
        params.extend_from_slice(&tpm_cap::COMMANDS.to_be_bytes());
        params.extend_from_slice(&0u32.to_be_bytes());
        params.extend_from_slice(&5u32.to_be_bytes());
        let cmd = build_command(TpmSt::NoSessions, TpmCc::GetCapability.to_u32(), &[], &params);

        let response = tpm.run_command(&cmd);
        let mut body = CommandReader::new(parameters(&response, 0));
        let more_data = body.get_u8().unwrap();
        assert_eq!(more_data, 1);
        assert_eq!(body.get_u32().unwrap(), tpm_cap::COMMANDS);
        let count = body.get_u32().unwrap();
        assert_eq!(count, 5);
        let first = body.get_u32().unwrap();
        assert_eq!(first & 0xFFFF, TpmCc::ChangeEps.to_u32() & 0xFFFF);
    }

    #[test]
    fn trailing_parameter_bytes_are_rejected() {
        let mut tpm = ready_tpm();
        let mut params = 16u16.to_be_bytes().to_vec();
        params.push(0xEE); // stray octet
        let cmd = build_command(TpmSt::NoSessions, TpmCc::GetRandom.to_u32(), &[], &params);
        assert_eq!(response_code(&tpm.run_command(&cmd)), TpmRc::Size as u32);
    }

    #[test]
    fn rejected_command_leaves_state_untouched() {
        let mut tpm = ready_tpm();
        let before = seed_digests(&mut tpm);

        // TPM2_ChangeEPS with a stray octet after the (empty) parameter
        // area: rejected with TPM_RC_SIZE, and no seed rotates
        let cmd = build_command(
            TpmSt::Sessions,
            TpmCc::ChangeEps.to_u32(),
            &[tpm_rh::PLATFORM],
            &[0xEE],
        );
        assert_eq!(response_code(&tpm.run_command(&cmd)), TpmRc::Size as u32);
        assert_eq!(seed_digests(&mut tpm), before);
    }

    #[test]
    fn pcr_extend_bad_list_entry_extends_nothing() {
        let mut tpm = ready_tpm();

        let mut selection = Vec::new();
        selection.extend_from_slice(&1u32.to_be_bytes());
        selection.extend_from_slice(&tpm_alg::SHA256.to_be_bytes());
        selection.push(3);
        selection.extend_from_slice(&[0x01, 0x00, 0x00]); // PCR 0
        let read = build_command(TpmSt::NoSessions, TpmCc::PcrRead.to_u32(), &[], &selection);

        // TPML_DIGEST_VALUES: a SHA-256 entry followed by an unsupported
        // algorithm; the whole command must be refused
        let mut extend_params = Vec::new();
        extend_params.extend_from_slice(&2u32.to_be_bytes());
        extend_params.extend_from_slice(&tpm_alg::SHA256.to_be_bytes());
        extend_params.extend_from_slice(&[0xCD; DIGEST_SIZE]);
        extend_params.extend_from_slice(&0x0004u16.to_be_bytes()); // TPM_ALG_SHA1
        extend_params.extend_from_slice(&[0xCD; 20]);
        let extend = build_command(
            TpmSt::Sessions,
            TpmCc::PcrExtend.to_u32(),
            &[0],
            &extend_params,
        );
        assert_eq!(
            response_code(&tpm.run_command(&extend)),
            ResponseCode::with_parameter(TpmRc::Hash, 1).value()
        );

        // PCR 0 is still zero and the update counter never moved
        let response = tpm.run_command(&read);
        let mut params = CommandReader::new(parameters(&response, 0));
        assert_eq!(params.get_u32().unwrap(), 0);
        let count = params.get_u32().unwrap();
        for _ in 0..count {
            params.get_u16().unwrap();
            let size = params.get_u8().unwrap();
            params.get_bytes(usize::from(size)).unwrap();
        }
        assert_eq!(params.get_u32().unwrap(), 1);
        assert_eq!(params.get_tpm2b().unwrap(), &[0u8; DIGEST_SIZE]);
    }

    #[test]
    fn seed_export_import_round_trip() {
        let mut tpm = ready_tpm();
        let digests = seed_digests(&mut tpm);
        let blob = tpm.export_seeds().unwrap();

        let mut other = TpmSimulator::new();
        other.import_seeds(&blob).unwrap();
        other.reset(false);
        let startup = build_command(
            TpmSt::NoSessions,
            TpmCc::Startup.to_u32(),
            &[],
            &0u16.to_be_bytes(),
        );
        other.run_command(&startup);

        assert_eq!(seed_digests(&mut other), digests);
    }
}
