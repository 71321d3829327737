/* SPDX-License-Identifier: MIT */

//! A software TPM 2.0 command core.
//!
//! The platform boundary is two entry points: [`TpmSimulator::reset`]
//! clears volatile state (optionally re-manufacturing the hierarchy
//! seeds), and [`TpmSimulator::run_command`] takes a raw byte-encoded
//! TPM command buffer and returns the raw response buffer. Every
//! outcome, including malformed input and unknown command codes, is
//! encoded in the response; nothing panics across the boundary.
//!
//! Persistent state is the three hierarchy primary seeds (Endorsement,
//! Storage, Platform). Storing them and serializing access to the
//! simulator are the caller's job; a `TpmSimulator` performs no
//! internal locking and processes exactly one command at a time.
//!
//! ```
//! use tpmsim::TpmSimulator;
//!
//! let mut tpm = TpmSimulator::new();
//! tpm.reset(true); // manufacture
//!
//! // TPM2_Startup(TPM_SU_CLEAR)
//! let startup = [0x80, 0x01, 0, 0, 0, 12, 0, 0, 0x01, 0x44, 0, 0];
//! let response = tpm.run_command(&startup);
//! assert_eq!(&response[6..10], &[0, 0, 0, 0]);
//! ```

pub mod error;
pub mod tpm;

pub use error::Fault;
pub use tpm::TpmSimulator;
