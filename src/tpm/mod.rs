/* SPDX-License-Identifier: MIT */

/// Wire-format readers and writers
pub mod buffer;
/// Command handlers and dispatch table
pub(crate) mod commands;
/// Command codes, response codes, tags and limits
pub mod constants;
/// Hierarchy seeds and derived proofs
pub mod seeds;
/// The command core
pub mod simulator;
/// Volatile state: DRBG, PCRs, sessions, sequences
pub mod state;

pub use simulator::TpmSimulator;
