/* SPDX-License-Identifier: MIT */

//! Internal fault reporting.
//!
//! Faults are distinct from TPM response codes: a response code is an
//! in-band outcome encoded in the response buffer, while a fault means the
//! core can no longer trust its own state. The dispatcher converts a fault
//! into the sticky failure mode; faults never cross the `run_command`
//! boundary as panics.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// A handler produced a response larger than the implementation limit
    ResponseOverflow,
    /// A session or object table slot was found in an impossible state
    TableCorrupt,
    /// Persistent seed data failed to unmarshal
    PersistentDataCorrupt,
    /// A keyed crypto primitive rejected its key material
    CryptoFailure,
}

impl Fault {
    pub fn response_overflow() -> Self {
        Fault::ResponseOverflow
    }

    pub fn table_corrupt() -> Self {
        Fault::TableCorrupt
    }

    pub fn persistent_data_corrupt() -> Self {
        Fault::PersistentDataCorrupt
    }

    pub fn crypto_failure() -> Self {
        Fault::CryptoFailure
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::ResponseOverflow => write!(f, "response exceeds implementation limit"),
            Fault::TableCorrupt => write!(f, "session/object table corrupted"),
            Fault::PersistentDataCorrupt => write!(f, "persistent data corrupted"),
            Fault::CryptoFailure => write!(f, "keyed crypto primitive failed to initialize"),
        }
    }
}
