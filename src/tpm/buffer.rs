/* SPDX-License-Identifier: MIT */

//! Big-endian readers and writers for the TPM 2.0 wire format.
//!
//! Commands are parsed from a borrowed slice; responses are built into an
//! owned buffer that is handed back to the caller by value.

use crate::tpm::constants::TpmRc;

/// Cursor over a received command buffer. All reads fail with
/// TPM_RC_INSUFFICIENT once the buffer is exhausted.
#[derive(Debug)]
pub struct CommandReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> CommandReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn get_u8(&mut self) -> Result<u8, TpmRc> {
        let b = self.get_bytes(1)?;
        Ok(b[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, TpmRc> {
        let b = self.get_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, TpmRc> {
        let b = self.get_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, TpmRc> {
        let b = self.get_bytes(8)?;
        let mut v = [0u8; 8];
        v.copy_from_slice(b);
        Ok(u64::from_be_bytes(v))
    }

    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8], TpmRc> {
        let end = self.pos.checked_add(len).ok_or(TpmRc::Insufficient)?;
        if end > self.data.len() {
            return Err(TpmRc::Insufficient);
        }
        let v = &self.data[self.pos..end];
        self.pos = end;
        Ok(v)
    }

    /// Read a TPM2B: 16-bit size prefix followed by that many bytes
    pub fn get_tpm2b(&mut self) -> Result<&'a [u8], TpmRc> {
        let size = self.get_u16()? as usize;
        self.get_bytes(size)
    }

    /// Split off the next `len` bytes as an independent reader
    pub fn sub_reader(&mut self, len: usize) -> Result<CommandReader<'a>, TpmRc> {
        Ok(CommandReader::new(self.get_bytes(len)?))
    }
}

/// Builder for a response buffer
#[derive(Debug, Default)]
pub struct ResponseWriter {
    data: Vec<u8>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Write a TPM2B: 16-bit size prefix followed by the data
    pub fn put_tpm2b(&mut self, data: &[u8]) {
        debug_assert!(data.len() <= usize::from(u16::MAX));
        self.put_u16(data.len() as u16);
        self.put_bytes(data);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Patch a u32 written earlier, used for the header size field
    pub fn update_u32(&mut self, pos: usize, v: u32) {
        self.data[pos..pos + 4].copy_from_slice(&v.to_be_bytes());
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}
