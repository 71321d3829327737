/* SPDX-License-Identifier: MIT */

//! Hierarchy primary seeds and the values derived from them.
//!
//! Each hierarchy (Endorsement, Storage, Platform) owns a primary seed and
//! a proof value. The proof is derived from the seed with KDFa
//! (SP800-108 counter mode, HMAC-SHA-256), so rotating a seed also rotates
//! the proof and invalidates anything integrity-protected under it.
//!
//! The marshalled form of [`PersistentData`] is the only serialized
//! persistent structure: the three seeds in fixed order, each as a 16-bit
//! big-endian length followed by the seed bytes. Writing that blob to
//! stable storage is the platform's job, not the core's.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::Fault;
use crate::tpm::constants::{tpm_rh, DIGEST_SIZE, PROOF_SIZE, SEED_SIZE};

type HmacSha256 = Hmac<Sha256>;

/// The three seeded hierarchies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hierarchy {
    Endorsement,
    Storage,
    Platform,
}

impl Hierarchy {
    /// Permanent handle of the hierarchy authorization
    pub fn handle(self) -> u32 {
        match self {
            Hierarchy::Endorsement => tpm_rh::ENDORSEMENT,
            Hierarchy::Storage => tpm_rh::OWNER,
            Hierarchy::Platform => tpm_rh::PLATFORM,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HierarchySeed {
    seed: Vec<u8>,
    proof: [u8; PROOF_SIZE],
}

impl HierarchySeed {
    fn generate(hierarchy: Hierarchy, rng: &mut dyn RngCore) -> Result<Self, Fault> {
        let mut seed = vec![0u8; SEED_SIZE];
        rng.fill_bytes(&mut seed);
        let proof = derive_proof(&seed, hierarchy)?;
        Ok(Self { seed, proof })
    }

    fn from_seed(seed: Vec<u8>, hierarchy: Hierarchy) -> Result<Self, Fault> {
        let proof = derive_proof(&seed, hierarchy)?;
        Ok(Self { seed, proof })
    }
}

/// State that survives warm resets: one seed per hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentData {
    endorsement: HierarchySeed,
    storage: HierarchySeed,
    platform: HierarchySeed,
}

impl PersistentData {
    /// Generate all three seeds from fresh randomness (manufacture reset)
    pub fn manufacture(rng: &mut dyn RngCore) -> Result<Self, Fault> {
        Ok(Self {
            endorsement: HierarchySeed::generate(Hierarchy::Endorsement, rng)?,
            storage: HierarchySeed::generate(Hierarchy::Storage, rng)?,
            platform: HierarchySeed::generate(Hierarchy::Platform, rng)?,
        })
    }

    /// Replace one hierarchy seed, e.g. for TPM2_ChangeEPS or TPM2_Clear
    pub fn regenerate(&mut self, hierarchy: Hierarchy, rng: &mut dyn RngCore) -> Result<(), Fault> {
        let fresh = HierarchySeed::generate(hierarchy, rng)?;
        *self.slot_mut(hierarchy) = fresh;
        log::info!("hierarchy seed regenerated: {:?}", hierarchy);
        Ok(())
    }

    pub fn seed(&self, hierarchy: Hierarchy) -> &[u8] {
        &self.slot(hierarchy).seed
    }

    pub fn proof(&self, hierarchy: Hierarchy) -> &[u8; PROOF_SIZE] {
        &self.slot(hierarchy).proof
    }

    /// SHA-256 digest of a seed; the only form in which seed state may
    /// leave the core.
    pub fn seed_digest(&self, hierarchy: Hierarchy) -> [u8; DIGEST_SIZE] {
        let digest = Sha256::digest(&self.slot(hierarchy).seed);
        digest.into()
    }

    /// Serialize the seeds: three 16-bit length-prefixed buffers in
    /// Endorsement, Storage, Platform order.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 * (2 + SEED_SIZE));
        for hierarchy in [Hierarchy::Endorsement, Hierarchy::Storage, Hierarchy::Platform] {
            let seed = &self.slot(hierarchy).seed;
            out.extend_from_slice(&(seed.len() as u16).to_be_bytes());
            out.extend_from_slice(seed);
        }
        out
    }

    /// Rebuild from the marshalled form. Proofs are re-derived, not stored.
    pub fn unmarshal(data: &[u8]) -> Result<Self, Fault> {
        let mut pos = 0usize;
        let mut take = |hierarchy: Hierarchy| -> Result<HierarchySeed, Fault> {
            let len_end = pos.checked_add(2).ok_or_else(Fault::persistent_data_corrupt)?;
            if len_end > data.len() {
                return Err(Fault::persistent_data_corrupt());
            }
            let len = usize::from(u16::from_be_bytes([data[pos], data[pos + 1]]));
            let end = len_end
                .checked_add(len)
                .ok_or_else(Fault::persistent_data_corrupt)?;
            if len == 0 || end > data.len() {
                return Err(Fault::persistent_data_corrupt());
            }
            let seed = data[len_end..end].to_vec();
            pos = end;
            HierarchySeed::from_seed(seed, hierarchy)
        };

        let endorsement = take(Hierarchy::Endorsement)?;
        let storage = take(Hierarchy::Storage)?;
        let platform = take(Hierarchy::Platform)?;
        if pos != data.len() {
            return Err(Fault::persistent_data_corrupt());
        }

        Ok(Self {
            endorsement,
            storage,
            platform,
        })
    }

    fn slot(&self, hierarchy: Hierarchy) -> &HierarchySeed {
        match hierarchy {
            Hierarchy::Endorsement => &self.endorsement,
            Hierarchy::Storage => &self.storage,
            Hierarchy::Platform => &self.platform,
        }
    }

    fn slot_mut(&mut self, hierarchy: Hierarchy) -> &mut HierarchySeed {
        match hierarchy {
            Hierarchy::Endorsement => &mut self.endorsement,
            Hierarchy::Storage => &mut self.storage,
            Hierarchy::Platform => &mut self.platform,
        }
    }
}

/// KDFa from TPM 2.0 Part 1: SP800-108 counter-mode KDF with HMAC-SHA-256.
///
/// Each iteration computes
/// HMAC(key, counter || label || 0x00 || context_u || context_v || bits)
/// with all integers big-endian.
pub fn kdfa(
    key: &[u8],
    label: &[u8],
    context_u: &[u8],
    context_v: &[u8],
    bits: u32,
) -> Result<Vec<u8>, Fault> {
    let bytes = (bits as usize + 7) / 8;
    let mut out = Vec::with_capacity(bytes);
    let mut counter: u32 = 0;

    while out.len() < bytes {
        counter += 1;
        let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Fault::crypto_failure())?;
        mac.update(&counter.to_be_bytes());
        mac.update(label);
        mac.update(&[0u8]);
        mac.update(context_u);
        mac.update(context_v);
        mac.update(&bits.to_be_bytes());
        out.extend_from_slice(mac.finalize().into_bytes().as_slice());
    }

    out.truncate(bytes);
    Ok(out)
}

fn derive_proof(seed: &[u8], hierarchy: Hierarchy) -> Result<[u8; PROOF_SIZE], Fault> {
    let handle = hierarchy.handle().to_be_bytes();
    let derived = kdfa(seed, b"PROOF", &handle, &[], (PROOF_SIZE * 8) as u32)?;
    let mut proof = [0u8; PROOF_SIZE];
    proof.copy_from_slice(&derived);
    Ok(proof)
}
