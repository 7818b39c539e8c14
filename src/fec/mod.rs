// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Forward error correction codec over GF(256) (spec §4.C).
//!
//! A FEC block is `k` primary fragments followed by up to `k` secondary
//! fragments, all of equal size. The encoder side (the adjacent radio
//! pipeline, out of scope here) XORs weighted primary fragments into each
//! secondary fragment using the Vandermonde-like coefficient
//! `inverse((128 + row) XOR col)`. The decoder below reverses that: given
//! enough secondary fragments to cover the missing primaries, it reduces the
//! secondary fragments down to just the contribution of the missing
//! primaries, then inverts a small matrix to solve for them.

mod block;

use std::fmt;

pub use block::{FragmentStatus, RxQueue};

use crate::gf256;
use crate::matrix::{self, SingularMatrix};

/// Errors produced by the FEC decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecError {
    /// Fewer secondary fragments were received than primary fragments are missing.
    InsufficientSecondary {
        /// Number of missing primary fragments.
        missing: usize,
        /// Number of received secondary fragments.
        available: usize,
    },
    /// The resolve-step matrix was singular (should not happen for a
    /// well-formed block, but the encoder's coefficients are trusted input).
    SingularResolveMatrix,
    /// A block id referenced a block older than the reorder queue's drained head.
    BlockTooOld {
        /// The block id that was requested.
        requested: u64,
        /// The oldest block id still tracked.
        oldest_tracked: u64,
    },
}

impl fmt::Display for FecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientSecondary { missing, available } => write!(
                f,
                "insufficient secondary fragments: {missing} primary fragments missing, only {available} secondary available"
            ),
            Self::SingularResolveMatrix => write!(f, "FEC resolve matrix is singular"),
            Self::BlockTooOld {
                requested,
                oldest_tracked,
            } => write!(
                f,
                "block {requested} is older than the oldest tracked block {oldest_tracked}"
            ),
        }
    }
}

impl std::error::Error for FecError {}

impl From<SingularMatrix> for FecError {
    fn from(_: SingularMatrix) -> Self {
        Self::SingularResolveMatrix
    }
}

/// The encoder-side offset added before XORing row/column indices to form a
/// GF(256) coefficient. Must match the encoder's convention exactly (spec
/// §4.C.3/§6).
pub const ENCODER_OFFSET: u8 = 128;

/// A decodable block of equal-sized fragments: the first `k` are primary,
/// any further fragments (up to `k`) are secondary.
pub struct FecBlock {
    /// Number of primary fragments.
    k: usize,
    /// Fragment size in bytes; every fragment is exactly this long.
    fragment_size: usize,
    /// Row-major storage: `fragments[i * fragment_size .. (i+1) * fragment_size]`.
    fragments: Vec<u8>,
    /// Per-fragment availability, parallel to `fragments`.
    status: Vec<FragmentStatus>,
    /// For each secondary slot, the block-relative row index it was encoded
    /// at (the encoder may not send secondary fragments in row order).
    secondary_row: Vec<u8>,
}

impl FecBlock {
    /// Allocate an empty block with `k` primary and `m - k` secondary slots,
    /// all initially marked unavailable.
    #[must_use]
    pub fn new(k: usize, m: usize, fragment_size: usize) -> Self {
        assert!(m >= k, "a FEC block must have at least as many slots as primary fragments");
        Self {
            k,
            fragment_size,
            fragments: vec![0u8; m * fragment_size],
            status: vec![FragmentStatus::Unavailable; m],
            secondary_row: vec![0u8; m - k],
        }
    }

    fn fragment(&self, index: usize) -> &[u8] {
        let start = index * self.fragment_size;
        &self.fragments[start..start + self.fragment_size]
    }

    fn fragment_mut(&mut self, index: usize) -> &mut [u8] {
        let start = index * self.fragment_size;
        &mut self.fragments[start..start + self.fragment_size]
    }

    /// Store a received primary fragment at `index` (`0..k`).
    pub fn put_primary(&mut self, index: usize, data: &[u8]) {
        assert!(index < self.k);
        assert_eq!(data.len(), self.fragment_size);
        self.fragment_mut(index).copy_from_slice(data);
        self.status[index] = FragmentStatus::Available;
    }

    /// Store a received secondary fragment at slot `slot` (`0..m-k`), tagging
    /// it with the original encoder row it was produced at.
    pub fn put_secondary(&mut self, slot: usize, row: u8, data: &[u8]) {
        let index = self.k + slot;
        assert_eq!(data.len(), self.fragment_size);
        self.fragment_mut(index).copy_from_slice(data);
        self.status[index] = FragmentStatus::Available;
        self.secondary_row[slot] = row;
    }

    /// True once every primary fragment is available (originally or via
    /// reconstruction).
    #[must_use]
    pub fn fully_recovered(&self) -> bool {
        self.status[..self.k]
            .iter()
            .all(|s| *s == FragmentStatus::Available)
    }

    fn missing_primary_indices(&self) -> Vec<usize> {
        (0..self.k)
            .filter(|&i| self.status[i] == FragmentStatus::Unavailable)
            .collect()
    }

    fn received_secondary_slots(&self) -> Vec<usize> {
        (self.k..self.fragments.len() / self.fragment_size)
            .filter(|&i| self.status[i] == FragmentStatus::Available)
            .map(|i| i - self.k)
            .collect()
    }

    /// Attempt reconstruction of all missing primary fragments (spec §4.C.3-5).
    ///
    /// Returns the indices of fragments reconstructed by this call (empty if
    /// nothing was missing). Leaves the block untouched on error.
    pub fn reconstruct(&mut self) -> Result<Vec<usize>, FecError> {
        let missing = self.missing_primary_indices();
        if missing.is_empty() {
            return Ok(Vec::new());
        }
        let secondary_slots = self.received_secondary_slots();
        if secondary_slots.len() < missing.len() {
            return Err(FecError::InsufficientSecondary {
                missing: missing.len(),
                available: secondary_slots.len(),
            });
        }

        let s = self.fragment_size;
        let f = missing.len();

        // Reduce step: subtract every received primary's contribution from
        // every received secondary fragment, leaving only the missing
        // primaries' contributions in the secondary vector we'll resolve.
        let mut reduced: Vec<u8> = vec![0u8; f * s];
        for (out_row, &slot) in secondary_slots.iter().take(f).enumerate() {
            reduced[out_row * s..(out_row + 1) * s].copy_from_slice(self.fragment(self.k + slot));
        }
        for c in 0..self.k {
            if self.status[c] != FragmentStatus::Available {
                continue;
            }
            let primary_col = self.fragment(c);
            for (out_row, &slot) in secondary_slots.iter().take(f).enumerate() {
                let r = self.secondary_row[slot];
                let coeff = gf256::inverse(((r as u16 + ENCODER_OFFSET as u16) as u8) ^ (c as u8));
                gf256::madd_region(
                    &mut reduced[out_row * s..(out_row + 1) * s],
                    primary_col,
                    coeff,
                    s,
                );
            }
        }

        // Resolve step: invert the f x f coefficient matrix and multiply it
        // by the reduced secondary vector to recover the missing primaries.
        let mut resolve = vec![0u8; f * f];
        for (row, &slot) in secondary_slots.iter().take(f).enumerate() {
            let r = self.secondary_row[slot];
            for (col, &erased) in missing.iter().enumerate() {
                resolve[row * f + col] =
                    gf256::inverse(((r as u16 + ENCODER_OFFSET as u16) as u8) ^ (erased as u8));
            }
        }
        matrix::invert(&mut resolve, f)?;

        let mut recovered = vec![0u8; f * s];
        for col in 0..f {
            let coeff_col: Vec<u8> = (0..f).map(|row| resolve[row * f + col]).collect();
            for row in 0..f {
                let c = coeff_col[row];
                let src_row = &reduced[row * s..(row + 1) * s];
                let dst = &mut recovered[col * s..(col + 1) * s];
                if row == 0 {
                    gf256::mul_region(dst, src_row, c, s);
                } else {
                    gf256::madd_region(dst, src_row, c, s);
                }
            }
        }

        for (col, &index) in missing.iter().enumerate() {
            let data = recovered[col * s..(col + 1) * s].to_vec();
            self.fragment_mut(index).copy_from_slice(&data);
            self.status[index] = FragmentStatus::Available;
        }

        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode `k` primary fragments into `m - k` secondary fragments the way
    /// the (out-of-scope) encoder does, so the decoder tests are self-contained.
    fn encode(primary: &[Vec<u8>], num_secondary: usize, s: usize) -> Vec<Vec<u8>> {
        let k = primary.len();
        (0..num_secondary)
            .map(|row| {
                let mut out = vec![0u8; s];
                for (c, p) in primary.iter().enumerate() {
                    let coeff =
                        gf256::inverse(((row as u16 + ENCODER_OFFSET as u16) as u8) ^ (c as u8));
                    gf256::madd_region(&mut out, p, coeff, s);
                }
                out
            })
            .collect()
    }

    #[test]
    fn reconstructs_single_missing_primary() {
        let k = 3;
        let s = 8;
        let primary: Vec<Vec<u8>> = vec![
            vec![1, 2, 3, 4, 5, 6, 7, 8],
            vec![9, 10, 11, 12, 13, 14, 15, 16],
            vec![17, 18, 19, 20, 21, 22, 23, 24],
        ];
        let secondary = encode(&primary, 2, s);

        let mut block = FecBlock::new(k, k + 2, s);
        block.put_primary(0, &primary[0]);
        // primary[1] missing
        block.put_primary(2, &primary[2]);
        block.put_secondary(0, 0, &secondary[0]);
        block.put_secondary(1, 1, &secondary[1]);

        let recovered = block.reconstruct().expect("should reconstruct");
        assert_eq!(recovered, vec![1]);
        assert!(block.fully_recovered());
        assert_eq!(block.fragment(1), primary[1].as_slice());
    }

    #[test]
    fn reconstructs_two_missing_primaries() {
        let k = 4;
        let s = 4;
        let primary: Vec<Vec<u8>> = vec![
            vec![1, 2, 3, 4],
            vec![5, 6, 7, 8],
            vec![9, 10, 11, 12],
            vec![13, 14, 15, 16],
        ];
        let secondary = encode(&primary, 3, s);

        let mut block = FecBlock::new(k, k + 3, s);
        // primary[0] and primary[2] missing
        block.put_primary(1, &primary[1]);
        block.put_primary(3, &primary[3]);
        block.put_secondary(0, 0, &secondary[0]);
        block.put_secondary(1, 1, &secondary[1]);
        block.put_secondary(2, 2, &secondary[2]);

        let mut recovered = block.reconstruct().expect("should reconstruct");
        recovered.sort_unstable();
        assert_eq!(recovered, vec![0, 2]);
        assert_eq!(block.fragment(0), primary[0].as_slice());
        assert_eq!(block.fragment(2), primary[2].as_slice());
    }

    #[test]
    fn no_missing_fragments_is_a_no_op() {
        let k = 2;
        let s = 4;
        let mut block = FecBlock::new(k, k, s);
        block.put_primary(0, &[1, 2, 3, 4]);
        block.put_primary(1, &[5, 6, 7, 8]);
        assert_eq!(block.reconstruct().unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn insufficient_secondary_fragments_is_rejected() {
        let k = 3;
        let s = 4;
        let primary: Vec<Vec<u8>> = vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8], vec![9, 10, 11, 12]];
        let secondary = encode(&primary, 1, s);

        let mut block = FecBlock::new(k, k + 1, s);
        // Two primaries missing but only one secondary available.
        block.put_primary(1, &primary[1]);
        block.put_secondary(0, 0, &secondary[0]);

        let err = block.reconstruct().unwrap_err();
        assert_eq!(
            err,
            FecError::InsufficientSecondary {
                missing: 2,
                available: 1
            }
        );
    }
}
