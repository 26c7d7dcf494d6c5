//! Code-to-id matching under the four in-plane rotations.

use std::collections::HashMap;

use crate::Dictionary;

/// Result of matching an observed code against a dictionary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    pub id: u32,
    /// Quarter turns such that `observed == rotate_code_u64(dict_code, rotation)`.
    pub rotation: u8,
    pub hamming: u8,
}

/// Matcher with every rotation of every code precomputed.
///
/// Exact reads hit a hash map; reads with bit errors fall back to a linear
/// scan bounded by `max_hamming`. Ties resolve to the lowest id, then the
/// lowest rotation, so results do not depend on hash order.
#[derive(Clone, Debug)]
pub struct Matcher {
    dict: Dictionary,
    max_hamming: u8,
    rotated: Vec<[u64; 4]>,
    exact: HashMap<u64, (u32, u8)>,
}

impl Matcher {
    pub fn new(dict: Dictionary, max_hamming: u8) -> Self {
        debug_assert!(dict.bit_count() <= 64);
        let n = dict.marker_size;
        let rotated: Vec<[u64; 4]> = dict
            .codes
            .iter()
            .map(|&code| [0u8, 1, 2, 3].map(|r| rotate_code_u64(code, n, r)))
            .collect();

        let mut exact = HashMap::with_capacity(rotated.len() * 4);
        for (id, rots) in rotated.iter().enumerate() {
            for (rot, &code) in rots.iter().enumerate() {
                exact.entry(code).or_insert((id as u32, rot as u8));
            }
        }

        Self {
            dict,
            max_hamming,
            rotated,
            exact,
        }
    }

    #[inline]
    pub fn dictionary(&self) -> Dictionary {
        self.dict
    }

    #[inline]
    pub fn max_hamming(&self) -> u8 {
        self.max_hamming
    }

    /// Best match within `max_hamming`, if any.
    pub fn match_code(&self, observed: u64) -> Option<Match> {
        if let Some(&(id, rotation)) = self.exact.get(&observed) {
            return Some(Match {
                id,
                rotation,
                hamming: 0,
            });
        }
        if self.max_hamming == 0 {
            return None;
        }

        let mut best: Option<Match> = None;
        for (id, rots) in self.rotated.iter().enumerate() {
            for (rot, &code) in rots.iter().enumerate() {
                let hamming = (observed ^ code).count_ones() as u8;
                if hamming > self.max_hamming {
                    continue;
                }
                if best.is_none_or(|b| hamming < b.hamming) {
                    best = Some(Match {
                        id: id as u32,
                        rotation: rot as u8,
                        hamming,
                    });
                }
            }
        }
        best
    }
}

/// Rotate an `n x n` row-major code by `rot` quarter turns clockwise.
///
/// One clockwise turn maps `out[y][x] = in[n - 1 - x][y]`.
pub fn rotate_code_u64(code: u64, n: usize, rot: u8) -> u64 {
    let mut cur = code;
    for _ in 0..(rot & 3) {
        let mut next = 0u64;
        for y in 0..n {
            for x in 0..n {
                let src = (n - 1 - x) * n + y;
                next |= ((cur >> src) & 1) << (y * n + x);
            }
        }
        cur = next;
    }
    cur
}
