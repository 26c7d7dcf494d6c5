//! Dictionary metadata and packed marker codes.

/// A fixed ArUco-style dictionary.
///
/// Code layout: one `u64` per marker id holding the inner
/// `marker_size x marker_size` bits, row-major with bit 0 at the top-left
/// cell (`idx = y * marker_size + x`) and **white = 1**.
#[derive(Clone, Copy, Debug)]
pub struct Dictionary {
    /// Canonical name, e.g. `DICT_4X4_50`.
    pub name: &'static str,
    /// Marker side length (number of inner bits per side).
    pub marker_size: usize,
    /// Maximum error-correcting Hamming distance supported by the dictionary.
    pub max_correction_bits: u8,
    pub codes: &'static [u64],
}

impl Dictionary {
    /// Total number of inner bits per marker.
    #[inline]
    pub fn bit_count(&self) -> usize {
        self.marker_size * self.marker_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Code for `id`, if the dictionary has one.
    pub fn code(&self, id: u32) -> Option<u64> {
        self.codes.get(id as usize).copied()
    }

    /// Color of inner cell `(x, y)` of marker `id`: `true` for white.
    pub fn is_white(&self, id: u32, x: usize, y: usize) -> Option<bool> {
        if x >= self.marker_size || y >= self.marker_size {
            return None;
        }
        let code = self.code(id)?;
        Some((code >> (y * self.marker_size + x)) & 1 == 1)
    }
}
