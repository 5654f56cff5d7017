//! SIMD-accelerated block scanning.
//!
//! Two primitives drive posting traversal:
//!
//! - **Skip scan**: the first index whose doc-diff is `>=` a target, over
//!   16-bit or 32-bit lanes, one block at a time.
//! - **Live scan**: the first non-zero value byte, used to step over
//!   tombstones.
//!
//! Supports:
//! - **AVX2** on x86_64 (runtime detected)
//! - **NEON** on aarch64
//! - **Scalar fallback** everywhere else

// ============================================================================
// AVX2 intrinsics for x86_64
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[allow(unsafe_op_in_unsafe_fn)]
mod avx2 {
    use std::arch::x86_64::*;

    /// First index >= `start` with `data[i] >= target`, 16 lanes at a time.
    ///
    /// AVX2 has no unsigned 16-bit compare; biasing both sides by 0x8000
    /// turns the signed compare into the unsigned one.
    #[target_feature(enable = "avx2")]
    pub unsafe fn find_first_ge_u16(data: &[u16], start: usize, target: u16) -> usize {
        const WIDTH: usize = 16;
        let len = data.len();
        let mut at = start;

        let bias = _mm256_set1_epi16(i16::MIN);
        let target_biased = _mm256_add_epi16(_mm256_set1_epi16(target as i16), bias);

        while at + WIDTH <= len {
            // Diffs ascend within a block: if the last lane is still below
            // the target the whole group is.
            if data[at + WIDTH - 1] < target {
                at += WIDTH;
                continue;
            }
            let lanes = _mm256_loadu_si256(data.as_ptr().add(at) as *const __m256i);
            let lanes_biased = _mm256_add_epi16(lanes, bias);
            // Lanes still below the target compare true.
            let below = _mm256_cmpgt_epi16(target_biased, lanes_biased);
            let mask = _mm256_movemask_epi8(below);
            if mask != -1 {
                return at + ((!mask).trailing_zeros() as usize) / 2;
            }
            at += WIDTH;
        }

        while at < len && data[at] < target {
            at += 1;
        }
        at
    }

    /// First index >= `start` with `data[i] >= target`, 8 lanes at a time.
    ///
    /// Unsigned compare via `max_epu32`: `a >= b` iff `max(a, b) == a`.
    #[target_feature(enable = "avx2")]
    pub unsafe fn find_first_ge_u32(data: &[u32], start: usize, target: u32) -> usize {
        const WIDTH: usize = 8;
        let len = data.len();
        let mut at = start;

        let target_vec = _mm256_set1_epi32(target as i32);

        while at + WIDTH <= len {
            if data[at + WIDTH - 1] < target {
                at += WIDTH;
                continue;
            }
            let lanes = _mm256_loadu_si256(data.as_ptr().add(at) as *const __m256i);
            let max = _mm256_max_epu32(lanes, target_vec);
            let ge = _mm256_cmpeq_epi32(max, lanes);
            let mask = _mm256_movemask_ps(_mm256_castsi256_ps(ge));
            if mask != 0 {
                return at + mask.trailing_zeros() as usize;
            }
            at += WIDTH;
        }

        while at < len && data[at] < target {
            at += 1;
        }
        at
    }

    /// First index >= `start` with a non-zero byte, 32 lanes at a time.
    #[target_feature(enable = "avx2")]
    pub unsafe fn find_first_nonzero(values: &[u8], start: usize) -> usize {
        const WIDTH: usize = 32;
        let len = values.len();
        let mut at = start;

        let zero = _mm256_setzero_si256();
        while at + WIDTH <= len {
            let lanes = _mm256_loadu_si256(values.as_ptr().add(at) as *const __m256i);
            let is_zero = _mm256_cmpeq_epi8(lanes, zero);
            let mask = _mm256_movemask_epi8(is_zero) as u32;
            if mask != u32::MAX {
                return at + (!mask).trailing_zeros() as usize;
            }
            at += WIDTH;
        }

        while at < len && values[at] == 0 {
            at += 1;
        }
        at
    }

    /// Check if AVX2 is available at runtime.
    #[inline]
    pub fn is_available() -> bool {
        is_x86_feature_detected!("avx2")
    }
}

// ============================================================================
// NEON intrinsics for aarch64
// ============================================================================

#[cfg(target_arch = "aarch64")]
#[allow(unsafe_op_in_unsafe_fn)]
mod neon {
    use std::arch::aarch64::*;

    /// First index >= `start` with `data[i] >= target`, 8 lanes at a time.
    #[target_feature(enable = "neon")]
    pub unsafe fn find_first_ge_u16(data: &[u16], start: usize, target: u16) -> usize {
        const WIDTH: usize = 8;
        let len = data.len();
        let mut at = start;

        let target_vec = vdupq_n_u16(target);
        while at + WIDTH <= len {
            let lanes = vld1q_u16(data.as_ptr().add(at));
            let ge = vcgeq_u16(lanes, target_vec);
            if vmaxvq_u16(ge) != 0 {
                for i in 0..WIDTH {
                    if data[at + i] >= target {
                        return at + i;
                    }
                }
            }
            at += WIDTH;
        }

        while at < len && data[at] < target {
            at += 1;
        }
        at
    }

    /// First index >= `start` with `data[i] >= target`, 4 lanes at a time.
    #[target_feature(enable = "neon")]
    pub unsafe fn find_first_ge_u32(data: &[u32], start: usize, target: u32) -> usize {
        const WIDTH: usize = 4;
        let len = data.len();
        let mut at = start;

        let target_vec = vdupq_n_u32(target);
        while at + WIDTH <= len {
            let lanes = vld1q_u32(data.as_ptr().add(at));
            let ge = vcgeq_u32(lanes, target_vec);
            if vmaxvq_u32(ge) != 0 {
                for i in 0..WIDTH {
                    if data[at + i] >= target {
                        return at + i;
                    }
                }
            }
            at += WIDTH;
        }

        while at < len && data[at] < target {
            at += 1;
        }
        at
    }

    /// First index >= `start` with a non-zero byte, 16 lanes at a time.
    #[target_feature(enable = "neon")]
    pub unsafe fn find_first_nonzero(values: &[u8], start: usize) -> usize {
        const WIDTH: usize = 16;
        let len = values.len();
        let mut at = start;

        let zero = vdupq_n_u8(0);
        while at + WIDTH <= len {
            let lanes = vld1q_u8(values.as_ptr().add(at));
            // Zero bytes compare to 0xFF; a live byte pulls the minimum to 0.
            let is_zero = vceqq_u8(lanes, zero);
            if vminvq_u8(is_zero) == 0 {
                for i in 0..WIDTH {
                    if values[at + i] != 0 {
                        return at + i;
                    }
                }
            }
            at += WIDTH;
        }

        while at < len && values[at] == 0 {
            at += 1;
        }
        at
    }

    /// Check if NEON is available at runtime.
    #[inline]
    pub fn is_available() -> bool {
        std::arch::is_aarch64_feature_detected!("neon")
    }
}

// ============================================================================
// Scalar fallback implementations
// ============================================================================

#[allow(dead_code)]
mod scalar {
    /// First index >= `start` with `data[i] >= target`.
    #[inline]
    pub fn find_first_ge_u16(data: &[u16], start: usize, target: u16) -> usize {
        let mut at = start;
        while at < data.len() && data[at] < target {
            at += 1;
        }
        at
    }

    /// First index >= `start` with `data[i] >= target`.
    #[inline]
    pub fn find_first_ge_u32(data: &[u32], start: usize, target: u32) -> usize {
        let mut at = start;
        while at < data.len() && data[at] < target {
            at += 1;
        }
        at
    }

    /// First index >= `start` with a non-zero byte.
    #[inline]
    pub fn find_first_nonzero(values: &[u8], start: usize) -> usize {
        let mut at = start;
        while at < values.len() && values[at] == 0 {
            at += 1;
        }
        at
    }
}

// ============================================================================
// Public dispatch functions
// ============================================================================

/// First index at or after `start` whose 16-bit diff is `>= target`, or
/// `data.len()` when none is.
#[inline]
pub fn find_first_ge_u16(data: &[u16], start: usize, target: u16) -> usize {
    #[cfg(target_arch = "x86_64")]
    {
        if avx2::is_available() {
            return unsafe { avx2::find_first_ge_u16(data, start, target) };
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        if neon::is_available() {
            return unsafe { neon::find_first_ge_u16(data, start, target) };
        }
    }

    scalar::find_first_ge_u16(data, start, target)
}

/// First index at or after `start` whose 32-bit diff is `>= target`, or
/// `data.len()` when none is.
#[inline]
pub fn find_first_ge_u32(data: &[u32], start: usize, target: u32) -> usize {
    #[cfg(target_arch = "x86_64")]
    {
        if avx2::is_available() {
            return unsafe { avx2::find_first_ge_u32(data, start, target) };
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        if neon::is_available() {
            return unsafe { neon::find_first_ge_u32(data, start, target) };
        }
    }

    scalar::find_first_ge_u32(data, start, target)
}

/// First index at or after `start` with a non-zero (live) value byte, or
/// `values.len()` when the tail is all tombstones.
#[inline]
pub fn find_first_live(values: &[u8], start: usize) -> usize {
    #[cfg(target_arch = "x86_64")]
    {
        if avx2::is_available() {
            return unsafe { avx2::find_first_nonzero(values, start) };
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        if neon::is_available() {
            return unsafe { neon::find_first_nonzero(values, start) };
        }
    }

    scalar::find_first_nonzero(values, start)
}
