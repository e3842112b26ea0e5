//! Proof of work: compact targets, header hash check and retargeting

use crate::config::Settings;
use crate::error::{ConsensusError, Result};
use crate::serialization::block::header_hash;
use crate::types::*;
use std::cmp::Ordering;

/// 256-bit unsigned integer for target arithmetic, little-endian words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U256([u64; 4]);

impl U256 {
    pub const ZERO: U256 = U256([0; 4]);

    pub fn from_u64(value: u64) -> Self {
        U256([value, 0, 0, 0])
    }

    /// Interpret a hash (internal byte order) as a little-endian number.
    pub fn from_le_bytes(bytes: &[u8; 32]) -> Self {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            *word = u64::from_le_bytes(chunk);
        }
        U256(words)
    }

    pub fn to_le_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (i, word) in self.0.iter().enumerate() {
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&x| x == 0)
    }

    /// Number of significant bits.
    pub fn bits(&self) -> u32 {
        for i in (0..4).rev() {
            if self.0[i] != 0 {
                return 64 * i as u32 + (64 - self.0[i].leading_zeros());
            }
        }
        0
    }

    pub fn low_u64(&self) -> u64 {
        self.0[0]
    }

    pub fn shl(&self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::ZERO;
        }

        let mut result = U256::ZERO;
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;

        for i in 0..4 {
            if i + word_shift < 4 {
                result.0[i + word_shift] |= self.0[i] << bit_shift;
                if bit_shift > 0 && i + word_shift + 1 < 4 {
                    result.0[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
                }
            }
        }

        result
    }

    pub fn shr(&self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::ZERO;
        }

        let mut result = U256::ZERO;
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;

        for i in word_shift..4 {
            result.0[i - word_shift] |= self.0[i] >> bit_shift;
            if bit_shift > 0 && i > word_shift {
                result.0[i - word_shift - 1] |= self.0[i] << (64 - bit_shift);
            }
        }

        result
    }

    /// Multiply by a 64-bit factor, `None` on overflow.
    pub fn checked_mul_u64(&self, factor: u64) -> Option<Self> {
        let mut result = [0u64; 4];
        let mut carry = 0u128;
        for (i, word) in self.0.iter().enumerate() {
            let product = (*word as u128) * (factor as u128) + carry;
            result[i] = product as u64;
            carry = product >> 64;
        }
        if carry != 0 {
            return None;
        }
        Some(U256(result))
    }

    /// Divide by a non-zero 64-bit divisor, truncating.
    pub fn div_u64(&self, divisor: u64) -> Self {
        debug_assert!(divisor != 0);
        let divisor = divisor.max(1) as u128;
        let mut result = [0u64; 4];
        let mut remainder = 0u128;
        for i in (0..4).rev() {
            let current = (remainder << 64) | self.0[i] as u128;
            result[i] = (current / divisor) as u64;
            remainder = current % divisor;
        }
        U256(result)
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().rev().zip(other.0.iter().rev()) {
            match a.cmp(b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

/// Expand target from compact representation
///
/// The format is `0xEEMMMMMM` where `EE` is the byte length and `MMMMMM` a
/// 23-bit mantissa with a sign bit at 0x00800000:
///
/// target = mantissa × 256^(exponent − 3)
///
/// Negative and overflowing encodings are rejected rather than wrapped.
pub fn expand_target(bits: u32) -> Result<U256> {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;

    if mantissa != 0 && bits & 0x0080_0000 != 0 {
        return Err(ConsensusError::InvalidProofOfWork(format!(
            "negative target {bits:#010x}"
        )));
    }

    let overflow = mantissa != 0
        && (exponent > 34
            || (mantissa > 0xff && exponent > 33)
            || (mantissa > 0xffff && exponent > 32));
    if overflow {
        return Err(ConsensusError::InvalidProofOfWork(format!(
            "target overflow {bits:#010x}"
        )));
    }

    let value = U256::from_u64(mantissa as u64);
    if exponent <= 3 {
        Ok(value.shr(8 * (3 - exponent)))
    } else {
        Ok(value.shl(8 * (exponent - 3)))
    }
}

/// Compress a target into its canonical compact representation.
pub fn compress_target(target: &U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        target.shr(8 * (size - 3)).low_u64() as u32
    };

    // The mantissa is signed; keep the sign bit clear.
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    compact | (size << 24)
}

/// CheckProofOfWork: ℋ → {true, false}
///
/// The header satisfies its own bits when
/// 0 < ExpandTarget(h.bits) ≤ ExpandTarget(limit) and SHA256d(h) ≤ ExpandTarget(h.bits).
/// Unparsable bits are reported as an error.
pub fn check_proof_of_work(header: &BlockHeader, limit_bits: u32) -> Result<bool> {
    let target = expand_target(header.bits)?;
    let limit = expand_target(limit_bits)?;

    if target.is_zero() || target > limit {
        return Ok(false);
    }

    let hash = U256::from_le_bytes(&header_hash(header));
    Ok(hash <= target)
}

/// Retarget: ℕ × ℤ → ℕ
///
/// For the bits of the last block of a period and the seconds that period
/// took:
/// 1. Clamp timespan to [T / factor, T × factor]
/// 2. Let newTarget = target × timespan / T
/// 3. Return compact(min(newTarget, limit))
pub fn retarget(previous_bits: u32, actual_timespan: i64, settings: &Settings) -> Result<u32> {
    let target_timespan = settings.target_timespan as i64;
    let factor = settings.retarget_factor as i64;
    let timespan = actual_timespan.clamp(target_timespan / factor, target_timespan * factor);

    let limit = expand_target(settings.proof_of_work_limit)?;
    let previous = expand_target(previous_bits)?;

    let retargeted = previous
        .checked_mul_u64(timespan as u64)
        .map(|product| product.div_u64(target_timespan as u64))
        .unwrap_or(limit);

    Ok(compress_target(&retargeted.min(limit)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_target_genesis() {
        let target = expand_target(0x1d00ffff).unwrap();
        assert_eq!(target, U256::from_u64(0xffff).shl(208));
    }

    #[test]
    fn test_expand_target_small_exponent() {
        assert_eq!(expand_target(0x01123456).unwrap(), U256::from_u64(0x12));
        assert_eq!(expand_target(0x02123456).unwrap(), U256::from_u64(0x1234));
        assert_eq!(expand_target(0x03123456).unwrap(), U256::from_u64(0x123456));
    }

    #[test]
    fn test_expand_target_zero_mantissa() {
        let result = expand_target(0x1d000000).unwrap();
        assert!(result.is_zero());
    }

    #[test]
    fn test_expand_target_negative() {
        assert!(expand_target(0x04923456).is_err());
        // Sign bit with a zero mantissa is just zero.
        assert!(expand_target(0x01800000).unwrap().is_zero());
    }

    #[test]
    fn test_expand_target_overflow() {
        assert!(expand_target(0xff123456).is_err());
        assert!(expand_target(0x23000001).is_err());
        assert!(expand_target(0x22000001).is_ok());
    }

    #[test]
    fn test_compress_target_round_trip() {
        for bits in [0x1d00ffffu32, 0x1b0404cb, 0x207fffff, 0x03123456, 0x170331db] {
            let target = expand_target(bits).unwrap();
            assert_eq!(compress_target(&target), bits);
        }
    }

    #[test]
    fn test_compress_target_sign_bit() {
        // 0x80 would set the sign bit, so the exponent grows.
        assert_eq!(compress_target(&U256::from_u64(0x80)), 0x02008000);
        assert_eq!(compress_target(&U256::ZERO), 0);
    }

    #[test]
    fn test_check_proof_of_work_genesis() {
        let mut merkle_root = [0u8; 32];
        merkle_root.copy_from_slice(
            &hex::decode("3ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a")
                .unwrap(),
        );
        let mut header = BlockHeader {
            version: 1,
            prev_block_hash: [0; 32],
            merkle_root,
            timestamp: 1231006505,
            bits: 0x1d00ffff,
            nonce: 2083236893,
        };
        assert!(check_proof_of_work(&header, 0x1d00ffff).unwrap());

        header.nonce += 1;
        assert!(!check_proof_of_work(&header, 0x1d00ffff).unwrap());
    }

    #[test]
    fn test_check_proof_of_work_above_limit() {
        let header = BlockHeader {
            version: 1,
            prev_block_hash: [0; 32],
            merkle_root: [0; 32],
            timestamp: 0,
            bits: 0x207fffff,
            nonce: 0,
        };
        assert!(!check_proof_of_work(&header, 0x1d00ffff).unwrap());
    }

    #[test]
    fn test_check_proof_of_work_invalid_bits() {
        let header = BlockHeader {
            version: 1,
            prev_block_hash: [0; 32],
            merkle_root: [0; 32],
            timestamp: 0,
            bits: 0x04923456,
            nonce: 0,
        };
        assert!(check_proof_of_work(&header, 0x1d00ffff).is_err());
    }

    // ============================================================================
    // RETARGET TESTS
    // ============================================================================

    #[test]
    fn test_retarget_unchanged_on_schedule() {
        let settings = Settings::mainnet();
        let bits = retarget(0x1b0404cb, settings.target_timespan as i64, &settings).unwrap();
        assert_eq!(bits, 0x1b0404cb);
    }

    #[test]
    fn test_retarget_clamps_fast_period() {
        let settings = Settings::mainnet();
        let quarter = retarget(0x1b0404cb, settings.target_timespan as i64 / 4, &settings).unwrap();
        // Anything faster is clamped to the same quarter.
        let faster = retarget(0x1b0404cb, 1, &settings).unwrap();
        assert_eq!(quarter, faster);
        assert_eq!(
            quarter,
            compress_target(&expand_target(0x1b0404cb).unwrap().div_u64(4))
        );
    }

    #[test]
    fn test_retarget_clamps_to_limit() {
        let settings = Settings::mainnet();
        let bits = retarget(0x1d00ffff, settings.target_timespan as i64 * 10, &settings).unwrap();
        assert_eq!(bits, 0x1d00ffff);
    }

    #[test]
    fn test_retarget_slow_period_doubles_target() {
        let settings = Settings::mainnet();
        let bits = retarget(0x1b0404cb, settings.target_timespan as i64 * 2, &settings).unwrap();
        assert_eq!(bits, 0x1b080996);
    }

    #[test]
    fn test_u256_mul_div() {
        let value = U256::from_u64(u64::MAX);
        let product = value.checked_mul_u64(4).unwrap();
        assert_eq!(product.div_u64(4), value);
        assert!(U256::from_u64(1).shl(255).checked_mul_u64(2).is_none());
    }

    #[test]
    fn test_u256_shifts() {
        let value = U256::from_u64(0x12345678);
        assert_eq!(value.shl(0), value);
        assert!(value.shl(300).is_zero());
        assert_eq!(value.shl(100).shr(100), value);
        assert_eq!(value.shl(64).0[1], 0x12345678);
    }

    #[test]
    fn test_u256_ordering_and_bits() {
        let small = U256::from_u64(0x12345678);
        let large = U256::from_u64(1).shl(128);
        assert!(small < large);
        assert_eq!(large.bits(), 129);
        assert_eq!(U256::ZERO.bits(), 0);
    }

    #[test]
    fn test_u256_bytes_round_trip() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x78;
        bytes[31] = 0x01;
        assert_eq!(U256::from_le_bytes(&bytes).to_le_bytes(), bytes);
    }
}
