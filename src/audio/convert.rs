//! Sample width conversion between capture and engine formats.

use crate::defaults::NARROW_SHIFT;

/// Narrow one 32-bit capture sample to 16 bits.
///
/// Arithmetic shift keeps the sign: `i32::MIN` becomes `i16::MIN`.
#[inline]
pub fn narrow_sample(sample: i32) -> i16 {
    (sample >> NARROW_SHIFT) as i16
}

/// Narrow a whole block in place into `out`.
///
/// Both slices must have the same length; extra samples on either side are ignored.
pub fn narrow_block(input: &[i32], out: &mut [i16]) {
    debug_assert_eq!(input.len(), out.len());
    for (dst, &src) in out.iter_mut().zip(input) {
        *dst = narrow_sample(src);
    }
}

/// Widen a 16-bit sample into the upper half of a 32-bit capture slot.
///
/// Inverse of [`narrow_sample`] for values that fit, used by the WAV replay
/// source and the host microphone to look like an I2S capture device.
#[inline]
pub fn widen_sample(sample: i16) -> i32 {
    i32::from(sample) << NARROW_SHIFT
}

/// Convert a normalised float sample into a 32-bit capture slot.
#[inline]
pub fn float_to_wide(sample: f32) -> i32 {
    (f64::from(sample.clamp(-1.0, 1.0)) * f64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_preserves_sign_of_most_negative_sample() {
        // 0x80000000 -> 0x8000
        assert_eq!(narrow_sample(i32::MIN), i16::MIN);
        assert_eq!(narrow_sample(i32::MIN) as u16, 0x8000);
    }

    #[test]
    fn narrow_keeps_upper_half() {
        assert_eq!(narrow_sample(0x7FFF_0000), i16::MAX);
        assert_eq!(narrow_sample(0x0001_FFFF), 1);
        assert_eq!(narrow_sample(0x0000_FFFF), 0);
        assert_eq!(narrow_sample(-1), -1);
        assert_eq!(narrow_sample(-0x0001_0000), -1);
        assert_eq!(narrow_sample(-0x0001_0001), -2);
    }

    #[test]
    fn narrow_block_matches_shift_for_every_length() {
        for n in 1..=64usize {
            let input: Vec<i32> = (0..n as i32)
                .map(|i| i.wrapping_mul(0x0765_4321).wrapping_sub(0x1000_0000))
                .collect();
            let mut out = vec![0i16; n];

            narrow_block(&input, &mut out);

            assert_eq!(out.len(), n);
            for (o, i) in out.iter().zip(&input) {
                assert_eq!(*o, (*i >> 16) as i16);
            }
        }
    }

    #[test]
    fn widen_then_narrow_is_identity() {
        for s in [i16::MIN, -12345, -1, 0, 1, 12345, i16::MAX] {
            assert_eq!(narrow_sample(widen_sample(s)), s);
        }
    }

    #[test]
    fn float_to_wide_clamps() {
        assert_eq!(float_to_wide(2.0), i32::MAX);
        assert_eq!(float_to_wide(0.0), 0);
        assert!(float_to_wide(-1.0) <= -i32::MAX);
    }
}
