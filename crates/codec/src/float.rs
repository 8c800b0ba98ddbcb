//! Comparable IEEE-754 floats.

use crate::error::CodecResult;
use crate::number::{decode_uint, encode_uint};

const SIGN_MASK: u64 = 0x8000_0000_0000_0000;

/// Map `f` to a `u64` whose unsigned order equals the float order.
///
/// Negative zero is folded into positive zero first.
pub fn float_to_cmp_bits(f: f64) -> u64 {
    let f = if f == 0.0 { 0.0 } else { f };
    let u = f.to_bits();
    if f >= 0.0 { u | SIGN_MASK } else { !u }
}

pub fn cmp_bits_to_float(u: u64) -> f64 {
    let u = if u & SIGN_MASK > 0 { u & !SIGN_MASK } else { !u };
    f64::from_bits(u)
}

pub fn encode_float(b: &mut Vec<u8>, f: f64) {
    encode_uint(b, float_to_cmp_bits(f));
}

pub fn decode_float(b: &[u8]) -> CodecResult<(&[u8], f64)> {
    let (rest, u) = decode_uint(b)?;
    Ok((rest, cmp_bits_to_float(u)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn negative_zero_encodes_like_zero() {
        let (mut a, mut b) = (Vec::new(), Vec::new());
        encode_float(&mut a, 0.0);
        encode_float(&mut b, -0.0);
        assert_eq!(a, b);
        let (mut c, mut d) = (Vec::new(), Vec::new());
        encode_float(&mut c, f64::from(0.0f32));
        encode_float(&mut d, f64::from(-0.0f32));
        assert_eq!(c, d);
        assert_eq!(a, c);
    }

    #[test]
    fn infinities_sort_at_the_edges() {
        let enc = |f: f64| {
            let mut b = Vec::new();
            encode_float(&mut b, f);
            b
        };
        assert!(enc(f64::NEG_INFINITY) < enc(f64::MIN));
        assert!(enc(f64::MAX) < enc(f64::INFINITY));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn order_and_round_trip(a in -1e300f64..1e300, b in -1e300f64..1e300) {
            let (mut ea, mut eb) = (Vec::new(), Vec::new());
            encode_float(&mut ea, a);
            encode_float(&mut eb, b);
            prop_assert_eq!(a.partial_cmp(&b), Some(ea.cmp(&eb)));
            let (_, da) = decode_float(&ea).unwrap();
            prop_assert_eq!(da, if a == 0.0 { 0.0 } else { a });
        }
    }
}
