use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;
use p3_field::{Field, FieldAlgebra, PrimeField};
use serde::{Deserialize, Serialize};

/// Describes the arithmetic capacity of a target field.
///
/// `bandwidth` is the number of bits that can be stored in one field element
/// with room left for evaluating a constraint without wrap-around;
/// `max_register_width` caps the width of any single register after
/// subdivision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    pub bandwidth: usize,
    pub max_register_width: usize,
}

impl FieldConfig {
    pub fn new(name: impl Into<String>, bandwidth: usize, max_register_width: usize) -> Self {
        assert!(
            max_register_width <= bandwidth,
            "max register width {max_register_width} exceeds bandwidth {bandwidth}"
        );
        assert!(max_register_width > 0, "max register width must be positive");
        Self {
            name: name.into(),
            bandwidth,
            max_register_width,
        }
    }
}

/// Reduces an unsigned big integer into the field.
pub fn from_biguint<F: FieldAlgebra>(value: &BigUint) -> F {
    // Horner over base-2^32 digits, most significant first.
    let base = F::from_wrapped_u64(1 << 32);
    let mut acc = F::ZERO;
    for digit in value.to_u32_digits().iter().rev() {
        acc = acc * base.clone() + F::from_wrapped_u32(*digit);
    }
    acc
}

/// Reduces a signed big integer into the field.
pub fn from_bigint<F: FieldAlgebra>(value: &BigInt) -> F {
    let magnitude = from_biguint::<F>(value.magnitude());
    if value.sign() == Sign::Minus {
        -magnitude
    } else {
        magnitude
    }
}

/// The canonical value of `x` as an unsigned big integer.
pub fn to_biguint<F: PrimeField>(x: &F) -> BigUint {
    x.as_canonical_biguint()
}

/// The canonical value of `x`, read as a signed integer: values above
/// `(p - 1) / 2` count as negative. This is the reading under which limb
/// recombination constants keep small magnitudes.
pub fn signed_canonical<F: PrimeField>(x: &F) -> BigInt {
    let value = x.as_canonical_biguint();
    let order = F::order();
    if &value + &value > order {
        BigInt::from(value) - BigInt::from(F::order())
    } else {
        BigInt::from(value)
    }
}

/// `2^n` as a field element.
pub fn two_pow_n<F: FieldAlgebra>(n: usize) -> F {
    F::TWO.exp_u64(n as u64)
}

/// The multiplicative inverse of `2^n`.
pub fn pow2_inverse<F: Field>(n: usize) -> F {
    two_pow_n::<F>(n).inverse()
}

/// Keeps the low `width` bits of the canonical value of `x`.
pub fn mask_value<F: PrimeField>(x: &F, width: usize) -> F {
    let mask = (BigUint::from(1u32) << width) - BigUint::from(1u32);
    from_biguint(&(x.as_canonical_biguint() & mask))
}

/// The canonical value of `x` as 32 big-endian bytes. Constants wider than
/// 256 bits are not representable in any supported field.
pub fn to_be_bytes_32<F: PrimeField>(x: &F) -> [u8; 32] {
    let bytes = x.as_canonical_biguint().to_bytes_be();
    assert!(bytes.len() <= 32, "canonical value exceeds 32 bytes");
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// Rebuilds a field element from 32 big-endian bytes, reducing mod the field
/// order.
pub fn from_be_bytes_32<F: FieldAlgebra>(bytes: &[u8; 32]) -> F {
    from_biguint(&BigUint::from_bytes_be(bytes))
}

/// Number of bits needed to represent `value`; 0 for 0.
pub fn bits(value: &BigUint) -> usize {
    if value.is_zero() {
        0
    } else {
        value.bits() as usize
    }
}
