//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where 
    T: Float 
{
    target_range.0 
        + ((value - source_range.0) 
        * (target_range.1 - target_range.0) 
        / (source_range.1 - source_range.0))
}

/// Limit a value to the range `[min, max]`.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T 
where
    T: Float
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Largest unsigned integer representable in `bits` bits.
pub fn max_uint(bits: u32) -> u32 {
    if bits >= 32 {
        std::u32::MAX
    }
    else {
        (1u32 << bits) - 1
    }
}

/// Encode a float into a fixed width unsigned integer.
///
/// The value is clamped into `range` and then linearly mapped onto
/// `[0, 2^bits - 1]`, rounding to the nearest integer. A `NaN` value encodes
/// as zero.
pub fn float_to_uint(value: f64, range: (f64, f64), bits: u32) -> u32 {
    if value.is_nan() {
        return 0
    }

    let x = clamp(&value, &range.0, &range.1);
    let u = lin_map(range, (0.0, max_uint(bits) as f64), x).round();

    // Rounding can't leave the target range but the cast must not wrap
    clamp(&u, &0.0, &(max_uint(bits) as f64)) as u32
}

/// Decode a fixed width unsigned integer into a float, the inverse of
/// [`float_to_uint`].
pub fn uint_to_float(value: u32, range: (f64, f64), bits: u32) -> f64 {
    let u = value.min(max_uint(bits)) as f64;
    lin_map((0.0, max_uint(bits) as f64), range, u)
}
