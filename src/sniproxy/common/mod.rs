mod errors;
mod coarse_clock;

pub use self::errors::{Error, ErrorKind, Result};
pub use self::coarse_clock::{coarse_monotonic_now, coarse_monotonic_clock_updater};

/// fast_modulo32 maps a uniformly distributed u32 into the range [0, max) without a division,
/// using Lemire's multiply-high-bits trick. Biased for small max relative to u32::MAX, which is
/// fine for picking among a handful of backend addresses.
pub fn fast_modulo32(x: u32, max: u32) -> u32 {
    (((x as u64) * (max as u64)) >> 32) as u32
}
