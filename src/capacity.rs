//! Capacity arithmetic shared by provisioning and expansion.
//!
//! The backend allocates storage in whole gibibytes, so every byte count
//! received from the orchestrator is rounded up before it leaves the driver.

/// Number of bytes in one gibibyte.
pub const GIB: u64 = 1 << 30;

/// Capacity used when a create request carries no capacity range.
pub const DEFAULT_VOLUME_SIZE_BYTES: u64 = GIB;

/// Rounds `bytes` up to the next whole multiple of `unit`, returning the
/// number of units.
///
/// A zero byte count stays zero and any partial unit consumes a full one.
/// A zero `unit` yields zero rather than dividing by zero.
#[must_use]
pub const fn round_up_size(bytes: u64, unit: u64) -> u64 {
    if unit == 0 {
        return 0;
    }
    bytes.div_ceil(unit)
}

/// Converts a byte count into whole gibibytes, rounding up.
#[must_use]
pub const fn bytes_to_gib(bytes: u64) -> u64 {
    round_up_size(bytes, GIB)
}

/// Converts gibibytes into bytes, saturating on overflow.
#[must_use]
pub const fn gib_to_bytes(gib: u64) -> u64 {
    gib.saturating_mul(GIB)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, GIB, 0)]
    #[case(1, GIB, 1)]
    #[case(GIB - 1, GIB, 1)]
    #[case(GIB, GIB, 1)]
    #[case(GIB + 1, GIB, 2)]
    #[case(20 * GIB, GIB, 20)]
    #[case(1_500, 1_000, 2)]
    fn round_up_size_is_ceiling_division(
        #[case] bytes: u64,
        #[case] unit: u64,
        #[case] expected: u64,
    ) {
        assert_eq!(round_up_size(bytes, unit), expected);
    }

    #[test]
    fn round_up_size_treats_zero_unit_as_zero() {
        assert_eq!(round_up_size(42, 0), 0);
    }

    #[test]
    fn gib_to_bytes_saturates() {
        assert_eq!(gib_to_bytes(20), 20 * GIB);
        assert_eq!(gib_to_bytes(u64::MAX), u64::MAX);
    }
}
