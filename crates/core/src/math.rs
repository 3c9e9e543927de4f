//! Fixed-point arithmetic helpers for health-factor comparisons.
//!
//! Health factors returned by the aggregation contract are 18-decimal
//! fixed-point (WAD) `U256` values. Comparisons against the execution
//! threshold happen in that same space to avoid rounding artifacts right
//! at the boundary; conversion to `f64` is reserved for logging and for
//! the edge emitter's relative-hysteresis check, where float precision
//! is adequate.

use alloy::primitives::U256;

/// WAD constant: 1e18 for 18-decimal fixed-point arithmetic.
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Basis points denominator (10000 = 100%).
pub const BPS_DENOMINATOR: U256 = U256::from_limbs([10000u64, 0, 0, 0]);

const POW10: [u128; 39] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
    10_000_000_000,
    100_000_000_000,
    1_000_000_000_000,
    10_000_000_000_000,
    100_000_000_000_000,
    1_000_000_000_000_000,
    10_000_000_000_000_000,
    100_000_000_000_000_000,
    1_000_000_000_000_000_000,
    10_000_000_000_000_000_000,
    100_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000_000,
];

#[inline(always)]
pub fn pow10(exp: u8) -> U256 {
    if exp < 39 {
        U256::from(POW10[exp as usize])
    } else {
        U256::from(10u64).pow(U256::from(exp))
    }
}

/// Scale a basis-points threshold (e.g. `execution_hf_threshold_bps`) into WAD space.
#[inline(always)]
pub fn bps_to_wad(bps: u32) -> U256 {
    (U256::from(bps) * WAD) / BPS_DENOMINATOR
}

/// Convert WAD (18 decimals) to f64. Use only for display/logging.
#[inline(always)]
pub fn wad_to_f64(wad: U256) -> f64 {
    if wad <= U256::from(u128::MAX) {
        let value: u128 = wad.to();
        value as f64 / 1e18
    } else {
        let limbs = wad.as_limbs();
        let high = limbs[1] as f64 * (u64::MAX as f64 + 1.0);
        let low = limbs[0] as f64;
        (high + low) / 1e18
    }
}

/// Convert f64 to WAD (18 decimals).
#[inline(always)]
pub fn f64_to_wad(value: f64) -> U256 {
    if value <= 0.0 {
        return U256::ZERO;
    }
    if !value.is_finite() {
        return U256::MAX;
    }
    U256::from((value * 1e18) as u128)
}

/// Health factor in WAD space. `U256::MAX` if debt is zero.
#[inline(always)]
pub fn calculate_hf_wad(collateral_adjusted_wad: U256, debt_wad: U256) -> U256 {
    if debt_wad.is_zero() {
        return U256::MAX;
    }
    (collateral_adjusted_wad * WAD) / debt_wad
}

#[inline(always)]
pub fn is_liquidatable_wad(hf_wad: U256, threshold_wad: U256) -> bool {
    hf_wad < threshold_wad
}

/// Percentage difference in basis points: ((new - old) * 10000) / old.
/// Positive = increase, negative = decrease.
#[inline(always)]
pub fn pct_diff_bps(old: U256, new: U256) -> i64 {
    if old.is_zero() {
        return 0;
    }
    if new >= old {
        let diff = new - old;
        let bps = (diff * BPS_DENOMINATOR) / old;
        bps.to::<i64>()
    } else {
        let diff = old - new;
        let bps = (diff * BPS_DENOMINATOR) / old;
        -(bps.to::<i64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow10_lookup() {
        assert_eq!(pow10(0), U256::from(1u64));
        assert_eq!(pow10(18), U256::from(1_000_000_000_000_000_000u64));
    }

    #[test]
    fn test_bps_to_wad() {
        // 9800 bps -> 0.98 WAD
        let wad = bps_to_wad(9800);
        assert_eq!(wad, (U256::from(9800u64) * WAD) / U256::from(10000u64));
    }

    #[test]
    fn test_wad_to_f64_roundtrip() {
        let wad = U256::from(1000u64) * WAD;
        assert!((wad_to_f64(wad) - 1000.0).abs() < 0.001);
    }

    #[test]
    fn test_calculate_hf_wad() {
        let collateral = U256::from(1000u64) * WAD;
        let debt = U256::from(500u64) * WAD;
        assert_eq!(calculate_hf_wad(collateral, debt), U256::from(2u64) * WAD);
        assert_eq!(calculate_hf_wad(collateral, U256::ZERO), U256::MAX);
    }

    #[test]
    fn test_is_liquidatable_wad() {
        let threshold = bps_to_wad(9800);
        assert!(is_liquidatable_wad(bps_to_wad(9700), threshold));
        assert!(!is_liquidatable_wad(bps_to_wad(9900), threshold));
    }

    #[test]
    fn test_pct_diff_bps() {
        let old = U256::from(100u64);
        assert_eq!(pct_diff_bps(old, U256::from(110u64)), 1000);
        assert_eq!(pct_diff_bps(old, U256::from(90u64)), -1000);
    }
}
