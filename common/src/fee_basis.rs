use crate::amount::Amount;
use primitive_types::U256;
use std::fmt::{Display, Error, Formatter};

// Cost factors are carried as reals but held on an exact 1/1000
// rational grid (a UTXO chain's cost factor is virtual kilobytes; an
// account chain's is a unit count), so the fee is pure integer
// arithmetic in base units.
const COST_FACTOR_SCALE: u64 = 1_000;

// An immutable description of fee intent (estimate) or fee actuals
// (confirmed): fee = price_per_cost_factor * cost_factor, exactly.
#[derive(Debug, Clone)]
pub struct FeeBasis {
    price_per_cost_factor: Amount,
    cost_factor: f64,
    fee: Amount,
}

impl FeeBasis {
    // Fails on a non-finite or negative cost factor, or on overflow.
    // The cost factor is aligned UP to the coarsest grid point at which
    // `price * cost_factor / 1000` divides without remainder, so the
    // stored triple always satisfies fee == price * cost_factor exactly
    // in base units and an estimate never undershoots.
    pub fn new(price_per_cost_factor: Amount, cost_factor: f64) -> Option<Self> {
        if !cost_factor.is_finite() || cost_factor < 0.0 || price_per_cost_factor.is_negative() {
            return None;
        }

        let scaled = (cost_factor * COST_FACTOR_SCALE as f64).round();
        if !(scaled < u64::MAX as f64) {
            return None;
        }
        let scaled = scaled as u64;

        let (price, _) = price_per_cost_factor.to_base();
        // price * n is a multiple of 1000 iff n is a multiple of
        // 1000 / gcd(price, 1000)
        let price_mod = (price % U256::from(COST_FACTOR_SCALE)).as_u64();
        let step = COST_FACTOR_SCALE / gcd(price_mod, COST_FACTOR_SCALE);
        let aligned = scaled.checked_add(step - 1)? / step * step;

        let numerator = price.checked_mul(U256::from(aligned))?;
        let fee_value = numerator / U256::from(COST_FACTOR_SCALE);
        debug_assert!((numerator % U256::from(COST_FACTOR_SCALE)).is_zero());

        let fee = Amount::from_base_signed(price_per_cost_factor.unit(), fee_value, false);
        Some(Self {
            price_per_cost_factor,
            cost_factor: aligned as f64 / COST_FACTOR_SCALE as f64,
            fee,
        })
    }

    // Reconstruct a basis from a confirmed fee, deriving the price. The
    // actual fee is authoritative: when it does not divide evenly
    // against the requested cost factor, the whole fee folds into a
    // unit cost factor so fee == price * cost_factor still holds
    // exactly.
    pub fn from_actual(fee: Amount, cost_factor: f64) -> Option<Self> {
        if !cost_factor.is_finite() || cost_factor <= 0.0 || fee.is_negative() {
            return None;
        }

        let scaled = (cost_factor * COST_FACTOR_SCALE as f64).round() as u64;
        if scaled == 0 {
            return None;
        }

        let (fee_value, _) = fee.to_base();
        let numerator = fee_value.checked_mul(U256::from(COST_FACTOR_SCALE))?;
        let (price_value, cost_factor) = if (numerator % U256::from(scaled)).is_zero() {
            (
                numerator / U256::from(scaled),
                scaled as f64 / COST_FACTOR_SCALE as f64,
            )
        } else {
            (fee_value, 1.0)
        };
        let price = Amount::from_base_signed(fee.unit(), price_value, false);

        Some(Self {
            price_per_cost_factor: price,
            cost_factor,
            fee,
        })
    }

    pub fn price_per_cost_factor(&self) -> &Amount {
        &self.price_per_cost_factor
    }

    pub fn cost_factor(&self) -> f64 {
        self.cost_factor
    }

    pub fn fee(&self) -> &Amount {
        &self.fee
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

impl PartialEq for FeeBasis {
    fn eq(&self, other: &Self) -> bool {
        self.price_per_cost_factor == other.price_per_cost_factor
            && self.cost_factor == other.cost_factor
            && self.fee == other.fee
    }
}

impl Display for FeeBasis {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(
            f,
            "{} x {}",
            self.price_per_cost_factor, self.cost_factor
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::{Currency, CurrencyKind, Unit};
    use std::sync::Arc;

    fn gwei() -> Arc<Unit> {
        let currency = Currency::new(
            "ethereum-mainnet:__native__",
            "Ether",
            "eth",
            CurrencyKind::Native,
            None,
        );
        Unit::base(&currency, "wei", "wei")
    }

    #[test]
    fn test_fee_is_exact_for_integral_cost() {
        let unit = gwei();
        let price = Amount::from_base(&unit, 20_000_000_000u64);
        let basis = FeeBasis::new(price, 21_000.0).unwrap();
        // 20 gwei * 21000 gas
        assert_eq!(basis.fee().to_u64_base(), Some(420_000_000_000_000));
    }

    #[test]
    fn test_fee_is_exact_for_fractional_cost() {
        let unit = gwei();
        // A price divisible by the grid keeps the requested cost factor
        let price = Amount::from_base(&unit, 1_000u64);
        let basis = FeeBasis::new(price, 0.226).unwrap();
        assert_eq!(basis.cost_factor(), 0.226);
        assert_eq!(basis.fee().to_u64_base(), Some(226));

        // A price with no common factor forces the cost factor up to the
        // next grid point where the product divides evenly
        let price = Amount::from_base(&unit, 999u64);
        let basis = FeeBasis::new(price, 0.226).unwrap();
        assert_eq!(basis.cost_factor(), 1.0);
        assert_eq!(basis.fee().to_u64_base(), Some(999));
    }

    #[test]
    fn test_fee_identity_holds_exactly() {
        let unit = gwei();
        for (price, cost) in [
            (1_000u64, 0.226f64),
            (999, 0.226),
            (7, 3.5),
            (20_000_000_000, 21_000.0),
        ] {
            let basis = FeeBasis::new(Amount::from_base(&unit, price), cost).unwrap();
            let milli = (basis.cost_factor() * 1_000.0).round() as u128;
            // The product divides with no remainder, and the stored fee
            // is exactly price * cost_factor
            assert_eq!(price as u128 * milli % 1_000, 0);
            assert_eq!(
                basis.fee().to_u64_base(),
                Some((price as u128 * milli / 1_000) as u64)
            );
        }
    }

    #[test]
    fn test_invalid_cost_factor() {
        let unit = gwei();
        let price = Amount::from_base(&unit, 1u64);
        assert!(FeeBasis::new(price.clone(), f64::NAN).is_none());
        assert!(FeeBasis::new(price, -1.0).is_none());
    }

    #[test]
    fn test_from_actual_inverts() {
        let unit = gwei();
        let fee = Amount::from_base(&unit, 420_000_000_000_000u64);
        let basis = FeeBasis::from_actual(fee, 21_000.0).unwrap();
        assert_eq!(
            basis.price_per_cost_factor().to_u64_base(),
            Some(20_000_000_000)
        );
    }
}
