// Wire-format properties exercised through the public API only.

use polywallet_common::{
    account::Account,
    amount::Amount,
    chain::ChainType,
    currency::{Currency, CurrencyKind, Unit},
    fee_basis::FeeBasis,
    hash::{digest, TxHash},
    keys::{Secret, SEED_SIZE},
};
use std::sync::Arc;
use strum::IntoEnumIterator;

fn seed() -> Secret {
    let mut bytes = [0u8; SEED_SIZE];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = (i * 13 + 5) as u8;
    }
    Secret::new(bytes)
}

#[test]
fn account_round_trip_is_stable() {
    let account = Account::from_seed(&seed(), 1_234_567_890, "uids-stays-put");
    let first = account.serialize();
    let restored = Account::deserialize(&first, "uids-stays-put").unwrap();

    assert_eq!(restored.uids(), "uids-stays-put");
    for chain in ChainType::iter() {
        assert_eq!(restored.material(chain), account.material(chain));
        assert!(!account.material(chain).is_empty());
    }

    // A second round trip is byte-identical
    assert_eq!(restored.serialize(), first);
    assert!(account.validate_serialization(&first));
    assert!(restored.validate_serialization(&first));
}

#[test]
fn validation_matches_serialization_up_to_checksum() {
    let a = Account::from_seed(&seed(), 1_111, "a");
    let b = Account::from_seed(&Secret::new([42u8; SEED_SIZE]), 1_111, "a");

    let bytes_a = a.serialize();
    assert!(a.validate_serialization(&bytes_a));
    assert!(!b.validate_serialization(&bytes_a));
}

#[test]
fn tampered_account_bytes_are_rejected() {
    let account = Account::from_seed(&seed(), 7, "t");
    let mut bytes = account.serialize();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x40;
    assert!(Account::deserialize(&bytes, "t").is_err());
}

#[test]
fn hash_hex_round_trips_for_every_chain() {
    for chain in ChainType::iter() {
        let hash = TxHash::new(chain, digest(chain.code().as_bytes()));
        let parsed = TxHash::from_hex(chain, &hash.to_hex()).unwrap();
        assert_eq!(parsed, hash);
    }
}

fn unit_with_decimals(decimals: u8) -> Arc<Unit> {
    let currency = Currency::new("net:__native__", "Coin", "coin", CurrencyKind::Native, None);
    let base = Unit::base(&currency, "base", "B");
    if decimals == 0 {
        base
    } else {
        Unit::derived(&currency, "coin", "C", &base, decimals)
    }
}

#[test]
fn amount_double_conversion_bounds() {
    let base = unit_with_decimals(0);
    let scaled = unit_with_decimals(18);
    let value = 25.25434525155732538797258871;

    // Base units truncate to the integer grid
    let amount = Amount::from_f64(&base, value).unwrap();
    assert_eq!(amount.to_f64(&base).unwrap(), 25.0);

    // Eighteen decimals keep the value within 1e-10 relative error
    let amount = Amount::from_f64(&scaled, value).unwrap();
    let back = amount.to_f64(&scaled).unwrap();
    assert!(((back - value) / value).abs() < 1e-10);

    // Values beyond 256 bits fail outright
    assert!(Amount::from_f64(&base, 1e100).is_none());
}

#[test]
fn fee_equals_price_times_cost_factor_exactly() {
    let base = unit_with_decimals(0);
    for (price, cost) in [
        (1_000u64, 1.0f64),
        (25_000, 4.0),
        (7, 21_000.0),
        // The cost factor aligns so the product divides with no remainder
        (999, 0.226),
    ] {
        let basis = FeeBasis::new(Amount::from_base(&base, price), cost).unwrap();
        let milli = (basis.cost_factor() * 1_000.0).round() as u128;
        assert_eq!(price as u128 * milli % 1_000, 0);
        assert_eq!(
            basis.fee().to_u64_base(),
            Some((price as u128 * milli / 1_000) as u64)
        );
    }
}
