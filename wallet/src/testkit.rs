// Shared fixtures for the crate's unit tests.

use crate::{network::Network, wallet::Wallet};
use polywallet_common::{
    account::derive_material,
    chain::{AddressScheme, ChainType},
    fee_basis::FeeBasis,
    keys::Secret,
};
use std::sync::{Arc, Weak};

pub(crate) fn seed() -> Secret {
    let mut bytes = [0u8; 64];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = (i * 7) as u8;
    }
    Secret::new(bytes)
}

// A wallet with no manager behind it: enough for handler-level and
// sweeper tests that never touch the event machinery
pub(crate) fn bare_wallet(chain: ChainType) -> Arc<Wallet> {
    let network = Network::builtin(chain, false);
    let price = network.fees()[0].price_per_cost_factor.clone();
    let fee_basis = FeeBasis::new(price, 1.0).expect("builtin fee schedule");
    let material = derive_material(chain, &seed());

    Wallet::new(
        &Weak::new(),
        Arc::clone(&network),
        Arc::clone(network.currency()),
        Arc::clone(network.base_unit()),
        Arc::clone(network.default_unit()),
        AddressScheme::Native,
        material,
        fee_basis,
    )
}
