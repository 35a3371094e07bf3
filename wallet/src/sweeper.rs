// Account-draining helper for UTXO chains: given a private key, find
// the key's unspent outputs among client-provided transactions and
// build a transfer that moves everything into the wallet.

use crate::{
    error::WalletError,
    handlers::{codec::TxBody, BuildContext},
    transfer::Transfer,
    wallet::{LedgerEntry, Wallet},
};
use indexmap::IndexMap;
use polywallet_common::{
    address::Address,
    amount::Amount,
    chain::AddressScheme,
    hash::TxHash,
    keys::Key,
};
use std::{collections::HashSet, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepStatus {
    Success,
    UnsupportedCurrency,
    InvalidKey,
    InvalidArguments,
    InvalidTransaction,
    InvalidSourceWallet,
    NoTransfersFound,
    InsufficientFunds,
    UnableToSweep,
    IllegalOperation,
}

pub struct WalletSweeper {
    wallet: Arc<Wallet>,
    key: Key,
    address: Address,
    // Transactions handed in by the client, keyed by hash
    ledger: IndexMap<TxHash, LedgerEntry>,
}

impl WalletSweeper {
    // Only UTXO chains can be swept, and the key must carry its secret
    pub fn create(wallet: &Arc<Wallet>, key: Key) -> Result<Self, SweepStatus> {
        let chain = wallet.network().chain();
        if !chain.is_utxo() {
            return Err(SweepStatus::UnsupportedCurrency);
        }
        if key.chain() != chain {
            return Err(SweepStatus::InvalidKey);
        }
        if !key.has_secret() {
            return Err(SweepStatus::InvalidKey);
        }

        let address = wallet.handler().address_for_public(
            key.public(),
            AddressScheme::Legacy,
            wallet.network().is_mainnet(),
        );

        Ok(Self {
            wallet: Arc::clone(wallet),
            key,
            address,
            ledger: IndexMap::new(),
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    // Feed one raw transaction from the client scan
    pub fn handle_transaction(&mut self, raw: &[u8]) -> Result<(), SweepStatus> {
        let tx = self
            .wallet
            .handler()
            .parse_transaction(raw)
            .map_err(|_| SweepStatus::InvalidTransaction)?;
        self.ledger.insert(
            tx.hash(),
            LedgerEntry {
                tx,
                block_height: 0,
                timestamp: 0,
            },
        );
        Ok(())
    }

    fn owned(&self) -> HashSet<Address> {
        [self.address.clone()].into()
    }

    pub fn balance(&self) -> Amount {
        self.wallet.handler().compute_balance(
            self.wallet.base_unit(),
            &self.owned(),
            &self.ledger,
            &[],
        )
    }

    // Anything to sweep at all?
    pub fn validate(&self) -> SweepStatus {
        let touches_key = self.ledger.values().any(|entry| match &entry.tx.body {
            TxBody::Utxo { outputs, .. } => outputs.iter().any(|o| o.target == self.address),
            _ => false,
        });
        if !touches_key {
            return SweepStatus::NoTransfersFound;
        }
        if self.balance().is_zero() {
            return SweepStatus::InsufficientFunds;
        }
        SweepStatus::Success
    }

    // Build and stage the draining transfer into the wallet's receive
    // address. The caller submits it like any other transfer.
    pub async fn create_transfer(&self) -> Result<Arc<Transfer>, WalletError> {
        match self.validate() {
            SweepStatus::Success => {}
            SweepStatus::NoTransfersFound => return Err(WalletError::UnknownTransfer),
            _ => return Err(WalletError::InsufficientFunds),
        }

        let handler = self.wallet.handler();
        let target = self.wallet.receive_address().await;

        let balance = self.balance();
        let fee_basis = self.wallet.default_fee_basis().await;
        let fee = fee_basis.fee().to_base().0;
        let (total, _) = balance.to_base();
        let drained = total
            .checked_sub(fee)
            .filter(|v| !v.is_zero())
            .ok_or(WalletError::InsufficientFunds)?;

        let owned = self.owned();
        let ctx = BuildContext {
            owned: &owned,
            ledger: &self.ledger,
            change_address: self.address.clone(),
            source_address: self.address.clone(),
            counter: 0,
            fee,
        };
        let mut tx = handler.build_transaction(&ctx, &[(target.clone(), drained)])?;
        handler.sign_with_secret(&mut tx, self.key.secret().expect("validated at create"))?;

        let amount = Amount::from_base_signed(self.wallet.base_unit(), drained, false);
        let transfer = self
            .wallet
            .create_sweep_transfer(self.address.clone(), target, amount, fee_basis, tx)
            .await;
        Ok(transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::codec::{ParsedTransaction, TxInput, TxOutput};
    use polywallet_common::chain::ChainType;
    use polywallet_common::hash::digest;
    use primitive_types::U256;

    fn key(chain: ChainType) -> Key {
        Key::with_secret(chain, vec![7u8; 33], vec![9u8; 32])
    }

    #[tokio::test]
    async fn test_sweeper_rejects_account_chains() {
        let wallet = crate::testkit::bare_wallet(ChainType::Ethereum);
        assert_eq!(
            WalletSweeper::create(&wallet, key(ChainType::Ethereum)).err(),
            Some(SweepStatus::UnsupportedCurrency)
        );
    }

    #[tokio::test]
    async fn test_sweeper_rejects_public_only_key() {
        let wallet = crate::testkit::bare_wallet(ChainType::Bitcoin);
        let public_only = Key::public_only(ChainType::Bitcoin, vec![7u8; 33]);
        assert_eq!(
            WalletSweeper::create(&wallet, public_only).err(),
            Some(SweepStatus::InvalidKey)
        );
    }

    #[tokio::test]
    async fn test_sweep_flow() {
        let wallet = crate::testkit::bare_wallet(ChainType::Bitcoin);

        let mut sweeper = WalletSweeper::create(&wallet, key(ChainType::Bitcoin)).unwrap();
        assert_eq!(sweeper.validate(), SweepStatus::NoTransfersFound);

        // A transaction funding the swept key
        let funding = ParsedTransaction {
            chain: ChainType::Bitcoin,
            body: TxBody::Utxo {
                inputs: vec![TxInput {
                    prev_hash: TxHash::new(ChainType::Bitcoin, digest(b"origin")),
                    prev_index: 0,
                    spender: wallet.handler().address_for_public(
                        &[1u8; 32],
                        AddressScheme::Legacy,
                        false,
                    ),
                    signature: vec![1],
                }],
                outputs: vec![TxOutput {
                    value: U256::from(50_000u64),
                    target: sweeper.address().clone(),
                }],
            },
            signature: None,
        };
        sweeper
            .handle_transaction(&crate::handlers::handler(ChainType::Bitcoin).serialize_transaction(&funding))
            .unwrap();

        assert_eq!(sweeper.validate(), SweepStatus::Success);
        assert_eq!(sweeper.balance().to_u64_base(), Some(50_000));

        let transfer = sweeper.create_transfer().await.unwrap();
        assert!(transfer.amount().to_u64_base().unwrap() < 50_000);
    }
}
