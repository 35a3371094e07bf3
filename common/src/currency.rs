use std::sync::Arc;

// What kind of asset a currency is on its network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencyKind {
    Native,
    Token,
}

// An asset tracked by the engine. Compared by uids; the uids embeds the
// owning network so the same ticker on two networks stays distinct.
#[derive(Debug)]
pub struct Currency {
    uids: String,
    name: String,
    code: String,
    kind: CurrencyKind,
    // Token issuer (contract address or issuing account), if any
    issuer: Option<String>,
}

impl Currency {
    pub fn new(
        uids: impl Into<String>,
        name: impl Into<String>,
        code: impl Into<String>,
        kind: CurrencyKind,
        issuer: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            uids: uids.into(),
            name: name.into(),
            code: code.into(),
            kind,
            issuer,
        })
    }

    pub fn uids(&self) -> &str {
        &self.uids
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn kind(&self) -> CurrencyKind {
        self.kind
    }

    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }
}

impl PartialEq for Currency {
    fn eq(&self, other: &Self) -> bool {
        self.uids == other.uids
    }
}

impl Eq for Currency {}

// A denomination of a currency. The base unit has decimals 0 and no base
// link; every other unit points at the base it scales against.
#[derive(Debug)]
pub struct Unit {
    currency: Arc<Currency>,
    code: String,
    symbol: String,
    decimals: u8,
    base: Option<Arc<Unit>>,
}

impl Unit {
    // The integer unit everything is accounted in
    pub fn base(currency: &Arc<Currency>, code: impl Into<String>, symbol: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            currency: Arc::clone(currency),
            code: code.into(),
            symbol: symbol.into(),
            decimals: 0,
            base: None,
        })
    }

    // A unit worth 10^decimals base units
    pub fn derived(
        currency: &Arc<Currency>,
        code: impl Into<String>,
        symbol: impl Into<String>,
        base: &Arc<Unit>,
        decimals: u8,
    ) -> Arc<Self> {
        Arc::new(Self {
            currency: Arc::clone(currency),
            code: code.into(),
            symbol: symbol.into(),
            decimals,
            base: Some(Arc::clone(base)),
        })
    }

    pub fn uids(&self) -> String {
        format!("{}:{}", self.currency.uids(), self.code)
    }

    pub fn currency(&self) -> &Arc<Currency> {
        &self.currency
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    // Decimal offset against the base unit
    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn base_unit(self: &Arc<Self>) -> Arc<Unit> {
        match &self.base {
            Some(base) => Arc::clone(base),
            None => Arc::clone(self),
        }
    }

    pub fn is_base(&self) -> bool {
        self.base.is_none()
    }

    // Two units are compatible when they denominate the same currency
    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.currency == other.currency
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.currency == other.currency && self.code == other.code
    }
}

impl Eq for Unit {}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Arc<Currency>, Arc<Unit>, Arc<Unit>) {
        let currency = Currency::new(
            "bitcoin-testnet:__native__",
            "Bitcoin",
            "btc",
            CurrencyKind::Native,
            None,
        );
        let sat = Unit::base(&currency, "sat", "SAT");
        let btc = Unit::derived(&currency, "btc", "₿", &sat, 8);
        (currency, sat, btc)
    }

    #[test]
    fn test_unit_uids_and_base_link() {
        let (_, sat, btc) = fixture();
        assert_eq!(sat.uids(), "bitcoin-testnet:__native__:sat");
        assert!(sat.is_base());
        assert_eq!(btc.decimals(), 8);
        assert_eq!(btc.base_unit().code(), "sat");
        assert_eq!(sat.base_unit().code(), "sat");
    }

    #[test]
    fn test_compatibility() {
        let (_, sat, btc) = fixture();
        assert!(sat.is_compatible(&btc));

        let other = Currency::new("ethereum-mainnet:__native__", "Ether", "eth", CurrencyKind::Native, None);
        let wei = Unit::base(&other, "wei", "wei");
        assert!(!wei.is_compatible(&sat));
    }
}
