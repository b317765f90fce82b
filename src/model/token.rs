use serde::{Deserialize, Serialize};

/// Canonical token identity.
///
/// The (chain id, address) pair is the only primary key; the symbol is
/// advisory. A token is created at registration and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub chain_id: u64,
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    /// Seeded from the configured trusted list; introspected tokens are
    /// always untrusted.
    pub trusted: bool,
}

impl Token {
    pub fn new(
        chain_id: u64,
        address: String,
        symbol: String,
        name: String,
        decimals: u8,
        trusted: bool,
    ) -> Self {
        Self {
            chain_id,
            // Always lowercase addresses for consistent comparisons
            address: address.to_lowercase(),
            symbol,
            name,
            decimals,
            trusted,
        }
    }

    /// Index key used by the aggregator: `"<chainId>:<address>"`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.chain_id, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_lowercased_at_construction() {
        let token = Token::new(
            1,
            "0xC02AAA39B223FE8D0A0E5C4F27EAD9083C756CC2".to_string(),
            "WETH".to_string(),
            "Wrapped Ether".to_string(),
            18,
            true,
        );
        assert_eq!(token.address, "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
        assert_eq!(token.key(), "1:0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
    }
}
