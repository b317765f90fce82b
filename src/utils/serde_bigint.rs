//! Decimal-string serde for arbitrary-precision integers.
//!
//! Bus payloads and every other structural copy carry big integers as
//! decimal strings; decoding restores the full integer value. Apply with
//! `#[serde(with = "serde_u256_decimal")]` / `#[serde(with = "serde_u128_decimal")]`.

pub mod serde_u256_decimal {
    use alloy::primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        U256::from_str_radix(&raw, 10)
            .map_err(|e| de::Error::custom(format!("invalid decimal bigint {raw:?}: {e}")))
    }
}

pub mod serde_u128_decimal {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u128>()
            .map_err(|e| de::Error::custom(format!("invalid decimal bigint {raw:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::U256;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Wire {
        #[serde(with = "super::serde_u256_decimal")]
        big: U256,
        #[serde(with = "super::serde_u128_decimal")]
        liquidity: u128,
    }

    #[test]
    fn round_trips_values_beyond_f64_precision() {
        let original = Wire {
            big: U256::from_str_radix("1461446703485210103287273052203988822378723970341", 10)
                .unwrap(),
            liquidity: u128::MAX,
        };
        let encoded = serde_json::to_string(&original).unwrap();
        assert!(encoded.contains("\"1461446703485210103287273052203988822378723970341\""));
        let decoded: Wire = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn rejects_non_decimal_payloads() {
        let err = serde_json::from_str::<Wire>(r#"{"big":"0x10","liquidity":"1"}"#);
        assert!(err.is_err());
    }
}
