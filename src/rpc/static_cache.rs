//! Per-chain JSON cache of immutable contract reads.
//!
//! Only a closed set of static methods is ever cached; dynamic state
//! (reserves, slot0, liquidity, ticks) never touches this file. Writes are
//! atomic via a temp file and rename so a crash cannot leave a torn cache.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use log::warn;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use alloy::primitives::U256;

/// The only methods whose results may be cached.
const STATIC_METHODS: [&str; 11] = [
    "name",
    "symbol",
    "decimals",
    "token0",
    "token1",
    "fee",
    "tickSpacing",
    "getPair",
    "getPool",
    "factory",
    "router",
];

pub fn is_cacheable_method(method: &str) -> bool {
    STATIC_METHODS.contains(&method)
}

/// `contract:<address>:<methodName>:<argsJson>`
pub fn cache_key(contract: &str, method: &str, args: &Value) -> String {
    format!("contract:{}:{}:{}", contract.to_lowercase(), method, args)
}

/// Tag a big integer for JSON storage.
pub fn encode_bigint(value: U256) -> Value {
    json!({ "__type__": "bigint", "value": value.to_string() })
}

/// Recover a tagged big integer.
pub fn decode_bigint(value: &Value) -> Option<U256> {
    let obj = value.as_object()?;
    if obj.get("__type__")?.as_str()? != "bigint" {
        return None;
    }
    U256::from_str_radix(obj.get("value")?.as_str()?, 10).ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    value: Value,
    timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    chain_id: u64,
    created_at: i64,
    updated_at: i64,
    entries: FxHashMap<String, CacheEntry>,
}

/// On-disk cache of static contract reads for one chain.
#[derive(Debug)]
pub struct StaticCache {
    path: PathBuf,
    chain_id: u64,
    created_at: i64,
    entries: FxHashMap<String, CacheEntry>,
    dirty: bool,
}

impl StaticCache {
    /// Load `static-cache-<chainId>.json` from `dir`, starting empty when
    /// the file is absent or unreadable.
    pub fn load(dir: &Path, chain_id: u64) -> Self {
        let path = dir.join(format!("static-cache-{chain_id}.json"));
        let now = Utc::now().timestamp_millis();

        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<CacheFile>(&raw) {
                Ok(file) if file.chain_id == chain_id => Self {
                    path,
                    chain_id,
                    created_at: file.created_at,
                    entries: file.entries,
                    dirty: false,
                },
                Ok(file) => {
                    warn!(
                        "Static cache at {} belongs to chain {}, expected {}; starting fresh",
                        path.display(),
                        file.chain_id,
                        chain_id
                    );
                    Self { path, chain_id, created_at: now, entries: FxHashMap::default(), dirty: false }
                }
                Err(e) => {
                    warn!("Static cache at {} is corrupt ({}); starting fresh", path.display(), e);
                    Self { path, chain_id, created_at: now, entries: FxHashMap::default(), dirty: false }
                }
            },
            Err(_) => {
                Self { path, chain_id, created_at: now, entries: FxHashMap::default(), dirty: false }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str()).map(str::to_string)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_bigint(&self, key: &str) -> Option<U256> {
        self.get(key).and_then(decode_bigint)
    }

    /// Insert a value under a cacheable key and mark the cache dirty.
    pub fn insert(&mut self, key: String, value: Value) {
        self.entries.insert(key, CacheEntry { value, timestamp: Utc::now().timestamp_millis() });
        self.dirty = true;
    }

    /// Persist atomically when dirty: serialize to `<path>.tmp`, then rename.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let file = CacheFile {
            chain_id: self.chain_id,
            created_at: self.created_at,
            updated_at: Utc::now().timestamp_millis(),
            entries: self.entries.clone(),
        };
        let payload = serde_json::to_string(&file).context("serialize static cache")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("create cache dir")?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload).context("write static cache temp file")?;
        fs::rename(&tmp, &self.path).context("rename static cache into place")?;

        self.dirty = false;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format_and_method_gate() {
        let key = cache_key("0xABC0000000000000000000000000000000000001", "token0", &json!([]));
        assert_eq!(key, "contract:0xabc0000000000000000000000000000000000001:token0:[]");
        assert!(is_cacheable_method("getPair"));
        assert!(!is_cacheable_method("getReserves"));
        assert!(!is_cacheable_method("slot0"));
    }

    #[test]
    fn bigint_round_trip() {
        let v = U256::from_str_radix("5192296858534827628530496329220095", 10).unwrap();
        let tagged = encode_bigint(v);
        assert_eq!(tagged["__type__"], "bigint");
        assert_eq!(decode_bigint(&tagged), Some(v));
        assert_eq!(decode_bigint(&json!({"value": "12"})), None);
    }

    #[test]
    fn serialize_deserialize_preserves_nested_values() {
        let dir = std::env::temp_dir().join(format!("aqueduct-cache-test-{}", std::process::id()));
        let mut cache = StaticCache::load(&dir, 137);
        cache.insert(
            cache_key("0xpool", "getPool", &json!(["0xa", "0xb", 3000])),
            json!({
                "pool": "0xdeadbeef00000000000000000000000000000001",
                "reserves": [encode_bigint(U256::from(1u8) << 200), encode_bigint(U256::MAX)],
            }),
        );
        cache.flush().unwrap();

        let reloaded = StaticCache::load(&dir, 137);
        assert_eq!(reloaded.len(), 1);
        let key = cache_key("0xpool", "getPool", &json!(["0xa", "0xb", 3000]));
        let value = reloaded.get(&key).unwrap();
        assert_eq!(decode_bigint(&value["reserves"][1]), Some(U256::MAX));
        assert_eq!(value, cache.get(&key).unwrap());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn wrong_chain_id_starts_fresh() {
        let dir = std::env::temp_dir().join(format!("aqueduct-cache-chain-{}", std::process::id()));
        let mut cache = StaticCache::load(&dir, 1);
        cache.insert(cache_key("0xa", "token0", &json!([])), json!("0xb"));
        cache.flush().unwrap();

        // A file claiming chain 1 must not be served for chain 137.
        fs::rename(dir.join("static-cache-1.json"), dir.join("static-cache-137.json")).unwrap();
        let mismatched = StaticCache::load(&dir, 137);
        assert!(mismatched.is_empty());

        let _ = fs::remove_dir_all(&dir);
    }
}
