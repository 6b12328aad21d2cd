//! WBI request signing.
//!
//! The provider requires every signed query to carry a `wts` unix timestamp
//! and a `w_rid` MD5 signature derived from rotating key material. The key
//! material itself comes from [`crate::key_cache::WbiKeyCache`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};

use crate::error::{PassportError, Result};
use crate::key_cache::WbiKeyCache;

const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Shuffle the concatenated key material through the fixed permutation
/// table and keep the first 32 characters.
fn mixin_key(raw: &str) -> String {
    let bytes = raw.as_bytes();
    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&i| bytes.get(i).copied())
        .take(32)
        .map(|b| b as char)
        .collect()
}

/// Percent-encode one key or value the way the signature expects.
///
/// Unreserved characters pass through, the `!'()*` set is dropped
/// entirely, everything else becomes upper-case `%XX` per UTF-8 byte.
fn encode_param(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(b as char);
            }
            b'!' | b'\'' | b'(' | b')' | b'*' => {}
            _ => {
                encoded.push_str(&format!("%{b:02X}"));
            }
        }
    }
    encoded
}

/// A signed parameter set: the sorted pairs (including `wts`) plus the
/// computed `w_rid`.
#[derive(Debug, Clone)]
pub struct SignedParams {
    pairs: Vec<(String, String)>,
    encoded: String,
    w_rid: String,
}

impl SignedParams {
    /// The computed signature.
    pub fn w_rid(&self) -> &str {
        &self.w_rid
    }

    /// Parameter pairs in signing order, `w_rid` last.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs = self.pairs.clone();
        pairs.push(("w_rid".to_string(), self.w_rid.clone()));
        pairs
    }

    /// The full serialized query string, ending in `w_rid`.
    pub fn query(&self) -> String {
        format!("{}&w_rid={}", self.encoded, self.w_rid)
    }
}

/// Sign `params` with the given key material at a fixed timestamp.
fn sign_with(params: &[(&str, &str)], img_key: &str, sub_key: &str, timestamp: u64) -> SignedParams {
    let mixin = mixin_key(&format!("{img_key}{sub_key}"));
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|&(k, v)| (k.to_string(), v.to_string()))
        .collect();
    pairs.push(("wts".to_string(), timestamp.to_string()));
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let encoded = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode_param(k), encode_param(v)))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Md5::new();
    hasher.update(encoded.as_bytes());
    hasher.update(mixin.as_bytes());
    let digest = hasher.finalize();
    SignedParams {
        pairs,
        encoded,
        w_rid: format!("{digest:x}"),
    }
}

fn unix_now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| PassportError::SignatureCompute("system clock before unix epoch".to_string()))
}

/// Signs parameter sets with the cache's current key material.
pub struct WbiSigner {
    keys: Arc<WbiKeyCache>,
}

impl WbiSigner {
    pub fn new(keys: Arc<WbiKeyCache>) -> Self {
        Self { keys }
    }

    /// Sign `params` at the current time.
    ///
    /// Key material is fetched (or refreshed) through the cache as needed;
    /// cache errors propagate unchanged.
    pub async fn sign(&self, params: &[(&str, &str)]) -> Result<SignedParams> {
        let keys = self.keys.get().await?;
        let timestamp = unix_now()?;
        Ok(sign_with(params, keys.img_key(), keys.sub_key(), timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const IMG_KEY: &str = "7cd084941338484aae1ad9425b84077c";
    const SUB_KEY: &str = "4932caff0ff746eab6f01bf08b70ac45";

    #[test]
    fn test_mixin_key() {
        let concat_key = IMG_KEY.to_string() + SUB_KEY;
        assert_eq!(mixin_key(&concat_key), "ea1db124af3c7062474693fa704f4ff8");
        assert_eq!(mixin_key(&concat_key).len(), 32);
    }

    #[test]
    fn test_mixin_key_short_input() {
        // Table entries beyond the input length are skipped, not indexed.
        assert_eq!(mixin_key("abc"), "cab");
        assert_eq!(mixin_key(""), "");
    }

    proptest! {
        /// *For any* key material of at least 32 characters, the mixed
        /// key is exactly 32 characters.
        #[test]
        fn prop_mixin_key_is_32_chars(raw in "[a-zA-Z0-9]{32,64}") {
            prop_assert_eq!(mixin_key(&raw).len(), 32);
        }
    }

    #[test]
    fn test_encode_param() {
        assert_eq!(encode_param("abc-_.~XYZ09"), "abc-_.~XYZ09");
        assert_eq!(encode_param("a b"), "a%20b");
        assert_eq!(encode_param("it's!(fine)*"), "itsfine");
        assert_eq!(encode_param("测"), "%E6%B5%8B");
        assert_eq!(encode_param("a=b&c"), "a%3Db%26c");
    }

    #[test]
    fn test_sign_with_documented_vector() {
        let params = [("foo", "114"), ("bar", "514"), ("zab", "1919810")];
        let signed = sign_with(&params, IMG_KEY, SUB_KEY, 1702204169);
        assert_eq!(signed.w_rid(), "8f6f2b5b3d485fe1886cec6a0be8c5d4");
        assert_eq!(
            signed.query(),
            "bar=514&foo=114&wts=1702204169&zab=1919810&w_rid=8f6f2b5b3d485fe1886cec6a0be8c5d4"
        );
    }

    #[test]
    fn test_signed_pairs_order() {
        let params = [("foo", "114"), ("bar", "514")];
        let signed = sign_with(&params, IMG_KEY, SUB_KEY, 1702204169);
        let pairs = signed.pairs();
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["bar", "foo", "wts", "w_rid"]);
    }

    #[test]
    fn test_sign_with_filtered_characters() {
        // The dropped characters must be absent from the hashed query too,
        // so both encoding and signature reflect the filtered form.
        let signed = sign_with(&[("q", "a!b")], IMG_KEY, SUB_KEY, 1702204169);
        let other = sign_with(&[("q", "ab")], IMG_KEY, SUB_KEY, 1702204169);
        assert_eq!(signed.query(), other.query());
    }
}
