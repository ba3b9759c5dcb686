//! IPFS URI matching/extraction and blockchain big-map metadata
//! decoding.

use regex::Regex;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid IPFS link: {0}")]
    InvalidLink(String),

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid token_id: {0}")]
    InvalidTokenId(#[from] std::num::ParseIntError),
}

/// IPFS URI handling, grounded on `internal/ipfs/functions.go`.
pub mod ipfs {
    use super::*;

    fn pattern() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"ipfs://(?P<hash>(baf[a-z2-7]{56})|Qm[1-9A-HJ-NP-Za-km-z]{44})")
                .expect("static IPFS regex is valid")
        })
    }

    /// True if `s` contains at least one `ipfs://<cid>` occurrence.
    pub fn is(s: &str) -> bool {
        pattern().is_match(s)
    }

    /// All CIDs found in `s`, in order of appearance.
    pub fn find_all_links(s: &str) -> Vec<String> {
        pattern()
            .captures_iter(s)
            .map(|c| c["hash"].to_string())
            .collect()
    }

    /// Extract and structurally validate the single CID embedded in `s`.
    /// Fails unless `s` matches exactly one CID.
    pub fn hash(s: &str) -> Result<String, DecodeError> {
        let hashes = find_all_links(s);
        if hashes.len() != 1 {
            return Err(DecodeError::InvalidLink(s.to_string()));
        }
        let candidate = &hashes[0];
        cid::Cid::try_from(candidate.as_str())
            .map_err(|_| DecodeError::InvalidLink(s.to_string()))?;
        Ok(candidate.clone())
    }

    /// Strip the `ipfs://` scheme prefix.
    pub fn path(s: &str) -> &str {
        s.strip_prefix("ipfs://").unwrap_or(s)
    }

    /// Build a gateway URL for a CID, e.g. `https://ipfs.io/ipfs/Qm...`.
    pub fn link(gateway: &str, cid: &str) -> String {
        format!("{}/ipfs/{}", gateway.trim_end_matches('/'), cid)
    }
}

/// Decoded view of a blockchain big-map token value:
/// `{token_id: <hex>, token_info: {<key>: <hex>}}`. The reserved
/// empty-string key, if present, is promoted to `link` and removed from
/// `token_info`.
#[derive(Debug, Clone, Serialize)]
pub struct TokenBigMapValue {
    pub token_id: u64,
    pub token_info: HashMap<String, String>,
    pub link: Option<String>,
}

#[derive(Deserialize)]
struct RawTokenBigMapValue {
    token_id: String,
    #[serde(default)]
    token_info: HashMap<String, String>,
}

impl<'de> Deserialize<'de> for TokenBigMapValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawTokenBigMapValue::deserialize(deserializer)?;
        let token_id = u64::from_str_radix(&raw.token_id, 16).map_err(de::Error::custom)?;

        let mut token_info = raw.token_info;
        let link = match token_info.remove("") {
            Some(hex_link) => {
                let bytes = hex::decode(&hex_link).map_err(de::Error::custom)?;
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            None => None,
        };

        decode_map(&mut token_info);

        Ok(TokenBigMapValue {
            token_id,
            token_info,
            link,
        })
    }
}

/// Hex-decode every value in `m` in place; a value that fails to decode as
/// hex, or decodes to non-UTF-8 bytes, is left untouched.
pub fn decode_map(m: &mut HashMap<String, String>) {
    for value in m.values_mut() {
        if let Ok(bytes) = hex::decode(value.as_str()) {
            if let Ok(s) = String::from_utf8(bytes) {
                *value = s;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CIDV0: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
    const CIDV1: &str = "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi";

    #[test]
    fn is_detects_ipfs_uris() {
        assert!(ipfs::is(&format!("ipfs://{CIDV0}")));
        assert!(ipfs::is(&format!("ipfs://{CIDV1}")));
        assert!(!ipfs::is("https://example.com/metadata.json"));
    }

    #[test]
    fn find_all_links_returns_every_match_in_order() {
        let text = format!("a ipfs://{CIDV0} b ipfs://{CIDV1} c");
        assert_eq!(ipfs::find_all_links(&text), vec![CIDV0, CIDV1]);
    }

    #[test]
    fn hash_round_trips_a_single_valid_cid() {
        let uri = format!("ipfs://{CIDV0}");
        assert_eq!(ipfs::hash(&uri).unwrap(), CIDV0);
    }

    #[test]
    fn hash_rejects_zero_or_multiple_matches() {
        assert!(ipfs::hash("not a link").is_err());
        let uri = format!("ipfs://{CIDV0} ipfs://{CIDV1}");
        assert!(ipfs::hash(&uri).is_err());
    }

    #[test]
    fn path_strips_scheme() {
        assert_eq!(ipfs::path(&format!("ipfs://{CIDV0}")), CIDV0);
        assert_eq!(ipfs::path(CIDV0), CIDV0);
    }

    #[test]
    fn link_formats_gateway_path() {
        assert_eq!(
            ipfs::link("https://ipfs.io", CIDV0),
            format!("https://ipfs.io/ipfs/{CIDV0}")
        );
        assert_eq!(
            ipfs::link("https://ipfs.io/", CIDV0),
            format!("https://ipfs.io/ipfs/{CIDV0}")
        );
    }

    #[test]
    fn decode_map_decodes_utf8_hex_and_preserves_non_utf8() {
        let mut m = HashMap::new();
        m.insert("name".to_string(), hex::encode("Cool Token"));
        m.insert("raw".to_string(), "ff".to_string()); // valid hex, invalid utf8
        m.insert("plain".to_string(), "not hex at all!".to_string());
        decode_map(&mut m);
        assert_eq!(m["name"], "Cool Token");
        assert_eq!(m["raw"], "ff");
        assert_eq!(m["plain"], "not hex at all!");
    }

    #[test]
    fn token_big_map_value_parses_token_id_and_promotes_reserved_key() {
        let link_hex = hex::encode("ipfs://QmLink");
        let name_hex = hex::encode("My Token");
        let json = format!(
            r#"{{"token_id":"2a","token_info":{{"":"{link_hex}","name":"{name_hex}"}}}}"#
        );
        let parsed: TokenBigMapValue = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.token_id, 42);
        assert_eq!(parsed.link.as_deref(), Some("ipfs://QmLink"));
        assert_eq!(parsed.token_info.get(""), None);
        assert_eq!(parsed.token_info["name"], "My Token");
    }

    #[test]
    fn token_big_map_value_rejects_non_hex_token_id() {
        let json = r#"{"token_id":"not-hex","token_info":{}}"#;
        assert!(serde_json::from_str::<TokenBigMapValue>(json).is_err());
    }
}
