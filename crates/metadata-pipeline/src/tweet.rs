//! Pulls `tweet_id` and `creator_id` out of a token's resolved metadata.
//! Grounded on `cmd/metadata/util/tweet_parser.go`.

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct Attribute {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct Attributes {
    #[serde(default)]
    name: String,
    #[serde(default)]
    attributes: Vec<Attribute>,
}

/// Extract `(tweet_id, creator_id)` from token metadata. Missing or
/// malformed fields yield empty strings rather than an error — this
/// never fails.
pub fn parse(metadata: &serde_json::Value) -> (String, String) {
    let attr: Attributes = match serde_json::from_value(metadata.clone()) {
        Ok(attr) => attr,
        Err(_) => return (String::new(), String::new()),
    };

    let mut tweet_id = String::new();
    if !attr.name.is_empty() {
        let splits: Vec<&str> = attr.name.split(' ').collect();
        if splits.len() > 1 {
            if let Some(id) = splits[1].strip_prefix('#') {
                if id.chars().all(|c| c.is_ascii_digit()) && !id.is_empty() {
                    tweet_id = id.to_string();
                }
            }
        }
    }

    let creator_id = attr
        .attributes
        .iter()
        .find(|a| a.name == "twitter_creator_id")
        .map(|a| a.value.clone())
        .unwrap_or_default();

    (tweet_id, creator_id)
}
