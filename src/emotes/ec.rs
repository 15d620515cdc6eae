//! Read-only view of an Emote Collector emote database.
//!
//! The database is a JSON object keyed by emote name:
//!
//! ```json
//! { "blobcat": { "id": 400000000000000000, "animated": false, "author": 140516693242937345 } }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::common::types::emote_url;
use crate::common::{ConfigError, EmoteError, EmoteId, EmoteResult};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EcEmote {
    pub id: EmoteId,
    #[serde(default)]
    pub animated: bool,
    /// User ID of whoever added the emote to the collection.
    pub author: u64,
}

impl EcEmote {
    pub fn url(&self) -> String {
        emote_url(self.id, self.animated)
    }
}

#[derive(Debug, Default)]
pub struct EmoteCollector {
    emotes: HashMap<String, EcEmote>,
}

impl EmoteCollector {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        let collector = Self::from_json(&content)?;
        info!("loaded {} Emote Collector emotes", collector.len());
        Ok(collector)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let raw: HashMap<String, EcEmote> =
            serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
                message: format!("Emote Collector database: {}", e),
            })?;
        let emotes = raw
            .into_iter()
            .map(|(name, emote)| (name.to_lowercase(), emote))
            .collect();
        Ok(Self { emotes })
    }

    /// Look up an emote, ignoring case.
    pub fn get(&self, name: &str) -> EmoteResult<&EcEmote> {
        self.emotes
            .get(&name.to_lowercase())
            .ok_or_else(|| EmoteError::EmoteNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.emotes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DB: &str = r#"{
        "BlobCat": { "id": 400000000000000000, "animated": false, "author": 140516693242937345 },
        "partyparrot": { "id": 400000000000000001, "animated": true, "author": 1 }
    }"#;

    #[test]
    fn test_lookup_ignores_case() {
        let ec = EmoteCollector::from_json(DB).unwrap();
        assert_eq!(ec.len(), 2);

        let blob = ec.get("blobcat").unwrap();
        assert_eq!(blob.author, 140516693242937345);
        assert_eq!(
            ec.get("PARTYPARROT").unwrap().url(),
            "https://cdn.discordapp.com/emojis/400000000000000001.gif?v=1"
        );
    }

    #[test]
    fn test_missing_emote() {
        let ec = EmoteCollector::from_json(DB).unwrap();
        assert!(matches!(ec.get("nope"), Err(EmoteError::EmoteNotFound(name)) if name == "nope"));
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            EmoteCollector::from_json("[1, 2]"),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            EmoteCollector::load("/nonexistent/ec.json"),
            Err(ConfigError::IoError { .. })
        ));
    }
}
