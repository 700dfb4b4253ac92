//! Search dispatch tables.

use std::collections::HashMap;

use super::ClientError;
use crate::media::{MediaType, Provider};

/// Media type → search endpoint, fixed when the client is built.
#[derive(Debug, Clone)]
pub struct SearchTable {
    provider: Provider,
    endpoints: HashMap<MediaType, &'static str>,
}

impl SearchTable {
    #[must_use]
    pub fn new(provider: Provider, entries: &[(MediaType, &'static str)]) -> Self {
        Self {
            provider,
            endpoints: entries.iter().copied().collect(),
        }
    }

    /// # Errors
    ///
    /// Returns [`ClientError::UnsupportedMediaType`] for types with no entry.
    pub fn endpoint(&self, media_type: MediaType) -> Result<&'static str, ClientError> {
        self.endpoints
            .get(&media_type)
            .copied()
            .ok_or_else(|| ClientError::unsupported(self.provider, media_type, "search"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown_types() {
        let table = SearchTable::new(
            Provider::Soundcloud,
            &[(MediaType::Track, "search/tracks"), (MediaType::Playlist, "search/playlists")],
        );
        assert_eq!(table.endpoint(MediaType::Track).unwrap(), "search/tracks");

        let err = table.endpoint(MediaType::Label).unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnsupportedMediaType {
                provider: Provider::Soundcloud,
                media_type: MediaType::Label,
                operation: "search",
            }
        ));
    }
}
