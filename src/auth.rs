//! Identity allow-list
//!
//! The relay only pairs endpoints whose identity appears in a persisted
//! allow-list, loaded once at startup. The file is a JSON object with an
//! `allowed_uuids` array of identity strings.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct AllowListFile {
    #[serde(default)]
    allowed_uuids: Vec<String>,
}

/// Set of identities permitted to connect.
#[derive(Debug, Default)]
pub struct AllowList {
    identities: HashSet<String>,
}

impl AllowList {
    /// Load the allow-list from `path`.
    ///
    /// If the file does not exist, a template with placeholder entries is
    /// written there and an empty-but-usable list is returned, so a fresh
    /// deployment has a file to edit rather than a crash.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let template = AllowListFile {
                allowed_uuids: vec![
                    "EXAMPLE-UUID-1234-5678-9ABC".to_string(),
                    "YOUR-CLIENT-UUID-HERE".to_string(),
                ],
            };
            let body = serde_json::to_string_pretty(&template)
                .map_err(|e| Error::Config(e.to_string()))?;
            std::fs::write(path, body)?;
            tracing::warn!(path = %path.display(), "Created template allow-list, add your identities");
        }

        let body = std::fs::read_to_string(path)?;
        let file: AllowListFile =
            serde_json::from_str(&body).map_err(|e| Error::Config(e.to_string()))?;

        let identities: HashSet<String> = file
            .allowed_uuids
            .into_iter()
            .filter(|id| !id.is_empty())
            .collect();

        tracing::info!(count = identities.len(), path = %path.display(), "Loaded allow-list");
        Ok(Self { identities })
    }

    /// Build an allow-list directly from identity strings.
    pub fn from_identities<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identities: identities.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `identity` may connect. Empty identities are never allowed.
    pub fn is_allowed(&self, identity: &str) -> bool {
        !identity.is_empty() && self.identities.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}
