//! Read-only network/topology profile.
//!
//! The profile is the JSON document the ledger SDK consumes: it names the
//! organization the client belongs to, the peers of every organization, and
//! the endpoint and TLS material of every peer.

use std::{
    fs,
    path::{Path, PathBuf},
};

use error_stack::ResultExt;
use serde_json::Value;

/// Errors raised while loading or querying a [`NetworkProfile`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    /// The profile file could not be read
    #[error("Failed to read the network profile")]
    ReadFile,
    /// The profile is not a JSON document
    #[error("The network profile is not valid JSON")]
    Json,
    /// A required entry is absent
    #[error("Missing entry `{path}` in the network profile")]
    Missing {
        /// Dotted path of the entry
        path: String,
    },
    /// An entry has an unexpected type
    #[error("Entry `{path}` in the network profile should be {expected}")]
    WrongType {
        /// Dotted path of the entry
        path: String,
        /// Description of the expected type
        expected: &'static str,
    },
}

/// Network profile loaded at startup
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkProfile {
    root: Value,
}

impl NetworkProfile {
    /// Read the profile from a JSON file.
    ///
    /// # Errors
    /// If the file can't be read or is not JSON.
    pub fn load(path: impl AsRef<Path>) -> error_stack::Result<Self, ProfileError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .change_context(ProfileError::ReadFile)
            .attach_printable_lazy(|| format!("profile path: {}", path.display()))?;
        Self::from_json_str(&content)
            .attach_printable_lazy(|| format!("profile path: {}", path.display()))
    }

    /// Parse the profile from JSON text.
    ///
    /// # Errors
    /// If `content` is not JSON.
    pub fn from_json_str(content: &str) -> error_stack::Result<Self, ProfileError> {
        let root = serde_json::from_str(content).change_context(ProfileError::Json)?;
        Ok(Self { root })
    }

    /// Wrap an already parsed document.
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Walk nested keys, e.g. `["peers", "peer0.org1.example.com", "url"]`.
    ///
    /// Returns `None` if any segment is missing.
    pub fn net_info(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.root, |value, segment| value.get(*segment))
    }

    /// Organization the client belongs to (`client.organization`).
    ///
    /// # Errors
    /// If the entry is missing or not a string.
    pub fn organization(&self) -> Result<&str, ProfileError> {
        self.string(&["client", "organization"])
    }

    /// Peers of `org` (`organizations.<org>.peers`).
    ///
    /// # Errors
    /// If the entry is missing or not a list of strings.
    pub fn peers_of(&self, org: &str) -> Result<Vec<&str>, ProfileError> {
        let path = ["organizations", org, "peers"];
        let peers = self
            .net_info(&path)
            .ok_or_else(|| missing(&path))?
            .as_array()
            .ok_or_else(|| wrong_type(&path, "a list of peer names"))?;
        peers
            .iter()
            .map(|peer| {
                peer.as_str()
                    .ok_or_else(|| wrong_type(&path, "a list of peer names"))
            })
            .collect()
    }

    /// Endpoint of `peer` (`peers.<peer>.url`).
    ///
    /// # Errors
    /// If the entry is missing or not a string.
    pub fn peer_url(&self, peer: &str) -> Result<&str, ProfileError> {
        self.string(&["peers", peer, "url"])
    }

    /// TLS CA certificate of `peer` (`peers.<peer>.tlsCACerts.path`).
    ///
    /// # Errors
    /// If the entry is missing or not a string.
    pub fn peer_tls_ca_path(&self, peer: &str) -> Result<PathBuf, ProfileError> {
        self.string(&["peers", peer, "tlsCACerts", "path"])
            .map(PathBuf::from)
    }

    fn string(&self, path: &[&str]) -> Result<&str, ProfileError> {
        self.net_info(path)
            .ok_or_else(|| missing(path))?
            .as_str()
            .ok_or_else(|| wrong_type(path, "a string"))
    }
}

fn missing(path: &[&str]) -> ProfileError {
    ProfileError::Missing {
        path: path.join("."),
    }
}

fn wrong_type(path: &[&str], expected: &'static str) -> ProfileError {
    ProfileError::WrongType {
        path: path.join("."),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn profile() -> NetworkProfile {
        NetworkProfile::from_value(json!({
            "name": "sample-network",
            "client": { "organization": "Org1" },
            "organizations": {
                "Org1": {
                    "mspid": "Org1MSP",
                    "peers": ["peer0.org1.example.com", "peer1.org1.example.com"]
                },
                "Broken": { "peers": [1, 2] }
            },
            "peers": {
                "peer0.org1.example.com": {
                    "url": "grpcs://localhost:7051",
                    "tlsCACerts": { "path": "crypto/peer0/tls/ca.crt" }
                }
            }
        }))
    }

    #[test]
    fn typed_helpers_read_the_topology() {
        let profile = profile();
        assert_eq!(profile.organization().unwrap(), "Org1");
        assert_eq!(
            profile.peers_of("Org1").unwrap(),
            vec!["peer0.org1.example.com", "peer1.org1.example.com"]
        );
        assert_eq!(
            profile.peer_url("peer0.org1.example.com").unwrap(),
            "grpcs://localhost:7051"
        );
        assert_eq!(
            profile.peer_tls_ca_path("peer0.org1.example.com").unwrap(),
            PathBuf::from("crypto/peer0/tls/ca.crt")
        );
    }

    #[test]
    fn net_info_walks_nested_keys() {
        let profile = profile();
        assert_eq!(
            profile.net_info(&["organizations", "Org1", "mspid"]),
            Some(&json!("Org1MSP"))
        );
        assert_eq!(profile.net_info(&["organizations", "Org9"]), None);
        assert_eq!(profile.net_info(&[]), Some(&profile.root));
    }

    #[test]
    fn missing_and_mistyped_entries_are_reported() {
        let profile = profile();
        assert_eq!(
            profile.peer_url("peer1.org1.example.com"),
            Err(ProfileError::Missing {
                path: "peers.peer1.org1.example.com.url".to_owned()
            })
        );
        assert!(matches!(
            profile.peers_of("Broken"),
            Err(ProfileError::WrongType { .. })
        ));
    }

    #[test]
    fn invalid_json_is_rejected() {
        let err = NetworkProfile::from_json_str("{ not json").unwrap_err();
        assert_eq!(err.current_context(), &ProfileError::Json);
    }
}
