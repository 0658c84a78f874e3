//! Identity and topology of one CLI invocation, resolved from the client
//! configuration and the network profile.

use std::path::{Path, PathBuf};

use avalon_config::{BasicAuth, Config, NetworkProfile, ProfileError};
use avalon_logger::prelude::*;
use rand::{seq::SliceRandom, Rng};
use serde_json::Value;
use url::Url;

use crate::{client::Client, gateway::Gateway};

/// The profile doesn't describe a usable peer
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// A required profile entry is missing or malformed
    #[error("Failed to resolve the connection from the network profile")]
    Profile(#[from] ProfileError),
    /// No peer to pick from
    #[error("Organization `{0}` has no peers")]
    NoPeers(String),
}

/// Resolved organization, peer, channel and user
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    profile: NetworkProfile,
    org_name: String,
    peer_name: String,
    peer_url: String,
    tls_ca_path: Option<PathBuf>,
    channel: String,
    user: String,
    gateway_url: Url,
    commit_timeout: std::time::Duration,
    basic_auth: Option<BasicAuth>,
}

impl ConnectionContext {
    /// Resolve the context, picking a random peer of the organization
    /// unless the configuration pins one.
    ///
    /// # Errors
    /// If the organization, the peer or its endpoint can't be resolved.
    pub fn resolve(config: &Config, profile: NetworkProfile) -> Result<Self, ContextError> {
        Self::resolve_with_rng(config, profile, &mut rand::thread_rng())
    }

    /// Same as [`Self::resolve`] with an explicit source of randomness.
    ///
    /// # Errors
    /// See [`Self::resolve`].
    pub fn resolve_with_rng(
        config: &Config,
        profile: NetworkProfile,
        rng: &mut impl Rng,
    ) -> Result<Self, ContextError> {
        let org_name = match &config.organization {
            Some(org) => org.clone(),
            None => profile.organization()?.to_owned(),
        };
        let peer_name = match &config.peer {
            Some(peer) => peer.clone(),
            None => profile
                .peers_of(&org_name)?
                .choose(rng)
                .map(|peer| (*peer).to_owned())
                .ok_or_else(|| ContextError::NoPeers(org_name.clone()))?,
        };
        let peer_url = profile.peer_url(&peer_name)?.to_owned();
        let tls_ca_path = match profile.peer_tls_ca_path(&peer_name) {
            Ok(path) => Some(path),
            Err(ProfileError::Missing { .. }) => None,
            Err(err) => return Err(err.into()),
        };

        info!(organization = %org_name, peer = %peer_name, "Resolved connection");
        Ok(Self {
            profile,
            org_name,
            peer_name,
            peer_url,
            tls_ca_path,
            channel: config.channel.clone(),
            user: config.user.clone(),
            gateway_url: config.gateway_url.clone(),
            commit_timeout: config.commit_timeout,
            basic_auth: config.basic_auth.clone(),
        })
    }

    /// Organization acting
    pub fn org_name(&self) -> &str {
        &self.org_name
    }

    /// Peer serving the invocation
    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    /// Endpoint of the peer
    pub fn peer_url(&self) -> &str {
        &self.peer_url
    }

    /// TLS CA certificate of the peer, if the profile has one
    pub fn tls_ca_path(&self) -> Option<&Path> {
        self.tls_ca_path.as_deref()
    }

    /// Channel to bind to
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// User to act as
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Look up any profile entry
    pub fn net_info(&self, path: &[&str]) -> Option<&Value> {
        self.profile.net_info(path)
    }

    /// Gateway session for this context
    pub fn gateway(&self) -> Gateway {
        let gateway = Gateway::new(
            self.gateway_url.clone(),
            &self.channel,
            &self.user,
            &self.peer_name,
        )
        .with_commit_timeout(self.commit_timeout);
        match &self.basic_auth {
            Some(auth) => gateway.with_basic_auth(auth),
            None => gateway,
        }
    }

    /// Invocation façade over [`Self::gateway`]
    pub fn client(&self) -> Client<Gateway> {
        Client::new(self.gateway())
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};
    use serde_json::json;

    use super::*;

    fn profile() -> NetworkProfile {
        NetworkProfile::from_value(json!({
            "client": { "organization": "Org1" },
            "organizations": {
                "Org1": { "peers": ["peer0.org1.example.com", "peer1.org1.example.com"] },
                "Org2": { "peers": [] }
            },
            "peers": {
                "peer0.org1.example.com": {
                    "url": "grpcs://localhost:7051",
                    "tlsCACerts": { "path": "crypto/peer0/ca.crt" }
                },
                "peer1.org1.example.com": { "url": "grpc://localhost:8051" }
            }
        }))
    }

    #[test]
    fn random_peer_comes_from_the_organization() {
        let config = Config::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            let context = ConnectionContext::resolve_with_rng(&config, profile(), &mut rng).unwrap();
            assert_eq!(context.org_name(), "Org1");
            assert!(context.peer_name().ends_with(".org1.example.com"));
            assert_eq!(context.channel(), "mychannel");
            assert_eq!(context.user(), "Admin");
        }
    }

    #[test]
    fn pinned_peer_is_used() {
        let config = Config {
            peer: Some("peer1.org1.example.com".to_owned()),
            ..Config::default()
        };
        let context = ConnectionContext::resolve(&config, profile()).unwrap();
        assert_eq!(context.peer_url(), "grpc://localhost:8051");
        assert_eq!(context.tls_ca_path(), None);
        assert_eq!(context.gateway().peer(), "peer1.org1.example.com");

        let config = Config {
            peer: Some("peer0.org1.example.com".to_owned()),
            ..Config::default()
        };
        let context = ConnectionContext::resolve(&config, profile()).unwrap();
        assert_eq!(context.tls_ca_path(), Some(Path::new("crypto/peer0/ca.crt")));
        assert_eq!(
            context.net_info(&["organizations", "Org1", "peers"]).unwrap()[0],
            "peer0.org1.example.com"
        );
    }

    #[test]
    fn unresolvable_topology_is_fatal() {
        let config = Config {
            organization: Some("Org2".to_owned()),
            ..Config::default()
        };
        assert_eq!(
            ConnectionContext::resolve(&config, profile()).unwrap_err(),
            ContextError::NoPeers("Org2".to_owned())
        );

        let config = Config {
            peer: Some("peer9.org1.example.com".to_owned()),
            ..Config::default()
        };
        assert!(matches!(
            ConnectionContext::resolve(&config, profile()),
            Err(ContextError::Profile(ProfileError::Missing { .. }))
        ));

        let empty = NetworkProfile::from_value(json!({}));
        assert!(ConnectionContext::resolve(&Config::default(), empty).is_err());
    }
}
