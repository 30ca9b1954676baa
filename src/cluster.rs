//! Cluster Identity and Placement
//!
//! A cluster is identified by a URL-like string. The placement set lists
//! every cluster that should hold a replica of an account or container;
//! the peer set is the placement minus the local cluster.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Opaque URL-like identity of one cluster
///
/// The verbatim value is kept for headers and sync-to URLs. Comparison is
/// case-insensitive everywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterIdentity(String);

impl ClusterIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    /// Verbatim identity
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identity asks for an encrypted connection
    pub fn is_tls(&self) -> bool {
        self.0.to_ascii_lowercase().starts_with("https://")
    }

    /// Lower-cased identity with any http/https scheme stripped
    pub fn authority(&self) -> String {
        let lower = self.0.to_ascii_lowercase();
        let stripped = lower
            .strip_prefix("https://")
            .or_else(|| lower.strip_prefix("http://"))
            .unwrap_or(&lower);
        stripped.trim_end_matches('/').to_string()
    }

    /// Base URL used to reach the cluster
    pub fn base_url(&self) -> String {
        let scheme = if self.is_tls() { "https" } else { "http" };
        format!("{}://{}", scheme, self.authority())
    }
}

impl PartialEq for ClusterIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for ClusterIdentity {}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClusterIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ClusterIdentity {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Ordered, duplicate-free list of clusters holding a replica
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementSet {
    clusters: Vec<ClusterIdentity>,
}

impl PlacementSet {
    /// Parse a comma-separated list of cluster URLs
    pub fn parse(list: &str) -> Self {
        list.split(',').collect()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClusterIdentity> {
        self.clusters.iter()
    }

    pub fn contains(&self, cluster: &ClusterIdentity) -> bool {
        self.clusters.iter().any(|c| c == cluster)
    }

    /// Derive the peers of `local`
    ///
    /// Fails when `local` is not part of the placement.
    pub fn peers_of(&self, local: &ClusterIdentity) -> Result<PeerSet> {
        if !self.contains(local) {
            return Err(Error::NotInPlacement {
                my_cluster: local.to_string(),
                placement: self.to_string(),
            });
        }

        Ok(PeerSet {
            peers: self.clusters.iter().filter(|c| *c != local).cloned().collect(),
        })
    }
}

impl<S: Into<ClusterIdentity>> FromIterator<S> for PlacementSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut clusters: Vec<ClusterIdentity> = Vec::new();
        for cluster in iter.into_iter().map(Into::into) {
            if cluster.as_str().is_empty() || clusters.contains(&cluster) {
                continue;
            }
            clusters.push(cluster);
        }
        Self { clusters }
    }
}

impl fmt::Display for PlacementSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.clusters.iter().map(|c| c.as_str()).collect();
        f.write_str(&joined.join(","))
    }
}

/// Placement minus the local cluster, in placement order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSet {
    peers: Vec<ClusterIdentity>,
}

impl PeerSet {
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClusterIdentity> {
        self.peers.iter()
    }

    /// Last peer in chain order; the local replica syncs to it
    pub fn last(&self) -> Option<&ClusterIdentity> {
        self.peers.last()
    }

    /// Only single-peer placements are supported for now
    pub fn require_single(self) -> Result<Self> {
        if self.peers.len() != 1 {
            return Err(Error::UnsupportedPeerCount(self.peers.len()));
        }
        Ok(self)
    }

    /// Pair every peer with the cluster it must sync to
    ///
    /// The first peer syncs back to `local`, each later peer to the one
    /// before it: local <- peer1 <- peer2 <- ...
    pub fn chain(&self, local: &ClusterIdentity) -> Vec<(ClusterIdentity, ClusterIdentity)> {
        let mut sync_to = local.clone();
        let mut chain = Vec::with_capacity(self.peers.len());
        for peer in &self.peers {
            chain.push((peer.clone(), sync_to));
            sync_to = peer.clone();
        }
        chain
    }
}

impl From<Vec<ClusterIdentity>> for PeerSet {
    fn from(peers: Vec<ClusterIdentity>) -> Self {
        Self { peers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_authority_and_scheme() {
        let plain = ClusterIdentity::new("http://Serengeti.Tanzania.biz:8081");
        assert!(!plain.is_tls());
        assert_eq!(plain.authority(), "serengeti.tanzania.biz:8081");
        assert_eq!(plain.base_url(), "http://serengeti.tanzania.biz:8081");

        let tls = ClusterIdentity::new("HTTPS://Annapurna.Nepal.info:8443/");
        assert!(tls.is_tls());
        assert_eq!(tls.authority(), "annapurna.nepal.info:8443");

        let bare = ClusterIdentity::new("swift.local:8080");
        assert!(!bare.is_tls());
        assert_eq!(bare.authority(), "swift.local:8080");
    }

    #[test]
    fn test_identity_case_insensitive_but_verbatim() {
        let a = ClusterIdentity::new("http://Serengeti.Tanzania.biz:8081");
        let b = ClusterIdentity::new("http://serengeti.tanzania.biz:8081");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "http://Serengeti.Tanzania.biz:8081");
    }

    #[test]
    fn test_parse_placement() {
        let placement = PlacementSet::parse(
            "http://Annapurna.Nepal.info:8080, http://Serengeti.Tanzania.biz:8081,,",
        );
        assert_eq!(placement.len(), 2);
        assert!(placement.contains(&"http://serengeti.tanzania.biz:8081".into()));
    }

    #[test]
    fn test_placement_dedup_keeps_first() {
        let placement = PlacementSet::parse("http://a:1,http://B:2,http://A:1");
        let clusters: Vec<&str> = placement.iter().map(|c| c.as_str()).collect();
        assert_eq!(clusters, vec!["http://a:1", "http://B:2"]);
    }

    #[test]
    fn test_peers_of() {
        let placement = PlacementSet::parse("http://a:1,http://b:2,http://c:3");
        let peers = placement.peers_of(&"http://B:2".into()).unwrap();
        let names: Vec<&str> = peers.iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["http://a:1", "http://c:3"]);
    }

    #[test]
    fn test_peers_of_not_in_placement() {
        let placement = PlacementSet::parse("http://a:1,http://b:2");
        let err = placement.peers_of(&"http://z:9".into()).unwrap_err();
        assert!(matches!(err, Error::NotInPlacement { .. }));
    }

    #[test]
    fn test_require_single() {
        let one = PeerSet::from(vec![ClusterIdentity::new("http://a:1")]);
        assert!(one.require_single().is_ok());

        let none = PeerSet::default();
        assert!(matches!(none.require_single(), Err(Error::UnsupportedPeerCount(0))));

        let two = PeerSet::from(vec!["http://a:1".into(), "http://b:2".into()]);
        assert!(matches!(two.require_single(), Err(Error::UnsupportedPeerCount(2))));
    }

    #[test]
    fn test_chain_links_each_peer_to_its_predecessor() {
        let local = ClusterIdentity::new("http://local:1");
        let peers = PeerSet::from(vec![
            "http://p1:1".into(),
            "http://p2:2".into(),
            "http://p3:3".into(),
        ]);

        let chain: Vec<(String, String)> = peers
            .chain(&local)
            .into_iter()
            .map(|(peer, to)| (peer.to_string(), to.to_string()))
            .collect();

        assert_eq!(
            chain,
            vec![
                ("http://p1:1".to_string(), "http://local:1".to_string()),
                ("http://p2:2".to_string(), "http://p1:1".to_string()),
                ("http://p3:3".to_string(), "http://p2:2".to_string()),
            ]
        );
        assert_eq!(peers.last().unwrap().as_str(), "http://p3:3");
    }
}
