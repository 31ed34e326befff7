//! Membership values persisted by the log and snapshot stores.
//!
//! Storage never interprets a [`Configuration`]; it only keeps it durable and
//! hands it back to a [`ConfigurationManager`] when the log is replayed.

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;
use crate::StorageError;

/// A cluster member: network address plus an index distinguishing several
/// replicas behind one address. Text form is `ip:port:idx`; a bare `ip:port`
/// parses with `idx == 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId {
    pub addr: SocketAddr,
    pub idx: u32,
}

impl PeerId {
    pub fn new(
        addr: SocketAddr,
        idx: u32,
    ) -> Self {
        Self { addr, idx }
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || StorageError::InvalidArgument(format!("invalid peer id {s:?}"));

        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self { addr, idx: 0 });
        }
        let (addr, idx) = s.rsplit_once(':').ok_or_else(invalid)?;
        Ok(Self {
            addr: addr.parse().map_err(|_| invalid())?,
            idx: idx.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for PeerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.idx)
    }
}

/// Ordered set of peers; text form `peer,peer,...`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Configuration(BTreeSet<PeerId>);

impl Configuration {
    pub fn new(peers: impl IntoIterator<Item = PeerId>) -> Self {
        Self(peers.into_iter().collect())
    }

    pub fn add_peer(
        &mut self,
        peer: PeerId,
    ) -> bool {
        self.0.insert(peer)
    }

    pub fn remove_peer(
        &mut self,
        peer: &PeerId,
    ) -> bool {
        self.0.remove(peer)
    }

    pub fn contains(
        &self,
        peer: &PeerId,
    ) -> bool {
        self.0.contains(peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for Configuration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PeerId::from_str)
            .collect::<Result<BTreeSet<_>>>()
            .map(Self)
    }
}

impl fmt::Display for Configuration {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut sep = "";
        for peer in &self.0 {
            write!(f, "{sep}{peer}")?;
            sep = ",";
        }
        Ok(())
    }
}

/// Membership tracker fed by [`LogStorage::init`](super::LogStorage::init).
///
/// Receives every configuration entry of the retained log in ascending
/// index order.
#[cfg_attr(test, automock)]
pub trait ConfigurationManager: Send {
    fn apply(
        &mut self,
        index: u64,
        configuration: Configuration,
    );
}

/// Minimal tracker keeping every applied configuration.
#[derive(Debug, Default, Clone)]
pub struct ConfigurationHistory {
    entries: Vec<(u64, Configuration)>,
}

impl ConfigurationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest configuration together with the index that introduced it.
    pub fn last(&self) -> Option<&(u64, Configuration)> {
        self.entries.last()
    }

    /// Configuration in effect at `index`.
    pub fn effective_at(
        &self,
        index: u64,
    ) -> Option<&Configuration> {
        self.entries
            .iter()
            .rev()
            .find(|(i, _)| *i <= index)
            .map(|(_, c)| c)
    }

    pub fn indexes(&self) -> Vec<u64> {
        self.entries.iter().map(|(i, _)| *i).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ConfigurationManager for ConfigurationHistory {
    fn apply(
        &mut self,
        index: u64,
        configuration: Configuration,
    ) {
        // Replays after a suffix truncation may revisit indexes.
        self.entries.retain(|(i, _)| *i < index);
        self.entries.push((index, configuration));
    }
}
