//! Startup configuration for a [`crate::voter::Voter`].
//!
//! Configuration mistakes are the only fatal error class in this crate, and
//! they are only surfaced at startup: everything else a node receives at
//! runtime may legitimately originate from a faulty peer and is dropped
//! softly by the handlers.

use commonware_cryptography::PublicKey;
use prometheus_client::registry::Registry;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};
use thiserror::Error;

/// Errors that can occur when validating a [`Config`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("epoch length must be greater than zero")]
    ZeroEpochLength,
    #[error("committee table is empty")]
    EmptyTable,
    #[error("committee {0} is empty")]
    EmptyCommittee(usize),
    #[error("committee {0} contains a duplicate member")]
    DuplicateMember(usize),
    #[error("quorum {quorum} must exceed twice the fault bound {max_faults}")]
    QuorumTooSmall { quorum: u32, max_faults: u32 },
    #[error("quorum {quorum} is unreachable for committee {committee} of size {size}")]
    QuorumUnreachable {
        quorum: u32,
        committee: usize,
        size: usize,
    },
}

/// Configuration for a single node.
///
/// `committees` is an ordered table of per-epoch validator sets: the
/// committee for epoch `e` is `committees[e % committees.len()]`, so a finite
/// table repeats indefinitely. Within a committee, the list order is the
/// leader rotation (the leader of view `v` is the member at `v % len`).
pub struct Config<P: PublicKey> {
    /// Prefix for all signed messages to prevent replay attacks.
    pub namespace: Vec<u8>,

    /// Number of blocks per epoch.
    pub epoch_length: u64,

    /// Number of signers required to form a certificate within a committee.
    ///
    /// Must exceed `2 * max_faults` for safety to hold. Use
    /// [`commonware_utils::quorum`] to derive the minimal safe value for a
    /// committee size.
    pub quorum: u32,

    /// Maximum number of Byzantine members tolerated per committee.
    pub max_faults: u32,

    /// Ordered validator sets, one per epoch slot (wrapping).
    pub committees: Vec<Vec<P>>,

    /// Prometheus registry for the node's metrics.
    pub registry: Arc<Mutex<Registry>>,
}

impl<P: PublicKey> Config<P> {
    /// Ensures the configuration is usable.
    ///
    /// Returns the first violation found. A configuration that passes is
    /// safe relative to `max_faults` Byzantine members per committee.
    pub fn validate(&self) -> Result<(), Error> {
        if self.epoch_length == 0 {
            return Err(Error::ZeroEpochLength);
        }
        if self.committees.is_empty() {
            return Err(Error::EmptyTable);
        }
        if self.quorum <= 2 * self.max_faults {
            return Err(Error::QuorumTooSmall {
                quorum: self.quorum,
                max_faults: self.max_faults,
            });
        }
        for (index, committee) in self.committees.iter().enumerate() {
            if committee.is_empty() {
                return Err(Error::EmptyCommittee(index));
            }
            let unique: HashSet<_> = committee.iter().collect();
            if unique.len() != committee.len() {
                return Err(Error::DuplicateMember(index));
            }
            if (self.quorum as usize) > committee.len() {
                return Err(Error::QuorumUnreachable {
                    quorum: self.quorum,
                    committee: index,
                    size: committee.len(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_cryptography::{ed25519, PrivateKeyExt, Signer};

    fn keys(n: u64) -> Vec<ed25519::PublicKey> {
        let mut keys: Vec<_> = (0..n)
            .map(|i| ed25519::PrivateKey::from_seed(i).public_key())
            .collect();
        keys.sort();
        keys
    }

    fn config(
        epoch_length: u64,
        quorum: u32,
        max_faults: u32,
        committees: Vec<Vec<ed25519::PublicKey>>,
    ) -> Config<ed25519::PublicKey> {
        Config {
            namespace: b"test".to_vec(),
            epoch_length,
            quorum,
            max_faults,
            committees,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(config(5, 3, 1, vec![keys(4)]).validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_epoch_length() {
        assert!(matches!(
            config(0, 3, 1, vec![keys(4)]).validate(),
            Err(Error::ZeroEpochLength)
        ));
    }

    #[test]
    fn test_rejects_empty_table() {
        assert!(matches!(
            config(5, 3, 1, vec![]).validate(),
            Err(Error::EmptyTable)
        ));
    }

    #[test]
    fn test_rejects_empty_committee() {
        assert!(matches!(
            config(5, 3, 1, vec![keys(4), vec![]]).validate(),
            Err(Error::EmptyCommittee(1))
        ));
    }

    #[test]
    fn test_rejects_duplicate_member() {
        let mut committee = keys(4);
        committee.push(committee[0].clone());
        assert!(matches!(
            config(5, 3, 1, vec![committee]).validate(),
            Err(Error::DuplicateMember(0))
        ));
    }

    #[test]
    fn test_rejects_small_quorum() {
        // A quorum of 2 cannot outnumber two faulty members.
        assert!(matches!(
            config(5, 2, 1, vec![keys(4)]).validate(),
            Err(Error::QuorumTooSmall { .. })
        ));
    }

    #[test]
    fn test_rejects_unreachable_quorum() {
        assert!(matches!(
            config(5, 5, 1, vec![keys(4)]).validate(),
            Err(Error::QuorumUnreachable { .. })
        ));
    }
}
