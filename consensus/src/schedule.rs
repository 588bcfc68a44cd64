//! Epoch and committee model.
//!
//! A [`Schedule`] is a pure lookup structure built once at startup: it maps
//! block heights to epochs, epochs to validator committees, and views to
//! leaders. Epoch `e` covers heights `(e-1)*K+1 ..= e*K`, so the last height
//! of an epoch is a multiple of `K` (the boundary block) and height `K+1`
//! opens the next epoch. Height `0` hosts only the genesis certificate.
//!
//! The committee table wraps: epoch `e` uses `committees[e % len]`, which
//! lets a finite configuration repeat indefinitely.

use crate::types::{Epoch, Height, View};
use commonware_cryptography::PublicKey;
use std::collections::{BTreeSet, HashSet};

struct Committee<P: PublicKey> {
    /// Leader rotation order.
    ordered: Vec<P>,
    /// Membership index.
    members: HashSet<P>,
}

/// Maps heights to epochs, epochs to committees, and views to leaders.
pub struct Schedule<P: PublicKey> {
    epoch_length: u64,
    committees: Vec<Committee<P>>,
}

impl<P: PublicKey> Schedule<P> {
    /// Builds a schedule from an ordered committee table.
    ///
    /// The table must be non-empty and every committee must be non-empty
    /// (enforced by [`crate::config::Config::validate`]).
    pub fn new(epoch_length: u64, committees: Vec<Vec<P>>) -> Self {
        assert!(epoch_length > 0, "epoch length must be positive");
        assert!(!committees.is_empty(), "committee table must be non-empty");
        let committees = committees
            .into_iter()
            .map(|ordered| {
                assert!(!ordered.is_empty(), "committee must be non-empty");
                let members = ordered.iter().cloned().collect();
                Committee { ordered, members }
            })
            .collect();
        Self {
            epoch_length,
            committees,
        }
    }

    /// Returns the number of blocks per epoch.
    pub fn epoch_length(&self) -> u64 {
        self.epoch_length
    }

    /// Returns the epoch the given height belongs to.
    ///
    /// The boundary block (last of its epoch) belongs to the epoch it
    /// closes: `epoch_of(K) == 1` and `epoch_of(K + 1) == 2`.
    pub fn epoch_of(&self, height: Height) -> Epoch {
        if height % self.epoch_length == 0 {
            Epoch::new(height / self.epoch_length)
        } else {
            Epoch::new(height / self.epoch_length + 1)
        }
    }

    /// Returns whether the given height is the last block of its epoch.
    pub fn is_boundary(&self, height: Height) -> bool {
        height % self.epoch_length == 0
    }

    /// Returns whether the given height is the first block of its epoch.
    pub fn is_first_in_epoch(&self, height: Height) -> bool {
        height % self.epoch_length == 1
    }

    fn committee(&self, epoch: Epoch) -> &Committee<P> {
        let slot = (epoch.get() % self.committees.len() as u64) as usize;
        &self.committees[slot]
    }

    /// Returns the ordered validator set for the given epoch.
    pub fn participants(&self, epoch: Epoch) -> &[P] {
        &self.committee(epoch).ordered
    }

    /// Returns the leader for the given view within the given epoch.
    pub fn leader(&self, view: View, epoch: Epoch) -> &P {
        let ordered = &self.committee(epoch).ordered;
        &ordered[(view.get() % ordered.len() as u64) as usize]
    }

    /// Returns whether the candidate belongs to the given epoch's committee.
    pub fn is_member(&self, epoch: Epoch, candidate: &P) -> bool {
        self.committee(epoch).members.contains(candidate)
    }

    /// Returns the epochs a block is relevant to: its own epoch, plus the
    /// next epoch when the block is a boundary block.
    pub fn block_epochs(&self, height: Height) -> (Epoch, Option<Epoch>) {
        let epoch = self.epoch_of(height);
        if self.is_boundary(height) {
            (epoch, Some(epoch.next()))
        } else {
            (epoch, None)
        }
    }

    /// Returns the epochs for which `sender`'s signature on a block at
    /// `height` is relevant, i.e. the block's epochs restricted to the
    /// committees the sender belongs to.
    ///
    /// This drives which tally keys a single vote updates: a signature by a
    /// member of both committees on a boundary block counts towards both
    /// quorums.
    pub fn vote_epochs(&self, sender: &P, height: Height) -> Vec<Epoch> {
        let (epoch, next) = self.block_epochs(height);
        let mut epochs = Vec::with_capacity(2);
        if self.is_member(epoch, sender) {
            epochs.push(epoch);
        }
        if let Some(next) = next {
            if self.is_member(next, sender) {
                epochs.push(next);
            }
        }
        epochs
    }

    /// Returns the recipients of a proposal for the given height.
    ///
    /// Blocks in the hand-off window fan out to the union of the outgoing
    /// and incoming committees: a boundary block must be voted on by both,
    /// and the first block of a new epoch announces the crossing to the
    /// committee it leaves behind. All other blocks stay within their own
    /// committee.
    pub fn recipients(&self, height: Height) -> Vec<P> {
        let epoch = self.epoch_of(height);
        let mut recipients: BTreeSet<P> =
            self.committee(epoch).ordered.iter().cloned().collect();
        if self.is_boundary(height) {
            recipients.extend(self.committee(epoch.next()).ordered.iter().cloned());
        } else if self.is_first_in_epoch(height) {
            // Epoch 0 holds only the genesis certificate, so the first block
            // of epoch 1 has no outgoing committee to announce to.
            if let Some(previous) = epoch.previous() {
                if previous > Epoch::zero() {
                    recipients.extend(self.committee(previous).ordered.iter().cloned());
                }
            }
        }
        recipients.into_iter().collect()
    }

    /// Returns the size of the largest configured committee.
    ///
    /// Used to bound allocations when decoding untrusted certificates.
    pub fn max_committee_size(&self) -> usize {
        self.committees
            .iter()
            .map(|committee| committee.ordered.len())
            .max()
            .unwrap_or(0)
    }
}
