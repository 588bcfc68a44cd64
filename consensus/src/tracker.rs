//! Vote aggregation.
//!
//! The [`Tracker`] accumulates vote signatures per `(kind, height, view,
//! epoch)`. A signer contributes at most once per key regardless of
//! re-delivery, and a signer recorded under an epoch it does not belong to is
//! never counted (recording is restricted to the epochs
//! [`Schedule::vote_epochs`] reports for the sender).
//!
//! A boundary block requires a quorum in *both* the outgoing and incoming
//! committees before a certificate may be assembled; this is what forces
//! cooperation across committees at the hand-off point.

use crate::{
    schedule::Schedule,
    types::{Epoch, Height, View},
    wire::{Attestation, Certificate, Kind, Vote},
};
use commonware_cryptography::PublicKey;
use std::collections::BTreeMap;

type Key = (Kind, Height, View, Epoch);

/// Accumulates vote signatures until a quorum is reached.
pub struct Tracker<P: PublicKey> {
    tallies: BTreeMap<Key, BTreeMap<P, P::Signature>>,
}

impl<P: PublicKey> Tracker<P> {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self {
            tallies: BTreeMap::new(),
        }
    }

    /// Records a vote under every epoch the sender's signature is relevant
    /// to.
    ///
    /// Returns `true` if the vote was recorded under at least one epoch it
    /// had not been recorded under before.
    pub fn record(&mut self, vote: &Vote<P>, schedule: &Schedule<P>) -> bool {
        let sender = vote.sender().clone();
        let mut recorded = false;
        for epoch in schedule.vote_epochs(&sender, vote.height) {
            let tally = self
                .tallies
                .entry((vote.kind, vote.height, vote.view, epoch))
                .or_default();
            if !tally.contains_key(&sender) {
                tally.insert(sender.clone(), vote.attestation.signature.clone());
                recorded = true;
            }
        }
        recorded
    }

    /// Returns the number of signers recorded under the given key.
    pub fn count(&self, kind: Kind, height: Height, view: View, epoch: Epoch) -> usize {
        self.tallies
            .get(&(kind, height, view, epoch))
            .map_or(0, |tally| tally.len())
    }

    /// Returns whether every epoch relevant to the block has reached the
    /// quorum: one epoch for an interior block, both the outgoing and the
    /// incoming epoch for a boundary block.
    pub fn threshold_reached(
        &self,
        kind: Kind,
        height: Height,
        view: View,
        schedule: &Schedule<P>,
        quorum: u32,
    ) -> bool {
        let (epoch, next) = schedule.block_epochs(height);
        if self.count(kind, height, view, epoch) < quorum as usize {
            return false;
        }
        if let Some(next) = next {
            if self.count(kind, height, view, next) < quorum as usize {
                return false;
            }
        }
        true
    }

    /// Packages the accumulated signer sets into a certificate.
    ///
    /// Returns `None` if no signer from the block's own committee has been
    /// recorded. The caller is expected to check
    /// [`Tracker::threshold_reached`] first.
    pub fn assemble(
        &self,
        kind: Kind,
        height: Height,
        view: View,
        schedule: &Schedule<P>,
    ) -> Option<Certificate<P>> {
        let (epoch, next) = schedule.block_epochs(height);
        let signers = self.attestations(kind, height, view, epoch);
        if signers.is_empty() {
            return None;
        }
        let next_epoch_signers = next
            .map(|next| self.attestations(kind, height, view, next))
            .unwrap_or_default();
        Some(Certificate {
            kind,
            view,
            height,
            signers,
            next_epoch_signers,
        })
    }

    /// Drops every tally whose `(view, epoch)` the predicate rejects.
    pub fn prune(&mut self, keep: impl Fn(View, Epoch) -> bool) {
        self.tallies
            .retain(|(_, _, view, epoch), _| keep(*view, *epoch));
    }

    /// Returns whether any tally is keyed by the given epoch.
    pub fn has_epoch(&self, epoch: Epoch) -> bool {
        self.tallies.keys().any(|(_, _, _, e)| *e == epoch)
    }

    fn attestations(
        &self,
        kind: Kind,
        height: Height,
        view: View,
        epoch: Epoch,
    ) -> Vec<Attestation<P>> {
        // BTreeMap iteration yields signers sorted by public key, matching
        // the certificate shape enforced on decode.
        self.tallies
            .get(&(kind, height, view, epoch))
            .map(|tally| {
                tally
                    .iter()
                    .map(|(public_key, signature)| Attestation {
                        public_key: public_key.clone(),
                        signature: signature.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<P: PublicKey> Default for Tracker<P> {
    fn default() -> Self {
        Self::new()
    }
}
