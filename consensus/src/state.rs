//! Per-node certificate and chain bookkeeping.
//!
//! [`State`] tracks the three certificates that drive safety and commit
//! (high, locked, decided), the committed chain per epoch, and the archives
//! (certificates, proposals, votes) the protocol needs to recover
//! justification chains and reject duplicates.
//!
//! Applying a certificate follows the 3-chain rule: the certificate's
//! justifying proposal is recovered from the proposal archive and its
//! embedded certificate chain is walked two hops back. The lock advances when
//! the top two certificates sit at consecutive views; the decision advances
//! when the lower two do, committing the oldest certificate of the chain.
//! Both advances are independent: either, both, or neither may fire on a
//! single application.

use crate::{
    schedule::Schedule,
    tracker::Tracker,
    types::{Epoch, Height, View},
    wire::{Certificate, Kind, Proposal, Vote},
};
use commonware_cryptography::PublicKey;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// One node's consensus state.
pub struct State<P: PublicKey> {
    /// The node's current view.
    pub(crate) view: View,
    /// Highest-view certificate known to the node.
    pub(crate) high: Option<Certificate<P>>,
    /// Certificate the node is locked on (safety).
    pub(crate) locked: Option<Certificate<P>>,
    /// Certificate that is irreversibly committed.
    pub(crate) decided: Option<Certificate<P>>,
    /// Committed heights, per epoch the node belongs to.
    pub(crate) chain: BTreeMap<Epoch, Vec<Height>>,
    /// Highest-view certificate seen for each height.
    pub(crate) certificates: BTreeMap<Height, Certificate<P>>,
    /// Every proposal received, keyed by `(height, view)`.
    ///
    /// Also serves duplicate detection: the first proposal received for a
    /// key wins and re-deliveries are ignored.
    pub(crate) proposals: BTreeMap<(Height, View), Proposal<P>>,
    /// Every vote received, keyed by `(kind, height, view, sender)`.
    pub(crate) votes_seen: BTreeSet<(Kind, Height, View, P)>,
    /// Vote tallies.
    pub(crate) tracker: Tracker<P>,
}

impl<P: PublicKey> State<P> {
    /// Creates a node's state seeded with the well-known genesis certificate
    /// and proposal.
    ///
    /// The node starts in the genesis proposal's view with all three
    /// certificates pointing at genesis.
    pub fn genesis(certificate: Certificate<P>, proposal: Proposal<P>) -> Self {
        let mut certificates = BTreeMap::new();
        certificates.insert(certificate.height, certificate.clone());
        let mut proposals = BTreeMap::new();
        proposals.insert((proposal.height, proposal.view), proposal.clone());
        Self {
            view: proposal.view,
            high: Some(certificate.clone()),
            locked: Some(certificate.clone()),
            decided: Some(certificate),
            chain: BTreeMap::new(),
            certificates,
            proposals,
            votes_seen: BTreeSet::new(),
            tracker: Tracker::new(),
        }
    }

    /// Returns the node's current view.
    pub fn view(&self) -> View {
        self.view
    }

    /// Returns the highest-view certificate known to the node.
    pub fn high(&self) -> Option<&Certificate<P>> {
        self.high.as_ref()
    }

    /// Returns the certificate the node is locked on.
    pub fn locked(&self) -> Option<&Certificate<P>> {
        self.locked.as_ref()
    }

    /// Returns the certificate that is irreversibly committed.
    pub fn decided(&self) -> Option<&Certificate<P>> {
        self.decided.as_ref()
    }

    /// Returns the committed heights for the given epoch, in commit order.
    pub fn committed(&self, epoch: Epoch) -> &[Height] {
        self.chain.get(&epoch).map_or(&[], |heights| heights)
    }

    /// Archives a proposal (first writer wins).
    pub(crate) fn archive_proposal(&mut self, proposal: Proposal<P>) {
        self.proposals
            .entry((proposal.height, proposal.view))
            .or_insert(proposal);
    }

    /// Archives a vote. Returns `false` if the same `(kind, height, view,
    /// sender)` was seen before.
    pub(crate) fn archive_vote(&mut self, vote: &Vote<P>) -> bool {
        self.votes_seen
            .insert((vote.kind, vote.height, vote.view, vote.sender().clone()))
    }

    /// Applies a certificate that may be higher than the current high
    /// certificate.
    ///
    /// Returns `None` when the certificate is no higher than the current
    /// high certificate (re-delivery is a no-op). Otherwise returns the
    /// newly committed heights, if any.
    pub(crate) fn apply_certificate(
        &mut self,
        schedule: &Schedule<P>,
        me: &P,
        certificate: Certificate<P>,
    ) -> Option<Vec<Height>> {
        if let Some(high) = &self.high {
            if certificate.view <= high.view {
                return None;
            }
        }

        // Keep the higher-view certificate seen so far for this height.
        let archived = self
            .certificates
            .entry(certificate.height)
            .or_insert_with(|| certificate.clone());
        if certificate.view > archived.view {
            *archived = certificate.clone();
        }
        self.high = Some(certificate.clone());

        // Recover the certificate's justifying proposal. Absence is expected
        // under lost messages: only the high certificate advances.
        let committed = match self.justification(&certificate) {
            Some(justify) => {
                if certificate.view == justify.view.next()
                    && self.locked.as_ref().is_none_or(|l| justify.view > l.view)
                {
                    self.locked = Some(justify.clone());
                }

                // Follow the justification chain one more hop to apply the
                // 3-chain commit rule.
                match self.justification(&justify) {
                    Some(justify2)
                        if justify.view == justify2.view.next()
                            && self
                                .decided
                                .as_ref()
                                .is_none_or(|d| justify2.view > d.view) =>
                    {
                        let previous = self.decided.replace(justify2.clone());
                        self.commit(schedule, me, previous, &justify2)
                    }
                    _ => Vec::new(),
                }
            }
            None => {
                debug!(
                    height = certificate.height,
                    view = %certificate.view,
                    "justifying proposal unknown, only high certificate advanced"
                );
                Vec::new()
            }
        };

        self.prune(schedule, me);
        Some(committed)
    }

    /// Returns the certificate embedded in the proposal that justifies
    /// `certificate`, if that proposal has been received.
    fn justification(&self, certificate: &Certificate<P>) -> Option<Certificate<P>> {
        self.proposals
            .get(&(certificate.height, certificate.view))
            .map(|proposal| proposal.certificate.clone())
    }

    /// Appends the newly decided range `(previous.height, decided.height]` to
    /// the per-epoch chains.
    ///
    /// Archived certificates in the range are ordered by ascending view;
    /// each block is appended to the chain of every epoch it is relevant to
    /// in which this node is a member.
    fn commit(
        &mut self,
        schedule: &Schedule<P>,
        me: &P,
        previous: Option<Certificate<P>>,
        decided: &Certificate<P>,
    ) -> Vec<Height> {
        let floor = previous.map_or(0, |certificate| certificate.height);
        if floor >= decided.height {
            // A boundary block is re-certified at consecutive views, so the
            // decision can advance to a higher-view certificate for a height
            // that has already been committed.
            return Vec::new();
        }
        let mut range: Vec<(View, Height)> = self
            .certificates
            .range(floor + 1..=decided.height)
            .map(|(height, certificate)| (certificate.view, *height))
            .collect();
        range.sort();

        let mut committed = Vec::with_capacity(range.len());
        for (view, height) in range {
            let (epoch, next) = schedule.block_epochs(height);
            for epoch in std::iter::once(epoch).chain(next) {
                if schedule.is_member(epoch, me) {
                    self.chain.entry(epoch).or_default().push(height);
                }
            }
            debug!(height, view = %view, "committed");
            committed.push(height);
        }
        committed
    }

    /// Drops state the node no longer needs.
    ///
    /// Epochs the node does not belong to are pruned once the chain confirms
    /// the transition past them: the horizon is the epoch of the high
    /// certificate's block, advanced by one when that certificate is an
    /// Extended boundary certificate (the certificate that completes the
    /// hand-off). Archives and tallies below the decided view are dropped in
    /// the same pass.
    fn prune(&mut self, schedule: &Schedule<P>, me: &P) {
        let Some(high) = &self.high else {
            return;
        };
        let mut horizon = schedule.epoch_of(high.height);
        if schedule.is_boundary(high.height) && high.kind == Kind::Extended {
            horizon = horizon.next();
        }
        let foreign =
            |epoch: Epoch| epoch <= horizon && !schedule.is_member(epoch, me);

        self.chain.retain(|epoch, _| !foreign(*epoch));
        self.certificates.retain(|height, _| {
            let (epoch, next) = schedule.block_epochs(*height);
            schedule.is_member(epoch, me)
                || next.is_some_and(|next| schedule.is_member(next, me))
                || !foreign(epoch)
        });

        let decided_view = self.decided.as_ref().map(|certificate| certificate.view);
        self.tracker.prune(|view, epoch| {
            if foreign(epoch) {
                return false;
            }
            decided_view.is_none_or(|decided| view >= decided)
        });
        if let Some(decided) = decided_view {
            self.proposals.retain(|(_, view), _| *view >= decided);
            self.votes_seen.retain(|(_, _, view, _)| *view >= decided);
        }
        if let Some(decided) = &self.decided {
            let cutoff = decided.height;
            self.certificates.retain(|height, _| *height > cutoff);
        }
    }
}
