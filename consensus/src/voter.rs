//! Per-node state machine.
//!
//! A [`Voter`] owns one node's consensus state and exposes the protocol's
//! three entry points: [`Voter::handle_vote`], [`Voter::handle_proposal`],
//! and [`Voter::fast_forward`] (the view-synchronization trigger). Handlers
//! are synchronous and deterministic: they consume one message, mutate the
//! node's own state, and return the messages to send. Routing, timing, and
//! re-delivery are the environment's concern.
//!
//! Every validation failure is soft: the offending message is archived for
//! duplicate detection and auditability, a drop reason is traced and
//! counted, and the handler returns without output. Inputs may legitimately
//! originate from faulty or merely slow nodes, so nothing here is fatal.

use crate::{
    config::Config,
    metrics::Metrics,
    schedule::Schedule,
    state::State,
    types::{Epoch, View},
    wire::{Certificate, Envelope, Kind, Message, Proposal, Vote},
};
use commonware_cryptography::{PublicKey, Signer};
use tracing::{debug, info};

/// The well-known objects that seed every correct node identically: a
/// certificate for height 0 signed by the entire first-epoch committee and a
/// proposal for height 1 sent by the first epoch's view-1 leader.
pub struct Genesis<P: PublicKey> {
    /// The genesis certificate.
    pub certificate: Certificate<P>,
    /// The genesis proposal.
    pub proposal: Proposal<P>,
}

impl<P: PublicKey> Genesis<P> {
    /// Fabricates the genesis objects from the first-epoch committee's keys.
    ///
    /// Intended for tests and bootstrap tooling with access to every key; a
    /// deployment distributes the resulting objects, not the keys.
    ///
    /// # Panics
    ///
    /// Panics if `keys` does not include the first epoch's view-1 leader.
    pub fn build<C: Signer<PublicKey = P, Signature = P::Signature>>(
        namespace: &[u8],
        schedule: &Schedule<P>,
        keys: &[C],
    ) -> Self {
        let mut attestations: Vec<_> = keys
            .iter()
            .filter(|key| schedule.is_member(Epoch::new(1), &key.public_key()))
            .map(|key| Vote::sign(key, namespace, Kind::Quorum, View::zero(), 0).attestation)
            .collect();
        attestations.sort_by(|a, b| a.public_key.cmp(&b.public_key));
        let certificate = Certificate {
            kind: Kind::Quorum,
            view: View::zero(),
            height: 0,
            signers: attestations,
            next_epoch_signers: Vec::new(),
        };

        let view = View::new(1);
        let leader = schedule.leader(view, Epoch::new(1)).clone();
        let signer = keys
            .iter()
            .find(|key| key.public_key() == leader)
            .expect("genesis leader key missing");
        let proposal = Proposal::sign(
            signer,
            namespace,
            Kind::Quorum,
            view,
            1,
            certificate.clone(),
        );
        Self {
            certificate,
            proposal,
        }
    }
}

/// One node's view of the protocol.
pub struct Voter<C: Signer> {
    crypto: C,
    me: C::PublicKey,
    namespace: Vec<u8>,
    quorum: u32,
    schedule: Schedule<C::PublicKey>,
    state: State<C::PublicKey>,
    metrics: Metrics,
}

impl<C: Signer> Voter<C> {
    /// Creates a node seeded at genesis.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid. Configuration mistakes are
    /// the only fatal error class and only surface here.
    pub fn new(cfg: Config<C::PublicKey>, crypto: C, genesis: Genesis<C::PublicKey>) -> Self {
        cfg.validate().expect("invalid configuration");
        let Config {
            namespace,
            epoch_length,
            quorum,
            max_faults: _,
            committees,
            registry,
        } = cfg;
        let metrics = Metrics::register(&mut registry.lock().unwrap());
        let schedule = Schedule::new(epoch_length, committees);
        let state = State::genesis(genesis.certificate, genesis.proposal);
        let me = crypto.public_key();
        metrics.current_view.set(state.view().get() as i64);
        Self {
            crypto,
            me,
            namespace,
            quorum,
            schedule,
            state,
            metrics,
        }
    }

    /// Returns the node's public key.
    pub fn public_key(&self) -> &C::PublicKey {
        &self.me
    }

    /// Returns the node's consensus state.
    pub fn state(&self) -> &State<C::PublicKey> {
        &self.state
    }

    /// Returns the node's schedule.
    pub fn schedule(&self) -> &Schedule<C::PublicKey> {
        &self.schedule
    }

    /// Processes a vote addressed to this node.
    ///
    /// If the vote completes a quorum, the node assembles the certificate,
    /// enters the next view, and (when it leads the implied proposal)
    /// multicasts it.
    pub fn handle_vote(&mut self, vote: Vote<C::PublicKey>) -> Vec<Envelope<C::PublicKey>> {
        let fresh = self.state.archive_vote(&vote);
        if let Err(reason) = self.vote_valid(&vote) {
            debug!(
                view = %vote.view,
                height = vote.height,
                sender = %vote.sender(),
                reason,
                "dropping vote"
            );
            self.metrics.dropped_vote(reason);
            return Vec::new();
        }
        if !fresh {
            // Re-delivery: the vote already contributed to its tally.
            return Vec::new();
        }
        self.state.tracker.record(&vote, &self.schedule);
        if !self.state.tracker.threshold_reached(
            vote.kind,
            vote.height,
            vote.view,
            &self.schedule,
            self.quorum,
        ) {
            return Vec::new();
        }
        let Some(certificate) =
            self.state
                .tracker
                .assemble(vote.kind, vote.height, vote.view, &self.schedule)
        else {
            return Vec::new();
        };
        debug!(
            view = %certificate.view,
            height = certificate.height,
            kind = ?certificate.kind,
            "assembled certificate"
        );
        self.metrics.certificates.inc();
        if self
            .state
            .apply_certificate(&self.schedule, &self.me, certificate.clone())
            .is_none()
        {
            return Vec::new();
        }
        self.refresh_metrics();
        self.enter_view(certificate.view.next());

        // Tentatively form the next proposal to determine its epoch; only
        // the leader for that (view, epoch) sends it.
        let proposal = self.build_proposal(&certificate);
        let epoch = self.schedule.epoch_of(proposal.height);
        if self.me != *self.schedule.leader(proposal.view, epoch) {
            return Vec::new();
        }
        debug!(
            view = %proposal.view,
            height = proposal.height,
            kind = ?proposal.kind,
            "proposing"
        );
        let recipients = self.schedule.recipients(proposal.height);
        self.address(recipients, Message::Proposal(proposal))
    }

    /// Processes a proposal addressed to this node.
    ///
    /// A valid proposal advances the node to the proposal's view and
    /// produces this node's vote: votes for Extended proposals are multicast
    /// to the entire incoming committee, all other votes go to the next
    /// view's leader.
    pub fn handle_proposal(
        &mut self,
        proposal: Proposal<C::PublicKey>,
    ) -> Vec<Envelope<C::PublicKey>> {
        self.state.archive_proposal(proposal.clone());
        if let Err(reason) = self.proposal_valid(&proposal) {
            debug!(
                view = %proposal.view,
                height = proposal.height,
                sender = %proposal.sender(),
                reason,
                "dropping proposal"
            );
            self.metrics.dropped_proposal(reason);
            return Vec::new();
        }
        self.state
            .apply_certificate(&self.schedule, &self.me, proposal.certificate.clone());
        self.refresh_metrics();
        self.enter_view(proposal.view);

        let vote = Vote::sign(
            &self.crypto,
            &self.namespace,
            proposal.kind,
            proposal.view,
            proposal.height,
        );
        if proposal.kind == Kind::Extended {
            // The hand-off vote must reach every member of the incoming
            // committee, not just the next leader.
            let incoming = self.schedule.epoch_of(proposal.height).next();
            let recipients = self.schedule.participants(incoming).to_vec();
            self.address(recipients, Message::Vote(vote))
        } else {
            let epoch = self.schedule.epoch_of(proposal.height);
            let leader = self.schedule.leader(proposal.view.next(), epoch).clone();
            vec![Envelope {
                to: leader,
                message: Message::Vote(vote),
            }]
        }
    }

    /// View-synchronization entry point.
    ///
    /// The environment (timeouts in production, an oracle in tests) raises
    /// the node to the highest observed view; if this node leads the
    /// proposal implied by its high certificate at that view, it proposes
    /// immediately.
    pub fn fast_forward(&mut self, view: View) -> Vec<Envelope<C::PublicKey>> {
        if view <= self.state.view() {
            return Vec::new();
        }
        self.enter_view(view);
        let Some(high) = self.state.high().cloned() else {
            return Vec::new();
        };
        let proposal = self.build_proposal(&high);
        let epoch = self.schedule.epoch_of(proposal.height);
        if self.me != *self.schedule.leader(proposal.view, epoch) {
            return Vec::new();
        }
        info!(
            view = %proposal.view,
            height = proposal.height,
            "proposing after view synchronization"
        );
        let recipients = self.schedule.recipients(proposal.height);
        self.address(recipients, Message::Proposal(proposal))
    }

    /// Forms the next proposal justified by `certificate` at the current
    /// view.
    fn build_proposal(&self, certificate: &Certificate<C::PublicKey>) -> Proposal<C::PublicKey> {
        let view = self.state.view();
        let boundary = self.schedule.is_boundary(certificate.height);
        let crossed = certificate.kind == Kind::Extended || certificate.height == 0;
        let (kind, height) = if !boundary || crossed {
            // Ordinary extension, or a completed hand-off opening the next
            // epoch. The genesis certificate needs no hand-off: its crossing
            // is pre-certified by the entire first-epoch committee.
            (Kind::Quorum, certificate.height + 1)
        } else {
            // Re-certify the boundary block across the hand-off. The
            // re-proposal upgrades to Extended once this node holds
            // certificates for the boundary block at two consecutive views
            // ending at `view - 1`.
            let extended = match (self.state.high(), self.state.locked()) {
                (Some(high), Some(locked)) => {
                    high.height == locked.height
                        && view.previous() == Some(high.view)
                        && high.view.previous() == Some(locked.view)
                }
                _ => false,
            };
            (
                if extended { Kind::Extended } else { Kind::Quorum },
                certificate.height,
            )
        };
        Proposal::sign(
            &self.crypto,
            &self.namespace,
            kind,
            view,
            height,
            certificate.clone(),
        )
    }

    /// Checks whether a vote should be tallied by this node.
    fn vote_valid(&self, vote: &Vote<C::PublicKey>) -> Result<(), &'static str> {
        if vote.view < self.state.view() {
            return Err("stale view");
        }
        if !vote.verify(&self.namespace) {
            return Err("invalid signature");
        }
        let epoch = self.schedule.epoch_of(vote.height);
        if self.schedule.is_boundary(vote.height) {
            if !self.schedule.is_member(epoch, vote.sender())
                && !self.schedule.is_member(epoch.next(), vote.sender())
            {
                return Err("sender not in committee");
            }
            // Extended votes are committee-broadcast; any member may tally
            // them. Everything else must be addressed to the next leader.
            if vote.kind != Kind::Extended
                && self.me != *self.schedule.leader(vote.view.next(), epoch)
            {
                return Err("not the aggregator for this vote");
            }
        } else {
            if !self.schedule.is_member(epoch, vote.sender()) {
                return Err("sender not in committee");
            }
            if self.me != *self.schedule.leader(vote.view.next(), epoch) {
                return Err("not the aggregator for this vote");
            }
        }
        Ok(())
    }

    /// Checks whether a proposal should be voted on by this node.
    fn proposal_valid(&self, proposal: &Proposal<C::PublicKey>) -> Result<(), &'static str> {
        if proposal.view < self.state.view() {
            return Err("stale view");
        }
        if !proposal.verify(&self.namespace) {
            return Err("invalid signature");
        }
        let epoch = self.schedule.epoch_of(proposal.height);
        if *proposal.sender() != *self.schedule.leader(proposal.view, epoch) {
            return Err("leader mismatch");
        }
        if proposal.kind == Kind::Extended && !self.extended_valid(proposal) {
            return Err("invalid extended proposal");
        }
        self.cert_valid(proposal)
    }

    /// Checks the three-consecutive-view patterns for an Extended proposal.
    ///
    /// The second pattern accepts a certificate this node's high certificate
    /// has already absorbed: without it, a leader whose high certificate
    /// advanced when it assembled the certificate would reject its own
    /// proposal.
    fn extended_valid(&self, proposal: &Proposal<C::PublicKey>) -> bool {
        let Some(high) = self.state.high() else {
            return false;
        };
        proposal.view == proposal.certificate.view.next()
            && proposal.height == high.height
            && (proposal.certificate.view == high.view.next()
                || proposal.certificate.view == high.view)
    }

    /// Checks that the proposal does not conflict with the locked
    /// certificate: it extends the locked block, or its certificate is from
    /// a higher view (the liveness override).
    fn proposal_safe(&self, proposal: &Proposal<C::PublicKey>) -> bool {
        match self.state.locked() {
            None => true,
            Some(locked) => {
                proposal.height > locked.height || proposal.certificate.view > locked.view
            }
        }
    }

    /// Checks the embedded certificate against the proposed block's position
    /// within its epoch.
    fn cert_valid(&self, proposal: &Proposal<C::PublicKey>) -> Result<(), &'static str> {
        let certificate = &proposal.certificate;
        if !certificate.verify(&self.namespace) {
            return Err("invalid certificate signatures");
        }
        let epoch = self.schedule.epoch_of(proposal.height);
        let quorum = self.quorum as usize;
        if self.schedule.is_boundary(proposal.height) {
            if proposal.height == certificate.height {
                // Re-certification of the boundary block: the certificate
                // must carry a quorum from each committee at the hand-off.
                if certificate.kind == Kind::Extended {
                    return Err("unexpected extended certificate");
                }
                if self.members_signed(certificate.signed_by(), epoch) < quorum {
                    return Err("insufficient signers");
                }
                if self.members_signed(certificate.next_signed_by(), epoch.next()) < quorum {
                    return Err("insufficient next-epoch signers");
                }
            } else {
                // First proposal of the boundary block.
                if !self.proposal_safe(proposal) {
                    return Err("unsafe proposal");
                }
                if self.members_signed(certificate.signed_by(), epoch) < quorum {
                    return Err("insufficient signers");
                }
            }
        } else if self.schedule.is_first_in_epoch(proposal.height) && epoch > Epoch::new(1) {
            // Crossing into a new epoch requires the Extended certificate.
            // Its signer sets were already restricted by the two-committee
            // quorum rule, so the counts here are raw.
            if certificate.kind != Kind::Extended {
                return Err("expected extended certificate");
            }
            if !self.proposal_safe(proposal) {
                return Err("unsafe proposal");
            }
            if certificate.signers.len() < quorum {
                return Err("insufficient signers");
            }
            if certificate.next_epoch_signers.len() < quorum {
                return Err("insufficient next-epoch signers");
            }
        } else {
            if certificate.kind == Kind::Extended {
                return Err("unexpected extended certificate");
            }
            if !self.proposal_safe(proposal) {
                return Err("unsafe proposal");
            }
            if self.members_signed(certificate.signed_by(), epoch) < quorum {
                return Err("insufficient signers");
            }
        }
        Ok(())
    }

    fn members_signed<'a>(
        &self,
        signers: impl Iterator<Item = &'a C::PublicKey>,
        epoch: Epoch,
    ) -> usize {
        signers
            .filter(|signer| self.schedule.is_member(epoch, signer))
            .count()
    }

    fn enter_view(&mut self, view: View) {
        if view <= self.state.view() {
            return;
        }
        self.state.view = view;
        self.metrics.current_view.set(view.get() as i64);
        debug!(view = %view, "entered view");
    }

    fn refresh_metrics(&self) {
        if let Some(decided) = self.state.decided() {
            self.metrics.decided_height.set(decided.height as i64);
        }
    }

    fn address(
        &self,
        recipients: Vec<C::PublicKey>,
        message: Message<C::PublicKey>,
    ) -> Vec<Envelope<C::PublicKey>> {
        recipients
            .into_iter()
            .map(|to| Envelope {
                to,
                message: message.clone(),
            })
            .collect()
    }
}
