//! Deterministic cluster harness for scenario tests.
//!
//! The harness owns the global picture the protocol core deliberately does
//! not: the set of voters, the pool of pending envelopes, and the
//! view-synchronization oracle. Delivery is seeded-random: the pool is
//! shuffled every round and (optionally) only a subset is delivered, which
//! exercises reordering and delay without losing messages. Faulty nodes are
//! modeled as no-shows: envelopes addressed to a key without a running voter
//! are dropped.

use crate::{
    config::Config,
    schedule::Schedule,
    types::Height,
    voter::{Genesis, Voter},
    wire::{Envelope, Message},
};
use commonware_cryptography::{ed25519, PrivateKeyExt, Signer};
use prometheus_client::registry::Registry;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

pub const NAMESPACE: &[u8] = b"baton-sim";

/// Deterministic keys for the given seed range, sorted by public key.
pub fn keys(range: std::ops::Range<u64>) -> Vec<ed25519::PrivateKey> {
    let mut keys: Vec<_> = range.map(ed25519::PrivateKey::from_seed).collect();
    keys.sort_by_key(|key| key.public_key());
    keys
}

pub fn publics(keys: &[ed25519::PrivateKey]) -> Vec<ed25519::PublicKey> {
    keys.iter().map(|key| key.public_key()).collect()
}

pub struct Cluster {
    pub voters: BTreeMap<ed25519::PublicKey, Voter<ed25519::PrivateKey>>,
    pub pending: Vec<Envelope<ed25519::PublicKey>>,
    rng: StdRng,
}

impl Cluster {
    /// Builds a cluster of correct voters and queues the genesis proposal
    /// for delivery to the first epoch's committee.
    ///
    /// `keys` must include the entire first-epoch committee (to fabricate
    /// genesis); voters are started for every key not listed in `offline`.
    pub fn new(
        seed: u64,
        epoch_length: u64,
        quorum: u32,
        max_faults: u32,
        committees: Vec<Vec<ed25519::PublicKey>>,
        keys: &[ed25519::PrivateKey],
        offline: &[ed25519::PublicKey],
    ) -> Self {
        let schedule = Schedule::new(epoch_length, committees.clone());
        let genesis = Genesis::build(NAMESPACE, &schedule, keys);

        let mut voters = BTreeMap::new();
        for key in keys {
            let public_key = key.public_key();
            if offline.contains(&public_key) {
                continue;
            }
            let cfg = Config {
                namespace: NAMESPACE.to_vec(),
                epoch_length,
                quorum,
                max_faults,
                committees: committees.clone(),
                registry: Arc::new(Mutex::new(Registry::default())),
            };
            let genesis = Genesis {
                certificate: genesis.certificate.clone(),
                proposal: genesis.proposal.clone(),
            };
            voters.insert(public_key, Voter::new(cfg, key.clone(), genesis));
        }

        let pending = schedule
            .recipients(1)
            .into_iter()
            .map(|to| Envelope {
                to,
                message: Message::Proposal(genesis.proposal.clone()),
            })
            .collect();

        Self {
            voters,
            pending,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Delivers every pending envelope (in shuffled order) exactly once.
    ///
    /// Returns the number of envelopes delivered. Messages emitted during
    /// the round are queued for the next one.
    pub fn deliver_all(&mut self) -> usize {
        self.deliver(1.0, 1)
    }

    /// Delivers each pending envelope with the given probability (retaining
    /// the rest for later rounds), `copies` times, in shuffled order.
    ///
    /// Delivering more than one copy exercises re-delivery tolerance.
    pub fn deliver(&mut self, probability: f64, copies: usize) -> usize {
        let mut pool = std::mem::take(&mut self.pending);
        pool.shuffle(&mut self.rng);

        let mut delivered = 0;
        for envelope in pool {
            if probability < 1.0 && !self.rng.gen_bool(probability) {
                self.pending.push(envelope);
                continue;
            }
            for _ in 0..copies {
                let Some(voter) = self.voters.get_mut(&envelope.to) else {
                    break;
                };
                let outbound = match envelope.message.clone() {
                    Message::Vote(vote) => voter.handle_vote(vote),
                    Message::Proposal(proposal) => voter.handle_proposal(proposal),
                };
                self.pending.extend(outbound);
            }
            delivered += 1;
        }
        delivered
    }

    /// The view-synchronization oracle: raises every correct node into the
    /// view after the highest observed one, letting that view's leader
    /// propose from its high certificate.
    pub fn synchronize(&mut self) {
        let Some(target) = self.voters.values().map(|voter| voter.state().view()).max() else {
            return;
        };
        let target = target.next();
        let mut outbound = Vec::new();
        for voter in self.voters.values_mut() {
            outbound.extend(voter.fast_forward(target));
        }
        self.pending.extend(outbound);
    }

    /// Runs rounds of full delivery until the predicate holds, invoking the
    /// synchronization oracle whenever the pool drains.
    ///
    /// Returns whether the predicate held within the round budget.
    pub fn run_until(
        &mut self,
        max_rounds: usize,
        predicate: impl Fn(&Self) -> bool,
    ) -> bool {
        for _ in 0..max_rounds {
            if predicate(self) {
                return true;
            }
            if self.pending.is_empty() {
                self.synchronize();
            }
            self.deliver_all();
        }
        predicate(self)
    }

    /// Returns the decided height of every correct node.
    pub fn decided_heights(&self) -> Vec<Height> {
        self.voters
            .values()
            .map(|voter| voter.state().decided().map_or(0, |decided| decided.height))
            .collect()
    }

    /// Returns the lowest decided height across correct nodes.
    pub fn min_decided(&self) -> Height {
        self.decided_heights().into_iter().min().unwrap_or(0)
    }

    /// Asserts that no two correct nodes disagree on any committed height:
    /// for every epoch, one node's chain must be a prefix of the other's.
    pub fn assert_no_fork(&self) {
        let voters: Vec<_> = self.voters.values().collect();
        for (i, a) in voters.iter().enumerate() {
            for b in voters.iter().skip(i + 1) {
                for (epoch, chain_a) in &a.state().chain {
                    let Some(chain_b) = b.state().chain.get(epoch) else {
                        continue;
                    };
                    let shared = chain_a.len().min(chain_b.len());
                    assert_eq!(
                        &chain_a[..shared],
                        &chain_b[..shared],
                        "fork detected in epoch {epoch}",
                    );
                }
            }
        }
    }
}
