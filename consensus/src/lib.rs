//! Chained quorum-certificate BFT agreement with committee rotation at
//! epoch boundaries.
//!
//! `baton-consensus` implements the per-node decision logic of a leader-based
//! agreement protocol in which every block is certified by a quorum
//! certificate (QC) and the validator committee is rotated every `K` blocks.
//! The crate owns exactly one node's state: the environment (a network layer
//! in production, a deterministic harness in tests) routes messages between
//! nodes and decides when the view-synchronization trigger fires.
//!
//! # Design
//!
//! ## Architecture
//!
//! Each node is a [`voter::Voter`]: a synchronous state machine with two
//! message handlers ([`voter::Voter::handle_vote`] and
//! [`voter::Voter::handle_proposal`]) and an explicit view-synchronization
//! entry point ([`voter::Voter::fast_forward`]). Handlers never block, always
//! terminate, and either fully apply or leave the state untouched (beyond
//! archiving the offending message). All cross-node effects travel through
//! returned [`wire::Envelope`]s.
//!
//! ```txt
//! +++++++++++++++           +-----------+            +++++++++++++++
//! +             +---------->|           +----------->+             +
//! +    Peers    +           |   Voter   |            +    Peers    +
//! +             +           |           |            +             +
//! +++++++++++++++           +-----+-----+            +++++++++++++++
//!                                 |
//!                                 v
//!                     high / locked / decided QCs,
//!                       committed chain per epoch
//! ```
//!
//! ## Protocol Description
//!
//! ### Specification for View `v`
//!
//! Upon a leader forming or learning a certificate `c` at view `v-1`:
//! * Enter view `v`
//! * If `c.height` is not the last block of its epoch, propose block
//!   `c.height + 1`
//! * If `c.height` is the last block of its epoch (a boundary block):
//!     * If `c` is an Extended certificate, the hand-off is complete: propose
//!       the first block of the next epoch
//!     * Otherwise re-propose the boundary block so the outgoing and incoming
//!       committees re-certify it; the re-proposal is Extended once the node
//!       holds certificates for the same boundary block at two consecutive
//!       views ending at `v-1`
//!
//! Upon receiving a proposal for view `v`:
//! * Drop it unless it is fresh, correctly signed, sent by the leader of
//!   `(v, epoch)`, safe with respect to the locked certificate, and justified
//!   by a well-formed certificate for its position (interior, boundary, or
//!   first-of-epoch)
//! * Adopt the embedded certificate, enter view `v`, and vote: votes for an
//!   Extended proposal are multicast to the entire incoming committee, all
//!   other votes go to the leader of `(v+1, epoch)`
//!
//! Upon receiving a quorum of votes for `(kind, height, v)`:
//! * Assemble the certificate (a boundary block requires a quorum from the
//!   outgoing committee *and* one from the incoming committee), apply it, and
//!   enter view `v+1`
//!
//! Three certificates at consecutive views, each justifying the next, commit
//! the oldest (the 3-chain rule). Committed blocks are appended to the
//! node's per-epoch chain; state for committees the node does not belong to
//! is pruned once the chain confirms the transition past them.
//!
//! ## Epoch Hand-Off
//!
//! Epochs are `K` blocks long and height alone determines the epoch of a
//! block. The last block of an epoch cannot be crossed until it has been
//! certified by both the outgoing and the incoming committee: ordinary
//! certificates carry the incoming committee's signers in a dedicated
//! `next_epoch_signers` set, and the final re-certification is an Extended
//! certificate, after which the first block of the new epoch may be
//! proposed. This forces cooperation across committees at the hand-off
//! point and gives the incoming committee a certified anchor to build on.
//!
//! ## External Collaborators
//!
//! Network delivery (ordering, loss, duplication), timeouts, signing-key
//! management, and persistence are all outside this crate. Handlers tolerate
//! re-delivery and loss: applying a certificate no higher than the current
//! high certificate is a no-op, and a certificate whose justifying proposal
//! was never received still advances the high certificate (only lock and
//! commit wait for the proposal to be recovered).

pub mod config;
pub mod schedule;
pub mod state;
pub mod tracker;
pub mod types;
pub mod voter;
pub mod wire;

mod metrics;

#[cfg(test)]
mod sim;

pub use config::Config;
pub use schedule::Schedule;
pub use voter::{Genesis, Voter};

use types::View;

/// Viewable is a trait that provides access to the view a message pertains to.
pub trait Viewable {
    /// Returns the view associated with this object.
    fn view(&self) -> View;
}
