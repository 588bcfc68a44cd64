//! Wire types exchanged between nodes.
//!
//! Every message carries real signatures: a [`Vote`] is a single signed
//! endorsement, a [`Certificate`] aggregates vote signatures from one or two
//! committees, and a [`Proposal`] embeds the certificate that justifies it.
//! Signatures are made over namespaced encodings (`_VOTE` / `_PROPOSAL`
//! suffixes) so a signature produced for one context can never be replayed in
//! another.
//!
//! Decoding is defensive: signer vectors are bounded by the committee size,
//! must be sorted by public key, and must be duplicate-free, so a decoded
//! certificate can be counted without re-checking its shape.

use crate::{
    types::{Height, View},
    Viewable,
};
use bytes::{Buf, BufMut};
use commonware_codec::{
    varint::UInt, EncodeSize, Error, Read, ReadExt, ReadRangeExt, Write,
};
use commonware_cryptography::{PublicKey, Signer, Verifier};
use commonware_utils::union;

/// Suffix appended to the namespace when signing votes.
const VOTE_SUFFIX: &[u8] = b"_VOTE";
/// Suffix appended to the namespace when signing proposals.
const PROPOSAL_SUFFIX: &[u8] = b"_PROPOSAL";

/// Creates the domain-separation namespace for vote signatures.
pub(crate) fn vote_namespace(namespace: &[u8]) -> Vec<u8> {
    union(namespace, VOTE_SUFFIX)
}

/// Creates the domain-separation namespace for proposal signatures.
pub(crate) fn proposal_namespace(namespace: &[u8]) -> Vec<u8> {
    union(namespace, PROPOSAL_SUFFIX)
}

/// Distinguishes the ordinary certificate chain from the epoch-crossing form.
///
/// Extended messages only appear at epoch boundaries: an Extended certificate
/// carries signatures from both the outgoing and the incoming committee and
/// is the precondition for proposing the first block of the next epoch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    /// Ordinary quorum certificate, vote, or proposal.
    Quorum,
    /// Epoch-crossing certificate, vote, or proposal.
    Extended,
}

impl Write for Kind {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Quorum => 0u8.write(writer),
            Self::Extended => 1u8.write(writer),
        }
    }
}

impl EncodeSize for Kind {
    fn encode_size(&self) -> usize {
        1
    }
}

impl Read for Kind {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &()) -> Result<Self, Error> {
        match u8::read(reader)? {
            0 => Ok(Self::Quorum),
            1 => Ok(Self::Extended),
            _ => Err(Error::Invalid("consensus::wire::Kind", "Invalid kind")),
        }
    }
}

/// One signer's contribution: a public key plus its signature over the
/// relevant signable encoding.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Attestation<P: PublicKey> {
    /// The signer's public key.
    pub public_key: P,
    /// The signature produced by the signer.
    pub signature: P::Signature,
}

impl<P: PublicKey> Write for Attestation<P> {
    fn write(&self, writer: &mut impl BufMut) {
        self.public_key.write(writer);
        self.signature.write(writer);
    }
}

impl<P: PublicKey> EncodeSize for Attestation<P> {
    fn encode_size(&self) -> usize {
        self.public_key.encode_size() + self.signature.encode_size()
    }
}

impl<P: PublicKey> Read for Attestation<P> {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let public_key = P::read(reader)?;
        let signature = P::Signature::read(reader)?;
        Ok(Self {
            public_key,
            signature,
        })
    }
}

/// The byte encoding a vote signature commits to.
fn vote_message(kind: Kind, view: View, height: Height) -> Vec<u8> {
    let mut message =
        Vec::with_capacity(kind.encode_size() + view.encode_size() + UInt(height).encode_size());
    kind.write(&mut message);
    view.write(&mut message);
    UInt(height).write(&mut message);
    message
}

/// The byte encoding a proposal signature commits to.
///
/// Includes the justifying certificate so a leader cannot re-bind its
/// proposal to a different justification after the fact.
fn proposal_message<P: PublicKey>(
    kind: Kind,
    view: View,
    height: Height,
    certificate: &Certificate<P>,
) -> Vec<u8> {
    let mut message = Vec::with_capacity(
        kind.encode_size()
            + view.encode_size()
            + UInt(height).encode_size()
            + certificate.encode_size(),
    );
    kind.write(&mut message);
    view.write(&mut message);
    UInt(height).write(&mut message);
    certificate.write(&mut message);
    message
}

/// A validator's endorsement of a block at a view.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Vote<P: PublicKey> {
    /// Whether this endorsement is ordinary or epoch-crossing.
    pub kind: Kind,
    /// The view the endorsement is cast in.
    pub view: View,
    /// The height being endorsed.
    pub height: Height,
    /// The sender's signature over the vote encoding.
    pub attestation: Attestation<P>,
}

impl<P: PublicKey> Vote<P> {
    /// Signs a vote for `(kind, view, height)`.
    pub fn sign<C: Signer<PublicKey = P, Signature = P::Signature>>(
        crypto: &C,
        namespace: &[u8],
        kind: Kind,
        view: View,
        height: Height,
    ) -> Self {
        let namespace = vote_namespace(namespace);
        let message = vote_message(kind, view, height);
        let signature = crypto.sign(Some(namespace.as_ref()), &message);
        Self {
            kind,
            view,
            height,
            attestation: Attestation {
                public_key: crypto.public_key(),
                signature,
            },
        }
    }

    /// Returns the vote's sender.
    pub fn sender(&self) -> &P {
        &self.attestation.public_key
    }

    /// Verifies the sender's signature.
    pub fn verify(&self, namespace: &[u8]) -> bool {
        let namespace = vote_namespace(namespace);
        let message = vote_message(self.kind, self.view, self.height);
        self.attestation.public_key.verify(
            Some(namespace.as_ref()),
            &message,
            &self.attestation.signature,
        )
    }
}

impl<P: PublicKey> Viewable for Vote<P> {
    fn view(&self) -> View {
        self.view
    }
}

impl<P: PublicKey> Write for Vote<P> {
    fn write(&self, writer: &mut impl BufMut) {
        self.kind.write(writer);
        self.view.write(writer);
        UInt(self.height).write(writer);
        self.attestation.write(writer);
    }
}

impl<P: PublicKey> EncodeSize for Vote<P> {
    fn encode_size(&self) -> usize {
        self.kind.encode_size()
            + self.view.encode_size()
            + UInt(self.height).encode_size()
            + self.attestation.encode_size()
    }
}

impl<P: PublicKey> Read for Vote<P> {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let kind = Kind::read(reader)?;
        let view = View::read(reader)?;
        let height: u64 = UInt::read(reader)?.into();
        let attestation = Attestation::read(reader)?;
        Ok(Self {
            kind,
            view,
            height,
            attestation,
        })
    }
}

/// Aggregated vote signatures attesting to a block at a view.
///
/// `signers` holds members of the block's own committee. For a boundary
/// block, `next_epoch_signers` holds members of the incoming committee; it is
/// empty everywhere else. Both vectors are sorted by public key and
/// duplicate-free.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Certificate<P: PublicKey> {
    /// Whether this certificate is ordinary or epoch-crossing.
    pub kind: Kind,
    /// The view the aggregated votes were cast in.
    pub view: View,
    /// The certified height.
    pub height: Height,
    /// Contributions from the block's own committee.
    pub signers: Vec<Attestation<P>>,
    /// Contributions from the incoming committee (boundary blocks only).
    pub next_epoch_signers: Vec<Attestation<P>>,
}

fn sorted_unique<P: PublicKey>(attestations: &[Attestation<P>]) -> bool {
    attestations
        .windows(2)
        .all(|pair| pair[0].public_key < pair[1].public_key)
}

impl<P: PublicKey> Certificate<P> {
    /// Verifies every aggregated signature and the certificate's shape.
    ///
    /// Counting signers against committee membership is left to the caller
    /// (it depends on the block's position within its epoch).
    pub fn verify(&self, namespace: &[u8]) -> bool {
        if !sorted_unique(&self.signers) || !sorted_unique(&self.next_epoch_signers) {
            return false;
        }
        let namespace = vote_namespace(namespace);
        let message = vote_message(self.kind, self.view, self.height);
        self.signers
            .iter()
            .chain(self.next_epoch_signers.iter())
            .all(|attestation| {
                attestation.public_key.verify(
                    Some(namespace.as_ref()),
                    &message,
                    &attestation.signature,
                )
            })
    }

    /// Returns the signers drawn from the block's own committee.
    pub fn signed_by(&self) -> impl Iterator<Item = &P> {
        self.signers.iter().map(|attestation| &attestation.public_key)
    }

    /// Returns the signers drawn from the incoming committee.
    pub fn next_signed_by(&self) -> impl Iterator<Item = &P> {
        self.next_epoch_signers
            .iter()
            .map(|attestation| &attestation.public_key)
    }
}

impl<P: PublicKey> Viewable for Certificate<P> {
    fn view(&self) -> View {
        self.view
    }
}

impl<P: PublicKey> Write for Certificate<P> {
    fn write(&self, writer: &mut impl BufMut) {
        self.kind.write(writer);
        self.view.write(writer);
        UInt(self.height).write(writer);
        self.signers.write(writer);
        self.next_epoch_signers.write(writer);
    }
}

impl<P: PublicKey> EncodeSize for Certificate<P> {
    fn encode_size(&self) -> usize {
        self.kind.encode_size()
            + self.view.encode_size()
            + UInt(self.height).encode_size()
            + self.signers.encode_size()
            + self.next_epoch_signers.encode_size()
    }
}

impl<P: PublicKey> Read for Certificate<P> {
    /// Maximum number of signers to accept per committee.
    type Cfg = usize;

    fn read_cfg(reader: &mut impl Buf, participants: &usize) -> Result<Self, Error> {
        let kind = Kind::read(reader)?;
        let view = View::read(reader)?;
        let height: u64 = UInt::read(reader)?.into();
        let signers = Vec::<Attestation<P>>::read_range(reader, ..=*participants)?;
        if signers.is_empty() {
            return Err(Error::Invalid(
                "consensus::wire::Certificate",
                "Certificate contains no signers",
            ));
        }
        if !sorted_unique(&signers) {
            return Err(Error::Invalid(
                "consensus::wire::Certificate",
                "Signers are not sorted by public key",
            ));
        }
        let next_epoch_signers = Vec::<Attestation<P>>::read_range(reader, ..=*participants)?;
        if !sorted_unique(&next_epoch_signers) {
            return Err(Error::Invalid(
                "consensus::wire::Certificate",
                "Next-epoch signers are not sorted by public key",
            ));
        }
        Ok(Self {
            kind,
            view,
            height,
            signers,
            next_epoch_signers,
        })
    }
}

/// A leader's proposal for a block, justified by an embedded certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal<P: PublicKey> {
    /// Whether this proposal is ordinary or epoch-crossing.
    pub kind: Kind,
    /// The view the proposal is made in.
    pub view: View,
    /// The proposed height.
    pub height: Height,
    /// The certificate justifying this proposal.
    pub certificate: Certificate<P>,
    /// The leader's signature over the proposal encoding.
    pub attestation: Attestation<P>,
}

impl<P: PublicKey> Proposal<P> {
    /// Signs a proposal for `(kind, view, height)` justified by `certificate`.
    pub fn sign<C: Signer<PublicKey = P, Signature = P::Signature>>(
        crypto: &C,
        namespace: &[u8],
        kind: Kind,
        view: View,
        height: Height,
        certificate: Certificate<P>,
    ) -> Self {
        let namespace = proposal_namespace(namespace);
        let message = proposal_message(kind, view, height, &certificate);
        let signature = crypto.sign(Some(namespace.as_ref()), &message);
        Self {
            kind,
            view,
            height,
            certificate,
            attestation: Attestation {
                public_key: crypto.public_key(),
                signature,
            },
        }
    }

    /// Returns the proposal's sender.
    pub fn sender(&self) -> &P {
        &self.attestation.public_key
    }

    /// Verifies the sender's signature.
    pub fn verify(&self, namespace: &[u8]) -> bool {
        let namespace = proposal_namespace(namespace);
        let message = proposal_message(self.kind, self.view, self.height, &self.certificate);
        self.attestation.public_key.verify(
            Some(namespace.as_ref()),
            &message,
            &self.attestation.signature,
        )
    }
}

impl<P: PublicKey> Viewable for Proposal<P> {
    fn view(&self) -> View {
        self.view
    }
}

impl<P: PublicKey> Write for Proposal<P> {
    fn write(&self, writer: &mut impl BufMut) {
        self.kind.write(writer);
        self.view.write(writer);
        UInt(self.height).write(writer);
        self.certificate.write(writer);
        self.attestation.write(writer);
    }
}

impl<P: PublicKey> EncodeSize for Proposal<P> {
    fn encode_size(&self) -> usize {
        self.kind.encode_size()
            + self.view.encode_size()
            + UInt(self.height).encode_size()
            + self.certificate.encode_size()
            + self.attestation.encode_size()
    }
}

impl<P: PublicKey> Read for Proposal<P> {
    /// Maximum number of signers to accept per committee.
    type Cfg = usize;

    fn read_cfg(reader: &mut impl Buf, participants: &usize) -> Result<Self, Error> {
        let kind = Kind::read(reader)?;
        let view = View::read(reader)?;
        let height: u64 = UInt::read(reader)?.into();
        let certificate = Certificate::read_cfg(reader, participants)?;
        let attestation = Attestation::read(reader)?;
        Ok(Self {
            kind,
            view,
            height,
            certificate,
            attestation,
        })
    }
}

/// The unit of protocol communication, dispatched by pattern match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message<P: PublicKey> {
    /// A validator's endorsement of a block.
    Vote(Vote<P>),
    /// A leader's proposal for a block.
    Proposal(Proposal<P>),
}

impl<P: PublicKey> Viewable for Message<P> {
    fn view(&self) -> View {
        match self {
            Self::Vote(vote) => vote.view(),
            Self::Proposal(proposal) => proposal.view(),
        }
    }
}

impl<P: PublicKey> Write for Message<P> {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Vote(vote) => {
                0u8.write(writer);
                vote.write(writer);
            }
            Self::Proposal(proposal) => {
                1u8.write(writer);
                proposal.write(writer);
            }
        }
    }
}

impl<P: PublicKey> EncodeSize for Message<P> {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Vote(vote) => vote.encode_size(),
            Self::Proposal(proposal) => proposal.encode_size(),
        }
    }
}

impl<P: PublicKey> Read for Message<P> {
    /// Maximum number of signers to accept per committee.
    type Cfg = usize;

    fn read_cfg(reader: &mut impl Buf, participants: &usize) -> Result<Self, Error> {
        match u8::read(reader)? {
            0 => Ok(Self::Vote(Vote::read(reader)?)),
            1 => Ok(Self::Proposal(Proposal::read_cfg(reader, participants)?)),
            _ => Err(Error::Invalid("consensus::wire::Message", "Invalid type")),
        }
    }
}

/// An addressed message queued for delivery by the environment.
///
/// No ordering between envelopes is guaranteed or required; the environment
/// may deliver any subset in any order and may re-deliver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope<P: PublicKey> {
    /// The node the message is addressed to.
    pub to: P,
    /// The message itself.
    pub message: Message<P>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{Decode, DecodeExt, Encode};
    use commonware_cryptography::{ed25519, PrivateKeyExt, Signer as _};

    const NAMESPACE: &[u8] = b"wire-test";

    fn signers(n: u64) -> Vec<ed25519::PrivateKey> {
        let mut keys: Vec<_> = (0..n).map(ed25519::PrivateKey::from_seed).collect();
        keys.sort_by_key(|key| key.public_key());
        keys
    }

    fn certificate(
        keys: &[ed25519::PrivateKey],
        kind: Kind,
        view: View,
        height: Height,
    ) -> Certificate<ed25519::PublicKey> {
        let mut attestations: Vec<_> = keys
            .iter()
            .map(|key| Vote::sign(key, NAMESPACE, kind, view, height).attestation)
            .collect();
        attestations.sort_by(|a, b| a.public_key.cmp(&b.public_key));
        Certificate {
            kind,
            view,
            height,
            signers: attestations,
            next_epoch_signers: Vec::new(),
        }
    }

    #[test]
    fn test_vote_sign_verify() {
        let keys = signers(2);
        let vote = Vote::sign(&keys[0], NAMESPACE, Kind::Quorum, View::new(3), 7);
        assert!(vote.verify(NAMESPACE));

        // A different namespace must not accept the signature.
        assert!(!vote.verify(b"other"));

        // Tampering with any signed field must be detected.
        let mut tampered = vote.clone();
        tampered.height = 8;
        assert!(!tampered.verify(NAMESPACE));
        let mut tampered = vote.clone();
        tampered.kind = Kind::Extended;
        assert!(!tampered.verify(NAMESPACE));
        let mut tampered = vote;
        tampered.attestation.public_key = keys[1].public_key();
        assert!(!tampered.verify(NAMESPACE));
    }

    #[test]
    fn test_vote_codec_roundtrip() {
        let keys = signers(1);
        let vote = Vote::sign(&keys[0], NAMESPACE, Kind::Extended, View::new(9), 5);
        let encoded = vote.encode();
        assert_eq!(encoded.len(), vote.encode_size());
        let decoded = Vote::<ed25519::PublicKey>::decode(encoded).unwrap();
        assert_eq!(vote, decoded);
    }

    #[test]
    fn test_certificate_verify() {
        let keys = signers(4);
        let certificate = certificate(&keys, Kind::Quorum, View::new(4), 4);
        assert!(certificate.verify(NAMESPACE));

        // Swapping one signature for another signer's must be detected.
        let mut corrupted = certificate.clone();
        corrupted.signers[0].signature = corrupted.signers[1].signature.clone();
        assert!(!corrupted.verify(NAMESPACE));
    }

    #[test]
    fn test_certificate_verify_rejects_unsorted() {
        let keys = signers(4);
        let mut certificate = certificate(&keys, Kind::Quorum, View::new(4), 4);
        certificate.signers.swap(0, 1);
        assert!(!certificate.verify(NAMESPACE));
    }

    #[test]
    fn test_certificate_codec_roundtrip() {
        let keys = signers(4);
        let certificate = certificate(&keys, Kind::Quorum, View::new(4), 4);
        let encoded = certificate.encode();
        assert_eq!(encoded.len(), certificate.encode_size());
        let decoded =
            Certificate::<ed25519::PublicKey>::decode_cfg(encoded, &keys.len()).unwrap();
        assert_eq!(certificate, decoded);
    }

    #[test]
    fn test_certificate_decode_rejects_malformed() {
        let keys = signers(4);
        let certificate = certificate(&keys, Kind::Quorum, View::new(4), 4);

        // More signers than participants.
        let encoded = certificate.encode();
        assert!(Certificate::<ed25519::PublicKey>::decode_cfg(encoded, &2).is_err());

        // Duplicate signers.
        let mut duplicate = certificate.clone();
        duplicate.signers[1] = duplicate.signers[0].clone();
        let encoded = duplicate.encode();
        assert!(Certificate::<ed25519::PublicKey>::decode_cfg(encoded, &keys.len()).is_err());

        // Unsorted signers.
        let mut unsorted = certificate.clone();
        unsorted.signers.swap(0, 1);
        let encoded = unsorted.encode();
        assert!(Certificate::<ed25519::PublicKey>::decode_cfg(encoded, &keys.len()).is_err());

        // No signers at all.
        let mut empty = certificate;
        empty.signers.clear();
        let encoded = empty.encode();
        assert!(Certificate::<ed25519::PublicKey>::decode_cfg(encoded, &keys.len()).is_err());
    }

    #[test]
    fn test_proposal_sign_verify() {
        let keys = signers(4);
        let justification = certificate(&keys, Kind::Quorum, View::new(4), 4);
        let proposal = Proposal::sign(
            &keys[0],
            NAMESPACE,
            Kind::Quorum,
            View::new(5),
            5,
            justification.clone(),
        );
        assert!(proposal.verify(NAMESPACE));
        assert_eq!(proposal.sender(), &keys[0].public_key());

        // Re-binding the proposal to a different justification must be
        // detected even though every field of the certificate is valid.
        let mut rebound = proposal.clone();
        rebound.certificate = certificate(&keys, Kind::Quorum, View::new(3), 4);
        assert!(!rebound.verify(NAMESPACE));

        let mut tampered = proposal;
        tampered.view = View::new(6);
        assert!(!tampered.verify(NAMESPACE));
    }

    #[test]
    fn test_message_codec_roundtrip() {
        let keys = signers(4);
        let vote = Vote::sign(&keys[1], NAMESPACE, Kind::Quorum, View::new(2), 2);
        let justification = certificate(&keys, Kind::Quorum, View::new(4), 4);
        let proposal = Proposal::sign(
            &keys[2],
            NAMESPACE,
            Kind::Quorum,
            View::new(5),
            5,
            justification,
        );

        for message in [
            Message::Vote(vote),
            Message::Proposal(proposal),
        ] {
            let encoded = message.encode();
            assert_eq!(encoded.len(), message.encode_size());
            let decoded =
                Message::<ed25519::PublicKey>::decode_cfg(encoded, &keys.len()).unwrap();
            assert_eq!(message, decoded);
        }
    }

    #[test]
    fn test_kind_decode_rejects_unknown_tag() {
        let encoded = bytes::Bytes::from_static(&[2u8]);
        assert!(Kind::decode(encoded).is_err());
    }
}
