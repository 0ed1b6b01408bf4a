use super::{state::StateChannel, update::ChannelUpdate, PartIdx, PARTICIPANTS};
use crate::{
    error::{InvalidUpdate, Result},
    sig::{self, ChannelSigner},
    types::{Address, Hash, Signature},
};

/// A provisional next state, waiting for the signatures that make it
/// canonical.
///
/// A proposal is never stored. It either collects both signatures and is
/// turned into a [StateChannel] with [ProposedUpdate::build], or it is
/// dropped and the canonical state stays where it was.
#[derive(Debug, Clone)]
pub struct ProposedUpdate {
    next: StateChannel,
    state_hash: Hash,
    signatures: [Option<Signature>; PARTICIPANTS],
}

impl ProposedUpdate {
    /// Wrap the unsigned result of [super::apply_update].
    pub fn new(next: StateChannel) -> Result<Self> {
        let state_hash = next.core.state_hash()?;
        Ok(ProposedUpdate {
            next,
            state_hash,
            signatures: [None; PARTICIPANTS],
        })
    }

    pub fn state_hash(&self) -> Hash {
        self.state_hash
    }

    pub fn nonce(&self) -> u64 {
        self.next.nonce()
    }

    pub fn next(&self) -> &StateChannel {
        &self.next
    }

    /// The update carrying the signatures collected so far, the form sent to
    /// the counterparty.
    pub fn signed_update(&self) -> ChannelUpdate {
        ChannelUpdate {
            signatures: self.signatures,
            ..self.next.latest_update.clone()
        }
    }

    fn part_idx(&self, signer: Address) -> Result<PartIdx> {
        Ok(self
            .next
            .core
            .part_idx(signer)
            .ok_or(InvalidUpdate::NotAParticipant(signer))?)
    }

    /// Add our own signature.
    pub fn sign(&mut self, signer: &dyn ChannelSigner) -> Result<Signature> {
        let idx = self.part_idx(signer.address())?;
        if self.signatures[idx].is_some() {
            return Err(InvalidUpdate::AlreadySigned(signer.address()).into());
        }
        let sig = signer.sign(self.state_hash)?;
        self.signatures[idx] = Some(sig);
        Ok(sig)
    }

    /// Add a signature received from `signer` after checking it covers the
    /// proposed state.
    pub fn add_signature(&mut self, signer: Address, sig: Signature) -> Result<()> {
        let idx = self.part_idx(signer)?;
        sig::verify_or_err(self.state_hash, sig, signer)?;
        match self.signatures[idx] {
            Some(_) => Err(InvalidUpdate::AlreadySigned(signer).into()),
            None => {
                self.signatures[idx] = Some(sig);
                Ok(())
            }
        }
    }

    pub fn is_fully_signed(&self) -> bool {
        self.signatures.iter().all(Option::is_some)
    }

    /// Turn the proposal into the new canonical state. Fails while a
    /// signature is missing.
    pub fn build(self) -> Result<StateChannel> {
        if !self.is_fully_signed() {
            return Err(InvalidUpdate::MissingSignature.into());
        }
        let mut next = self.next;
        next.latest_update.signatures = self.signatures;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{apply_update, ChannelParams, NetworkContext, SetupDetails, UpdateDetails},
        error::Error,
        sig::Signer,
    };
    use rand::{rngs::StdRng, SeedableRng};

    fn proposal(alice: &Signer, bob: &Signer) -> ProposedUpdate {
        let network = NetworkContext {
            chain_id: 1,
            channel_factory: Address::ZERO,
        };
        let channel_address = ChannelParams {
            alice: alice.address(),
            bob: bob.address(),
            network,
        }
        .channel_address()
        .unwrap();
        let update = ChannelUpdate::new(
            channel_address,
            alice.address(),
            bob.address(),
            0,
            UpdateDetails::Setup(SetupDetails {
                network,
                timeout: 60,
            }),
        );
        ProposedUpdate::new(apply_update(None, &update, 0).unwrap()).unwrap()
    }

    #[test]
    fn both_signatures_make_it_canonical() {
        let mut rng = StdRng::seed_from_u64(0);
        let alice = Signer::new(&mut rng);
        let bob = Signer::new(&mut rng);

        let mut ours = proposal(&alice, &bob);
        ours.sign(&alice).unwrap();
        let sent = ours.signed_update();
        assert!(sent.signatures[0].is_some() && sent.signatures[1].is_none());

        let mut theirs = proposal(&alice, &bob);
        theirs
            .add_signature(alice.address(), sent.signatures[0].unwrap())
            .unwrap();
        let bob_sig = theirs.sign(&bob).unwrap();
        let theirs = theirs.build().unwrap();

        ours.add_signature(bob.address(), bob_sig).unwrap();
        let ours = ours.build().unwrap();

        assert_eq!(ours, theirs);
        assert!(ours.is_fully_signed());
    }

    #[test]
    fn missing_or_foreign_signature_fails() {
        let mut rng = StdRng::seed_from_u64(1);
        let alice = Signer::new(&mut rng);
        let bob = Signer::new(&mut rng);
        let mallory = Signer::new(&mut rng);

        let mut p = proposal(&alice, &bob);
        p.sign(&alice).unwrap();
        assert!(matches!(
            p.sign(&alice),
            Err(Error::InvalidUpdate(InvalidUpdate::AlreadySigned(_)))
        ));

        let forged = mallory.sign_eth(p.state_hash()).unwrap();
        assert!(matches!(
            p.add_signature(bob.address(), forged),
            Err(Error::InvalidSignature(Some(_)))
        ));
        assert!(matches!(
            p.sign(&mallory),
            Err(Error::InvalidUpdate(InvalidUpdate::NotAParticipant(_)))
        ));

        assert!(matches!(
            p.build(),
            Err(Error::InvalidUpdate(InvalidUpdate::MissingSignature))
        ));
    }
}
