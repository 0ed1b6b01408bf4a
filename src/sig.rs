//! Handles the creation and verification of (Ethereum) Signatures.
//!
//! Channel states are signed by both participants over the Keccak-256 hash of
//! their slot encoding, wrapped in the `\x19Ethereum Signed Message` header
//! so the same signatures can be checked by an adjudicator contract.

use crate::{
    error::{Error, Result},
    types::{Address, Hash, Signature},
};
use core::fmt::Debug;
use sha3::{Digest, Keccak256};

// Both backends produce identical (RFC 6979) signatures. When both are
// enabled libsecp256k1 is the one exported.
#[cfg(feature = "k256")]
#[cfg_attr(feature = "secp256k1", allow(dead_code))]
mod k256;
#[cfg(feature = "secp256k1")]
mod secp256k1;

#[cfg(feature = "secp256k1")]
pub use self::secp256k1::{recover_signer, Signer};

#[cfg(all(feature = "k256", not(feature = "secp256k1")))]
pub use self::k256::{recover_signer, Signer};

#[cfg(not(any(feature = "k256", feature = "secp256k1")))]
compile_error!("enable one signing backend: `k256` or `secp256k1`");

#[cfg(test)]
mod tests;

/// Signing capability a node is given by its wallet.
///
/// The engine only ever asks for signatures over state hashes, it never sees
/// key material.
pub trait ChannelSigner: Send + Sync + Debug {
    /// Identifier of the key, used as the participant address.
    fn address(&self) -> Address;

    /// Sign `hash` in the Ethereum signed-message format.
    fn sign(&self, hash: Hash) -> Result<Signature>;
}

impl ChannelSigner for Signer {
    fn address(&self) -> Address {
        Signer::address(self)
    }

    fn sign(&self, hash: Hash) -> Result<Signature> {
        self.sign_eth(hash)
    }
}

/// Check that `sig` is a signature by `signer` over `hash`.
pub fn verify(hash: Hash, sig: Signature, signer: Address) -> bool {
    match recover_signer(hash, sig) {
        Ok(recovered) => recovered == signer,
        Err(_) => false,
    }
}

/// Like [verify], but reports who actually signed when it is someone else.
pub fn verify_or_err(hash: Hash, sig: Signature, signer: Address) -> Result<()> {
    let recovered = recover_signer(hash, sig).map_err(|_| Error::InvalidSignature(None))?;
    if recovered == signer {
        Ok(())
    } else {
        Err(Error::InvalidSignature(Some(recovered)))
    }
}

/// Add the `\x19Ethereum Signed Message\n<length>` prefix to hash.
///
/// This is the format expected by the Solidity contracts.
fn hash_to_eth_signed_msg_hash(hash: Hash) -> Hash {
    // Packed encoding => We can't use the serializer
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(hash.0);
    Hash(hasher.finalize().into())
}

/// Ethereum address of an uncompressed SEC1 public key.
fn address_from_uncompressed(pk_bytes: &[u8; 65]) -> Address {
    // Throw away the first byte, which is not part of the public key. It is
    // the SEC1 tag for the uncompressed encoding.
    let hash: [u8; 32] = Keccak256::digest(&pk_bytes[1..]).into();
    Address::from(Hash(hash))
}

/// Split off and normalize the recovery byte of an Ethereum signature.
fn recovery_byte(sig: &Signature) -> Result<u8> {
    match sig.0[64] {
        v @ (27 | 28) => Ok(v - 27),
        _ => Err(Error::InvalidSignature(None)),
    }
}
