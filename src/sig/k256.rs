//! Signer using the k256 Rust crate (implementation of ecdsa in Rust).

use super::{address_from_uncompressed, hash_to_eth_signed_msg_hash, recovery_byte};
use crate::{
    error::{Error, Result},
    types::{Address, Hash, Signature},
};
use k256::{
    ecdsa::{
        recoverable,
        signature::{hazmat::PrehashSigner, Signature as k256Signature},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};

pub struct Signer {
    key: SigningKey,
    addr: Address,
}

impl core::fmt::Debug for Signer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Never print key material.
        f.debug_struct("Signer").field("addr", &self.addr).finish()
    }
}

impl From<VerifyingKey> for Address {
    fn from(key: VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        // An uncompressed point is always 65 bytes (tag + x + y).
        let pk_bytes: [u8; 65] = point
            .as_bytes()
            .try_into()
            .expect("uncompressed SEC1 points are 65 bytes");
        address_from_uncompressed(&pk_bytes)
    }
}

impl Signer {
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        let key = SigningKey::random(rng);
        let addr = key.verifying_key().into();
        Self { key, addr }
    }

    /// Build a signer from a raw 32-byte secret key.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let key = SigningKey::from_bytes(bytes).map_err(|e| Error::Signing(e.to_string()))?;
        let addr = key.verifying_key().into();
        Ok(Self { key, addr })
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn sign_eth(&self, msg: Hash) -> Result<Signature> {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);

        let sig: recoverable::Signature = self
            .key
            .sign_prehash(&hash.0)
            .map_err(|e| Error::Signing(e.to_string()))?;

        // This Signature type already has the layout we need: r, s and v in
        // this order. v still has to be shifted by 27 for the EVM.
        let mut sig_bytes: [u8; 65] = sig
            .as_bytes()
            .try_into()
            .map_err(|_| Error::Signing("unexpected signature length".into()))?;
        debug_assert!(sig_bytes[32] & 0x80 == 0);
        sig_bytes[64] += 27;

        Ok(Signature(sig_bytes))
    }
}

pub fn recover_signer(msg: Hash, eth_sig: Signature) -> Result<Address> {
    // "\x19Ethereum Signed Message:\n32" format
    let hash = hash_to_eth_signed_msg_hash(msg);

    let mut sig_bytes: [u8; 65] = eth_sig.0;
    sig_bytes[64] = recovery_byte(&eth_sig)?;

    let sig = recoverable::Signature::from_bytes(&sig_bytes)
        .map_err(|_| Error::InvalidSignature(None))?;

    let verifying_key = sig
        .recover_verifying_key_from_digest_bytes(&hash.0.into())
        .map_err(|_| Error::InvalidSignature(None))?;
    Ok(verifying_key.into())
}
