//! Signer using the libsecp256k1 bindings.

use super::{address_from_uncompressed, hash_to_eth_signed_msg_hash, recovery_byte};
use crate::{
    error::{Error, Result},
    types::{Address, Hash, Signature},
};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message, PublicKey, Secp256k1, SecretKey,
};

pub struct Signer {
    secp: Secp256k1<All>,
    sk: SecretKey,
    addr: Address,
}

impl core::fmt::Debug for Signer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Signer").field("addr", &self.addr).finish()
    }
}

impl From<PublicKey> for Address {
    fn from(pk: PublicKey) -> Self {
        address_from_uncompressed(&pk.serialize_uncompressed())
    }
}

impl Signer {
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        let secp = Secp256k1::new();
        let sk = SecretKey::new(rng);
        let addr = PublicKey::from_secret_key(&secp, &sk).into();
        Self { secp, sk, addr }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(bytes).map_err(|e| Error::Signing(e.to_string()))?;
        let addr = PublicKey::from_secret_key(&secp, &sk).into();
        Ok(Self { secp, sk, addr })
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    /// Sign a hash using a Ethereum 65-byte recoverable signature.
    pub fn sign_eth(&self, hash: Hash) -> Result<Signature> {
        let hash = hash_to_eth_signed_msg_hash(hash);
        let msg = Message::from_slice(&hash.0).map_err(|e| Error::Signing(e.to_string()))?;

        // Recoverable, so the verifier can get the address back without
        // knowing the public key.
        let sig = self.secp.sign_ecdsa_recoverable(&msg, &self.sk);
        let (v, rs) = sig.serialize_compact();

        // libsecp256k1 produces low-s (EIP-2 canonical) signatures.
        debug_assert!(rs[32] & 0x80 == 0);

        // v is offset by 27, as in Ethereum. No EIP-155 chain id here.
        let v: u8 = 27 + v.to_i32() as u8;

        Ok(Signature::new(&rs, v))
    }
}

/// Recover the address that produced `eth_sig` over `hash`.
///
/// `hash` is the hash given to [Signer::sign_eth()], without the
/// `Ethereum Signed Message` prefix.
pub fn recover_signer(hash: Hash, eth_sig: Signature) -> Result<Address> {
    let secp = Secp256k1::verification_only();
    let hash = hash_to_eth_signed_msg_hash(hash);
    let msg = Message::from_slice(&hash.0).map_err(|_| Error::InvalidSignature(None))?;

    let v = recovery_byte(&eth_sig)?;
    let recid = RecoveryId::from_i32(v.into()).map_err(|_| Error::InvalidSignature(None))?;
    let sig = RecoverableSignature::from_compact(&eth_sig.0[..64], recid)
        .map_err(|_| Error::InvalidSignature(None))?;

    let pk = secp
        .recover_ecdsa(&msg, &sig)
        .map_err(|_| Error::InvalidSignature(None))?;

    Ok(pk.into())
}
