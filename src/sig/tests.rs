use super::verify;
use crate::{encoding, types::Hash};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;

fn data() -> Hash {
    #[derive(Serialize, Debug)]
    struct Payload {
        channel: [u8; 4],
        nonce: u64,
    }
    let d = Payload {
        channel: [0xa1, 0xa2, 0xa3, 0xa4],
        nonce: 7,
    };

    encoding::to_hash(&d).unwrap()
}

// Key produced by StdRng::seed_from_u64(0) in the libsecp256k1 backend, and its
// well known Ethereum address. Do not use that on any real device.
const TEST_KEY: [u8; 32] = [
    0x24, 0x4F, 0xFC, 0x73, 0xC4, 0x48, 0xB5, 0x6D, 0xDB, 0xA6, 0xA7, 0xBF, 0xA8, 0xD5, 0x8E, 0xD3,
    0x60, 0x12, 0x61, 0x1D, 0xA8, 0x3D, 0x4C, 0xB8, 0x30, 0x25, 0xEA, 0x12, 0xAC, 0xCF, 0x49, 0xFE,
];
const TEST_ADDRESS: &str = "7b7e212652b9c3755c4e1f1718a142dde3817523";

macro_rules! make_known_address {
    ($name:ident, $signer:ty) => {
        #[test]
        fn $name() {
            let signer = <$signer>::from_secret_bytes(&TEST_KEY).unwrap();
            assert_eq!(hex::encode(signer.address().0), TEST_ADDRESS);
        }
    };
}

macro_rules! make_a_to_b {
    ($name:ident, $signer:ty, $recover:path) => {
        #[test]
        fn $name() {
            let mut rng = StdRng::seed_from_u64(0);
            let signer = <$signer>::new(&mut rng);
            let msg = data();
            let sig = signer.sign_eth(msg).unwrap();

            assert!(sig.0[64] == 27 || sig.0[64] == 28);
            let address = $recover(msg, sig).unwrap();

            assert_eq!(address, signer.address());
        }
    };
}

#[cfg(feature = "k256")]
make_known_address!(k256_known_address, super::k256::Signer);

#[cfg(feature = "secp256k1")]
make_known_address!(secp256k1_known_address, super::secp256k1::Signer);

#[cfg(feature = "k256")]
make_a_to_b!(k256_to_k256, super::k256::Signer, super::k256::recover_signer);

#[cfg(feature = "secp256k1")]
make_a_to_b!(
    secp256k1_to_secp256k1,
    super::secp256k1::Signer,
    super::secp256k1::recover_signer
);

#[cfg(all(feature = "secp256k1", feature = "k256"))]
make_a_to_b!(
    secp256k1_to_k256,
    super::secp256k1::Signer,
    super::k256::recover_signer
);

#[cfg(all(feature = "secp256k1", feature = "k256"))]
make_a_to_b!(
    k256_to_secp256k1,
    super::k256::Signer,
    super::secp256k1::recover_signer
);

#[test]
fn verify_rejects_other_message_and_other_signer() {
    let mut rng = StdRng::seed_from_u64(1);
    let alice = super::Signer::new(&mut rng);
    let bob = super::Signer::new(&mut rng);
    let msg = data();
    let sig = alice.sign_eth(msg).unwrap();

    assert!(verify(msg, sig, alice.address()));
    assert!(!verify(msg, sig, bob.address()));
    assert!(!verify(Hash([1; 32]), sig, alice.address()));
}

#[test]
fn malformed_recovery_byte_is_invalid() {
    let mut rng = StdRng::seed_from_u64(2);
    let alice = super::Signer::new(&mut rng);
    let mut sig = alice.sign_eth(data()).unwrap();
    sig.0[64] = 3;
    assert!(super::recover_signer(data(), sig).is_err());
    assert!(super::verify_or_err(data(), sig, alice.address()).is_err());
}
