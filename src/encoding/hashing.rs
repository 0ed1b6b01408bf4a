use super::{to_writer, Error, Writer};
use crate::types::Hash;

use serde::Serialize;
use sha3::{
    digest::{core_api::CoreWrapper, Output},
    Digest, Keccak256, Keccak256Core,
};

pub struct Keccak256Writer {
    hasher: CoreWrapper<Keccak256Core>,
}

impl Default for Keccak256Writer {
    fn default() -> Self {
        Self {
            hasher: Keccak256::new(),
        }
    }
}

impl Writer for Keccak256Writer {
    fn write(&mut self, slot: &[u8]) {
        self.hasher.update(slot);
    }
}

impl Keccak256Writer {
    pub fn finalize(self) -> Output<Keccak256> {
        self.hasher.finalize()
    }
}

/// Keccak-256 over the slot encoding of `value`.
///
/// This is the digest every signature in a channel covers and the way all
/// content-derived identifiers (channel address, transfer id) are computed.
pub fn to_hash<T>(value: &T) -> Result<Hash, Error>
where
    T: Serialize + ?Sized,
{
    let mut writer = Keccak256Writer::default();
    to_writer(value, &mut writer)?;
    Ok(Hash(writer.finalize().into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::to_vec;

    #[test]
    fn hash_matches_hash_of_encoding() {
        let value = (1u64, "abc", vec![3u8, 4]);
        let direct = to_hash(&value).unwrap();
        let encoded = to_vec(&value).unwrap();
        let expected: [u8; 32] = Keccak256::digest(&encoded).into();
        assert_eq!(direct, Hash(expected));
    }

    #[test]
    fn empty_input_is_keccak_of_nothing() {
        // keccak256("") is a well known constant.
        let hash = to_hash(&()).unwrap();
        assert_eq!(
            hex::encode(hash.0),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
