//! Primitive value types shared by every layer: identifiers, hashes,
//! signatures and 256-bit amounts.

use core::fmt::{Debug, Display};

use rand::{distributions::Standard, prelude::Distribution};
use serde::Serialize;
use uint::construct_uint;

macro_rules! impl_hex_fmt {
    ($T:ident) => {
        impl Debug for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str("0x")?;
                for b in self.0 {
                    f.write_fmt(format_args!("{:02x}", b))?;
                }
                Ok(())
            }
        }

        impl Display for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                Debug::fmt(self, f)
            }
        }
    };
}

macro_rules! bytesN {
    ( $T:ident, $N:literal ) => {
        #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
        pub struct $T(pub [u8; $N]);

        impl Serialize for $T {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_bytes(&self.0)
            }
        }

        impl Distribution<$T> for Standard {
            fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> $T {
                $T(rng.gen())
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self([0; $N])
            }
        }

        impl TryFrom<&[u8]> for $T {
            type Error = core::array::TryFromSliceError;

            fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
                Ok(Self(value.try_into()?))
            }
        }

        impl_hex_fmt!($T);
    };
}

bytesN!(Bytes32, 32);
bytesN!(Hash, 32);

impl Hash {
    pub const ZERO: Hash = Hash([0; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }
}

bytesN!(Signature, 65);
impl Signature {
    pub fn new(rs: &[u8; 64], v: u8) -> Self {
        let mut sig: Signature = Signature([0; 65]);
        sig.0[..64].copy_from_slice(rs);
        sig.0[64] = v;
        sig
    }
}

// Amounts are unsigned 256-bit words, the width of an on-chain balance. We
// keep our own type instead of primitive_types so it serializes into a single
// 32-byte slot instead of a hex string.
construct_uint! {
    pub struct U256(4);
}

impl Serialize for U256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut bytes = [0u8; 32];
        self.to_big_endian(&mut bytes);
        serializer.serialize_bytes(&bytes)
    }
}

impl Distribution<U256> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> U256 {
        let buf: [u8; 32] = rng.gen();
        U256::from_big_endian(&buf)
    }
}

impl U256 {
    /// Big-endian 32-byte representation, used on the wire.
    pub fn to_be_bytes32(&self) -> [u8; 32] {
        let mut buf = [0u8; 32];
        self.to_big_endian(&mut buf);
        buf
    }
}

/// Participant identifier and asset identifier.
///
/// Participants are identified by the address derived from their signing key,
/// assets by the address of the token they represent ([Address::ZERO] is the
/// chain's native asset).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);
impl_hex_fmt!(Address);

impl Address {
    pub const ZERO: Address = Address([0; 20]);
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // Addresses are right aligned in their slot, like integers.
        let mut bytes = [0u8; 32];
        bytes[32 - 20..].copy_from_slice(self.0.as_slice());
        serializer.serialize_bytes(&bytes)
    }
}

impl core::str::FromStr for Address {
    type Err = hex::FromHexError;

    /// Parses `0x`-prefixed or bare hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut addr = Address::ZERO;
        hex::decode_to_slice(s, &mut addr.0)?;
        Ok(addr)
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = core::array::TryFromSliceError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(value.try_into()?))
    }
}

impl From<Hash> for Address {
    /// Takes the last 20 bytes of the hash, the way contract and account
    /// addresses are derived.
    fn from(hash: Hash) -> Self {
        let mut addr = Address([0; 20]);
        addr.0.copy_from_slice(&hash.0[32 - 20..]);
        addr
    }
}

impl Distribution<Address> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Address {
        Address(rng.gen())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_prefixed_hex() {
        let addr = Address([0xab; 20]);
        assert_eq!(format!("{:?}", addr), format!("0x{}", "ab".repeat(20)));
        assert_eq!(format!("{}", Hash::ZERO), format!("0x{}", "00".repeat(32)));
    }

    #[test]
    fn address_from_hash_takes_tail() {
        let mut h = Hash::ZERO;
        h.0[12..].copy_from_slice(&[7u8; 20]);
        h.0[0] = 1;
        assert_eq!(Address::from(h), Address([7u8; 20]));
    }

    #[test]
    fn u256_big_endian_round_trip() {
        let v = U256::from(0x1234_5678u64);
        let bytes = v.to_be_bytes32();
        assert_eq!(&bytes[28..], &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(U256::from_big_endian(&bytes), v);
    }

    #[test]
    fn address_parses_with_and_without_prefix() {
        let a: Address = "0x5b38da6a701c568545dcfcb03fcb875f56beddc4".parse().unwrap();
        let b: Address = "5B38Da6a701c568545dCfcB03FcB875f56beddC4".parse().unwrap();
        assert_eq!(a, b);
        assert!("0x1234".parse::<Address>().is_err());
    }

    #[test]
    fn slices_of_wrong_length_are_rejected() {
        assert!(Address::try_from(&[0u8; 19][..]).is_err());
        assert!(Hash::try_from(&[0u8; 32][..]).is_ok());
    }
}
