//! Protobuf schema of the participant wire protocol.
//!
//! Written out with the prost derive macros instead of generated from a
//! `.proto` file. Field tags are part of the protocol and must not be reused.
//! All byte fields are fixed width: 20 for addresses, 32 for hashes and
//! amounts (big endian), 65 for signatures.

use std::collections::BTreeMap;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(bytes = "vec", tag = "1")]
    pub sender: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub recipient: Vec<u8>,
    #[prost(oneof = "envelope::Msg", tags = "3, 4, 5")]
    pub msg: Option<envelope::Msg>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Msg {
        #[prost(message, tag = "3")]
        UpdateProposal(super::ChannelUpdateMsg),
        #[prost(message, tag = "4")]
        UpdateAccepted(super::UpdateAcceptedMsg),
        #[prost(message, tag = "5")]
        UpdateRejected(super::UpdateRejectedMsg),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelUpdateMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub from: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub to: Vec<u8>,
    #[prost(uint64, tag = "4")]
    pub nonce: u64,
    /// One entry per participant, empty when not signed.
    #[prost(bytes = "vec", repeated, tag = "5")]
    pub signatures: Vec<Vec<u8>>,
    #[prost(oneof = "channel_update_msg::Details", tags = "6, 7, 8, 9, 10")]
    pub details: Option<channel_update_msg::Details>,
}

pub mod channel_update_msg {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Details {
        #[prost(message, tag = "6")]
        Setup(super::SetupMsg),
        #[prost(message, tag = "7")]
        Deposit(super::DepositMsg),
        #[prost(message, tag = "8")]
        Create(super::TransferMsg),
        #[prost(message, tag = "9")]
        Resolve(super::ResolveMsg),
        #[prost(message, tag = "10")]
        Cancel(super::CancelMsg),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetupMsg {
    #[prost(uint64, tag = "1")]
    pub timeout: u64,
    #[prost(uint64, tag = "2")]
    pub chain_id: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub channel_factory: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DepositMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub participant: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub asset_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub cumulative_total: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub tx_ref: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransferMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub transfer_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub channel_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub asset_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub amount: Vec<u8>,
    #[prost(uint32, tag = "5")]
    pub condition_type: u32,
    #[prost(bytes = "vec", tag = "6")]
    pub initial_state: Vec<u8>,
    #[prost(bytes = "vec", tag = "7")]
    pub initiator: Vec<u8>,
    #[prost(bytes = "vec", tag = "8")]
    pub responder: Vec<u8>,
    #[prost(bytes = "vec", tag = "9")]
    pub recipient: Vec<u8>,
    #[prost(bytes = "vec", tag = "10")]
    pub routing_id: Vec<u8>,
    #[prost(uint64, tag = "11")]
    pub expiry: u64,
    #[prost(btree_map = "string, string", tag = "12")]
    pub meta: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResolveMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub transfer_id: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub condition_type: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub resolver: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub transfer_id: Vec<u8>,
    #[prost(bool, tag = "2")]
    pub expired: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateAcceptedMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_address: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub nonce: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub signature: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RejectCode {
    Invalid = 0,
    StaleNonce = 1,
    Busy = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateRejectedMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_address: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub nonce: u64,
    #[prost(enumeration = "RejectCode", tag = "3")]
    pub code: i32,
    #[prost(string, tag = "4")]
    pub reason: String,
    #[prost(uint64, tag = "5")]
    pub expected_nonce: u64,
    /// Rejecter's latest double-signed update, sent with stale nonces.
    #[prost(message, optional, tag = "6")]
    pub latest: Option<ChannelUpdateMsg>,
}
