//! Two-party payment channels with hash-locked transfers that can be routed
//! through an intermediary.
//!
//! Each participant runs a [ChannelEngine]; intermediaries additionally run a
//! [Router] on top of it. Engines exchange double-signed channel updates over
//! a [wire::Transport].

mod encoding {
    mod error;
    mod hashing;
    mod ser;

    pub use error::{Error, Result};
    pub use hashing::to_hash;
    pub use ser::{to_vec, to_writer, Serializer, Writer};
}

pub mod chain;
pub mod channel;
pub mod clock;
pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod messages;
pub mod router;
pub mod sig;
pub mod store;
pub mod types;
pub mod wire;

pub use encoding::Error as EncodingError;
pub use engine::{ChannelEngine, CreateTransferParams, EngineEvent, Operation};
pub use error::{Error, Result};
pub use router::{RouteRecord, RouteStatus, Router};
pub use types::{Address, Bytes32, Hash, Signature, U256};
