//! Channel State Machine.
//!
//! A channel is a sequence of double-signed states. [update::apply_update] is
//! the single transition function both participants run on every proposal: it
//! checks the update against the current canonical state and produces the
//! provisional next state. A [proposal::ProposedUpdate] then collects the two
//! signatures over that state; only once both are present does it become the
//! new canonical [StateChannel].
//!
//! ```text
//!  canonical(n) --apply_update--> ProposedUpdate(n+1) --2 sigs--> canonical(n+1)
//!                                        |
//!                                        +-- rejected / timed out: dropped
//! ```

mod deposit;
mod merkle;
mod proposal;
mod state;
mod update;

pub use deposit::{reconcile, DepositObservation, DepositRecord};
pub use merkle::merkle_root;
pub use proposal::ProposedUpdate;
pub use state::{
    Balance, ChannelParams, CoreChannelState, NetworkContext, StateChannel, Transfer,
    TransferStatus,
};
pub use update::{
    apply_update, CancelReason, ChannelUpdate, CreateDetails, ResolveDetails, SetupDetails,
    UpdateDetails, UpdateType,
};

/// Index of a participant in a channel: 0 is the initiator, 1 the responder.
pub type PartIdx = usize;

pub const PARTICIPANTS: usize = 2;
