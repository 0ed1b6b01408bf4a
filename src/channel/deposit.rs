//! Deposit Reconciler.
//!
//! Deposits happen on chain and are observed as a cumulative total per
//! (channel, participant, asset). The channel only remembers how much of that
//! total it already credited, so replaying an observation credits nothing.

use crate::{
    error::{Error, Result},
    types::{Address, Hash, U256},
};
use serde::Serialize;

/// What a participant saw on chain.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositObservation {
    pub channel_address: Address,
    pub participant: Address,
    pub asset_id: Address,
    /// Everything `participant` ever deposited in `asset_id`.
    pub cumulative_total: U256,
    /// Reference to the latest deposit transaction included in the total.
    pub tx_ref: Hash,
}

/// Per participant and asset bookkeeping, part of the signed state.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepositRecord {
    /// Number of deposits credited so far.
    pub processed_nonce: u64,
    pub reconciled_total: U256,
    pub last_tx_ref: Hash,
}

/// Credit `observation` against `record`.
///
/// Returns the updated record and the amount to add to the participant's
/// balance. Observations that add nothing, including an exact replay of the
/// last one, are [Error::StaleDeposit].
pub fn reconcile(
    record: &DepositRecord,
    observation: &DepositObservation,
) -> Result<(DepositRecord, U256)> {
    if observation.tx_ref == record.last_tx_ref && record.processed_nonce > 0 {
        return Err(Error::StaleDeposit);
    }
    let credit = observation
        .cumulative_total
        .checked_sub(record.reconciled_total)
        .filter(|c| !c.is_zero())
        .ok_or(Error::StaleDeposit)?;

    let next = DepositRecord {
        processed_nonce: record.processed_nonce + 1,
        reconciled_total: observation.cumulative_total,
        last_tx_ref: observation.tx_ref,
    };
    Ok((next, credit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observe(total: u64, tx: u8) -> DepositObservation {
        DepositObservation {
            channel_address: Address([1; 20]),
            participant: Address([2; 20]),
            asset_id: Address::ZERO,
            cumulative_total: U256::from(total),
            tx_ref: Hash([tx; 32]),
        }
    }

    #[test]
    fn credits_the_difference() {
        let (rec, credit) = reconcile(&DepositRecord::default(), &observe(100, 1)).unwrap();
        assert_eq!(credit, U256::from(100));
        assert_eq!(rec.processed_nonce, 1);

        let (rec, credit) = reconcile(&rec, &observe(150, 2)).unwrap();
        assert_eq!(credit, U256::from(50));
        assert_eq!(rec.reconciled_total, U256::from(150));
        assert_eq!(rec.processed_nonce, 2);
    }

    #[test]
    fn replay_is_stale() {
        let (rec, _) = reconcile(&DepositRecord::default(), &observe(100, 1)).unwrap();
        assert!(matches!(
            reconcile(&rec, &observe(100, 1)),
            Err(Error::StaleDeposit)
        ));
        // Same total under a different reference still credits nothing.
        assert!(matches!(
            reconcile(&rec, &observe(100, 9)),
            Err(Error::StaleDeposit)
        ));
        // A total below what was already credited is never negative credit.
        assert!(matches!(
            reconcile(&rec, &observe(40, 3)),
            Err(Error::StaleDeposit)
        ));
    }

    #[test]
    fn zero_observation_on_fresh_record_is_stale() {
        assert!(matches!(
            reconcile(&DepositRecord::default(), &observe(0, 1)),
            Err(Error::StaleDeposit)
        ));
    }
}
