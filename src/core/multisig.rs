use std::collections::HashMap;

use ever_utils::*;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use super::models::{
    MultisigTransaction, TonWalletTransaction, TransactionAdditionalInfo, WalletInteractionMethod,
};

/// Accumulated state of the multisig transaction
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigTransactionAggregate {
    #[serde(with = "serde_u64")]
    pub transaction_id: u64,
    /// Unknown until the submit transaction is found
    pub creator: Option<UInt256>,
    pub submit_transaction_hash: Option<UInt256>,
    pub dest: Option<Address>,
    #[serde(with = "serde_optional_string")]
    pub value: Option<BigUint>,
    pub created_at: Option<u32>,
    pub confirmations: Vec<UInt256>,
    pub confirm_transaction_hashes: Vec<UInt256>,
}

impl MultisigTransactionAggregate {
    fn new(transaction_id: u64) -> Self {
        Self {
            transaction_id,
            creator: None,
            submit_transaction_hash: None,
            dest: None,
            value: None,
            created_at: None,
            confirmations: Vec::new(),
            confirm_transaction_hashes: Vec::new(),
        }
    }

    fn add_confirmation(&mut self, custodian: UInt256) {
        if !self.confirmations.contains(&custodian) {
            self.confirmations.push(custodian);
        }
    }
}

/// Updates aggregates with submit and confirm calls from the transactions.
///
/// Applying the same transactions twice doesn't change the result
pub fn update_multisig_aggregates(
    aggregates: &mut HashMap<u64, MultisigTransactionAggregate>,
    transactions: &[TonWalletTransaction],
) {
    for transaction in transactions {
        let multisig_transaction = match &transaction.data {
            Some(TransactionAdditionalInfo::WalletInteraction(info)) => match &info.method {
                WalletInteractionMethod::Multisig(transaction) => transaction.as_ref(),
                _ => continue,
            },
            _ => continue,
        };

        let hash = transaction.transaction.id.hash;
        match multisig_transaction {
            // Zero id means that the transfer was executed immediately
            MultisigTransaction::Submit(submit) if submit.trans_id != 0 => {
                let aggregate = aggregates
                    .entry(submit.trans_id)
                    .or_insert_with(|| MultisigTransactionAggregate::new(submit.trans_id));

                aggregate.creator = Some(submit.custodian);
                aggregate.submit_transaction_hash = Some(hash);
                aggregate.dest = Some(submit.dest);
                aggregate.value = Some(submit.value.clone());
                aggregate.created_at = Some(transaction.transaction.created_at);
                aggregate.add_confirmation(submit.custodian);
            }
            MultisigTransaction::Confirm(confirm) => {
                let aggregate = aggregates
                    .entry(confirm.transaction_id)
                    .or_insert_with(|| MultisigTransactionAggregate::new(confirm.transaction_id));

                aggregate.add_confirmation(confirm.custodian);
                if !aggregate.confirm_transaction_hashes.contains(&hash) {
                    aggregate.confirm_transaction_hashes.push(hash);
                }
            }
            _ => {}
        }
    }
}
