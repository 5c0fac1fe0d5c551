use super::models::{Transaction, TransactionsBatchInfo, TransactionsBatchType};

/// Splits the batch into the already known and the new part.
///
/// Transactions are expected to be sorted from the newest to the oldest.
/// The batch is returned as is when it is already new, when it is fully
/// known or when nothing was seen before (`last_known_lt == 0`).
/// Otherwise the known part is returned first, then the new one.
pub fn split_transactions_batch<T>(
    mut transactions: Vec<T>,
    batch_info: TransactionsBatchInfo,
    last_known_lt: u64,
) -> Vec<(Vec<T>, TransactionsBatchInfo)>
where
    T: AsRef<Transaction>,
{
    if batch_info.batch_type == TransactionsBatchType::New
        || batch_info.max_lt <= last_known_lt
        || last_known_lt == 0
    {
        return vec![(transactions, batch_info)];
    }

    let boundary = transactions
        .iter()
        .position(|transaction| transaction.as_ref().id.lt <= last_known_lt)
        .unwrap_or(transactions.len());

    let old = transactions.split_off(boundary);
    let new = transactions;

    let mut result = Vec::with_capacity(2);
    for (group, batch_type) in [
        (old, TransactionsBatchType::Old),
        (new, TransactionsBatchType::New),
    ] {
        if let Some(info) = make_batch_info(&group, batch_type) {
            result.push((group, info));
        }
    }
    result
}

/// Merges new transactions into the list sorted from the newest to the oldest
pub fn merge_transactions<T>(transactions: &mut Vec<T>, new_transactions: Vec<T>)
where
    T: AsRef<Transaction>,
{
    transactions.extend(new_transactions);
    transactions.sort_by(|a, b| b.as_ref().id.lt.cmp(&a.as_ref().id.lt));
    transactions.dedup_by_key(|transaction| transaction.as_ref().id.lt);
}

fn make_batch_info<T>(
    transactions: &[T],
    batch_type: TransactionsBatchType,
) -> Option<TransactionsBatchInfo>
where
    T: AsRef<Transaction>,
{
    let lts = transactions.iter().map(|item| item.as_ref().id.lt);
    let min_lt = lts.clone().min()?;
    let max_lt = lts.max()?;

    Some(TransactionsBatchInfo {
        min_lt,
        max_lt,
        batch_type,
    })
}
