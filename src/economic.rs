//! Block subsidy and coinbase value

use crate::config::Settings;
use crate::error::TransactionError;
use crate::types::*;

/// GetBlockSubsidy: ℕ → ℤ
///
/// subsidy = initial_subsidy × 2^(-⌊h/H⌋)
///
/// BIP42 ends the subsidy after 64 halvings. Without it the shift count
/// wraps, so the subsidy would reappear at 64 halvings.
pub fn block_subsidy(height: Natural, settings: &Settings, bip42: bool) -> Integer {
    let halvings = height / settings.subsidy_interval;
    if bip42 && halvings >= 64 {
        return 0;
    }
    settings.initial_subsidy >> (halvings % 64)
}

/// Sum `values`, failing once the total leaves the money range.
pub fn checked_total<I>(values: I, error: TransactionError) -> Result<Integer, TransactionError>
where
    I: IntoIterator<Item = Integer>,
{
    values.into_iter().try_fold(0i64, |total, value| {
        total
            .checked_add(value)
            .filter(|total| (0..=crate::constants::MAX_MONEY).contains(total))
            .ok_or(error)
    })
}
