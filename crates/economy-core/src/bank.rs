//! Buy/sell share mutations and the date-keyed daily claim gate.

use std::fmt;

use contracts::MemberRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeError {
    /// A buy costs more coins than the member holds.
    InsufficientFunds { required: i64 },
    /// A sell covers more shares than the member holds.
    InsufficientShares { required: i64 },
    /// The trade value does not fit in the coin ledger.
    ValueOverflow,
}

impl fmt::Display for TradeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientFunds { required } => {
                write!(f, "insufficient funds: {required} coins required")
            }
            Self::InsufficientShares { required } => {
                write!(f, "insufficient shares: {required} shares required")
            }
            Self::ValueOverflow => {
                write!(f, "trade value overflows the coin ledger")
            }
        }
    }
}

impl std::error::Error for TradeError {}

/// Apply a signed trade at the given unit price. A positive delta buys, a
/// negative one sells; refusals leave the record untouched. Returns the
/// realized coin value (positive for buys, negative for sells). Persisting
/// the mutated record is the caller's job.
pub fn apply_trade(
    member: &mut MemberRecord,
    share_delta: i64,
    unit_price: i64,
) -> Result<i64, TradeError> {
    let value = share_delta
        .checked_mul(unit_price)
        .ok_or(TradeError::ValueOverflow)?;

    if share_delta > 0 && member.coins < value {
        return Err(TradeError::InsufficientFunds { required: value });
    }
    if share_delta < 0 {
        let cover = share_delta.checked_neg().ok_or(TradeError::ValueOverflow)?;
        if member.shares < cover {
            return Err(TradeError::InsufficientShares { required: cover });
        }
    }

    // Checked all the way through so a refusal can never half-apply.
    let coins = member
        .coins
        .checked_sub(value)
        .ok_or(TradeError::ValueOverflow)?;
    let shares = member
        .shares
        .checked_add(share_delta)
        .ok_or(TradeError::ValueOverflow)?;

    member.coins = coins;
    member.shares = shares;
    Ok(value)
}

/// Credit the daily reward at most once per calendar date. Returns false
/// without mutation when today's claim was already taken.
pub fn claim_daily(member: &mut MemberRecord, today: &str, reward: i64) -> bool {
    if member.prev_daily.as_deref() == Some(today) {
        return false;
    }

    member.coins += reward;
    member.prev_daily = Some(today.to_string());
    true
}
