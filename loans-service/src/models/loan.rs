use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Whether the catalog stock change for the loan's latest transition
/// (borrow, or return once `returned_at` is set) has been confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockState {
    Pending,
    Applied,
}

impl StockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockState::Pending => "pending",
            StockState::Applied => "applied",
        }
    }
}

impl fmt::Display for StockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StockState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StockState::Pending),
            "applied" => Ok(StockState::Applied),
            other => Err(format!("unknown stock state '{}'", other)),
        }
    }
}

/// Which stock change a loan is on: the borrow's decrement, or the
/// return's increment once `returned_at` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockPhase {
    Borrow,
    Return,
}

impl StockPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockPhase::Borrow => "borrow",
            StockPhase::Return => "return",
        }
    }

    pub fn delta(&self) -> i32 {
        match self {
            StockPhase::Borrow => -1,
            StockPhase::Return => 1,
        }
    }

    pub fn key(&self, loan_id: Uuid) -> String {
        match self {
            StockPhase::Borrow => borrow_key(loan_id),
            StockPhase::Return => return_key(loan_id),
        }
    }
}

impl fmt::Display for StockPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A borrow of one copy of a book. `returned_at` is set at most once.
/// Cancelled loans are borrows the catalog refused; they are kept but never
/// shown.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Loan {
    pub id: Uuid,
    pub user_id: i64,
    pub book_id: String,
    pub borrowed_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub stock_state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn is_returned(&self) -> bool {
        self.returned_at.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// Unknown states read as pending so reconciliation picks them up.
    pub fn state(&self) -> StockState {
        self.stock_state.parse().unwrap_or(StockState::Pending)
    }

    pub fn is_pending(&self) -> bool {
        self.state() == StockState::Pending
    }

    pub fn phase(&self) -> StockPhase {
        if self.is_returned() {
            StockPhase::Return
        } else {
            StockPhase::Borrow
        }
    }
}

/// Idempotency key for the stock decrement of a borrow.
pub fn borrow_key(loan_id: Uuid) -> String {
    format!("{}:borrow", loan_id)
}

/// Idempotency key for the stock increment of a return.
pub fn return_key(loan_id: Uuid) -> String {
    format!("{}:return", loan_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loan(stock_state: &str) -> Loan {
        let now = Utc::now();
        Loan {
            id: Uuid::new_v4(),
            user_id: 1,
            book_id: "b".to_string(),
            borrowed_at: now,
            returned_at: None,
            stock_state: stock_state.to_string(),
            created_at: now,
            updated_at: now,
            cancelled_at: None,
        }
    }

    #[test]
    fn test_stock_state_parsing() {
        assert_eq!("applied".parse::<StockState>(), Ok(StockState::Applied));
        assert!("done".parse::<StockState>().is_err());
        assert!(loan("garbage").is_pending());
        assert!(!loan("applied").is_pending());
    }

    #[test]
    fn test_keys_differ_per_transition() {
        let id = Uuid::new_v4();
        assert_ne!(borrow_key(id), return_key(id));
        assert!(borrow_key(id).starts_with(&id.to_string()));
    }

    #[test]
    fn test_phase_follows_return() {
        let mut l = loan("applied");
        assert_eq!(l.phase(), StockPhase::Borrow);
        assert_eq!(l.phase().key(l.id), borrow_key(l.id));

        l.returned_at = Some(Utc::now());
        assert_eq!(l.phase(), StockPhase::Return);
        assert_eq!(l.phase().delta(), 1);
        assert_eq!(l.phase().key(l.id), return_key(l.id));
    }
}
