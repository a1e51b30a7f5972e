//! Loan Workflow: borrow and return as a two-step saga over the local loan
//! store and the catalog's stock ledger.
//!
//! A loan is written first with its stock change `pending`, then the stock
//! change is sent with an idempotency key derived from the loan id, then the
//! loan is marked `applied`. A definitive refusal from the catalog cancels
//! the borrow. Anything else leaves the loan pending for [`LoanWorkflow::reconcile`]
//! to re-drive with the same key.

use service_core::grpc::{CallContext, ComponentHealth, HealthReport};
use service_core::identity::Identity;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::database::LoanStore;
use super::error::LoanError;
use super::metrics::{COMPENSATIONS_TOTAL, LOAN_OPERATIONS_TOTAL};
use super::stock_ledger::{StockLedger, StockLedgerError};
use crate::models::{Loan, StockPhase};

pub const DEFAULT_RECONCILE_LIMIT: i64 = 100;
pub const MAX_RECONCILE_LIMIT: i64 = 1000;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: i32,
    pub applied: i32,
    pub cancelled: i32,
    pub still_pending: i32,
}

/// Where one stock change for a loan landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Applied,
    Cancelled,
    Pending,
}

/// Parse a wire account id.
pub fn parse_user_id(user_id: &str) -> Result<i64, LoanError> {
    if user_id.is_empty() {
        return Err(LoanError::InvalidInput("user id is required".to_string()));
    }
    user_id
        .parse()
        .map_err(|_| LoanError::InvalidInput(format!("invalid user id '{}'", user_id)))
}

fn outcome_label<T>(result: &Result<T, LoanError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(LoanError::InvalidInput(_)) => "invalid_input",
        Err(LoanError::BookNotFound) => "book_not_found",
        Err(LoanError::BookNotAvailable) => "book_not_available",
        Err(LoanError::TransactionNotFound) => "transaction_not_found",
        Err(LoanError::AlreadyReturned) => "already_returned",
        Err(LoanError::BorrowPending) => "borrow_pending",
        Err(LoanError::PermissionDenied) => "permission_denied",
        Err(LoanError::StockLedger(_)) => "stock_pending",
        Err(_) => "error",
    }
}

#[derive(Clone)]
pub struct LoanWorkflow {
    loans: Arc<dyn LoanStore>,
    ledger: Arc<dyn StockLedger>,
}

impl LoanWorkflow {
    pub fn new(loans: Arc<dyn LoanStore>, ledger: Arc<dyn StockLedger>) -> Self {
        Self { loans, ledger }
    }

    /// Borrow one copy of `book_id` for `user_id`.
    #[instrument(skip(self, ctx))]
    pub async fn borrow(
        &self,
        ctx: &CallContext,
        user_id: &str,
        book_id: &str,
    ) -> Result<Loan, LoanError> {
        let result = self.borrow_inner(ctx, user_id, book_id).await;
        LOAN_OPERATIONS_TOTAL
            .with_label_values(&["borrow", outcome_label(&result)])
            .inc();
        result
    }

    async fn borrow_inner(
        &self,
        ctx: &CallContext,
        user_id: &str,
        book_id: &str,
    ) -> Result<Loan, LoanError> {
        let user = parse_user_id(user_id)?;
        if book_id.is_empty() {
            return Err(LoanError::InvalidInput("book id is required".to_string()));
        }

        let book = self.ledger.get_by_id(ctx, book_id).await.map_err(|e| match e {
            StockLedgerError::BookNotFound => LoanError::BookNotFound,
            other => LoanError::StockLedger(other),
        })?;
        if book.stock <= 0 {
            return Err(LoanError::BookNotAvailable);
        }

        let mut loan = self.loans.create(user, book_id).await?;

        match self
            .ledger
            .update_stock(ctx, book_id, -1, &StockPhase::Borrow.key(loan.id))
            .await
        {
            Ok(_) => {
                self.confirm(&loan, StockPhase::Borrow).await?;
                loan = self.loans.get(loan.id).await?.unwrap_or(loan);
                info!(loan_id = %loan.id, book_id = book_id, "Book borrowed");
                Ok(loan)
            }
            Err(e) if e.is_definitive() => {
                self.compensate(&loan, &e).await?;
                Err(match e {
                    StockLedgerError::InsufficientStock => LoanError::BookNotAvailable,
                    _ => LoanError::BookNotFound,
                })
            }
            Err(e) => {
                warn!(
                    loan_id = %loan.id,
                    error = %e,
                    "Stock decrement unconfirmed, loan left pending"
                );
                Err(LoanError::StockLedger(e))
            }
        }
    }

    /// Record a confirmed stock change. A loan that moved past `phase` since
    /// it was read keeps its newer state.
    async fn confirm(&self, loan: &Loan, phase: StockPhase) -> Result<(), LoanError> {
        if !self.loans.mark_applied(loan.id, phase).await? {
            info!(
                loan_id = %loan.id,
                phase = %phase,
                "Loan moved on before the stock change was recorded"
            );
        }
        Ok(())
    }

    /// Cancel a refused borrow. `false` when the loan moved on first.
    async fn compensate(&self, loan: &Loan, cause: &StockLedgerError) -> Result<bool, LoanError> {
        if !self.loans.cancel(loan.id).await? {
            info!(loan_id = %loan.id, "Loan moved on, not cancelled");
            return Ok(false);
        }
        let reason = match cause {
            StockLedgerError::InsufficientStock => "insufficient_stock",
            _ => "book_not_found",
        };
        COMPENSATIONS_TOTAL.with_label_values(&[reason]).inc();
        warn!(loan_id = %loan.id, reason = reason, "Borrow refused by catalog, loan cancelled");
        Ok(true)
    }

    /// Re-send the stock change `loan` was pending on when read, with the
    /// phase's original key.
    async fn settle(&self, ctx: &CallContext, loan: &Loan) -> Result<Settlement, LoanError> {
        let phase = loan.phase();
        match self
            .ledger
            .update_stock(ctx, &loan.book_id, phase.delta(), &phase.key(loan.id))
            .await
        {
            Ok(_) => {
                self.confirm(loan, phase).await?;
                Ok(Settlement::Applied)
            }
            Err(StockLedgerError::BookNotFound) if phase == StockPhase::Return => {
                self.confirm(loan, phase).await?;
                Ok(Settlement::Applied)
            }
            Err(e) if e.is_definitive() => Ok(if self.compensate(loan, &e).await? {
                Settlement::Cancelled
            } else {
                Settlement::Applied
            }),
            Err(e) => {
                warn!(loan_id = %loan.id, phase = %phase, error = %e, "Stock change still unconfirmed");
                Ok(Settlement::Pending)
            }
        }
    }

    /// Return a borrowed book. Only the borrower or an admin may return it.
    #[instrument(skip(self, ctx, caller), fields(caller = %caller.subject_id))]
    pub async fn return_book(
        &self,
        ctx: &CallContext,
        caller: &Identity,
        transaction_id: &str,
    ) -> Result<Loan, LoanError> {
        let result = self.return_inner(ctx, caller, transaction_id).await;
        LOAN_OPERATIONS_TOTAL
            .with_label_values(&["return", outcome_label(&result)])
            .inc();
        result
    }

    async fn return_inner(
        &self,
        ctx: &CallContext,
        caller: &Identity,
        transaction_id: &str,
    ) -> Result<Loan, LoanError> {
        if transaction_id.is_empty() {
            return Err(LoanError::InvalidInput(
                "transaction id is required".to_string(),
            ));
        }
        let id = Uuid::parse_str(transaction_id).map_err(|_| LoanError::TransactionNotFound)?;
        let loan = self
            .loans
            .get(id)
            .await?
            .ok_or(LoanError::TransactionNotFound)?;

        if !caller.may_act_for(&loan.user_id.to_string()) {
            return Err(LoanError::PermissionDenied);
        }
        if loan.is_returned() {
            return Err(LoanError::AlreadyReturned);
        }
        if loan.is_pending() {
            return Err(LoanError::BorrowPending);
        }

        let loan = self
            .loans
            .mark_returned(id)
            .await?
            .ok_or(LoanError::AlreadyReturned)?;

        match self
            .ledger
            .update_stock(ctx, &loan.book_id, 1, &StockPhase::Return.key(loan.id))
            .await
        {
            // A book removed from the catalog has no shelf to go back to.
            Ok(_) | Err(StockLedgerError::BookNotFound) => {
                self.confirm(&loan, StockPhase::Return).await?;
            }
            Err(e) => {
                warn!(
                    loan_id = %id,
                    error = %e,
                    "Stock increment unconfirmed, return left pending"
                );
                return Err(LoanError::StockLedger(e));
            }
        }

        info!(loan_id = %id, book_id = %loan.book_id, "Book returned");
        self.loans
            .get(id)
            .await?
            .ok_or(LoanError::TransactionNotFound)
    }

    #[instrument(skip(self))]
    pub async fn history(&self, user_id: &str) -> Result<Vec<Loan>, LoanError> {
        let user = parse_user_id(user_id)?;
        self.loans.list_by_user(user).await
    }

    /// Re-drive loans whose stock change never got confirmed, reusing the
    /// original idempotency keys so nothing is applied twice.
    #[instrument(skip(self, ctx))]
    pub async fn reconcile(
        &self,
        ctx: &CallContext,
        limit: i32,
    ) -> Result<ReconcileReport, LoanError> {
        let limit = if limit <= 0 {
            DEFAULT_RECONCILE_LIMIT
        } else {
            i64::from(limit).min(MAX_RECONCILE_LIMIT)
        };

        let mut report = ReconcileReport::default();
        for loan in self.loans.list_pending(limit).await? {
            report.examined += 1;
            match self.settle(ctx, &loan).await? {
                Settlement::Applied => report.applied += 1,
                Settlement::Cancelled => report.cancelled += 1,
                Settlement::Pending => report.still_pending += 1,
            }
        }

        LOAN_OPERATIONS_TOTAL
            .with_label_values(&["reconcile", "ok"])
            .inc();
        info!(
            examined = report.examined,
            applied = report.applied,
            cancelled = report.cancelled,
            still_pending = report.still_pending,
            "Reconciliation pass finished"
        );
        Ok(report)
    }

    /// Check the loan store. Never fails.
    pub async fn health(&self) -> HealthReport {
        HealthReport::new(vec![ComponentHealth::from_check(
            "database",
            self.loans.ping().await,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::InMemoryLoanStore;
    use crate::services::stock_ledger::InMemoryStockLedger;
    use service_core::identity::Role;

    struct Fixture {
        workflow: LoanWorkflow,
        loans: Arc<InMemoryLoanStore>,
        ledger: Arc<InMemoryStockLedger>,
    }

    fn fixture(stock: i32) -> Fixture {
        let loans = Arc::new(InMemoryLoanStore::new());
        let ledger = Arc::new(InMemoryStockLedger::new().with_book("b1", stock));
        Fixture {
            workflow: LoanWorkflow::new(loans.clone(), ledger.clone()),
            loans,
            ledger,
        }
    }

    fn ctx() -> CallContext {
        CallContext::default()
    }

    fn user(id: &str) -> Identity {
        Identity::new(id, Role::Operation)
    }

    #[test]
    fn test_parse_user_id() {
        assert!(matches!(parse_user_id(""), Err(LoanError::InvalidInput(_))));
        assert!(matches!(parse_user_id("abc"), Err(LoanError::InvalidInput(_))));
        assert_eq!(parse_user_id("42").unwrap(), 42);
    }

    #[tokio::test]
    async fn test_borrow_decrements_once() {
        let f = fixture(2);
        let loan = f.workflow.borrow(&ctx(), "1", "b1").await.unwrap();

        assert!(!loan.is_pending());
        assert_eq!(f.ledger.stock_of("b1"), Some(1));
        assert_eq!(f.loans.all().len(), 1);
    }

    #[tokio::test]
    async fn test_borrow_empty_shelf_leaves_no_loan() {
        let f = fixture(0);
        let err = f.workflow.borrow(&ctx(), "1", "b1").await.unwrap_err();

        assert!(matches!(err, LoanError::BookNotAvailable));
        assert!(f.loans.all().is_empty());
        assert_eq!(f.ledger.stock_of("b1"), Some(0));
    }

    #[tokio::test]
    async fn test_borrow_unknown_book() {
        let f = fixture(1);
        let err = f.workflow.borrow(&ctx(), "1", "nope").await.unwrap_err();
        assert!(matches!(err, LoanError::BookNotFound));
    }

    #[tokio::test]
    async fn test_refused_pending_borrow_is_cancelled() {
        let f = fixture(1);
        // A borrow recorded just before the last copy went elsewhere.
        let loan = f.loans.create(2, "b1").await.unwrap();
        f.ledger.set_stock("b1", 0);

        let report = f.workflow.reconcile(&ctx(), 0).await.unwrap();
        assert_eq!(report.cancelled, 1);
        assert!(f.loans.get(loan.id).await.unwrap().is_none());
        assert_eq!(f.ledger.stock_of("b1"), Some(0));
    }

    #[tokio::test]
    async fn test_return_twice() {
        let f = fixture(1);
        let loan = f.workflow.borrow(&ctx(), "1", "b1").await.unwrap();
        let id = loan.id.to_string();

        let returned = f.workflow.return_book(&ctx(), &user("1"), &id).await.unwrap();
        assert!(returned.is_returned());
        assert_eq!(f.ledger.stock_of("b1"), Some(1));

        let err = f
            .workflow
            .return_book(&ctx(), &user("1"), &id)
            .await
            .unwrap_err();
        assert!(matches!(err, LoanError::AlreadyReturned));
        assert_eq!(f.ledger.stock_of("b1"), Some(1));
    }

    #[tokio::test]
    async fn test_return_checks_ownership() {
        let f = fixture(1);
        let loan = f.workflow.borrow(&ctx(), "1", "b1").await.unwrap();
        let id = loan.id.to_string();

        let err = f
            .workflow
            .return_book(&ctx(), &user("2"), &id)
            .await
            .unwrap_err();
        assert!(matches!(err, LoanError::PermissionDenied));

        let admin = Identity::new("9", Role::Admin);
        assert!(f.workflow.return_book(&ctx(), &admin, &id).await.is_ok());
    }

    #[tokio::test]
    async fn test_return_unknown_transaction() {
        let f = fixture(1);
        let unknown = Uuid::new_v4().to_string();
        for id in ["nope", unknown.as_str()] {
            let err = f
                .workflow
                .return_book(&ctx(), &user("1"), id)
                .await
                .unwrap_err();
            assert!(matches!(err, LoanError::TransactionNotFound));
        }
    }

    #[tokio::test]
    async fn test_outage_leaves_pending_then_reconciles() {
        let f = fixture(1);
        f.ledger.set_unavailable(true);
        let loan = f.loans.create(1, "b1").await.unwrap();

        let report = f.workflow.reconcile(&ctx(), 10).await.unwrap();
        assert_eq!(report.still_pending, 1);
        assert_eq!(f.ledger.stock_of("b1"), Some(1));

        f.ledger.set_unavailable(false);
        let report = f.workflow.reconcile(&ctx(), 10).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(f.ledger.stock_of("b1"), Some(0));
        assert!(!f.loans.get(loan.id).await.unwrap().unwrap().is_pending());

        let report = f.workflow.reconcile(&ctx(), 10).await.unwrap();
        assert_eq!(report.examined, 0);
    }

    #[tokio::test]
    async fn test_pending_return_is_redriven_once() {
        let f = fixture(1);
        let loan = f.workflow.borrow(&ctx(), "1", "b1").await.unwrap();

        f.ledger.set_unavailable(true);
        let err = f
            .workflow
            .return_book(&ctx(), &user("1"), &loan.id.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, LoanError::StockLedger(StockLedgerError::Unavailable(_))));
        assert_eq!(f.ledger.stock_of("b1"), Some(0));

        f.ledger.set_unavailable(false);
        let report = f.workflow.reconcile(&ctx(), 10).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(f.ledger.stock_of("b1"), Some(1));

        f.workflow.reconcile(&ctx(), 10).await.unwrap();
        assert_eq!(f.ledger.stock_of("b1"), Some(1));
    }

    #[tokio::test]
    async fn test_stale_borrow_snapshot_does_not_close_a_pending_return() {
        let f = fixture(1);
        // Read by a reconcile pass while the borrow was still pending.
        let stale = f.loans.create(1, "b1").await.unwrap();

        f.ledger
            .update_stock(&ctx(), "b1", -1, &StockPhase::Borrow.key(stale.id))
            .await
            .unwrap();
        assert!(f.loans.mark_applied(stale.id, StockPhase::Borrow).await.unwrap());

        f.ledger.set_unavailable(true);
        f.workflow
            .return_book(&ctx(), &user("1"), &stale.id.to_string())
            .await
            .unwrap_err();
        f.ledger.set_unavailable(false);

        assert_eq!(
            f.workflow.settle(&ctx(), &stale).await.unwrap(),
            Settlement::Applied
        );
        let current = f.loans.get(stale.id).await.unwrap().unwrap();
        assert!(current.is_returned());
        assert!(current.is_pending());
        assert_eq!(f.ledger.stock_of("b1"), Some(0));

        let report = f.workflow.reconcile(&ctx(), 10).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(f.ledger.stock_of("b1"), Some(1));
        assert!(!f.loans.get(stale.id).await.unwrap().unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_stale_refusal_does_not_cancel_a_returned_loan() {
        let f = fixture(1);
        let stale = f.loans.create(1, "b1").await.unwrap();
        f.ledger
            .update_stock(&ctx(), "b1", -1, &StockPhase::Borrow.key(stale.id))
            .await
            .unwrap();
        f.loans.mark_applied(stale.id, StockPhase::Borrow).await.unwrap();
        f.loans.mark_returned(stale.id).await.unwrap();
        f.ledger.remove_book("b1");

        assert_eq!(
            f.workflow.settle(&ctx(), &stale).await.unwrap(),
            Settlement::Applied
        );
        assert!(f.loans.get(stale.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_return_of_unconfirmed_borrow_is_refused() {
        let f = fixture(1);
        let loan = f.loans.create(1, "b1").await.unwrap();
        let err = f
            .workflow
            .return_book(&ctx(), &user("1"), &loan.id.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, LoanError::BorrowPending));
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let f = fixture(5);
        let first = f.workflow.borrow(&ctx(), "1", "b1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = f.workflow.borrow(&ctx(), "1", "b1").await.unwrap();
        f.workflow.borrow(&ctx(), "2", "b1").await.unwrap();

        let history = f.workflow.history("1").await.unwrap();
        let ids: Vec<Uuid> = history.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }
}
