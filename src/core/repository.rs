//! Persistence abstractions for users, expenses and reports.
//!
//! Repositories only ever hand out live records: a soft-deleted record is reported as
//! [`RepositoryError::NotFound`] and is skipped by lookups and listings.

use crate::core::model::{
    Expense, ExpenseId, ExpenseQuery, ExpenseReport, NewExpense, ReportId, ReportQuery,
    ReportStatus, ReportTotal, User, UserId,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    #[error("Duplicate record: {0}")]
    Duplicate(String),
    /// The write would break a membership rule, e.g. one draft report per expense.
    #[error("Conflicting record: {0}")]
    Conflict(String),
    /// Something the caller read before the write changed in the meantime.
    #[error("Stale read: {0}")]
    Stale(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with [`RepositoryError::Duplicate`] if the email is already registered.
    async fn create(&self, name: &str, email: &str) -> RepositoryResult<User>;
    async fn get_by_id(&self, id: UserId) -> RepositoryResult<User>;
    async fn get_by_email(&self, email: &str) -> RepositoryResult<Option<User>>;
    async fn update(&self, user: &User) -> RepositoryResult<User>;
    async fn delete(&self, id: UserId) -> RepositoryResult<()>;
}

#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    async fn create(&self, owner: UserId, expense: &NewExpense) -> RepositoryResult<Expense>;
    async fn get_by_id(&self, id: ExpenseId) -> RepositoryResult<Expense>;
    /// Live expenses among `ids`; unknown ids are skipped.
    async fn get_by_ids(&self, ids: &[ExpenseId]) -> RepositoryResult<Vec<Expense>>;
    /// Live expenses among `ids` that belong to `owner`; anything else is skipped.
    async fn get_by_owner_and_ids(
        &self,
        owner: UserId,
        ids: &[ExpenseId],
    ) -> RepositoryResult<Vec<Expense>>;
    /// Newest first, with the total count of matches before paging.
    async fn list_by_owner(
        &self,
        owner: UserId,
        query: &ExpenseQuery,
        offset: usize,
        limit: usize,
    ) -> RepositoryResult<(Vec<Expense>, u64)>;
    /// Replaces the expense if the live reports referencing it are exactly `attached`
    /// and that report is still a draft. Fails with [`RepositoryError::Stale`] otherwise.
    async fn update(
        &self,
        expense: &Expense,
        attached: Option<ReportId>,
    ) -> RepositoryResult<Expense>;
    /// Fails with [`RepositoryError::Stale`] while a live report references the expense.
    async fn delete(&self, id: ExpenseId) -> RepositoryResult<()>;
}

#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn create(&self, owner: UserId, title: &str) -> RepositoryResult<ExpenseReport>;
    async fn get_by_id(&self, id: ReportId) -> RepositoryResult<ExpenseReport>;
    /// Newest first, with the total count of matches before paging.
    async fn list_by_owner(
        &self,
        owner: UserId,
        query: &ReportQuery,
        offset: usize,
        limit: usize,
    ) -> RepositoryResult<(Vec<ExpenseReport>, u64)>;
    async fn update(&self, report: &ExpenseReport) -> RepositoryResult<ExpenseReport>;
    async fn delete(&self, id: ReportId) -> RepositoryResult<()>;
    /// Adds `expense_ids` to the report and stores `total` in a single write.
    ///
    /// Fails with [`RepositoryError::Conflict`] if another live draft already holds one
    /// of the expenses, and with [`RepositoryError::Stale`] if any of `priced` was deleted
    /// or changed amount or currency since it was read. Nothing is written on failure.
    async fn associate_expenses(
        &self,
        id: ReportId,
        expense_ids: &[ExpenseId],
        priced: &[Expense],
        total: ReportTotal,
    ) -> RepositoryResult<ExpenseReport>;
    /// Removes `expense_ids` from the report and stores `total` in a single write.
    async fn dissociate_expenses(
        &self,
        id: ReportId,
        expense_ids: &[ExpenseId],
        total: ReportTotal,
    ) -> RepositoryResult<ExpenseReport>;
    async fn set_total(&self, id: ReportId, total: ReportTotal) -> RepositoryResult<ExpenseReport>;
    async fn set_status(&self, id: ReportId, status: ReportStatus)
    -> RepositoryResult<ExpenseReport>;
    /// Live reports, in any state, that reference at least one of `expense_ids`.
    async fn find_containing(
        &self,
        expense_ids: &[ExpenseId],
    ) -> RepositoryResult<Vec<ExpenseReport>>;
}
