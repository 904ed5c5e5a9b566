//! Repositories that keep JSON records in key-value collections.
//!
//! Records are keyed by their big-endian id so collection order is id order. Ids come
//! from per-entity counters in the `sequences` collection. Every read-modify-write runs
//! under one writer lock, which makes each repository call atomic within the process.

use crate::core::cache::{KeyValueCollection, Store};
use crate::core::model::{
    Expense, ExpenseId, ExpenseQuery, ExpenseReport, ExpenseStatus, NewExpense, ReportId,
    ReportQuery, ReportStatus, ReportTotal, User, UserId,
};
use crate::core::repository::{
    ExpenseRepository, RepositoryError, RepositoryResult, ReportRepository, UserRepository,
};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

trait Record: Serialize + DeserializeOwned + Send + Sync {
    const ENTITY: &'static str;

    fn id(&self) -> u64;
    fn owner(&self) -> u64;
    fn created_at(&self) -> DateTime<Utc>;
    fn is_deleted(&self) -> bool;
    fn mark_deleted(&mut self, at: DateTime<Utc>);
    fn touch(&mut self, at: DateTime<Utc>);
}

macro_rules! impl_record {
    ($ty:ty, $entity:literal, $owner:ident) => {
        impl Record for $ty {
            const ENTITY: &'static str = $entity;

            fn id(&self) -> u64 {
                self.id
            }

            fn owner(&self) -> u64 {
                self.$owner
            }

            fn created_at(&self) -> DateTime<Utc> {
                self.created_at
            }

            fn is_deleted(&self) -> bool {
                self.deleted_at.is_some()
            }

            fn mark_deleted(&mut self, at: DateTime<Utc>) {
                self.deleted_at = Some(at);
                self.updated_at = at;
            }

            fn touch(&mut self, at: DateTime<Utc>) {
                self.updated_at = at;
            }
        }
    };
}

impl_record!(User, "user", id);
impl_record!(Expense, "expense", user_id);
impl_record!(ExpenseReport, "expense report", user_id);

fn record_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn not_found<T: Record>(id: u64) -> RepositoryError {
    RepositoryError::NotFound {
        entity: T::ENTITY,
        id,
    }
}

/// Newest first; ids break ties between records created in the same instant.
fn newest_first<T: Record>(records: &mut [T]) {
    records.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then_with(|| b.id().cmp(&a.id()))
    });
}

fn paginate<T>(records: Vec<T>, offset: usize, limit: usize) -> (Vec<T>, u64) {
    let total = records.len() as u64;
    let items = records.into_iter().skip(offset).take(limit).collect();
    (items, total)
}

pub struct StoreRepository {
    users: Arc<dyn KeyValueCollection>,
    expenses: Arc<dyn KeyValueCollection>,
    reports: Arc<dyn KeyValueCollection>,
    sequences: Arc<dyn KeyValueCollection>,
    write_lock: Mutex<()>,
}

impl StoreRepository {
    pub fn new(store: &dyn Store, persist: bool) -> anyhow::Result<Self> {
        Ok(Self {
            users: store.get_collection("users", persist)?,
            expenses: store.get_collection("expenses", persist)?,
            reports: store.get_collection("reports", persist)?,
            sequences: store.get_collection("sequences", persist)?,
            write_lock: Mutex::new(()),
        })
    }

    /// Allocates the next id for `sequence`. Callers must hold the writer lock.
    async fn next_id(&self, sequence: &str) -> RepositoryResult<u64> {
        let current = match self.sequences.get(sequence.as_bytes()).await? {
            Some(raw) => u64::from_be_bytes(
                <[u8; 8]>::try_from(raw.as_slice())
                    .map_err(|_| anyhow!("Corrupt id sequence: {sequence}"))?,
            ),
            None => 0,
        };
        let next = current + 1;
        self.sequences
            .put(sequence.as_bytes(), &next.to_be_bytes(), None)
            .await?;
        Ok(next)
    }

    async fn load<T: Record>(collection: &dyn KeyValueCollection, id: u64) -> RepositoryResult<T> {
        let raw = collection
            .get(&record_key(id))
            .await?
            .ok_or_else(|| not_found::<T>(id))?;
        let record: T = serde_json::from_slice(&raw)
            .with_context(|| format!("Corrupt {} record {id}", T::ENTITY))?;
        if record.is_deleted() {
            return Err(not_found::<T>(id));
        }
        Ok(record)
    }

    async fn save<T: Record>(collection: &dyn KeyValueCollection, record: &T) -> RepositoryResult<()> {
        let raw = serde_json::to_vec(record)
            .with_context(|| format!("Failed to encode {} record {}", T::ENTITY, record.id()))?;
        collection.put(&record_key(record.id()), &raw, None).await?;
        debug!("Saved {} {}", T::ENTITY, record.id());
        Ok(())
    }

    /// All live records in id order.
    async fn scan<T: Record>(collection: &dyn KeyValueCollection) -> RepositoryResult<Vec<T>> {
        let mut records = Vec::new();
        for (key, raw) in collection.entries().await? {
            let record: T = serde_json::from_slice(&raw).with_context(|| {
                format!("Corrupt {} record under key {:?}", T::ENTITY, key)
            })?;
            if !record.is_deleted() {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Replaces a live record, keeping its creation time.
    async fn replace<T: Record>(
        collection: &dyn KeyValueCollection,
        record: &T,
    ) -> RepositoryResult<T>
    where
        T: Clone,
    {
        Self::load::<T>(collection, record.id()).await?;
        let mut updated = record.clone();
        updated.touch(Utc::now());
        Self::save(collection, &updated).await?;
        Ok(updated)
    }

    async fn soft_delete<T: Record>(collection: &dyn KeyValueCollection, id: u64) -> RepositoryResult<()> {
        let mut record = Self::load::<T>(collection, id).await?;
        record.mark_deleted(Utc::now());
        Self::save(collection, &record).await
    }

    /// Applies `change` to a live report. Callers must hold the writer lock.
    async fn write_report(
        &self,
        id: ReportId,
        change: impl FnOnce(&mut ExpenseReport) + Send,
    ) -> RepositoryResult<ExpenseReport> {
        let mut report = Self::load::<ExpenseReport>(self.reports.as_ref(), id).await?;
        change(&mut report);
        report.touch(Utc::now());
        Self::save(self.reports.as_ref(), &report).await?;
        Ok(report)
    }

    async fn modify_report(
        &self,
        id: ReportId,
        change: impl FnOnce(&mut ExpenseReport) + Send,
    ) -> RepositoryResult<ExpenseReport> {
        let _guard = self.write_lock.lock().await;
        self.write_report(id, change).await
    }

    async fn containing(&self, expense_ids: &[ExpenseId]) -> RepositoryResult<Vec<ExpenseReport>> {
        Ok(Self::scan::<ExpenseReport>(self.reports.as_ref())
            .await?
            .into_iter()
            .filter(|r| expense_ids.iter().any(|id| r.expense_ids.contains(id)))
            .collect())
    }

    /// Checks the live reports referencing `expense` are exactly `attached`, a draft.
    /// Callers must hold the writer lock.
    async fn check_attachment(
        &self,
        expense: ExpenseId,
        attached: Option<ReportId>,
    ) -> RepositoryResult<()> {
        let containing = self.containing(&[expense]).await?;
        let matches = match (attached, containing.as_slice()) {
            (None, []) => true,
            (Some(id), [report]) => report.id == id && report.is_draft(),
            _ => false,
        };
        if !matches {
            let held_by: Vec<String> = containing
                .iter()
                .map(|r| format!("{} ({})", r.id, r.status))
                .collect();
            return Err(RepositoryError::Stale(format!(
                "expense {expense} is now referenced by report(s) [{}]",
                held_by.join(", ")
            )));
        }
        Ok(())
    }

    /// Checks every snapshot still matches the live expense in amount and currency.
    /// Callers must hold the writer lock.
    async fn check_priced(&self, priced: &[Expense]) -> RepositoryResult<()> {
        for snapshot in priced {
            match Self::load::<Expense>(self.expenses.as_ref(), snapshot.id).await {
                Ok(current)
                    if current.amount == snapshot.amount
                        && current.currency == snapshot.currency => {}
                Ok(_) | Err(RepositoryError::NotFound { .. }) => {
                    return Err(RepositoryError::Stale(format!(
                        "expense {} changed after it was priced",
                        snapshot.id
                    )));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for StoreRepository {
    async fn create(&self, name: &str, email: &str) -> RepositoryResult<User> {
        let _guard = self.write_lock.lock().await;
        let email = email.trim().to_lowercase();
        let existing = Self::scan::<User>(self.users.as_ref()).await?;
        if existing.iter().any(|u| u.email == email) {
            return Err(RepositoryError::Duplicate(format!(
                "user with email {email} already exists"
            )));
        }

        let now = Utc::now();
        let user = User {
            id: self.next_id("users").await?,
            name: name.to_string(),
            email,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        Self::save(self.users.as_ref(), &user).await?;
        Ok(user)
    }

    async fn get_by_id(&self, id: UserId) -> RepositoryResult<User> {
        Self::load(self.users.as_ref(), id).await
    }

    async fn get_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        let email = email.trim().to_lowercase();
        Ok(Self::scan::<User>(self.users.as_ref())
            .await?
            .into_iter()
            .find(|u| u.email == email))
    }

    async fn update(&self, user: &User) -> RepositoryResult<User> {
        let _guard = self.write_lock.lock().await;
        Self::replace(self.users.as_ref(), user).await
    }

    async fn delete(&self, id: UserId) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock().await;
        Self::soft_delete::<User>(self.users.as_ref(), id).await
    }
}

#[async_trait]
impl ExpenseRepository for StoreRepository {
    async fn create(&self, owner: UserId, expense: &NewExpense) -> RepositoryResult<Expense> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let expense = Expense {
            id: self.next_id("expenses").await?,
            user_id: owner,
            amount: expense.amount,
            currency: expense.currency.clone(),
            category: expense.category,
            status: ExpenseStatus::Pending,
            description: expense.description.clone(),
            receipt: expense.receipt.clone(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        Self::save(self.expenses.as_ref(), &expense).await?;
        Ok(expense)
    }

    async fn get_by_id(&self, id: ExpenseId) -> RepositoryResult<Expense> {
        Self::load(self.expenses.as_ref(), id).await
    }

    async fn get_by_ids(&self, ids: &[ExpenseId]) -> RepositoryResult<Vec<Expense>> {
        let mut expenses = Vec::with_capacity(ids.len());
        for id in ids.iter().collect::<BTreeSet<_>>() {
            match Self::load::<Expense>(self.expenses.as_ref(), *id).await {
                Ok(expense) => expenses.push(expense),
                Err(RepositoryError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(expenses)
    }

    async fn get_by_owner_and_ids(
        &self,
        owner: UserId,
        ids: &[ExpenseId],
    ) -> RepositoryResult<Vec<Expense>> {
        Ok(self
            .get_by_ids(ids)
            .await?
            .into_iter()
            .filter(|e| e.user_id == owner)
            .collect())
    }

    async fn list_by_owner(
        &self,
        owner: UserId,
        query: &ExpenseQuery,
        offset: usize,
        limit: usize,
    ) -> RepositoryResult<(Vec<Expense>, u64)> {
        let mut expenses: Vec<Expense> = Self::scan::<Expense>(self.expenses.as_ref())
            .await?
            .into_iter()
            .filter(|e| e.owner() == owner)
            .filter(|e| query.category.is_none_or(|c| e.category == c))
            .filter(|e| query.status.is_none_or(|s| e.status == s))
            .collect();
        newest_first(&mut expenses);
        Ok(paginate(expenses, offset, limit))
    }

    async fn update(
        &self,
        expense: &Expense,
        attached: Option<ReportId>,
    ) -> RepositoryResult<Expense> {
        let _guard = self.write_lock.lock().await;
        self.check_attachment(expense.id, attached).await?;
        Self::replace(self.expenses.as_ref(), expense).await
    }

    async fn delete(&self, id: ExpenseId) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock().await;
        self.check_attachment(id, None).await?;
        Self::soft_delete::<Expense>(self.expenses.as_ref(), id).await
    }
}

#[async_trait]
impl ReportRepository for StoreRepository {
    async fn create(&self, owner: UserId, title: &str) -> RepositoryResult<ExpenseReport> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let report = ExpenseReport {
            id: self.next_id("reports").await?,
            user_id: owner,
            title: title.to_string(),
            status: ReportStatus::Draft,
            total: 0.0,
            approximate: false,
            expense_ids: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        Self::save(self.reports.as_ref(), &report).await?;
        Ok(report)
    }

    async fn get_by_id(&self, id: ReportId) -> RepositoryResult<ExpenseReport> {
        Self::load(self.reports.as_ref(), id).await
    }

    async fn list_by_owner(
        &self,
        owner: UserId,
        query: &ReportQuery,
        offset: usize,
        limit: usize,
    ) -> RepositoryResult<(Vec<ExpenseReport>, u64)> {
        let mut reports: Vec<ExpenseReport> = Self::scan::<ExpenseReport>(self.reports.as_ref())
            .await?
            .into_iter()
            .filter(|r| r.owner() == owner)
            .filter(|r| query.status.is_none_or(|s| r.status == s))
            .collect();
        newest_first(&mut reports);
        Ok(paginate(reports, offset, limit))
    }

    async fn update(&self, report: &ExpenseReport) -> RepositoryResult<ExpenseReport> {
        let _guard = self.write_lock.lock().await;
        Self::replace(self.reports.as_ref(), report).await
    }

    async fn delete(&self, id: ReportId) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock().await;
        Self::soft_delete::<ExpenseReport>(self.reports.as_ref(), id).await
    }

    async fn associate_expenses(
        &self,
        id: ReportId,
        expense_ids: &[ExpenseId],
        priced: &[Expense],
        total: ReportTotal,
    ) -> RepositoryResult<ExpenseReport> {
        let _guard = self.write_lock.lock().await;
        if let Some(other) = self
            .containing(expense_ids)
            .await?
            .into_iter()
            .find(|r| r.id != id && r.is_draft())
        {
            return Err(RepositoryError::Conflict(format!(
                "expense already attached to draft report {}",
                other.id
            )));
        }
        self.check_priced(priced).await?;
        self.write_report(id, |report| {
            report.expense_ids.extend(expense_ids.iter().copied());
            report.total = total.total;
            report.approximate = total.approximate;
        })
        .await
    }

    async fn dissociate_expenses(
        &self,
        id: ReportId,
        expense_ids: &[ExpenseId],
        total: ReportTotal,
    ) -> RepositoryResult<ExpenseReport> {
        self.modify_report(id, |report| {
            for expense_id in expense_ids {
                report.expense_ids.remove(expense_id);
            }
            report.total = total.total;
            report.approximate = total.approximate;
        })
        .await
    }

    async fn set_total(&self, id: ReportId, total: ReportTotal) -> RepositoryResult<ExpenseReport> {
        self.modify_report(id, |report| {
            report.total = total.total;
            report.approximate = total.approximate;
        })
        .await
    }

    async fn set_status(
        &self,
        id: ReportId,
        status: ReportStatus,
    ) -> RepositoryResult<ExpenseReport> {
        self.modify_report(id, |report| report.status = status).await
    }

    async fn find_containing(
        &self,
        expense_ids: &[ExpenseId],
    ) -> RepositoryResult<Vec<ExpenseReport>> {
        self.containing(expense_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ExpenseCategory;
    use crate::store::KeyValueStore;

    fn repository() -> StoreRepository {
        StoreRepository::new(&KeyValueStore::in_memory(), false).unwrap()
    }

    fn new_expense(amount: f64, currency: &str, category: ExpenseCategory) -> NewExpense {
        NewExpense {
            amount,
            currency: currency.to_string(),
            category,
            description: String::new(),
            receipt: String::new(),
        }
    }

    #[tokio::test]
    async fn test_user_create_and_duplicate_email() {
        let repo = repository();
        let user = UserRepository::create(&repo, "Ada", "Ada@Example.com")
            .await
            .unwrap();
        assert_eq!(user.id, 1);
        assert_eq!(user.email, "ada@example.com");

        let err = UserRepository::create(&repo, "Ada Two", "ada@example.com ")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(_)));

        let found = repo.get_by_email("ADA@example.com").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(1));
    }

    #[tokio::test]
    async fn test_soft_deleted_records_are_not_found() {
        let repo = repository();
        let expense = ExpenseRepository::create(
            &repo,
            1,
            &new_expense(10.0, "USD", ExpenseCategory::Meals),
        )
        .await
        .unwrap();

        ExpenseRepository::delete(&repo, expense.id).await.unwrap();

        let err = ExpenseRepository::get_by_id(&repo, expense.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::NotFound {
                entity: "expense",
                ..
            }
        ));
        assert!(repo.get_by_ids(&[expense.id]).await.unwrap().is_empty());
        let (items, total) = ExpenseRepository::list_by_owner(
            &repo,
            1,
            &ExpenseQuery::default(),
            0,
            10,
        )
        .await
        .unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_owner_scoped_lookup_skips_foreign_and_unknown_ids() {
        let repo = repository();
        let mine = ExpenseRepository::create(
            &repo,
            1,
            &new_expense(10.0, "USD", ExpenseCategory::Meals),
        )
        .await
        .unwrap();
        let theirs = ExpenseRepository::create(
            &repo,
            2,
            &new_expense(20.0, "USD", ExpenseCategory::Travel),
        )
        .await
        .unwrap();

        let found = repo
            .get_by_owner_and_ids(1, &[mine.id, theirs.id, 99])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, mine.id);
    }

    #[tokio::test]
    async fn test_expense_listing_filters_and_pages() {
        let repo = repository();
        for i in 0..5 {
            let category = if i % 2 == 0 {
                ExpenseCategory::Travel
            } else {
                ExpenseCategory::Meals
            };
            ExpenseRepository::create(&repo, 1, &new_expense(10.0 + i as f64, "USD", category))
                .await
                .unwrap();
        }

        let query = ExpenseQuery {
            category: Some(ExpenseCategory::Travel),
            status: None,
        };
        let (items, total) = ExpenseRepository::list_by_owner(&repo, 1, &query, 0, 2)
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(items.len(), 2);
        // Newest first
        assert_eq!(items[0].id, 5);
        assert_eq!(items[1].id, 3);

        let (items, _) = ExpenseRepository::list_by_owner(&repo, 1, &query, 2, 2)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, 1);
    }

    fn total(total: f64, approximate: bool) -> ReportTotal {
        ReportTotal { total, approximate }
    }

    #[tokio::test]
    async fn test_report_association_and_lookup() {
        let repo = repository();
        let report = ReportRepository::create(&repo, 1, "Q1 Travel").await.unwrap();
        assert_eq!(report.status, ReportStatus::Draft);
        assert_eq!(report.total, 0.0);

        let report = repo
            .associate_expenses(report.id, &[3, 1, 3], &[], total(30.0, false))
            .await
            .unwrap();
        assert_eq!(report.expense_ids.iter().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(report.total, 30.0);

        let containing = repo.find_containing(&[3, 42]).await.unwrap();
        assert_eq!(containing.len(), 1);
        assert_eq!(containing[0].id, report.id);

        let report = repo
            .dissociate_expenses(report.id, &[3], total(10.0, true))
            .await
            .unwrap();
        assert_eq!(report.expense_ids.iter().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(report.total, 10.0);
        assert!(report.approximate);
        assert!(repo.find_containing(&[3]).await.unwrap().is_empty());

        let report = repo.set_total(report.id, total(42.5, true)).await.unwrap();
        assert_eq!(report.total, 42.5);
        assert!(report.approximate);

        let report = repo
            .set_status(report.id, ReportStatus::Submitted)
            .await
            .unwrap();
        let stored = ReportRepository::get_by_id(&repo, report.id).await.unwrap();
        assert_eq!(stored.status, ReportStatus::Submitted);
        assert_eq!(stored.total, 42.5);
    }

    #[tokio::test]
    async fn test_second_draft_cannot_take_an_attached_expense() {
        let repo = repository();
        let first = ReportRepository::create(&repo, 1, "First").await.unwrap();
        let second = ReportRepository::create(&repo, 1, "Second").await.unwrap();
        repo.associate_expenses(first.id, &[7], &[], total(7.0, false))
            .await
            .unwrap();

        let err = repo
            .associate_expenses(second.id, &[7, 8], &[], total(15.0, false))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        // Neither the membership nor the total of the rejected report moved
        let stored = ReportRepository::get_by_id(&repo, second.id).await.unwrap();
        assert!(stored.expense_ids.is_empty());
        assert_eq!(stored.total, 0.0);

        // A submitted report does not hold the expense back
        repo.set_status(first.id, ReportStatus::Submitted)
            .await
            .unwrap();
        repo.associate_expenses(second.id, &[7], &[], total(7.0, false))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_association_rejects_repriced_expense() {
        let repo = repository();
        let report = ReportRepository::create(&repo, 1, "Q1 Travel").await.unwrap();
        let priced = ExpenseRepository::create(
            &repo,
            1,
            &new_expense(50.0, "EUR", ExpenseCategory::Meals),
        )
        .await
        .unwrap();

        let mut changed = priced.clone();
        changed.amount = 100.0;
        ExpenseRepository::update(&repo, &changed, None).await.unwrap();

        let err = repo
            .associate_expenses(report.id, &[priced.id], &[priced.clone()], total(55.0, false))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Stale(_)));
        let stored = ReportRepository::get_by_id(&repo, report.id).await.unwrap();
        assert!(stored.expense_ids.is_empty());
        assert_eq!(stored.total, 0.0);

        // A description edit keeps the price valid
        let mut described = changed.clone();
        described.description = "Dinner".to_string();
        ExpenseRepository::update(&repo, &described, None).await.unwrap();
        repo.associate_expenses(report.id, &[priced.id], &[changed], total(110.0, false))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expense_writes_check_report_membership() {
        let repo = repository();
        let expense = ExpenseRepository::create(
            &repo,
            1,
            &new_expense(10.0, "USD", ExpenseCategory::Travel),
        )
        .await
        .unwrap();
        let report = ReportRepository::create(&repo, 1, "Q1 Travel").await.unwrap();
        repo.associate_expenses(report.id, &[expense.id], &[], total(10.0, false))
            .await
            .unwrap();

        // Written as if unattached, but a draft picked it up meanwhile
        let err = ExpenseRepository::update(&repo, &expense, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Stale(_)));
        let err = ExpenseRepository::delete(&repo, expense.id)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Stale(_)));

        ExpenseRepository::update(&repo, &expense, Some(report.id))
            .await
            .unwrap();

        // The draft was submitted meanwhile
        repo.set_status(report.id, ReportStatus::Submitted)
            .await
            .unwrap();
        let err = ExpenseRepository::update(&repo, &expense, Some(report.id))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Stale(_)));
    }

    #[tokio::test]
    async fn test_report_mutations_on_missing_report_fail() {
        let repo = repository();
        let err = repo
            .associate_expenses(9, &[1], &[], total(1.0, false))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { id: 9, .. }));
        let err = repo.set_total(9, total(1.0, false)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { id: 9, .. }));
    }

    #[tokio::test]
    async fn test_ids_are_allocated_per_entity() {
        let repo = repository();
        let user = UserRepository::create(&repo, "Ada", "ada@example.com")
            .await
            .unwrap();
        let report = ReportRepository::create(&repo, user.id, "First").await.unwrap();
        let second = ReportRepository::create(&repo, user.id, "Second").await.unwrap();
        assert_eq!(user.id, 1);
        assert_eq!(report.id, 1);
        assert_eq!(second.id, 2);
    }
}
