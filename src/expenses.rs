//! Expense records and the rules that keep report totals consistent with them.
//!
//! An expense attached to a submitted or approved report is frozen. Changing the amount
//! or currency of one attached to a draft report recomputes that draft under its lock.
//! Expense writes name the report they expect to hold the expense, and the repository
//! refuses them if that changed, so they cannot slip past a concurrent `add_expenses`.

use crate::core::currency::{SUPPORTED_CURRENCIES, is_supported, normalize_code};
use crate::core::error::{ServiceError, ServiceResult};
use crate::core::model::{
    Expense, ExpenseId, ExpenseQuery, ExpenseUpdate, NewExpense, Page, Pagination, UserId,
};
use crate::core::repository::{
    ExpenseRepository, RepositoryError, ReportRepository, UserRepository,
};
use crate::entity_cache::{EntityCache, keys};
use crate::reports::{MEMBERSHIP_ATTEMPTS, ReportLifecycle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub const MAX_TEXT_LEN: usize = 500;

fn validate_amount(amount: f64) -> ServiceResult<f64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ServiceError::invalid_argument(format!(
            "amount must be greater than zero, got {amount}"
        )));
    }
    Ok(amount)
}

fn validate_currency(code: &str) -> ServiceResult<String> {
    if !is_supported(code) {
        return Err(ServiceError::invalid_argument(format!(
            "unsupported currency {:?}, expected one of {}",
            code,
            SUPPORTED_CURRENCIES.join(", ")
        )));
    }
    Ok(normalize_code(code))
}

fn validate_text(field: &str, value: &str) -> ServiceResult<String> {
    if value.chars().count() > MAX_TEXT_LEN {
        return Err(ServiceError::invalid_argument(format!(
            "{field} must be at most {MAX_TEXT_LEN} characters"
        )));
    }
    Ok(value.to_string())
}

fn list_entry(query: &ExpenseQuery, page: &Pagination) -> String {
    format!(
        "category={};status={};page={};per_page={}",
        query.category.map(|c| c.to_string()).unwrap_or_default(),
        query.status.map(|s| s.to_string()).unwrap_or_default(),
        page.page,
        page.per_page
    )
}

pub struct ExpenseService {
    expenses: Arc<dyn ExpenseRepository>,
    reports: Arc<dyn ReportRepository>,
    users: Arc<dyn UserRepository>,
    lifecycle: Arc<ReportLifecycle>,
    cache: Arc<EntityCache>,
    list_ttl: Duration,
}

impl ExpenseService {
    pub fn new(
        expenses: Arc<dyn ExpenseRepository>,
        reports: Arc<dyn ReportRepository>,
        users: Arc<dyn UserRepository>,
        lifecycle: Arc<ReportLifecycle>,
        cache: Arc<EntityCache>,
        list_ttl: Duration,
    ) -> Self {
        Self {
            expenses,
            reports,
            users,
            lifecycle,
            cache,
            list_ttl,
        }
    }

    async fn load_owned(&self, id: ExpenseId, acting_user: UserId) -> ServiceResult<Expense> {
        let expense = self.expenses.get_by_id(id).await?;
        if expense.user_id != acting_user {
            return Err(ServiceError::forbidden(format!(
                "user {acting_user} does not own expense {id}"
            )));
        }
        Ok(expense)
    }

    async fn invalidate_list(&self, owner: UserId) -> ServiceResult<()> {
        self.cache.invalidate(&[keys::expenses_by_owner(owner)]).await
    }

    pub async fn create_expense(&self, owner: UserId, expense: &NewExpense) -> ServiceResult<Expense> {
        self.users.get_by_id(owner).await?;
        let expense = NewExpense {
            amount: validate_amount(expense.amount)?,
            currency: validate_currency(&expense.currency)?,
            category: expense.category,
            description: validate_text("description", &expense.description)?,
            receipt: validate_text("receipt", &expense.receipt)?,
        };

        let created = self.expenses.create(owner, &expense).await?;
        self.invalidate_list(owner).await?;
        info!(
            "Created expense {} ({} {}) for user {}",
            created.id, created.amount, created.currency, owner
        );
        Ok(created)
    }

    pub async fn get_expense(&self, id: ExpenseId) -> ServiceResult<Expense> {
        Ok(self.expenses.get_by_id(id).await?)
    }

    pub async fn list_expenses(
        &self,
        owner: UserId,
        query: &ExpenseQuery,
        page: Pagination,
    ) -> ServiceResult<Page<Expense>> {
        let page = page.clamped();
        self.cache
            .get_or_load_entry(
                &keys::expenses_by_owner(owner),
                &list_entry(query, &page),
                self.list_ttl,
                || async {
                    let (items, total) = self
                        .expenses
                        .list_by_owner(owner, query, page.offset(), page.per_page as usize)
                        .await?;
                    Ok(Page {
                        items,
                        page: page.page,
                        per_page: page.per_page,
                        total,
                    })
                },
            )
            .await
    }

    #[instrument(skip(self, update))]
    pub async fn update_expense(
        &self,
        id: ExpenseId,
        acting_user: UserId,
        update: &ExpenseUpdate,
    ) -> ServiceResult<Expense> {
        let mut expense = self.load_owned(id, acting_user).await?;

        if let Some(amount) = update.amount {
            expense.amount = validate_amount(amount)?;
        }
        if let Some(currency) = &update.currency {
            expense.currency = validate_currency(currency)?;
        }
        if let Some(category) = update.category {
            expense.category = category;
        }
        if let Some(description) = &update.description {
            expense.description = validate_text("description", description)?;
        }
        if let Some(receipt) = &update.receipt {
            expense.receipt = validate_text("receipt", receipt)?;
        }
        if let Some(status) = update.status {
            expense.status = status;
        }

        let mut attempt = 1;
        loop {
            let containing = self.reports.find_containing(&[id]).await?;
            if let Some(frozen) = containing.iter().find(|r| !r.is_draft()) {
                return Err(ServiceError::invalid_state(format!(
                    "expense {id} belongs to {} report {}",
                    frozen.status, frozen.id
                )));
            }
            let draft = containing.first().map(|r| r.id);

            let guard = match draft {
                Some(draft) if update.affects_total() => {
                    Some(self.lifecycle.lock_report(draft).await)
                }
                _ => None,
            };
            match self.expenses.update(&expense, draft).await {
                Ok(updated) => {
                    self.invalidate_list(acting_user).await?;
                    if let (Some(draft), Some(_)) = (draft, &guard) {
                        self.lifecycle.recompute_locked(draft).await?;
                        info!("Recomputed report {} after updating expense {}", draft, id);
                    }
                    return Ok(updated);
                }
                Err(RepositoryError::Stale(reason)) if attempt < MEMBERSHIP_ATTEMPTS => {
                    debug!("Retrying update of expense {}: {}", id, reason);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Soft-deletes an expense that no live report references.
    #[instrument(skip(self))]
    pub async fn delete_expense(&self, id: ExpenseId, acting_user: UserId) -> ServiceResult<()> {
        self.load_owned(id, acting_user).await?;
        if let Some(report) = self.reports.find_containing(&[id]).await?.first() {
            return Err(ServiceError::invalid_state(format!(
                "expense {id} is attached to report {}",
                report.id
            )));
        }
        match self.expenses.delete(id).await {
            Ok(()) => {}
            Err(RepositoryError::Stale(reason)) => {
                return Err(ServiceError::invalid_state(format!(
                    "cannot delete expense {id}: {reason}"
                )));
            }
            Err(e) => return Err(e.into()),
        }
        self.invalidate_list(acting_user).await?;
        info!("Deleted expense {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::KeyValueCollection;
    use crate::core::config::ConversionFallback;
    use crate::core::currency::CurrencyRateProvider;
    use crate::core::model::{ExpenseCategory, ExpenseStatus, ReportStatus};
    use crate::normalizer::CurrencyNormalizer;
    use crate::reports::ReportSettings;
    use crate::store::KeyValueStore;
    use crate::store::memory::MemoryCollection;
    use crate::store::repository::StoreRepository;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct EurToUsd {
        armed: AtomicBool,
        parked: Notify,
        release: Notify,
    }

    impl EurToUsd {
        /// Holds the next lookup until `release` is notified.
        fn park_next(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CurrencyRateProvider for EurToUsd {
        async fn get_rate(&self, from: &str, to: &str) -> Result<f64> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.parked.notify_one();
                self.release.notified().await;
            }
            match (from, to) {
                ("EUR", "USD") => Ok(1.1),
                _ => Err(anyhow!("no rate for {from}->{to}")),
            }
        }
    }

    struct Fixture {
        expenses: ExpenseService,
        lifecycle: Arc<ReportLifecycle>,
        rates: Arc<EurToUsd>,
        cache: Arc<MemoryCollection>,
        owner: UserId,
        other: UserId,
    }

    async fn fixture() -> Fixture {
        let repo = Arc::new(StoreRepository::new(&KeyValueStore::in_memory(), false).unwrap());
        let cache = Arc::new(MemoryCollection::new());
        let entity_cache = Arc::new(EntityCache::new(cache.clone()));
        let rates = Arc::new(EurToUsd::default());
        let lifecycle = Arc::new(ReportLifecycle::new(
            repo.clone(),
            repo.clone(),
            repo.clone(),
            Arc::new(CurrencyNormalizer::new(rates.clone())),
            entity_cache.clone(),
            ReportSettings {
                currency: "USD".to_string(),
                fallback: ConversionFallback::OriginalAmount,
                report_ttl: Duration::from_secs(1800),
                list_ttl: Duration::from_secs(300),
            },
        ));
        let expenses = ExpenseService::new(
            repo.clone(),
            repo.clone(),
            repo.clone(),
            lifecycle.clone(),
            entity_cache,
            Duration::from_secs(300),
        );
        let owner = UserRepository::create(repo.as_ref(), "Owner", "owner@example.com")
            .await
            .unwrap()
            .id;
        let other = UserRepository::create(repo.as_ref(), "Other", "other@example.com")
            .await
            .unwrap()
            .id;
        Fixture {
            expenses,
            lifecycle,
            rates,
            cache,
            owner,
            other,
        }
    }

    fn new_expense(amount: f64, currency: &str) -> NewExpense {
        NewExpense {
            amount,
            currency: currency.to_string(),
            category: ExpenseCategory::Travel,
            description: "Taxi".to_string(),
            receipt: String::new(),
        }
    }

    #[tokio::test]
    async fn test_create_expense_validation() {
        let f = fixture().await;
        let expense = f
            .expenses
            .create_expense(f.owner, &new_expense(12.5, " eur"))
            .await
            .unwrap();
        assert_eq!(expense.currency, "EUR");
        assert_eq!(expense.status, ExpenseStatus::Pending);

        for bad in [
            new_expense(0.0, "USD"),
            new_expense(-1.0, "USD"),
            new_expense(f64::NAN, "USD"),
            new_expense(1.0, "XYZ"),
        ] {
            let err = f.expenses.create_expense(f.owner, &bad).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidArgument(_)));
        }

        let mut long = new_expense(1.0, "USD");
        long.description = "x".repeat(MAX_TEXT_LEN + 1);
        assert!(f.expenses.create_expense(f.owner, &long).await.is_err());

        let err = f
            .expenses
            .create_expense(404, &new_expense(1.0, "USD"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_expenses_is_invalidated_by_create() {
        let f = fixture().await;
        f.expenses
            .create_expense(f.owner, &new_expense(10.0, "USD"))
            .await
            .unwrap();

        let page = f
            .expenses
            .list_expenses(f.owner, &ExpenseQuery::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert!(f.cache.get(b"expenses:user:1").await.unwrap().is_some());

        f.expenses
            .create_expense(f.owner, &new_expense(20.0, "USD"))
            .await
            .unwrap();
        assert!(f.cache.get(b"expenses:user:1").await.unwrap().is_none());

        let page = f
            .expenses
            .list_expenses(f.owner, &ExpenseQuery::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        let meals = ExpenseQuery {
            category: Some(ExpenseCategory::Meals),
            status: None,
        };
        let page = f
            .expenses
            .list_expenses(f.owner, &meals, Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_update_expense_in_draft_recomputes_total() {
        let f = fixture().await;
        let expense = f
            .expenses
            .create_expense(f.owner, &new_expense(100.0, "USD"))
            .await
            .unwrap();
        let report = f.lifecycle.create_report(f.owner, "Q1 Travel").await.unwrap();
        f.lifecycle
            .add_expenses(report.id, f.owner, &[expense.id])
            .await
            .unwrap();

        let update = ExpenseUpdate {
            amount: Some(50.0),
            currency: Some("EUR".to_string()),
            ..Default::default()
        };
        let updated = f
            .expenses
            .update_expense(expense.id, f.owner, &update)
            .await
            .unwrap();
        assert_eq!(updated.amount, 50.0);

        let report = f.lifecycle.get_report(report.id).await.unwrap();
        assert!((report.total - 55.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_update_expense_in_submitted_report_is_invalid_state() {
        let f = fixture().await;
        let expense = f
            .expenses
            .create_expense(f.owner, &new_expense(100.0, "USD"))
            .await
            .unwrap();
        let report = f.lifecycle.create_report(f.owner, "Q1 Travel").await.unwrap();
        f.lifecycle
            .add_expenses(report.id, f.owner, &[expense.id])
            .await
            .unwrap();
        let report = f.lifecycle.submit_report(report.id, f.owner).await.unwrap();
        assert_eq!(report.status, ReportStatus::Submitted);

        let update = ExpenseUpdate {
            description: Some("Airport taxi".to_string()),
            ..Default::default()
        };
        let err = f
            .expenses
            .update_expense(expense.id, f.owner, &update)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_update_and_delete_require_owner() {
        let f = fixture().await;
        let expense = f
            .expenses
            .create_expense(f.owner, &new_expense(10.0, "USD"))
            .await
            .unwrap();

        let err = f
            .expenses
            .update_expense(expense.id, f.other, &ExpenseUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let err = f
            .expenses
            .delete_expense(expense.id, f.other)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_delete_attached_expense_is_invalid_state() {
        let f = fixture().await;
        let attached = f
            .expenses
            .create_expense(f.owner, &new_expense(10.0, "USD"))
            .await
            .unwrap();
        let free = f
            .expenses
            .create_expense(f.owner, &new_expense(5.0, "USD"))
            .await
            .unwrap();
        let report = f.lifecycle.create_report(f.owner, "Q1 Travel").await.unwrap();
        f.lifecycle
            .add_expenses(report.id, f.owner, &[attached.id])
            .await
            .unwrap();

        let err = f
            .expenses
            .delete_expense(attached.id, f.owner)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        f.expenses.delete_expense(free.id, f.owner).await.unwrap();
        let err = f.expenses.get_expense(free.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_repricing_during_add_is_reflected_in_total() {
        let f = fixture().await;
        let expense = f
            .expenses
            .create_expense(f.owner, &new_expense(50.0, "EUR"))
            .await
            .unwrap();
        let report = f.lifecycle.create_report(f.owner, "Q1 Travel").await.unwrap();

        // The add is parked on its rate lookup while the amount changes underneath it
        let ids = [expense.id];
        let update = ExpenseUpdate {
            amount: Some(100.0),
            ..Default::default()
        };
        f.rates.park_next();
        let (added, updated) = tokio::join!(
            f.lifecycle.add_expenses(report.id, f.owner, &ids),
            async {
                f.rates.parked.notified().await;
                let result = f.expenses.update_expense(expense.id, f.owner, &update).await;
                f.rates.release.notify_one();
                result
            }
        );
        assert_eq!(updated.unwrap().amount, 100.0);
        let added = added.unwrap();
        assert!((added.total - 110.0).abs() < 1e-9);

        let stored = f.lifecycle.get_report(report.id).await.unwrap();
        assert!((stored.total - 110.0).abs() < 1e-9);
        assert!(stored.expense_ids.contains(&expense.id));
    }
}
