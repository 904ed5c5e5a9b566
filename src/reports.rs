//! Expense report lifecycle: membership, submission and totals.
//!
//! Reports start as `draft` and can only move to `submitted`. Every operation checks,
//! in order, that the report exists, that the acting user owns it and that its state
//! allows the change. Mutations of one report are serialized through a per-report lock
//! held from the first read until the recomputed total is stored.

use crate::core::config::{AppConfig, ConversionFallback};
use crate::core::error::{ServiceError, ServiceResult};
use crate::core::model::{
    Expense, ExpenseId, ExpenseReport, Page, Pagination, ReportId, ReportQuery, ReportStatus,
    UserId,
};
use crate::core::repository::{
    ExpenseRepository, RepositoryError, ReportRepository, UserRepository,
};
use crate::entity_cache::{EntityCache, keys};
use crate::normalizer::{Aggregate, CurrencyNormalizer};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument};

pub const MIN_TITLE_LEN: usize = 3;
pub const MAX_TITLE_LEN: usize = 200;

/// Times a membership write is retried after an expense changed under it.
pub(crate) const MEMBERSHIP_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct ReportSettings {
    /// Currency every total is expressed in.
    pub currency: String,
    pub fallback: ConversionFallback,
    pub report_ttl: Duration,
    pub list_ttl: Duration,
}

impl ReportSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            currency: config.currency.clone(),
            fallback: config.conversion_fallback,
            report_ttl: config.cache.report_ttl(),
            list_ttl: config.cache.list_ttl(),
        }
    }
}

/// One async mutex per report id. Entries nobody holds are pruned on the next acquire.
#[derive(Default)]
struct ReportLocks {
    table: std::sync::Mutex<HashMap<ReportId, Arc<Mutex<()>>>>,
}

impl ReportLocks {
    async fn acquire(&self, id: ReportId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(table.entry(id).or_default())
        };
        lock.lock_owned().await
    }
}

fn list_entry(query: &ReportQuery, page: &Pagination) -> String {
    format!(
        "status={};page={};per_page={}",
        query.status.map(|s| s.to_string()).unwrap_or_default(),
        page.page,
        page.per_page
    )
}

pub struct ReportLifecycle {
    reports: Arc<dyn ReportRepository>,
    expenses: Arc<dyn ExpenseRepository>,
    users: Arc<dyn UserRepository>,
    normalizer: Arc<CurrencyNormalizer>,
    cache: Arc<EntityCache>,
    settings: ReportSettings,
    locks: ReportLocks,
}

impl ReportLifecycle {
    pub fn new(
        reports: Arc<dyn ReportRepository>,
        expenses: Arc<dyn ExpenseRepository>,
        users: Arc<dyn UserRepository>,
        normalizer: Arc<CurrencyNormalizer>,
        cache: Arc<EntityCache>,
        settings: ReportSettings,
    ) -> Self {
        Self {
            reports,
            expenses,
            users,
            normalizer,
            cache,
            settings,
            locks: ReportLocks::default(),
        }
    }

    /// Loads a live report and checks the acting user owns it.
    async fn load_owned(&self, id: ReportId, acting_user: UserId) -> ServiceResult<ExpenseReport> {
        let report = self.reports.get_by_id(id).await?;
        if report.user_id != acting_user {
            return Err(ServiceError::forbidden(format!(
                "user {acting_user} does not own expense report {id}"
            )));
        }
        Ok(report)
    }

    fn require_draft(report: &ExpenseReport, action: &str) -> ServiceResult<()> {
        if !report.is_draft() {
            return Err(ServiceError::invalid_state(format!(
                "cannot {action} expense report {} in status {}",
                report.id, report.status
            )));
        }
        Ok(())
    }

    async fn members(&self, owner: UserId, ids: &BTreeSet<ExpenseId>) -> ServiceResult<Vec<Expense>> {
        let ids: Vec<ExpenseId> = ids.iter().copied().collect();
        Ok(self.expenses.get_by_owner_and_ids(owner, &ids).await?)
    }

    async fn aggregate(&self, members: &[Expense]) -> ServiceResult<Aggregate> {
        self.normalizer
            .aggregate(members, &self.settings.currency, self.settings.fallback)
            .await
    }

    async fn invalidate_report(&self, report: &ExpenseReport) -> ServiceResult<()> {
        self.cache
            .invalidate(&[keys::report(report.id), keys::reports_by_owner(report.user_id)])
            .await
    }

    fn require_found(
        acting_user: UserId,
        requested: &BTreeSet<ExpenseId>,
        found: &[Expense],
    ) -> ServiceResult<()> {
        let found: BTreeSet<ExpenseId> = found.iter().map(|e| e.id).collect();
        let missing: Vec<String> = requested
            .difference(&found)
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ServiceError::invalid_argument(format!(
                "expenses not found for user {acting_user}: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    pub(crate) async fn lock_report(&self, id: ReportId) -> OwnedMutexGuard<()> {
        self.locks.acquire(id).await
    }

    /// Recomputes and stores the total of `id`. The caller must hold the report lock.
    pub(crate) async fn recompute_locked(&self, id: ReportId) -> ServiceResult<ExpenseReport> {
        let report = self.reports.get_by_id(id).await?;
        let members = self.members(report.user_id, &report.expense_ids).await?;
        let aggregate = self.aggregate(&members).await?;
        let report = self.reports.set_total(id, aggregate.report_total()).await?;
        self.invalidate_report(&report).await?;
        debug!(
            "Stored total {:.2} {} for report {} (approximate: {})",
            report.total, self.settings.currency, id, report.approximate
        );
        Ok(report)
    }

    #[instrument(skip(self, title))]
    pub async fn create_report(&self, owner: UserId, title: &str) -> ServiceResult<ExpenseReport> {
        self.users.get_by_id(owner).await?;
        let title = title.trim();
        let len = title.chars().count();
        if !(MIN_TITLE_LEN..=MAX_TITLE_LEN).contains(&len) {
            return Err(ServiceError::invalid_argument(format!(
                "title must be between {MIN_TITLE_LEN} and {MAX_TITLE_LEN} characters"
            )));
        }

        let report = self.reports.create(owner, title).await?;
        self.cache
            .invalidate(&[keys::reports_by_owner(owner)])
            .await?;
        info!("Created expense report {} for user {}", report.id, owner);
        Ok(report)
    }

    /// Attaches the acting user's expenses to a draft report and recomputes its total.
    ///
    /// Nothing is stored unless every id resolves and the new total can be computed. The
    /// membership and the total are committed in one write, which is refused if another
    /// draft took one of the expenses or one was repriced while rates were fetched. The
    /// latter is retried with fresh amounts.
    #[instrument(skip(self))]
    pub async fn add_expenses(
        &self,
        report_id: ReportId,
        acting_user: UserId,
        expense_ids: &[ExpenseId],
    ) -> ServiceResult<ExpenseReport> {
        let _guard = self.locks.acquire(report_id).await;
        let report = self.load_owned(report_id, acting_user).await?;
        Self::require_draft(&report, "add expenses to")?;

        let requested: BTreeSet<ExpenseId> = expense_ids.iter().copied().collect();
        if requested.is_empty() {
            return Err(ServiceError::invalid_argument("no expense ids given"));
        }
        let ids: Vec<ExpenseId> = requested.iter().copied().collect();
        let resolved = self.expenses.get_by_owner_and_ids(acting_user, &ids).await?;
        Self::require_found(acting_user, &requested, &resolved)?;

        if let Some(other) = self
            .reports
            .find_containing(&ids)
            .await?
            .into_iter()
            .find(|r| r.id != report_id && r.is_draft())
        {
            return Err(ServiceError::conflict(format!(
                "expense already attached to draft report {}",
                other.id
            )));
        }

        let mut membership = report.expense_ids.clone();
        membership.extend(requested.iter().copied());
        let mut attempt = 1;
        let report = loop {
            let members = self.members(acting_user, &membership).await?;
            let aggregate = self.aggregate(&members).await?;
            let priced: Vec<Expense> = members
                .into_iter()
                .filter(|e| requested.contains(&e.id))
                .collect();
            Self::require_found(acting_user, &requested, &priced)?;

            match self
                .reports
                .associate_expenses(report_id, &ids, &priced, aggregate.report_total())
                .await
            {
                Ok(report) => break report,
                Err(RepositoryError::Stale(reason)) if attempt < MEMBERSHIP_ATTEMPTS => {
                    debug!("Repricing report {}: {}", report_id, reason);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.invalidate_report(&report).await?;
        info!(
            "Added {} expense(s) to report {}, total {:.2}",
            ids.len(),
            report_id,
            report.total
        );
        Ok(report)
    }

    /// Detaches expenses from a draft report and recomputes its total.
    #[instrument(skip(self))]
    pub async fn remove_expenses(
        &self,
        report_id: ReportId,
        acting_user: UserId,
        expense_ids: &[ExpenseId],
    ) -> ServiceResult<ExpenseReport> {
        let _guard = self.locks.acquire(report_id).await;
        let report = self.load_owned(report_id, acting_user).await?;
        Self::require_draft(&report, "remove expenses from")?;

        let requested: BTreeSet<ExpenseId> = expense_ids.iter().copied().collect();
        if requested.is_empty() {
            return Err(ServiceError::invalid_argument("no expense ids given"));
        }
        let missing: Vec<String> = requested
            .difference(&report.expense_ids)
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ServiceError::invalid_argument(format!(
                "expenses not attached to report {report_id}: {}",
                missing.join(", ")
            )));
        }

        let membership: BTreeSet<ExpenseId> =
            report.expense_ids.difference(&requested).copied().collect();
        let members = self.members(report.user_id, &membership).await?;
        let aggregate = self.aggregate(&members).await?;

        let ids: Vec<ExpenseId> = requested.into_iter().collect();
        let report = self
            .reports
            .dissociate_expenses(report_id, &ids, aggregate.report_total())
            .await?;
        self.invalidate_report(&report).await?;
        info!("Removed {} expense(s) from report {}", ids.len(), report_id);
        Ok(report)
    }

    #[instrument(skip(self))]
    pub async fn submit_report(
        &self,
        report_id: ReportId,
        acting_user: UserId,
    ) -> ServiceResult<ExpenseReport> {
        let _guard = self.locks.acquire(report_id).await;
        let report = self.load_owned(report_id, acting_user).await?;
        Self::require_draft(&report, "submit")?;
        if report.expense_ids.is_empty() {
            return Err(ServiceError::invalid_state(format!(
                "expense report {report_id} has no expenses"
            )));
        }

        let report = self
            .reports
            .set_status(report_id, ReportStatus::Submitted)
            .await?;
        self.invalidate_report(&report).await?;
        info!("Submitted expense report {}", report_id);
        Ok(report)
    }

    /// Recomputes the total over every expense currently attached to the report.
    pub async fn recompute_total(&self, report_id: ReportId) -> ServiceResult<ExpenseReport> {
        let _guard = self.locks.acquire(report_id).await;
        self.recompute_locked(report_id).await
    }

    pub async fn get_report(&self, report_id: ReportId) -> ServiceResult<ExpenseReport> {
        self.cache
            .get_or_load(&keys::report(report_id), self.settings.report_ttl, || async {
                Ok(self.reports.get_by_id(report_id).await?)
            })
            .await
    }

    /// [`get_report`](Self::get_report) restricted to the report's owner.
    pub async fn view_report(
        &self,
        report_id: ReportId,
        acting_user: UserId,
    ) -> ServiceResult<ExpenseReport> {
        let report = self.get_report(report_id).await?;
        if report.user_id != acting_user {
            return Err(ServiceError::forbidden(format!(
                "user {acting_user} does not own expense report {report_id}"
            )));
        }
        Ok(report)
    }

    pub async fn list_reports(
        &self,
        owner: UserId,
        query: &ReportQuery,
        page: Pagination,
    ) -> ServiceResult<Page<ExpenseReport>> {
        let page = page.clamped();
        self.cache
            .get_or_load_entry(
                &keys::reports_by_owner(owner),
                &list_entry(query, &page),
                self.settings.list_ttl,
                || async {
                    let (items, total) = self
                        .reports
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

    /// Soft-deletes a report in any state. Its expenses become free to join another draft.
    #[instrument(skip(self))]
    pub async fn delete_report(&self, report_id: ReportId, acting_user: UserId) -> ServiceResult<()> {
        let _guard = self.locks.acquire(report_id).await;
        let report = self.load_owned(report_id, acting_user).await?;
        self.reports.delete(report_id).await?;
        self.invalidate_report(&report).await?;
        info!("Deleted expense report {}", report_id);
        Ok(())
    }
}
