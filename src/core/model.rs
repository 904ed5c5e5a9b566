//! Domain types for users, expenses and expense reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

pub type UserId = u64;
pub type ExpenseId = u64;
pub type ReportId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpenseCategory {
    Travel,
    Meals,
    OfficeSupplies,
}

impl Display for ExpenseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ExpenseCategory::Travel => "travel",
                ExpenseCategory::Meals => "meals",
                ExpenseCategory::OfficeSupplies => "office-supplies",
            }
        )
    }
}

impl FromStr for ExpenseCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "travel" => Ok(ExpenseCategory::Travel),
            "meals" => Ok(ExpenseCategory::Meals),
            "office-supplies" | "office supplies" | "office_supplies" => {
                Ok(ExpenseCategory::OfficeSupplies)
            }
            _ => Err(anyhow::anyhow!("Invalid expense category: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseStatus {
    Pending,
    Approved,
    Rejected,
}

impl Display for ExpenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ExpenseStatus::Pending => "pending",
                ExpenseStatus::Approved => "approved",
                ExpenseStatus::Rejected => "rejected",
            }
        )
    }
}

impl FromStr for ExpenseStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ExpenseStatus::Pending),
            "approved" => Ok(ExpenseStatus::Approved),
            "rejected" => Ok(ExpenseStatus::Rejected),
            _ => Err(anyhow::anyhow!("Invalid expense status: {}", s)),
        }
    }
}

/// Lifecycle state of an expense report. `Draft` is the only state that accepts changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Draft,
    Submitted,
    Approved,
}

impl Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ReportStatus::Draft => "draft",
                ReportStatus::Submitted => "submitted",
                ReportStatus::Approved => "approved",
            }
        )
    }
}

impl FromStr for ReportStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(ReportStatus::Draft),
            "submitted" => Ok(ReportStatus::Submitted),
            "approved" => Ok(ReportStatus::Approved),
            _ => Err(anyhow::anyhow!("Invalid report status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub user_id: UserId,
    pub amount: f64,
    pub currency: String,
    pub category: ExpenseCategory,
    pub status: ExpenseStatus,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub receipt: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseReport {
    pub id: ReportId,
    pub user_id: UserId,
    pub title: String,
    pub status: ReportStatus,
    /// Sum of the associated expenses in the reference currency.
    pub total: f64,
    /// Set when the last recompute summed at least one unconverted amount.
    #[serde(default)]
    pub approximate: bool,
    #[serde(default)]
    pub expense_ids: BTreeSet<ExpenseId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ExpenseReport {
    pub fn is_draft(&self) -> bool {
        self.status == ReportStatus::Draft
    }
}

/// Report total in the reference currency, stored together with the membership it covers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportTotal {
    pub total: f64,
    pub approximate: bool,
}

/// Input for creating an expense.
#[derive(Debug, Clone)]
pub struct NewExpense {
    pub amount: f64,
    pub currency: String,
    pub category: ExpenseCategory,
    pub description: String,
    pub receipt: String,
}

/// Partial update of an expense; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct ExpenseUpdate {
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub category: Option<ExpenseCategory>,
    pub description: Option<String>,
    pub receipt: Option<String>,
    pub status: Option<ExpenseStatus>,
}

impl ExpenseUpdate {
    /// Whether applying the update can change a report total.
    pub fn affects_total(&self) -> bool {
        self.amount.is_some() || self.currency.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseQuery {
    pub category: Option<ExpenseCategory>,
    pub status: Option<ExpenseStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportQuery {
    pub status: Option<ReportStatus>,
}

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const MAX_PER_PAGE: u32 = 100;

/// One-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl Pagination {
    /// Clamps to `page >= 1` and `1 <= per_page <= 100`; a zero `per_page` means the default.
    pub fn clamped(self) -> Self {
        let per_page = match self.per_page {
            0 => DEFAULT_PER_PAGE,
            n => n.min(MAX_PER_PAGE),
        };
        Self {
            page: self.page.max(1),
            per_page,
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.per_page as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}
