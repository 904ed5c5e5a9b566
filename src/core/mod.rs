//! Core business abstractions

pub mod cache;
pub mod config;
pub mod currency;
pub mod error;
pub mod log;
pub mod model;
pub mod repository;

// Re-export main types for cleaner imports
pub use cache::{KeyValueCollection, Store};
pub use currency::{CurrencyRateProvider, ExchangeRateProvider};
pub use error::{ServiceError, ServiceResult};
pub use repository::{ExpenseRepository, ReportRepository, UserRepository};
