//! Converts expense amounts into the reference currency and sums them.

use crate::core::config::ConversionFallback;
use crate::core::currency::{CurrencyRateProvider, normalize_code};
use crate::core::error::{ServiceError, ServiceResult};
use crate::core::model::{Expense, ExpenseId, ReportTotal};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of summing a set of expenses in one currency.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub total: f64,
    /// True when at least one amount was summed unconverted.
    pub approximate: bool,
    pub unconverted: Vec<ExpenseId>,
}

impl Aggregate {
    pub fn report_total(&self) -> ReportTotal {
        ReportTotal {
            total: self.total,
            approximate: self.approximate,
        }
    }
}

pub struct CurrencyNormalizer {
    rates: Arc<dyn CurrencyRateProvider>,
}

impl CurrencyNormalizer {
    pub fn new(rates: Arc<dyn CurrencyRateProvider>) -> Self {
        Self { rates }
    }

    pub async fn convert(&self, amount: f64, from: &str, to: &str) -> ServiceResult<f64> {
        let from = normalize_code(from);
        let to = normalize_code(to);
        if from == to {
            return Ok(amount);
        }
        let rate = self
            .rates
            .get_rate(&from, &to)
            .await
            .map_err(ServiceError::Unavailable)?;
        debug!("Converted {} {} at rate {} to {}", amount, from, rate, to);
        Ok(amount * rate)
    }

    /// Sums `expenses` in `reference`. Conversions run concurrently; the sum is taken in
    /// input order so the result does not depend on completion order.
    pub async fn aggregate(
        &self,
        expenses: &[Expense],
        reference: &str,
        fallback: ConversionFallback,
    ) -> ServiceResult<Aggregate> {
        let conversions = expenses
            .iter()
            .map(|expense| self.convert(expense.amount, &expense.currency, reference));
        let results = join_all(conversions).await;

        let mut aggregate = Aggregate {
            total: 0.0,
            approximate: false,
            unconverted: Vec::new(),
        };
        for (expense, result) in expenses.iter().zip(results) {
            match result {
                Ok(converted) => aggregate.total += converted,
                Err(e) => match fallback {
                    ConversionFallback::Fail => return Err(e),
                    ConversionFallback::OriginalAmount => {
                        warn!(
                            "Summing expense {} unconverted ({} {}): {}",
                            expense.id, expense.amount, expense.currency, e
                        );
                        aggregate.total += expense.amount;
                        aggregate.approximate = true;
                        aggregate.unconverted.push(expense.id);
                    }
                },
            }
        }
        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ExpenseCategory, ExpenseStatus};
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedRates {
        rates: HashMap<(String, String), f64>,
        call_count: AtomicUsize,
    }

    impl FixedRates {
        fn new(rates: &[(&str, &str, f64)]) -> Arc<Self> {
            Arc::new(Self {
                rates: rates
                    .iter()
                    .map(|(from, to, rate)| ((from.to_string(), to.to_string()), *rate))
                    .collect(),
                call_count: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CurrencyRateProvider for FixedRates {
        async fn get_rate(&self, from: &str, to: &str) -> Result<f64> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.rates
                .get(&(from.to_string(), to.to_string()))
                .copied()
                .ok_or_else(|| anyhow!("No rate for {}->{}", from, to))
        }
    }

    fn expense(id: ExpenseId, amount: f64, currency: &str) -> Expense {
        let now = Utc::now();
        Expense {
            id,
            user_id: 1,
            amount,
            currency: currency.to_string(),
            category: ExpenseCategory::Travel,
            status: ExpenseStatus::Pending,
            description: String::new(),
            receipt: String::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_same_currency_is_exact_and_free() {
        let rates = FixedRates::new(&[]);
        let normalizer = CurrencyNormalizer::new(rates.clone());

        assert_eq!(normalizer.convert(123.45, "usd", "USD").await.unwrap(), 123.45);
        assert_eq!(rates.call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_convert_multiplies_by_rate() {
        let normalizer = CurrencyNormalizer::new(FixedRates::new(&[("EUR", "USD", 1.1)]));
        let converted = normalizer.convert(50.0, "eur", "usd").await.unwrap();
        assert!((converted - 55.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_convert_failure_is_unavailable() {
        let normalizer = CurrencyNormalizer::new(FixedRates::new(&[]));
        let err = normalizer.convert(10.0, "GBP", "USD").await.unwrap_err();
        assert_eq!(err.kind(), "unavailable");
    }

    #[tokio::test]
    async fn test_aggregate_mixed_currencies() {
        let normalizer = CurrencyNormalizer::new(FixedRates::new(&[("EUR", "USD", 1.1)]));
        let expenses = vec![expense(1, 100.0, "USD"), expense(2, 50.0, "EUR")];

        let aggregate = normalizer
            .aggregate(&expenses, "USD", ConversionFallback::OriginalAmount)
            .await
            .unwrap();
        assert!((aggregate.total - 155.0).abs() < 1e-9);
        assert!(!aggregate.approximate);
        assert!(aggregate.unconverted.is_empty());
    }

    #[tokio::test]
    async fn test_aggregate_original_amount_fallback() {
        let normalizer = CurrencyNormalizer::new(FixedRates::new(&[("EUR", "USD", 1.1)]));
        let expenses = vec![
            expense(1, 100.0, "USD"),
            expense(2, 50.0, "EUR"),
            expense(3, 20.0, "GBP"),
        ];

        let aggregate = normalizer
            .aggregate(&expenses, "USD", ConversionFallback::OriginalAmount)
            .await
            .unwrap();
        assert!((aggregate.total - 175.0).abs() < 1e-9);
        assert!(aggregate.approximate);
        assert_eq!(aggregate.unconverted, vec![3]);
    }

    #[tokio::test]
    async fn test_aggregate_fail_policy() {
        let normalizer = CurrencyNormalizer::new(FixedRates::new(&[("EUR", "USD", 1.1)]));
        let expenses = vec![expense(1, 50.0, "EUR"), expense(2, 20.0, "GBP")];

        let err = normalizer
            .aggregate(&expenses, "USD", ConversionFallback::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_aggregate_empty_is_zero() {
        let normalizer = CurrencyNormalizer::new(FixedRates::new(&[]));
        let aggregate = normalizer
            .aggregate(&[], "USD", ConversionFallback::Fail)
            .await
            .unwrap();
        assert_eq!(aggregate.total, 0.0);
        assert!(!aggregate.approximate);
    }
}
