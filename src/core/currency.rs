//! Currency conversion abstractions

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// ISO 4217 codes accepted for expense amounts.
pub const SUPPORTED_CURRENCIES: [&str; 20] = [
    "USD", "EUR", "GBP", "JPY", "AUD", "CAD", "CHF", "CNY", "INR", "SGD", "NZD", "MXN", "HKD",
    "NOK", "SEK", "KRW", "TRY", "RUB", "ZAR", "BRL",
];

/// Canonical form of a currency code: trimmed and upper-cased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub fn is_supported(code: &str) -> bool {
    let code = normalize_code(code);
    SUPPORTED_CURRENCIES.contains(&code.as_str())
}

/// Resolves the multiplier that converts an amount in `from` into `to`.
#[async_trait]
pub trait CurrencyRateProvider: Send + Sync {
    async fn get_rate(&self, from: &str, to: &str) -> Result<f64>;
}

/// An upstream source that publishes all rates for a base currency at once.
#[async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    async fn fetch_rates(&self, base: &str) -> Result<HashMap<String, f64>>;
}
