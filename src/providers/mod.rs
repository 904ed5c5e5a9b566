pub mod exchange_rate;
pub mod rate_cache;

pub use exchange_rate::ExchangeRateApiProvider;
pub use rate_cache::RateCache;
