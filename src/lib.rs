//! Company prospecting by economic activity code.
//!
//! Searches Brazilian company registries by CNAE subclass, merges partial
//! records across providers, and enriches the results with web presence,
//! validated contact data and firmographics. One fallback chain of
//! registries supplies the listings; five optional passes complete each
//! record. All outbound traffic is rate limited per provider and search
//! results are memoized for a configurable TTL.

pub mod auth;
pub mod cache;
pub mod config;
pub mod enrichment;
pub mod errors;
pub mod merge;
pub mod models;
pub mod rate_limiter;
pub mod search;
pub mod services;

pub use config::Config;
pub use errors::AppError;
pub use models::{CompanyRecord, RecordSet};
pub use search::SearchService;
