//! Scraper and geo analysis tooling for SSP-SP public-security statistics:
//! downloads per-category yearly exports, filters them by city with fuzzy
//! matching, answers radius queries over the saved records, and keeps an
//! idempotency ledger so units are not reprocessed.

pub mod analyze;
pub mod config;
pub mod fetch;
pub mod filter;
pub mod geo;
pub mod history;
pub mod model;
pub mod process;
pub mod store;
