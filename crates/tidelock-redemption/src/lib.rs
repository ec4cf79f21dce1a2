//! tidelock-redemption
//!
//! High-level query and projection layer over the redemption ledgers.
//! The engine's mutation logic lives in tidelock-state's `LedgerEngine`;
//! this crate provides read-side summaries and fee-curve previews.

pub mod query;
pub mod schedule;

pub use query::RedemptionQuery;
pub use schedule::{fee_preview, quote_redemption, FeePoint, RedemptionQuote};
