//! Ingestion core for 가계부, a family household ledger.
//!
//! Raw text events (bank/card SMS, push notifications) and uploaded
//! statement rows flow through one pipeline: institution pattern matching →
//! duplicate detection → category resolution → persistence, with
//! account-balance tracking running alongside, decoupled from transaction
//! extraction. The crate is a library driven by UI event handlers; it owns
//! no CLI and no network surface.

pub mod balance;
pub mod classifier;
pub mod db;
pub mod dedup;
pub mod error;
pub mod history;
pub mod importer;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod similarity;
pub mod templates;

pub use error::{GagyebuError, Result};
pub use models::{
    AccountBalance, AccountType, BalanceSource, Candidate, Direction, RawMessage, SourceChannel,
};
pub use pipeline::{Ingested, Pipeline};
