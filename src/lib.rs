//! Tape Fetcher Core Library
//!
//! Scrapes imgsrc.ru albums, verifies full-size image candidates, and
//! downloads them without ever fetching the same source twice.
//!
//! # Architecture
//!
//! - [`ledger`] - Persistent fingerprint ledger with optional Redis mirror
//! - [`discovery`] - Album (tape) URL, owner, title and page URLs
//! - [`extract`] - Candidate extraction and HTTP verification per page
//! - [`download`] - Bounded-concurrency download engine
//! - [`orchestrator`] - Runs the pipeline across galleries
//! - [`events`] - Typed progress events for the caller
//!
//! Supporting modules: [`db`] (SQLite pool and migrations), [`http`]
//! (shared client), [`retry`] (backoff policies), [`site`] (URL shapes),
//! [`fingerprint`] and [`config`].

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod discovery;
pub mod download;
pub mod events;
pub mod extract;
pub mod fingerprint;
pub mod http;
pub mod ledger;
pub mod orchestrator;
pub mod retry;
pub mod site;
mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, RunConfig, parse_gallery_list};
pub use db::{Database, DbError};
pub use discovery::{AlbumRef, AlbumResolver, DiscoveryError};
pub use download::{BatchStats, DownloadEngine, DownloadOptions, EngineError};
pub use events::{EventSink, GallerySummary, PipelineEvent, RunTotals};
pub use extract::{Candidate, ExtractOptions, PageExtractor, PageReport};
pub use fingerprint::Fingerprint;
pub use http::{FetchError, HttpClient};
pub use ledger::{
    FingerprintCache, Ledger, LedgerEntry, LedgerError, LedgerStatus, MemoryCache,
    NewLedgerEntry, RedisCache, ReconcileReport, connect_cache,
};
pub use orchestrator::{Orchestrator, OrchestratorError, RetryPolicies, SearchOutcome};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy};
pub use site::Site;
