//! Gatescope Search - client for the log-search backend's job API.
//!
//! Queries run through [`SearchClient`], which tries the one-shot export
//! endpoint first and falls back to the create/poll/fetch job lifecycle,
//! walking a fixed list of candidate base paths until one answers with
//! JSON. Exhausted fallbacks produce an empty result, never a panic.

pub mod client;
pub mod config;
pub mod error;
pub mod job;
pub mod sleeper;

pub use client::{search_command, LogSearch, Record, SearchClient};
pub use config::{candidate_bases, CorporateProxy, Credentials, SearchConfig};
pub use error::{BaseFailure, Result, SearchError};
pub use job::{JobState, SearchJob};
pub use sleeper::{CountingSleeper, Sleeper, ThreadSleeper};
