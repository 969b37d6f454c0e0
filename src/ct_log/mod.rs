// src/ct_log/mod.rs
pub mod client;
pub mod health;
pub mod leaf;
pub mod source;
pub mod types;

pub use client::{normalize_log_url, CtLogClient};
pub use health::{FetchHealth, LogHealth};
pub use source::{EntrySource, EntryType, FetchedEntry};
