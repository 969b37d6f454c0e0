// src/lib.rs
// Library interface for ct-mirror
pub mod cert_parser;
pub mod cli;
pub mod config;
pub mod ct_log;
pub mod error;
pub mod metrics;
pub mod mirror;
pub mod store;
