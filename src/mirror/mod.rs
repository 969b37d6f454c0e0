// src/mirror/mod.rs
pub mod coordinator;
pub mod cursor;
pub mod fetcher;
pub mod normalizer;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod window;

pub use coordinator::{CoordinatorConfig, MirrorCoordinator, ShutdownHandle, StartedLog};
pub use cursor::{CursorTracker, ResumePoint};
pub use fetcher::{ChunkFetcher, FetcherConfig};
pub use normalizer::{fqdn_set_hash, reverse_name, Normalizer};
pub use processor::{process_chunk, ChunkProcessor};
pub use queue::{chunk_queue, Chunk, ChunkReceiver, ChunkSender};
pub use registry::LogRegistry;
pub use window::{FetchState, PlannerConfig, Window, WindowPlanner};
