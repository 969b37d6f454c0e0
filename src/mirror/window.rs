// src/mirror/window.rs
use std::time::Duration;
use tracing::{debug, warn};

use crate::ct_log::EntrySource;

/// Inclusive range of log indices fetched and written as one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: u64,
    pub end: u64,
}

impl Window {
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Where the planner stands relative to the log head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Entries are available past the cursor; hand out windows immediately
    BehindHead,
    /// The cursor reached the last known tree size; poll with backoff
    CaughtUp,
}

#[derive(Debug, Clone, Copy)]
pub struct PlannerConfig {
    pub window_size: u64,
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
}

/// Lazily generates consecutive windows for one log, starting at the resume index.
///
/// Windows never extend past the last observed tree size. Once the cursor
/// reaches it the planner re-reads the tree size, sleeping between reads
/// with a doubling delay until the log grows.
pub struct WindowPlanner {
    next_start: u64,
    tree_size: u64,
    config: PlannerConfig,
    idle_delay: Duration,
}

impl WindowPlanner {
    pub fn new(start: u64, config: PlannerConfig) -> Self {
        Self {
            next_start: start,
            tree_size: 0,
            idle_delay: config.poll_interval,
            config,
        }
    }

    pub fn next_start(&self) -> u64 {
        self.next_start
    }

    pub fn state(&self) -> FetchState {
        if self.next_start < self.tree_size {
            FetchState::BehindHead
        } else {
            FetchState::CaughtUp
        }
    }

    /// Record a tree size reading; returns true if it opened new entries
    pub fn observe_tree_size(&mut self, tree_size: u64) -> bool {
        if tree_size > self.tree_size {
            self.tree_size = tree_size;
        }
        if self.state() == FetchState::BehindHead {
            self.idle_delay = self.config.poll_interval;
            true
        } else {
            false
        }
    }

    /// Take the next window if one is available without polling
    pub fn take_window(&mut self) -> Option<Window> {
        if self.state() == FetchState::CaughtUp {
            return None;
        }
        let end = self
            .next_start
            .saturating_add(self.config.window_size)
            .min(self.tree_size)
            - 1;
        let window = Window {
            start: self.next_start,
            end,
        };
        self.next_start = end + 1;
        Some(window)
    }

    /// Wait for and take the next window
    pub async fn next_window(&mut self, source: &dyn EntrySource) -> Window {
        loop {
            if let Some(window) = self.take_window() {
                return window;
            }

            match source.tree_size().await {
                Ok(size) => {
                    if self.observe_tree_size(size) {
                        debug!(
                            "{}: tree size {}, fetching from {}",
                            source.base_url(),
                            size,
                            self.next_start
                        );
                        continue;
                    }
                    debug!(
                        "{}: Up to date (next_index={}, tree_size={}), polling again in {:?}",
                        source.base_url(),
                        self.next_start,
                        size,
                        self.idle_delay
                    );
                }
                Err(e) => {
                    warn!(
                        "{}: Failed to read tree size: {:#}. Retrying in {:?}",
                        source.base_url(),
                        e,
                        self.idle_delay
                    );
                }
            }

            tokio::time::sleep(self.idle_delay).await;
            self.idle_delay = (self.idle_delay * 2).min(self.config.max_poll_interval);
        }
    }
}
