//! File materialization waiter
//!
//! The external tool gives no completion signal; the only way to know it has
//! finished is to watch for its output files to appear. The waiter polls a set
//! of expected paths at a fixed interval until all of them exist or a timeout
//! elapses.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

/// Interval between existence checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long to wait for the tool before giving up
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Paths the waiter expects to appear, each with a "materialized" flag.
///
/// A flag never goes back to false once set: confirmed paths are not checked
/// again.
#[derive(Debug, Clone, Default)]
pub struct ExpectedFileSet {
    entries: BTreeMap<PathBuf, bool>,
}

impl ExpectedFileSet {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            entries: paths.into_iter().map(|p| (p.into(), false)).collect(),
        }
    }

    /// Check every still-unconfirmed path, returning how many became confirmed
    pub fn refresh(&mut self) -> usize {
        let mut confirmed = 0;
        for (path, materialized) in self.entries.iter_mut().filter(|(_, m)| !**m) {
            if path.exists() {
                tracing::debug!("Expected file has been generated: {}", path.display());
                *materialized = true;
                confirmed += 1;
            }
        }
        confirmed
    }

    pub fn is_complete(&self) -> bool {
        self.entries.values().all(|m| *m)
    }

    pub fn is_confirmed(&self, path: &Path) -> bool {
        self.entries.get(path).copied().unwrap_or(false)
    }

    /// Paths not yet observed on disk
    pub fn missing(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter(|(_, m)| !**m)
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.entries.values().filter(|m| !**m).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of a wait call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    /// True when every expected file appeared before the timeout
    pub materialized: bool,
    /// Number of existence passes made
    pub polls: u32,
    /// Time spent waiting
    pub elapsed: Duration,
    /// Paths still absent when the wait ended (empty on success)
    pub missing: Vec<PathBuf>,
}

impl WaitOutcome {
    pub fn is_materialized(&self) -> bool {
        self.materialized
    }
}

impl From<WaitOutcome> for bool {
    fn from(outcome: WaitOutcome) -> bool {
        outcome.materialized
    }
}

/// Polls the filesystem until a set of files exists or the timeout elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMaterializationWaiter {
    poll_interval: Duration,
    timeout: Duration,
}

impl Default for FileMaterializationWaiter {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT)
    }
}

impl FileMaterializationWaiter {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// Waiter with the default 500ms poll interval
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for every path to exist.
    ///
    /// Returns as soon as the last file is observed. On timeout the outcome
    /// lists the paths that never appeared; the timeout is reported at the
    /// deadline, not up to one interval past it.
    pub async fn wait<I, P>(&self, paths: I) -> WaitOutcome
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut expected = ExpectedFileSet::new(paths);
        let mut polls = 0u32;

        if expected.is_empty() {
            return WaitOutcome {
                materialized: true,
                polls,
                elapsed: Duration::ZERO,
                missing: Vec::new(),
            };
        }

        loop {
            polls += 1;
            tracing::trace!(
                "Checking whether {} of {} expected file(s) have been generated",
                expected.pending(),
                expected.len()
            );
            expected.refresh();

            if expected.is_complete() {
                tracing::debug!(
                    "All {} expected file(s) generated after {} check(s)",
                    expected.len(),
                    polls
                );
                return WaitOutcome {
                    materialized: true,
                    polls,
                    elapsed: start.elapsed(),
                    missing: Vec::new(),
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome {
                    materialized: false,
                    polls,
                    elapsed: start.elapsed(),
                    missing: expected.missing(),
                };
            }

            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            tracing::debug!(
                "Checked count: {}, and waited {} milliseconds",
                polls,
                start.elapsed().as_millis()
            );
        }
    }
}
