//! Query execution against the external fetch capability.
//!
//! The wire-level tribunal client (scraping, HTTP, captchas) lives outside
//! this crate: callers inject anything implementing [`MovementFetcher`].
//! [`QueryExecutor`] wraps one fetch for one process into a scheduler unit
//! of work and performs no retrying of its own — transient failures are the
//! scheduler's business.

use crate::models::TribunalId;
use crate::scheduler::{UnitOfWork, WorkFuture};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// A movement as returned by the fetch layer, before identity hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMovement {
    /// Date of the movement as recorded by the tribunal.
    pub date: NaiveDate,
    /// Optional tribunal-side movement code.
    #[serde(default)]
    pub code: Option<String>,
    /// Short title.
    pub title: String,
    /// Full description text.
    #[serde(default)]
    pub description: String,
    /// Whether the movement came from an official publication.
    #[serde(default)]
    pub official: bool,
    /// Free-form metadata carried through to the stored movement.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// The opaque tribunal fetch capability.
///
/// Implementations talk to one or many tribunals however they like; the
/// contract is only that errors surface as [`Error::Fetch`] so the
/// scheduler's retry logic can classify them.
#[async_trait]
pub trait MovementFetcher: Send + Sync {
    /// Fetches the raw movements currently visible for a process.
    async fn fetch_movements(
        &self,
        process_number: &str,
        tribunal: &TribunalId,
    ) -> Result<Vec<RawMovement>>;
}

/// Wraps single fetches into scheduler units of work.
#[derive(Clone)]
pub struct QueryExecutor {
    fetcher: Arc<dyn MovementFetcher>,
}

impl QueryExecutor {
    /// Creates an executor over a fetch capability.
    #[must_use]
    pub fn new(fetcher: Arc<dyn MovementFetcher>) -> Self {
        Self { fetcher }
    }

    /// Builds a re-invocable unit of work fetching one process.
    ///
    /// Each invocation issues a fresh fetch, which is what lets the
    /// scheduler retry after a transient failure.
    #[must_use]
    pub fn unit_of_work(
        &self,
        process_number: &str,
        tribunal: &TribunalId,
    ) -> UnitOfWork<Vec<RawMovement>> {
        let fetcher = Arc::clone(&self.fetcher);
        let process_number = process_number.to_string();
        let tribunal = tribunal.clone();
        Arc::new(move || {
            let fetcher = Arc::clone(&fetcher);
            let process_number = process_number.clone();
            let tribunal = tribunal.clone();
            Box::pin(async move {
                fetcher.fetch_movements(&process_number, &tribunal).await
            }) as WorkFuture<Vec<RawMovement>>
        })
    }
}

/// Fetcher backed by JSON fixture files, one file per process number.
///
/// Useful for local runs and integration tests where no tribunal client is
/// wired in: `<dir>/<digits>.json` holds an array of [`RawMovement`].
pub struct FixtureFetcher {
    dir: PathBuf,
}

impl FixtureFetcher {
    /// Creates a fixture fetcher over a directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MovementFetcher for FixtureFetcher {
    async fn fetch_movements(
        &self,
        process_number: &str,
        tribunal: &TribunalId,
    ) -> Result<Vec<RawMovement>> {
        let path = self.dir.join(format!("{process_number}.json"));
        let payload = tokio::fs::read_to_string(&path).await.map_err(|e| Error::Fetch {
            tribunal: tribunal.to_string(),
            cause: format!("fixture {} unreadable: {e}", path.display()),
        })?;
        serde_json::from_str(&payload).map_err(|e| Error::Fetch {
            tribunal: tribunal.to_string(),
            cause: format!("fixture {} malformed: {e}", path.display()),
        })
    }
}
