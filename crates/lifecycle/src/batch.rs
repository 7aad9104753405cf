//! Multi-file uploads and downloads.
//!
//! A batch is a plain sequence of [`OperationController::execute`] calls on
//! one controller. Paths are checked up front so a typo rejects the whole
//! batch before any byte moves.

use std::collections::HashMap;
use std::time::Duration;

use smpflow_protocol::Verdict;
use smpflow_transfer::validate_remote_path;
use tracing::warn;

use crate::controller::{OperationController, Outcome};
use crate::error::OperationError;
use crate::operations::{DownloadRequest, DownloadStrategy, UploadRequest, UploadStrategy};

/// How a batch treats pacing and failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Wait between two files; skipped after the last one.
    pub pause_between: Duration,
    /// Record a failed file and carry on instead of ending the batch.
    pub continue_on_error: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            pause_between: Duration::ZERO,
            continue_on_error: true,
        }
    }
}

/// Result of a batch, in transfer order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Remote path and outcome of every file that made it.
    pub completed: Vec<(String, Outcome)>,
    /// Remote paths of the files that failed.
    pub failed: Vec<String>,
}

impl OperationController<UploadStrategy> {
    /// Uploads `files` one after the other.
    ///
    /// Paths are trimmed and de-duplicated; a repeated path keeps its first
    /// position and uploads the last data given for it. Any invalid path or
    /// missing payload rejects the batch before the first upload.
    pub async fn execute_many(
        &self,
        files: impl IntoIterator<Item = UploadRequest>,
        options: &BatchOptions,
    ) -> Result<BatchOutcome, OperationError> {
        let mut keyed = Vec::new();
        for request in files {
            if request.data.is_none() {
                warn!(path = %request.remote_path, "batch rejected: no data to upload");
                return Err(OperationError::Rejected(Verdict::FailedInvalidData));
            }
            keyed.push((request.remote_path.clone(), request));
        }

        let files = unique_paths(keyed)?
            .into_iter()
            .map(|(path, mut request)| {
                request.remote_path = path.clone();
                (path, request)
            })
            .collect();
        self.execute_batch(files, options).await
    }
}

impl OperationController<DownloadStrategy> {
    /// Downloads `paths` one after the other. Payloads come back in
    /// [`BatchOutcome::completed`].
    ///
    /// Paths are trimmed and de-duplicated. Any invalid path rejects the
    /// batch before the first download.
    pub async fn execute_many<P: AsRef<str>>(
        &self,
        paths: impl IntoIterator<Item = P>,
        options: &BatchOptions,
    ) -> Result<BatchOutcome, OperationError> {
        let keyed = paths
            .into_iter()
            .map(|path| (path.as_ref().to_string(), ()))
            .collect();

        let files = unique_paths(keyed)?
            .into_iter()
            .map(|(path, ())| (path.clone(), DownloadRequest::new(path)))
            .collect();
        self.execute_batch(files, options).await
    }
}

/// Validates every path and folds repeats onto their first occurrence.
fn unique_paths<T>(items: Vec<(String, T)>) -> Result<Vec<(String, T)>, OperationError> {
    let mut unique: Vec<(String, T)> = Vec::with_capacity(items.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (path, item) in items {
        let path = validate_remote_path(&path).map_err(|e| {
            warn!(error = %e, "batch rejected");
            OperationError::Rejected(Verdict::FailedInvalidParameters)
        })?;
        match seen.get(&path) {
            Some(&at) => unique[at].1 = item,
            None => {
                seen.insert(path.clone(), unique.len());
                unique.push((path, item));
            }
        }
    }
    Ok(unique)
}
