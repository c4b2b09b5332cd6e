//! File-Store Committer wiring (§4.11): turns the route's resolved
//! commit policy and the temp files registered this request into a
//! response-level outcome. The commit/rollback logic itself lives in
//! `gateway_core::file_store`; this module only maps its result onto the
//! gateway's error taxonomy and cleans up the temp files afterward.

use gateway_core::error::{Error, Result};
use gateway_core::file_stage::TempFileTracker;
use gateway_core::file_store::{commit_staged_files, CommitOutcome, FileCommitPolicy, StorePool};

/// Commit every temp file registered on `tracker` for this request, then
/// clean up the temp files regardless of outcome (§4.7's tracker contract).
pub async fn commit(pool: &StorePool, policy: &FileCommitPolicy, tracker: &TempFileTracker) -> Result<()> {
    let records = tracker.records().await;
    let outcome = commit_staged_files(pool, policy, &records).await;
    tracker.cleanup().await;

    match outcome? {
        CommitOutcome::Committed => Ok(()),
        CommitOutcome::Conflict { destination } => {
            Err(Error::conflict(format!("file already exists at destination '{destination}'")))
        }
    }
}
