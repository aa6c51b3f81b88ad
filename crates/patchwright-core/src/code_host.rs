use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Destination, Proposal, Task, WorkingCopy};

/// The code-hosting platform's repository operations.
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Materialize a working copy of the task's repository.
    async fn acquire(&self, task: &Task, destination: &Destination) -> Result<WorkingCopy>;

    /// Make sure every file the agent created or modified is part of the
    /// proposed change. Calling it again on an unchanged copy is a no-op.
    async fn track_all_changes(&self, working_copy: &WorkingCopy) -> Result<()>;

    /// Submit the tracked changes along with their title and description.
    async fn propose(
        &self,
        task: &Task,
        destination: &Destination,
        working_copy: &WorkingCopy,
        proposal: &Proposal,
    ) -> Result<()>;

    /// Release a working copy returned by `acquire`. Other runs of the same
    /// task keep their own copies.
    async fn cleanup(&self, task: &Task, working_copy: &WorkingCopy) -> Result<()>;
}
