use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use patchwright_core::pipeline::Pipeline;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn, Instrument};

use crate::routes::TaskJob;

/// Task ids with a run in progress.
#[derive(Clone, Default)]
pub struct InFlightTasks(Arc<Mutex<HashSet<i64>>>);

/// Held for the duration of a run; releases the task id on drop.
pub struct TaskClaim {
    tasks: InFlightTasks,
    task_id: i64,
}

impl InFlightTasks {
    /// `None` while another run of the same task holds its claim.
    pub fn claim(&self, task_id: i64) -> Option<TaskClaim> {
        let mut ids = self.0.lock().unwrap_or_else(|e| e.into_inner());
        ids.insert(task_id).then(|| TaskClaim {
            tasks: self.clone(),
            task_id,
        })
    }
}

impl Drop for TaskClaim {
    fn drop(&mut self) {
        self.tasks
            .0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.task_id);
    }
}

/// Drains the job queue, running at most `limit` pipelines at once.
///
/// A job for a task that is already running is a duplicate delivery and is
/// dropped.
pub async fn run_workers(pipeline: Arc<Pipeline>, mut jobs: mpsc::UnboundedReceiver<TaskJob>, limit: usize) {
    let permits = Arc::new(Semaphore::new(limit));
    let in_flight = InFlightTasks::default();
    while let Some(job) = jobs.recv().await {
        let Some(claim) = in_flight.claim(job.task.id) else {
            warn!(task_id = job.task.id, job_id = %job.job_id, "task already running, dropping duplicate job");
            continue;
        };
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let pipeline = Arc::clone(&pipeline);
        let span = tracing::info_span!("job", job_id = %job.job_id, task_id = job.task.id);
        tokio::spawn(
            async move {
                let _claim = claim;
                let _permit = permit;
                match pipeline.run(&job.destination, &job.task).await {
                    Ok(run) => info!(
                        message_len = run.message.len(),
                        cost_usd = run.cost,
                        "task proposed"
                    ),
                    Err(e) => error!("task failed: {e:#}"),
                }
            }
            .instrument(span),
        );
    }
    info!("job queue closed, worker loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_for_a_running_task_is_refused() {
        let tasks = InFlightTasks::default();
        let first = tasks.claim(7).unwrap();
        assert!(tasks.claim(7).is_none());
        assert!(tasks.claim(8).is_some(), "other tasks are independent");

        drop(first);
        assert!(tasks.claim(7).is_some());
    }

    #[test]
    fn claim_is_released_when_the_run_panics() {
        let tasks = InFlightTasks::default();
        let held = tasks.clone();
        let outcome = std::panic::catch_unwind(move || {
            let _claim = held.claim(3).unwrap();
            panic!("pipeline blew up");
        });
        assert!(outcome.is_err());
        assert!(tasks.claim(3).is_some());
    }
}
