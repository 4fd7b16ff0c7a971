use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::ConvoyError;
use crate::passenger::Passenger;

/// Terminal state of one pushed job
#[derive(Debug)]
pub enum JobOutcome<T> {
    /// Every step ran; the passenger carries the final payload
    Completed(Passenger<T>),
    /// A barrier the passenger was waiting at was interrupted
    Interrupted,
    /// An ordinary step exhausted its retries, or a barrier call failed
    Failed(ConvoyError),
}

impl<T> JobOutcome<T> {
    /// The final payload, if the job completed
    pub fn into_completed(self) -> Option<Passenger<T>> {
        match self {
            JobOutcome::Completed(passenger) => Some(passenger),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, JobOutcome::Interrupted)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobOutcome::Failed(_))
    }
}

/// Handle to one passenger's journey through the pipeline.
///
/// The orchestration runs on a spawned task; awaiting the handle yields the
/// job's terminal outcome.
pub struct Job<T> {
    job_id: Uuid,
    tag: Option<String>,
    handle: JoinHandle<JobOutcome<T>>,
}

impl<T> Job<T> {
    pub(crate) fn new(job_id: Uuid, tag: Option<String>, handle: JoinHandle<JobOutcome<T>>) -> Self {
        Self { job_id, tag, handle }
    }

    /// Unique identity of this job
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Caller-supplied label, if any
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Whether the orchestration task has finished
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the job to reach a terminal state
    pub async fn outcome(self) -> JobOutcome<T> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => JobOutcome::Interrupted,
            Err(e) => JobOutcome::Failed(ConvoyError::invariant(format!(
                "orchestration task panicked: {e}"
            ))),
        }
    }

    /// Abort the orchestration task
    pub fn abort(&self) {
        self.handle.abort();
    }
}
