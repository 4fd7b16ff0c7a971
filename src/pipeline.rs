//! Pipeline assembly and per-passenger orchestration.
//!
//! A pipeline is an ordered list of step descriptors shared by every
//! passenger pushed through it. Ordinary steps transform the payload with a
//! retry budget; barrier steps construct a fresh [`Barrier`], register it with
//! the step's controller and suspend on it. A permanent step failure is fanned
//! out to every counted controller that is still waiting on arrivals, so a
//! group whose expected arrival died upstream does not deadlock.

use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::barrier::{Barrier, BarrierController};
use crate::config::PipelineConfig;
use crate::counted::CountedBarrierController;
use crate::error::{ConvoyError, Result};
use crate::job::{Job, JobOutcome};
use crate::manual::ManualBarrierController;
use crate::passenger::Passenger;
use crate::repository::JobRepository;
use crate::step::{StepDescriptor, StepOperation, TransformFn};

/// Fluent assembly of a pipeline definition
pub struct PipelineBuilder<T: Clone + Ord + Send + 'static> {
    handle: Handle,
    config: PipelineConfig,
    steps: Vec<StepDescriptor<T>>,
    manual: Vec<Arc<ManualBarrierController<T>>>,
    counted: Vec<Arc<CountedBarrierController<T>>>,
}

impl<T: Clone + Ord + Send + 'static> PipelineBuilder<T> {
    /// Start a pipeline definition running on `handle`
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            config: PipelineConfig::default(),
            steps: Vec::new(),
            manual: Vec::new(),
            counted: Vec::new(),
        }
    }

    /// Replace the tuning parameters
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Append an ordinary step using the default retry budget
    pub fn transform<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let attempts = self.config.default_attempts;
        self.transform_with_attempts(name, attempts, f)
    }

    /// Append an ordinary step with an explicit retry budget
    pub fn transform_with_attempts<F, Fut>(
        mut self,
        name: impl Into<String>,
        attempts: u32,
        f: F,
    ) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let transform: TransformFn<T> = Arc::new(move |input| Box::pin(f(input)));
        self.steps.push(StepDescriptor::new(
            name,
            attempts,
            StepOperation::Transform(transform),
        ));
        self
    }

    /// Append a rendezvous at a manually lifted barrier group
    pub fn manual_barrier(
        mut self,
        name: impl Into<String>,
        controller: Arc<ManualBarrierController<T>>,
    ) -> Self {
        if !self.manual.iter().any(|c| c.uuid() == controller.uuid()) {
            self.manual.push(controller.clone());
        }
        self.steps.push(StepDescriptor::new(
            name,
            1,
            StepOperation::ManualBarrier(controller),
        ));
        self
    }

    /// Append a rendezvous at a counted barrier group
    pub fn counted_barrier(
        mut self,
        name: impl Into<String>,
        controller: Arc<CountedBarrierController<T>>,
    ) -> Self {
        if !self.counted.iter().any(|c| c.uuid() == controller.uuid()) {
            self.counted.push(controller.clone());
        }
        self.steps.push(StepDescriptor::new(
            name,
            1,
            StepOperation::CountedBarrier(controller),
        ));
        self
    }

    /// Finish the definition
    pub fn build(self) -> Pipeline<T> {
        Pipeline {
            handle: self.handle,
            config: self.config,
            steps: Arc::new(self.steps),
            manual: self.manual,
            counted: Arc::new(self.counted),
            repository: Arc::new(JobRepository::new()),
        }
    }
}

/// An ordered multi-stage pipeline over independent passengers
pub struct Pipeline<T: Clone + Ord + Send + 'static> {
    handle: Handle,
    config: PipelineConfig,
    steps: Arc<Vec<StepDescriptor<T>>>,
    manual: Vec<Arc<ManualBarrierController<T>>>,
    counted: Arc<Vec<Arc<CountedBarrierController<T>>>>,
    repository: Arc<JobRepository>,
}

impl<T: Clone + Ord + Send + 'static> Pipeline<T> {
    /// Start a pipeline definition running on `handle`
    pub fn builder(handle: Handle) -> PipelineBuilder<T> {
        PipelineBuilder::new(handle)
    }

    /// The manual barrier groups this pipeline owns
    pub fn manual_barriers(&self) -> &[Arc<ManualBarrierController<T>>] {
        &self.manual
    }

    /// The counted barrier groups this pipeline owns
    pub fn counted_barriers(&self) -> &[Arc<CountedBarrierController<T>>] {
        &self.counted
    }

    /// The registry of currently running jobs
    pub fn repository(&self) -> &Arc<JobRepository> {
        &self.repository
    }

    /// Number of steps in the definition
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Push a passenger into the pipeline
    pub fn push(&self, input: T) -> Result<Job<T>> {
        self.push_tagged(input, None)
    }

    /// Push a passenger with a caller-supplied label
    pub fn push_tagged(&self, input: T, tag: Option<String>) -> Result<Job<T>> {
        let passenger = Passenger::new(input);
        let mut job_id = passenger.uuid();
        let mut collisions = 0;
        loop {
            match self.repository.add(job_id, tag.clone()) {
                Ok(()) => break,
                Err(ConvoyError::DuplicateId { .. })
                    if collisions < self.config.max_id_collisions =>
                {
                    collisions += 1;
                    job_id = Uuid::new_v4();
                }
                Err(e) => return Err(e),
            }
        }
        debug!("Pushed job {} ({} steps)", job_id, self.steps.len());

        let steps = self.steps.clone();
        let counted = self.counted.clone();
        let config = self.config.clone();
        let repository = self.repository.clone();
        let handle = self.handle.spawn(async move {
            let outcome = run_passenger(steps, counted, config, passenger).await;
            repository.remove(job_id);
            outcome
        });
        Ok(Job::new(job_id, tag, handle))
    }
}

/// Walk one passenger through every step in order
async fn run_passenger<T: Clone + Ord + Send + 'static>(
    steps: Arc<Vec<StepDescriptor<T>>>,
    counted: Arc<Vec<Arc<CountedBarrierController<T>>>>,
    config: PipelineConfig,
    mut passenger: Passenger<T>,
) -> JobOutcome<T> {
    for step in steps.iter() {
        match &step.operation {
            StepOperation::Transform(transform) => {
                match run_transform(step, transform, passenger.data().clone(), &config).await {
                    Ok(data) => passenger = passenger.with_data(data),
                    Err(err) => {
                        error!(
                            "Job {} failed permanently at step '{}': {}",
                            passenger.uuid(),
                            step.name,
                            err
                        );
                        fan_out_step_failure(&counted, None);
                        return JobOutcome::Failed(err);
                    }
                }
            }
            StepOperation::ManualBarrier(controller) => {
                let controller = controller.clone() as Arc<dyn BarrierController<T>>;
                match pass_barrier(controller, step, passenger).await {
                    BarrierPassage::Continue(p) => passenger = p,
                    BarrierPassage::Interrupted => return JobOutcome::Interrupted,
                    BarrierPassage::Failed(err) => {
                        fan_out_step_failure(&counted, err.origin_controller());
                        return JobOutcome::Failed(err);
                    }
                }
            }
            StepOperation::CountedBarrier(controller) => {
                let controller = controller.clone() as Arc<dyn BarrierController<T>>;
                match pass_barrier(controller, step, passenger).await {
                    BarrierPassage::Continue(p) => passenger = p,
                    BarrierPassage::Interrupted => return JobOutcome::Interrupted,
                    BarrierPassage::Failed(err) => {
                        fan_out_step_failure(&counted, err.origin_controller());
                        return JobOutcome::Failed(err);
                    }
                }
            }
        }
    }
    debug!("Job {} completed", passenger.uuid());
    JobOutcome::Completed(passenger)
}

enum BarrierPassage<T> {
    Continue(Passenger<T>),
    Interrupted,
    Failed(ConvoyError),
}

/// Rendezvous the passenger at a fresh barrier owned by `controller`
async fn pass_barrier<T: Clone + Ord + Send + 'static>(
    controller: Arc<dyn BarrierController<T>>,
    step: &StepDescriptor<T>,
    passenger: Passenger<T>,
) -> BarrierPassage<T> {
    let barrier = Barrier::new(controller.clone());
    if let Err(err) = controller.on_barrier_created(&barrier) {
        return BarrierPassage::Failed(err);
    }
    match barrier.invoke(passenger.data().clone()).await {
        Ok(Some(result)) => BarrierPassage::Continue(passenger.with_data(result)),
        Ok(None) => {
            debug!(
                "Job {} interrupted at barrier step '{}'",
                passenger.uuid(),
                step.name
            );
            BarrierPassage::Interrupted
        }
        Err(err) => {
            error!(
                "Job {} barrier step '{}' failed: {}",
                passenger.uuid(),
                step.name,
                err
            );
            BarrierPassage::Failed(err)
        }
    }
}

/// Retry an ordinary step up to its budget
async fn run_transform<T: Clone + Ord + Send + 'static>(
    step: &StepDescriptor<T>,
    transform: &TransformFn<T>,
    input: T,
    config: &PipelineConfig,
) -> Result<T> {
    let mut last_error = String::new();
    for attempt in 1..=step.attempts {
        match transform(input.clone()).await {
            Ok(output) => {
                if attempt > 1 {
                    info!("Step '{}' succeeded on attempt {}", step.name, attempt);
                }
                return Ok(output);
            }
            Err(e) => {
                last_error = e.to_string();
                warn!(
                    "Step '{}' attempt {}/{} failed: {}",
                    step.name, attempt, step.attempts, last_error
                );
                if attempt < step.attempts && !config.retry_delay.is_zero() {
                    sleep(config.retry_delay).await;
                }
            }
        }
    }
    Err(ConvoyError::StepFailed {
        step: step.name.clone(),
        attempts: step.attempts,
        reason: last_error,
    })
}

/// Fan a permanent step failure out to the counted groups still waiting.
///
/// The originator of a failed lift action is skipped by identity: two
/// controllers with identical configuration are still distinct groups, and
/// only the one that produced the failure must not be re-notified.
fn fan_out_step_failure<T: Clone + Ord + Send + 'static>(
    counted: &[Arc<CountedBarrierController<T>>],
    origin: Option<Uuid>,
) {
    for controller in counted {
        if Some(controller.uuid()) == origin {
            continue;
        }
        if controller.at_capacity() {
            continue;
        }
        controller.notify_error();
    }
}
