use futures::future::BoxFuture;
use std::sync::Arc;

use crate::counted::CountedBarrierController;
use crate::manual::ManualBarrierController;

/// Pure transformation applied to the payload at an ordinary step
pub type TransformFn<T> =
    Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// What a step does with the passenger that reaches it
pub enum StepOperation<T: Clone + Ord + Send + 'static> {
    /// Transform the payload, with a retry budget
    Transform(TransformFn<T>),
    /// Rendezvous at a barrier owned by a manual controller
    ManualBarrier(Arc<ManualBarrierController<T>>),
    /// Rendezvous at a barrier owned by a counted controller
    CountedBarrier(Arc<CountedBarrierController<T>>),
}

impl<T: Clone + Ord + Send + 'static> StepOperation<T> {
    /// Whether this step suspends the passenger at a barrier
    pub fn is_barrier(&self) -> bool {
        !matches!(self, StepOperation::Transform(_))
    }
}

/// One stage of a pipeline: a name for diagnostics, a retry budget for
/// ordinary steps, and the operation itself. Barrier steps ignore the retry
/// budget; a barrier is invoked exactly once.
pub struct StepDescriptor<T: Clone + Ord + Send + 'static> {
    pub name: String,
    pub attempts: u32,
    pub operation: StepOperation<T>,
}

impl<T: Clone + Ord + Send + 'static> StepDescriptor<T> {
    pub fn new(name: impl Into<String>, attempts: u32, operation: StepOperation<T>) -> Self {
        Self {
            name: name.into(),
            attempts: attempts.max(1),
            operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_floor_at_one() {
        let op: StepOperation<i32> =
            StepOperation::Transform(Arc::new(|x| Box::pin(async move { Ok(x) })));
        let step = StepDescriptor::new("noop", 0, op);
        assert_eq!(step.attempts, 1);
        assert!(!step.operation.is_barrier());
    }
}
