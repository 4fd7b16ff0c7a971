//! Counted barrier groups: members lift automatically once a configured
//! number of arrivals is reached, optionally after an aggregate transformation
//! over the arrived inputs.

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::barrier::{Barrier, BarrierController};
use crate::error::{ConvoyError, Result};
use crate::sort_replayer::SortReplayer;

/// Aggregate transformation applied to the sorted arrival inputs before
/// delivery. Must return exactly as many results as it was given inputs; the
/// results are positional against the sorted view.
pub type LiftAction<T> =
    Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, anyhow::Result<Vec<T>>> + Send + Sync>;

struct Member<T: Send + 'static> {
    barrier: Arc<Barrier<T>>,
    blocked: bool,
}

struct CountedInner<T: Send + 'static> {
    capacity: usize,
    registered: usize,
    arrivals: usize,
    members: Vec<Member<T>>,
    interrupted: bool,
    expect_absentees: bool,
}

/// A drained batch ready for the lift phase. Draining resets the controller
/// counters under the lock, so the lift phase itself runs on captured locals.
struct LiftBatch<T: Send + 'static> {
    members: Vec<Member<T>>,
    expect_absentees: bool,
}

impl<T: Send + 'static> CountedInner<T> {
    fn drain_batch(&mut self) -> LiftBatch<T> {
        let members = std::mem::take(&mut self.members);
        self.registered = 0;
        self.arrivals = 0;
        LiftBatch {
            members,
            expect_absentees: std::mem::replace(&mut self.expect_absentees, false),
        }
    }
}

/// Controller that lifts its members once the arrival count reaches capacity.
///
/// Barriers register in order, arrivals are counted, and the arrival that
/// fills the group to capacity runs the lift phase itself before returning
/// (no extra task is needed on the hot path). When a capacity change is what
/// completes the group, the already-arrived tasks are suspended on their
/// barriers, so the controller spawns the lift phase on the runtime handle it
/// was built with.
///
/// With an aggregate action configured, the arrived inputs are stable-sorted
/// by the natural order of `T`, transformed as one ordered list, and the
/// results are redistributed to the arrivals in their original order (equal
/// keys keep arrival order).
///
/// A single member interruption cascades to the whole group: every other
/// member is interrupted, and later registrations are interrupted on sight.
pub struct CountedBarrierController<T: Clone + Ord + Send + 'static> {
    uuid: Uuid,
    handle: Handle,
    lift_action: Option<LiftAction<T>>,
    inner: Mutex<CountedInner<T>>,
}

impl<T: Clone + Ord + Send + 'static> CountedBarrierController<T> {
    /// Controller with effectively unbounded capacity until
    /// [`set_capacity`](Self::set_capacity) is called
    pub fn new(handle: Handle) -> Arc<Self> {
        Self::build(handle, usize::MAX, None)
    }

    /// Controller that lifts after `capacity` arrivals
    pub fn with_capacity(handle: Handle, capacity: usize) -> Arc<Self> {
        Self::build(handle, capacity, None)
    }

    /// Controller that lifts after `capacity` arrivals, transforming the
    /// sorted inputs through `action` first
    pub fn with_lift_action<F, Fut>(handle: Handle, capacity: usize, action: F) -> Arc<Self>
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
    {
        let action: LiftAction<T> = Arc::new(move |inputs| Box::pin(action(inputs)));
        Self::build(handle, capacity, Some(action))
    }

    fn build(handle: Handle, capacity: usize, lift_action: Option<LiftAction<T>>) -> Arc<Self> {
        Arc::new(Self {
            uuid: Uuid::new_v4(),
            handle,
            lift_action,
            inner: Mutex::new(CountedInner {
                capacity,
                registered: 0,
                arrivals: 0,
                members: Vec::new(),
                interrupted: false,
                expect_absentees: false,
            }),
        })
    }

    /// Unique identity of this controller
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The arrival count at which the group lifts
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Number of members currently suspended awaiting the lift
    pub fn arrival_count(&self) -> usize {
        self.inner.lock().arrivals
    }

    /// Number of members registered toward the current batch
    pub fn registered_count(&self) -> usize {
        self.inner.lock().registered
    }

    /// Whether the group was interrupted
    pub fn is_interrupted(&self) -> bool {
        self.inner.lock().interrupted
    }

    /// Whether the current batch has already been filled
    pub fn at_capacity(&self) -> bool {
        let inner = self.inner.lock();
        inner.arrivals >= inner.capacity
    }

    /// Change the arrival count at which the group lifts.
    ///
    /// Fails with [`ConvoyError::CapacityBelowRegistered`] when `capacity`
    /// would not cover the barriers already registered. Lowering the capacity
    /// onto the current arrival count releases the group: the arrived tasks
    /// are suspended on their barriers and cannot run the lift phase, so it is
    /// spawned on the controller's runtime handle.
    pub fn set_capacity(&self, capacity: usize) -> Result<()> {
        let batch = {
            let mut inner = self.inner.lock();
            if capacity < inner.registered {
                return Err(ConvoyError::CapacityBelowRegistered {
                    requested: capacity,
                    registered: inner.registered,
                });
            }
            debug!(
                "Counted controller {} capacity {} -> {}",
                self.uuid, inner.capacity, capacity
            );
            inner.capacity = capacity;
            if capacity > 0 && inner.arrivals == capacity {
                Some(inner.drain_batch())
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            self.spawn_lift_phase(batch);
        }
        Ok(())
    }

    /// Absorb an upstream step failure: one expected arrival will never come.
    ///
    /// Shrinks the capacity by one through the error path (truncating the
    /// registered count and tolerating absentees at lift time). If the reduced
    /// capacity is now met, the waiting arrivals are released through a
    /// spawned lift phase; if nobody can ever fill the group again, the
    /// remaining members are woken as interrupted.
    pub fn notify_error(&self) {
        enum Followup<T: Send + 'static> {
            Nothing,
            Lift(LiftBatch<T>),
            Release(Vec<Arc<Barrier<T>>>),
        }

        let followup = {
            let mut inner = self.inner.lock();
            if inner.interrupted || inner.capacity == 0 {
                return;
            }
            let reduced = inner.capacity - 1;
            warn!(
                "Counted controller {} absorbing upstream failure, capacity {} -> {}",
                self.uuid, inner.capacity, reduced
            );
            inner.expect_absentees = true;
            if inner.registered > reduced {
                inner.registered = reduced;
            }
            inner.capacity = reduced;
            if reduced == 0 {
                let batch = inner.drain_batch();
                Followup::Release(batch.members.into_iter().map(|m| m.barrier).collect())
            } else if inner.arrivals == reduced {
                Followup::Lift(inner.drain_batch())
            } else {
                Followup::Nothing
            }
        };

        match followup {
            Followup::Nothing => {}
            Followup::Lift(batch) => self.spawn_lift_phase(batch),
            Followup::Release(members) => {
                // Capacity hit zero: the group can never be satisfied, wake
                // the non-arrived members as interrupted
                for member in members {
                    member.interrupt_silent();
                }
            }
        }
    }

    fn spawn_lift_phase(&self, batch: LiftBatch<T>) {
        let controller_id = self.uuid;
        let lift_action = self.lift_action.clone();
        self.handle.spawn(async move {
            if let Err(e) = run_lift_phase(controller_id, lift_action, batch).await {
                error!("Counted controller {} lift phase failed: {}", controller_id, e);
            }
        });
    }
}

/// The aggregation and lift phase over a drained batch.
///
/// Runs lock-free on the captured batch: checks absentees, extracts inputs,
/// applies the aggregate over the sorted view, replays the sort permutation
/// backwards and lifts every blocked member with its positional result. A
/// failure in the aggregate is delivered to every waiting arrival with the
/// same cause.
async fn run_lift_phase<T: Clone + Ord + Send + 'static>(
    controller_id: Uuid,
    lift_action: Option<LiftAction<T>>,
    batch: LiftBatch<T>,
) -> Result<()> {
    let mut blocked = Vec::new();
    let mut absentees = Vec::new();
    for member in batch.members {
        if member.blocked {
            blocked.push(member.barrier);
        } else {
            absentees.push(member.barrier);
        }
    }

    if !absentees.is_empty() {
        if !batch.expect_absentees {
            let err = ConvoyError::invariant(format!(
                "counted controller {} found {} absentees without a prior failure signal",
                controller_id,
                absentees.len()
            ));
            return fail_batch(&blocked, err);
        }
        debug!(
            "Counted controller {} dropping {} absentees",
            controller_id,
            absentees.len()
        );
        for absentee in &absentees {
            absentee.interrupt_silent();
        }
    }

    let mut inputs = Vec::with_capacity(blocked.len());
    for barrier in &blocked {
        match barrier.take_input() {
            Some(input) => inputs.push(input),
            None => {
                let err = ConvoyError::invariant(format!(
                    "barrier {} reached the lift phase without a recorded input",
                    barrier.uuid()
                ));
                return fail_batch(&blocked, err);
            }
        }
    }

    let results = match &lift_action {
        None => inputs,
        Some(action) => {
            let replayer = SortReplayer::new(&inputs);
            let sorted = replayer.sorted(&inputs);
            debug!(
                "Counted controller {} aggregating {} inputs",
                controller_id,
                sorted.len()
            );
            let sorted_results = match action(sorted).await {
                Ok(results) => results,
                Err(e) => {
                    let err = ConvoyError::LiftActionFailed {
                        controller_id,
                        reason: e.to_string(),
                    };
                    return fail_batch(&blocked, err);
                }
            };
            if sorted_results.len() != inputs.len() {
                let err = ConvoyError::BadAggregatorOutput {
                    controller_id,
                    expected: inputs.len(),
                    actual: sorted_results.len(),
                };
                return fail_batch(&blocked, err);
            }
            match replayer.unsort(sorted_results) {
                Ok(results) => results,
                Err(err) => return fail_batch(&blocked, err),
            }
        }
    };

    info!(
        "Counted controller {} lifting {} barriers",
        controller_id,
        blocked.len()
    );
    for (barrier, result) in blocked.iter().zip(results) {
        barrier.lift_with(result);
    }
    Ok(())
}

fn fail_batch<T: Send + 'static>(blocked: &[Arc<Barrier<T>>], err: ConvoyError) -> Result<()> {
    for barrier in blocked {
        barrier.fail(err.clone());
    }
    Err(err)
}

#[async_trait]
impl<T: Clone + Ord + Send + 'static> BarrierController<T> for CountedBarrierController<T> {
    fn on_barrier_created(&self, barrier: &Arc<Barrier<T>>) -> Result<()> {
        let interrupt_now = {
            let mut inner = self.inner.lock();
            if inner
                .members
                .iter()
                .any(|m| m.barrier.uuid() == barrier.uuid())
            {
                return Err(ConvoyError::DuplicateRegistration {
                    barrier_id: barrier.uuid(),
                });
            }
            if inner.interrupted {
                true
            } else {
                if inner.registered + 1 > inner.capacity {
                    return Err(ConvoyError::CapacityExceeded {
                        registered: inner.registered + 1,
                        capacity: inner.capacity,
                    });
                }
                inner.registered += 1;
                inner.members.push(Member {
                    barrier: barrier.clone(),
                    blocked: false,
                });
                debug!(
                    "Counted controller {} registered barrier {} ({}/{})",
                    self.uuid,
                    barrier.uuid(),
                    inner.registered,
                    inner.capacity
                );
                false
            }
        };
        if interrupt_now {
            debug!(
                "Counted controller {} is interrupted, refusing barrier {}",
                self.uuid,
                barrier.uuid()
            );
            barrier.interrupt_silent();
        }
        Ok(())
    }

    async fn on_barrier_blocked(&self, barrier: &Barrier<T>) -> Result<()> {
        let batch = {
            let mut inner = self.inner.lock();
            let interrupted = inner.interrupted;
            let member = inner
                .members
                .iter_mut()
                .find(|m| m.barrier.uuid() == barrier.uuid());
            match member {
                None if interrupted => {
                    // Arrival raced the interruption cascade; nothing to do
                    return Ok(());
                }
                None => {
                    return Err(ConvoyError::UnknownBarrier {
                        barrier_id: barrier.uuid(),
                    });
                }
                Some(member) if member.blocked => {
                    return Err(ConvoyError::DoubleBlock {
                        barrier_id: barrier.uuid(),
                    });
                }
                Some(member) => {
                    member.blocked = true;
                }
            }
            inner.arrivals += 1;
            debug!(
                "Counted controller {} arrival {}/{}",
                self.uuid, inner.arrivals, inner.capacity
            );
            if inner.arrivals == inner.capacity {
                Some(inner.drain_batch())
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            // The arrival that filled the group runs the lift phase itself;
            // its own barrier resolves through the buffered waker afterwards
            run_lift_phase(self.uuid, self.lift_action.clone(), batch).await?;
        }
        Ok(())
    }

    fn on_barrier_interrupted(&self, barrier: &Barrier<T>) -> Result<()> {
        let siblings = {
            let mut inner = self.inner.lock();
            let known = inner
                .members
                .iter()
                .any(|m| m.barrier.uuid() == barrier.uuid());
            if !known {
                if inner.interrupted {
                    return Ok(());
                }
                return Err(ConvoyError::UnknownBarrier {
                    barrier_id: barrier.uuid(),
                });
            }
            inner.interrupted = true;
            let batch = inner.drain_batch();
            batch
                .members
                .into_iter()
                .filter(|m| m.barrier.uuid() != barrier.uuid())
                .map(|m| m.barrier)
                .collect::<Vec<_>>()
        };
        info!(
            "Counted controller {} interrupted, cascading to {} members",
            self.uuid,
            siblings.len()
        );
        for sibling in siblings {
            sibling.interrupt_silent();
        }
        Ok(())
    }
}
