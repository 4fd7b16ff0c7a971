//! Single-use rendezvous points between a running pipeline and its controller.
//!
//! A [`Barrier`] suspends exactly one arrival until an external party lifts or
//! interrupts it. The owning [`BarrierController`] observes the barrier's
//! lifecycle through three callbacks and decides when release happens.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ConvoyError, Result};

/// Lifecycle callbacks a barrier drives on its owning controller.
///
/// `on_barrier_created` and `on_barrier_interrupted` are synchronous;
/// `on_barrier_blocked` may suspend (it runs the aggregation phase when the
/// arrival is the one that fills a counted controller to capacity).
/// Implementations decide when to call [`Barrier::lift`] /
/// [`Barrier::interrupt`] on their members.
#[async_trait]
pub trait BarrierController<T: Send + 'static>: Send + Sync {
    /// Synchronous registration of a freshly constructed barrier. Receives
    /// the owning handle so the controller can keep the member for a later
    /// lift.
    fn on_barrier_created(&self, barrier: &Arc<Barrier<T>>) -> Result<()>;

    /// The barrier's arrival is now suspended awaiting release
    async fn on_barrier_blocked(&self, barrier: &Barrier<T>) -> Result<()>;

    /// The barrier reached its terminal interrupted state
    fn on_barrier_interrupted(&self, barrier: &Barrier<T>) -> Result<()>;
}

/// Barrier lifecycle states. Transitions are monotone:
/// `Fresh -> Armed -> (Lifted | Interrupted)`, with `Fresh` allowed to jump
/// straight to either terminal state when lift or interrupt beats the arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    Fresh,
    Armed,
    Lifted,
    Interrupted,
}

/// What the waker delivers to the suspended arrival
enum Wake<T> {
    Released(Option<T>),
    Failed(ConvoyError),
}

struct BarrierInner<T> {
    state: BarrierState,
    invoked: bool,
    input: Option<T>,
    override_result: Option<T>,
    waker: Option<oneshot::Sender<Wake<T>>>,
}

/// A single-use suspend-until-lifted rendezvous.
///
/// One arrival calls [`invoke`](Barrier::invoke) with its input and suspends.
/// Any thread may later call [`lift`](Barrier::lift) (optionally overriding
/// the delivered result) or [`interrupt`](Barrier::interrupt). An interrupted
/// barrier always delivers the absent value, even when a lift raced it.
pub struct Barrier<T: Send + 'static> {
    uuid: Uuid,
    controller: Arc<dyn BarrierController<T>>,
    inner: Mutex<BarrierInner<T>>,
}

impl<T: Send + 'static> Barrier<T> {
    /// Construct a fresh barrier owned by `controller`.
    ///
    /// The caller still has to register it via
    /// [`BarrierController::on_barrier_created`].
    pub fn new(controller: Arc<dyn BarrierController<T>>) -> Arc<Self> {
        Arc::new(Self {
            uuid: Uuid::new_v4(),
            controller,
            inner: Mutex::new(BarrierInner {
                state: BarrierState::Fresh,
                invoked: false,
                input: None,
                override_result: None,
                waker: None,
            }),
        })
    }

    /// Unique identity of this barrier
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Current lifecycle state
    pub fn state(&self) -> BarrierState {
        self.inner.lock().state
    }

    /// Record `input`, notify the controller, and suspend until released.
    ///
    /// Returns the override supplied to [`lift_with`](Barrier::lift_with) if
    /// one was, otherwise the original `input`, or `None` when interrupted.
    /// A lift that happened before the invocation resolves immediately and the
    /// controller never observes `on_barrier_blocked`.
    ///
    /// Fails with [`ConvoyError::AlreadyInvoked`] on a second call.
    pub async fn invoke(&self, input: T) -> Result<Option<T>> {
        let rx = {
            let mut inner = self.inner.lock();
            if inner.invoked {
                return Err(ConvoyError::AlreadyInvoked {
                    barrier_id: self.uuid,
                });
            }
            inner.invoked = true;
            match inner.state {
                BarrierState::Lifted => {
                    // Lift won the race: resolve without blocking
                    debug!("Barrier {} lifted before arrival, short-circuiting", self.uuid);
                    let result = inner.override_result.take().or(Some(input));
                    return Ok(result);
                }
                BarrierState::Interrupted => {
                    debug!("Barrier {} interrupted before arrival", self.uuid);
                    return Ok(None);
                }
                BarrierState::Fresh => {
                    inner.state = BarrierState::Armed;
                    inner.input = Some(input);
                    let (tx, rx) = oneshot::channel();
                    inner.waker = Some(tx);
                    rx
                }
                // Armed is unreachable while `invoked` was still false
                BarrierState::Armed => {
                    return Err(ConvoyError::AlreadyInvoked {
                        barrier_id: self.uuid,
                    });
                }
            }
        };

        // Lock released: the controller may suspend here, and may even lift
        // this very barrier before returning (the final arrival of a counted
        // group runs the aggregation itself). The oneshot buffers the result.
        self.controller.on_barrier_blocked(self).await?;

        match rx.await {
            Ok(Wake::Released(result)) => Ok(result),
            Ok(Wake::Failed(err)) => Err(err),
            // Waker dropped without a send: the controller discarded the
            // barrier, treat it as interrupted
            Err(_) => Ok(None),
        }
    }

    /// Lift the barrier, delivering the original input to the arrival
    pub fn lift(&self) {
        self.resolve(None);
    }

    /// Lift the barrier, delivering `result` instead of the original input
    pub fn lift_with(&self, result: T) {
        self.resolve(Some(result));
    }

    fn resolve(&self, override_result: Option<T>) {
        let wake = {
            let mut inner = self.inner.lock();
            match inner.state {
                // A second lift never overwrites the first result, and a lift
                // after interrupt is suppressed
                BarrierState::Lifted | BarrierState::Interrupted => None,
                BarrierState::Fresh => {
                    inner.state = BarrierState::Lifted;
                    inner.override_result = override_result;
                    None
                }
                BarrierState::Armed => {
                    inner.state = BarrierState::Lifted;
                    let value = override_result.or_else(|| inner.input.take());
                    inner.waker.take().map(|tx| (tx, value))
                }
            }
        };
        if let Some((tx, value)) = wake {
            debug!("Barrier {} lifted", self.uuid);
            let _ = tx.send(Wake::Released(value));
        }
    }

    /// Interrupt the barrier and notify the controller.
    ///
    /// No-op once the barrier is terminal. An in-flight invocation wakes with
    /// the absent value.
    pub fn interrupt(&self) -> Result<()> {
        if self.interrupt_silent() {
            self.controller.on_barrier_interrupted(self)?;
        }
        Ok(())
    }

    /// Interrupt without the controller callback.
    ///
    /// Controllers use this on their own members while cascading, where the
    /// notification would only bounce back into them. Returns whether a state
    /// transition actually happened.
    pub(crate) fn interrupt_silent(&self) -> bool {
        let wake = {
            let mut inner = self.inner.lock();
            match inner.state {
                BarrierState::Lifted | BarrierState::Interrupted => return false,
                BarrierState::Fresh => {
                    inner.state = BarrierState::Interrupted;
                    None
                }
                BarrierState::Armed => {
                    inner.state = BarrierState::Interrupted;
                    inner.waker.take()
                }
            }
        };
        debug!("Barrier {} interrupted", self.uuid);
        if let Some(tx) = wake {
            let _ = tx.send(Wake::Released(None));
        }
        true
    }

    /// Deliver a failure to the suspended arrival.
    ///
    /// Used by the counted controller when the lift phase itself fails; every
    /// waiting arrival of the batch sees the same cause.
    pub(crate) fn fail(&self, err: ConvoyError) {
        let wake = {
            let mut inner = self.inner.lock();
            match inner.state {
                BarrierState::Lifted | BarrierState::Interrupted => return,
                BarrierState::Fresh | BarrierState::Armed => {
                    inner.state = BarrierState::Interrupted;
                    inner.waker.take()
                }
            }
        };
        if let Some(tx) = wake {
            let _ = tx.send(Wake::Failed(err));
        }
    }

    /// Take the recorded input out of an armed barrier.
    ///
    /// The counted controller extracts inputs for the aggregation phase and
    /// always lifts with an explicit result afterwards.
    pub(crate) fn take_input(&self) -> Option<T> {
        self.inner.lock().input.take()
    }
}

impl<T: Send + 'static> std::fmt::Debug for Barrier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Barrier")
            .field("uuid", &self.uuid)
            .field("state", &self.state())
            .finish()
    }
}
