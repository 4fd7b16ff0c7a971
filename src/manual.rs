use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::barrier::{Barrier, BarrierController};
use crate::error::{ConvoyError, Result};

struct ManualInner<T: Send + 'static> {
    members: Vec<Arc<Barrier<T>>>,
    lifted: bool,
}

/// Controller whose member barriers are lifted by an external signal.
///
/// Members accumulate in registration order until [`lift`](Self::lift)
/// releases them all with their original inputs. By default the controller is
/// reusable per cycle: a lift drains the member set and later registrations
/// accumulate again toward the next lift. A controller built with
/// [`latched`](Self::latched) instead stays open after the first lift and
/// releases every subsequent registration immediately.
///
/// Interrupted members are simply dropped from the set; a manual group
/// tolerates sparse failures and never cascades.
pub struct ManualBarrierController<T: Send + 'static> {
    uuid: Uuid,
    latch_after_lift: bool,
    inner: Mutex<ManualInner<T>>,
}

impl<T: Send + 'static> ManualBarrierController<T> {
    /// Per-cycle controller: each lift drains the set and the controller
    /// starts accumulating again
    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    /// Latched controller: after the first lift, new registrations are lifted
    /// immediately
    pub fn latched() -> Arc<Self> {
        Self::build(true)
    }

    fn build(latch_after_lift: bool) -> Arc<Self> {
        Arc::new(Self {
            uuid: Uuid::new_v4(),
            latch_after_lift,
            inner: Mutex::new(ManualInner {
                members: Vec::new(),
                lifted: false,
            }),
        })
    }

    /// Unique identity of this controller
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Number of barriers currently awaiting the external signal
    pub fn member_count(&self) -> usize {
        self.inner.lock().members.len()
    }

    /// Lift every member in registration order with its original input
    pub fn lift(&self) {
        let members = {
            let mut inner = self.inner.lock();
            inner.lifted = true;
            std::mem::take(&mut inner.members)
        };
        info!("Manual controller {} lifting {} barriers", self.uuid, members.len());
        for barrier in members {
            barrier.lift();
        }
    }

    /// Interrupt every member and drop them from the set
    pub fn interrupt(&self) {
        let members = {
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.members)
        };
        info!(
            "Manual controller {} interrupting {} barriers",
            self.uuid,
            members.len()
        );
        for barrier in members {
            barrier.interrupt_silent();
        }
    }
}

#[async_trait]
impl<T: Send + 'static> BarrierController<T> for ManualBarrierController<T> {
    fn on_barrier_created(&self, barrier: &Arc<Barrier<T>>) -> Result<()> {
        let lift_now = {
            let mut inner = self.inner.lock();
            if inner.members.iter().any(|m| m.uuid() == barrier.uuid()) {
                return Err(ConvoyError::DuplicateRegistration {
                    barrier_id: barrier.uuid(),
                });
            }
            if self.latch_after_lift && inner.lifted {
                true
            } else {
                inner.members.push(barrier.clone());
                false
            }
        };
        if lift_now {
            debug!(
                "Manual controller {} already lifted, releasing barrier {} immediately",
                self.uuid,
                barrier.uuid()
            );
            barrier.lift();
        } else {
            debug!(
                "Manual controller {} registered barrier {}",
                self.uuid,
                barrier.uuid()
            );
        }
        Ok(())
    }

    async fn on_barrier_blocked(&self, barrier: &Barrier<T>) -> Result<()> {
        // Membership only; release waits for the external signal
        let inner = self.inner.lock();
        if inner.members.iter().any(|m| m.uuid() == barrier.uuid()) {
            Ok(())
        } else {
            Err(ConvoyError::UnknownBarrier {
                barrier_id: barrier.uuid(),
            })
        }
    }

    fn on_barrier_interrupted(&self, barrier: &Barrier<T>) -> Result<()> {
        let mut inner = self.inner.lock();
        let before = inner.members.len();
        inner.members.retain(|m| m.uuid() != barrier.uuid());
        if inner.members.len() == before {
            return Err(ConvoyError::UnknownBarrier {
                barrier_id: barrier.uuid(),
            });
        }
        debug!(
            "Manual controller {} dropped interrupted barrier {}",
            self.uuid,
            barrier.uuid()
        );
        Ok(())
    }
}
