//! Convoy - ordered multi-stage pipelines with barrier synchronization.
//!
//! A pipeline executes an ordered list of steps over a stream of independent
//! work items ("passengers"). Concurrently running passengers rendezvous at
//! synchronization points called barriers:
//!
//! - [`Barrier`] is a single-use suspend-until-lifted rendezvous that can
//!   deliver an overridden result.
//! - [`ManualBarrierController`] releases its whole group on an external
//!   signal.
//! - [`CountedBarrierController`] releases its group automatically once a
//!   configured number of arrivals is reached, optionally transforming the
//!   sorted arrival inputs through an aggregate action first, and can be
//!   retroactively unblocked when its capacity changes or an upstream step
//!   failure means an expected arrival will never come.
//!
//! ```no_run
//! use convoy::{CountedBarrierController, Pipeline};
//! use tokio::runtime::Handle;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let merge = CountedBarrierController::with_lift_action(
//!     Handle::current(),
//!     2,
//!     |inputs: Vec<i64>| async move {
//!         let total: i64 = inputs.iter().sum();
//!         Ok(inputs.into_iter().map(|_| total).collect())
//!     },
//! );
//!
//! let pipeline = Pipeline::builder(Handle::current())
//!     .transform("double", |x: i64| async move { Ok(x * 2) })
//!     .counted_barrier("merge", merge)
//!     .build();
//!
//! let a = pipeline.push(1)?;
//! let b = pipeline.push(2)?;
//! let done = a.outcome().await.into_completed().unwrap();
//! assert_eq!(*done.data(), 6);
//! # drop(b);
//! # Ok(())
//! # }
//! ```

pub mod barrier;
pub mod config;
pub mod counted;
pub mod error;
pub mod job;
pub mod manual;
pub mod passenger;
pub mod pipeline;
pub mod repository;
pub mod sort_replayer;
pub mod step;

pub use barrier::{Barrier, BarrierController, BarrierState};
pub use config::PipelineConfig;
pub use counted::{CountedBarrierController, LiftAction};
pub use error::{ConvoyError, Result};
pub use job::{Job, JobOutcome};
pub use manual::ManualBarrierController;
pub use passenger::Passenger;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use repository::{JobRecord, JobRepository};
pub use sort_replayer::SortReplayer;
pub use step::{StepDescriptor, StepOperation, TransformFn};
