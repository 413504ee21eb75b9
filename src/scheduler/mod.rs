//! Leader-side scheduling
//!
//! Every scheduler process campaigns for leadership. Only the leader moves
//! tasks; standby processes keep their status document alive and wait.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── SchedulerNode ────────────────────────────┐
//! │  LeaderElector ──LeadershipEvent──▶ LeaderTerm (while leader)         │
//! │                                       │                               │
//! │   WorkerWatcher ──MembershipEvent──▶ WorkerPool ◀── auto refresh       │
//! │                                       │                               │
//! │   task-queue ──▶ Dispatcher ──Placer──┘──▶ worker-queue:<id>          │
//! │                     │                                                 │
//! │                     └──▶ processing-queue ◀── RecoverySweeper          │
//! │                                                                       │
//! │   delayed-tasks ──▶ DelayedPromoter ──▶ task-queue                     │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`election`] - Lease-based leader election
//! - [`pool`] - In-memory worker pool with round-robin cursor
//! - [`watcher`] - Discovery prefix watch feeding the pool
//! - [`placement`] - Destination selection policy
//! - [`dispatch`] - Main scheduling loop
//! - [`recovery`] - Stale marker requeue
//! - [`delayed`] - Delayed task promotion
//! - [`node`] - Process wiring and scheduler status document
//!
//! # Defaults
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `lease_ttl_secs` | 10 | Election and status lease TTL |
//! | `campaign_retry_secs` | 3 | Backoff after a failed campaign |
//! | `pool_refresh_secs` | 10 | Full pool reconciliation interval |
//! | `sweep_interval_secs` | 30 | Recovery sweep interval |
//! | `stale_threshold_secs` | 30 | Age after which a marker entry is stale |
//! | `max_worker_failures` | 3 | Consecutive push failures before eviction |

pub mod delayed;
pub mod dispatch;
pub mod election;
pub mod node;
pub mod placement;
pub mod pool;
pub mod recovery;
pub mod watcher;

pub use delayed::{submit, DelayedPromoter};
pub use dispatch::{DispatchConfig, DispatchOutcome, Dispatcher};
pub use election::{
    ElectionConfig, ElectionError, ElectionResult, LeaderElector, LeaderFlag, LeadershipEvent,
};
pub use node::{LeaderTerm, SchedulerDeps, SchedulerNode, SchedulerSettings, StatusDoc};
pub use placement::{Placement, PlacementSource, Placer};
pub use pool::{PoolError, PoolState, WorkerPool};
pub use recovery::{RecoverySweeper, SweepReport};
pub use watcher::{MembershipEvent, WorkerWatcher};
