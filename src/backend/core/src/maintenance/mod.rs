//! Maintenance scheduler and its housekeeping tasks.
//!
//! A tick loop checks each registered task against its [`Schedule`] and
//! spawns the ones that are due. Runs are independent: a slow or failing
//! task never delays the tick or another task, and a task is never started
//! while its previous run is still going.
//!
//! | task                  | default schedule | effect                               |
//! |-----------------------|------------------|--------------------------------------|
//! | temp cleanup          | every 1h         | delete temp files older than 24h     |
//! | stuck job reap        | every 6h         | retry or fail jobs in-flight > 30m   |
//! | retention enforcement | daily 02:00 UTC  | archive documents past retention     |
//! | old job purge         | daily 03:00 UTC  | delete finished jobs older than 7d   |
//! | archive cleanup       | every 7d         | delete archives older than 365d      |

pub mod builtin;
pub mod scheduler;
pub mod task;

pub use builtin::{
    ArchiveCleanupTask, OldJobPurgeTask, RetentionEnforcementTask, StuckJobReapTask,
    TempCleanupTask,
};
pub use scheduler::{MaintenanceHandle, MaintenanceScheduler, ManualCleanupReport, Schedule};
pub use task::{MaintenanceTask, RunStatus, TaskKind, TaskOutcome, TaskReport};
