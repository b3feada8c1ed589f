//! Focuskeeper library crate
//!
//! A hierarchical task tree (projects → tasks → subtasks) with priority tiers and a
//! Focus Mode scheduler that presents one actionable leaf at a time.

pub mod buckets;
pub mod cli;
pub mod config;
pub mod focus;
pub mod guide;
pub mod leaves;
pub mod models;

pub use config::EngineConfig;
pub use focus::{FocusOutcome, FocusSession, FocusState};
pub use models::{
    ChangeSet, Context, Core, FocusError, Priority, Project, Task, TaskPath, Workspace,
};
