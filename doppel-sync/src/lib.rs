// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sync planning and execution for doppel
//!
//! A [`DirectionConfig`] turns comparison categories into directions, the
//! resolver turns directions into per-item [`SyncOperation`]s, and the
//! executor applies them in a dependency-safe order.
//!
//! [`SyncOperation`]: doppel_compare::SyncOperation

pub mod direction;
pub mod executor;
pub mod plan;
pub mod resolver;

pub use direction::{CustomDirections, DirectionCategory, DirectionConfig, DirectionRule, DirectionSet};
pub use executor::{execute_sync, DeletionPolicy, ExecOptions, SyncSummary};
pub use plan::{build_plan, PlanStep, SyncPlan, SyncStatistics};
pub use resolver::{resolve_operation, resolve_pair, resolve_sync_operations};
