//! Drover Core
//!
//! Core types and abstractions for the Drover workflow execution engine.
//!
//! This crate contains:
//! - Domain types: task kinds, statuses, stages, targets and task documents
//! - Subtasks: the tagged union of every executable unit a stage can hold
//! - Image helpers: registry address and image reference manipulation

pub mod consts;
pub mod domain;
pub mod image;
pub mod subtask;

pub use domain::kind::TaskKind;
pub use domain::status::TaskStatus;
pub use subtask::{SubTask, TypedSubTask};
