//! Core domain types
//!
//! This module contains the structures shared between task creation (which
//! compiles workflows into stages) and the runtime (which executes them).

pub mod cache;
pub mod kind;
pub mod label;
pub mod payload;
pub mod resource;
pub mod stage;
pub mod status;
pub mod target;
pub mod task;
