//! Reactive dependency graph over execution units.
//!
//! This module provides:
//! - Unit descriptions built from the dependency analyzer
//! - Edges from the unit that defines a name to the units that read it
//! - Topological ordering and invalidation for re-execution
//! - Cycle detection with helpful error messages

mod types;

pub use types::{GraphEngine, UnitIndex, UnitInfo};
