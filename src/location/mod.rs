//! Location Module
//!
//! The static state → mandal → RBK hierarchy and the cascading selector
//! built on top of it.

pub mod hierarchy;
pub mod selection;

pub use hierarchy::LocationHierarchy;
pub use selection::{Season, Selection, SelectionState};
