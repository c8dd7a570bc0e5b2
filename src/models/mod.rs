pub mod price_history;
pub mod target;

// Re-exports for convenience
pub use price_history::*;
pub use target::*;

/// Row id of a tracked target in the store.
pub type TargetId = i64;

/// Id carried by a target that has not been committed to the store yet.
pub const UNSAVED_TARGET_ID: TargetId = -1;
