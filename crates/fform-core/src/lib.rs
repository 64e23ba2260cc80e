#![forbid(unsafe_code)]

//! Core: persistent values, path addressing, structural comparison, and
//! subscription filtering.
//!
//! Nothing in this crate performs I/O or holds shared state. The engine in
//! `fform-runtime` builds on these pieces.

pub mod compare;
pub mod path;
pub mod subscription;
pub mod value;

pub use compare::{has_any_error, shallow_equal};
pub use path::{get_in, set_in, to_path, PathError, MAX_ARRAY_INDEX};
pub use subscription::{filter, nested_equal, Interest, Mask, Snapshot, SnapshotKey};
pub use value::{Array, Map, Value};
