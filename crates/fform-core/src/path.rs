#![forbid(unsafe_code)]

//! Path-addressed reads and copy-on-write writes into a [`Value`] tree.
//!
//! A path key is a string such as `customers[0].firstName`. It is split on
//! runs of `.`, `[` and `]`; segments that parse as `usize` address array
//! slots, every other segment addresses an object key.
//!
//! # Invariants
//!
//! 1. `get_in(&set_in(root, p, Some(v), _)?, p) == Some(&v)` for every valid `p`.
//! 2. `set_in` never mutates its input. Only the containers on the path from
//!    the root to the written leaf are copied; siblings are shared.
//! 3. Writing `None` prunes: an object that loses its only key disappears
//!    from its parent, cascading upward, except that an object sitting
//!    directly in an array slot collapses to `{}` so later indices keep their
//!    positions. With `destroy_arrays` the slot is spliced out instead and an
//!    emptied array is pruned too.
//!
//! # Failure Modes
//!
//! | Condition | Result |
//! |-----------|--------|
//! | `Null` root or empty key | [`PathError::InvalidArgument`] |
//! | numeric segment on an object, named segment on an array | [`PathError::TypeConflict`] |
//! | any segment on a scalar | [`PathError::TypeConflict`] |
//! | index above [`MAX_ARRAY_INDEX`] | [`PathError::IndexTooLarge`] |

use smallvec::SmallVec;

use crate::value::{Array, Map, Value};

/// Largest array index `set_in` will pad up to.
pub const MAX_ARRAY_INDEX: usize = 65_535;

/// Parsed path segments. Most form paths are shallow.
pub type Segments<'a> = SmallVec<[&'a str; 8]>;

/// Structural mistakes in path usage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("cannot set segment `{segment}` of `{path}` on {found}")]
    TypeConflict {
        path: String,
        segment: String,
        found: &'static str,
    },

    #[error("index {index} in `{path}` exceeds the supported array length")]
    IndexTooLarge { path: String, index: usize },
}

impl PathError {
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

/// Split a path key into segments, dropping empty ones.
#[must_use]
pub fn to_path(key: &str) -> Segments<'_> {
    key.split(|c| matches!(c, '.' | '[' | ']'))
        .filter(|segment| !segment.is_empty())
        .collect()
}

fn index_of(segment: &str) -> Option<usize> {
    segment.parse().ok()
}

/// Read the value at `key`. Returns `None` as soon as the walk meets a
/// scalar, a missing key, or a non-numeric segment on an array.
#[must_use]
pub fn get_in<'v>(root: &'v Value, key: &str) -> Option<&'v Value> {
    to_path(key)
        .iter()
        .try_fold(root, |current, segment| current.child(segment))
}

/// Write (`Some`) or delete (`None`) the value at `key`, returning the new root.
pub fn set_in(
    root: &Value,
    key: &str,
    value: Option<Value>,
    destroy_arrays: bool,
) -> Result<Value, PathError> {
    if root.is_null() {
        return Err(PathError::invalid_argument("cannot set into a null root"));
    }
    let path = to_path(key);
    if path.is_empty() {
        return Err(PathError::invalid_argument(format!(
            "`{key}` does not name a location"
        )));
    }
    let writer = Writer {
        key,
        path: &path,
        destroy_arrays,
    };
    Ok(writer.write(Some(root), 0, value)?.unwrap_or_else(Value::object))
}

struct Writer<'a> {
    key: &'a str,
    path: &'a [&'a str],
    destroy_arrays: bool,
}

impl Writer<'_> {
    fn conflict(&self, segment: &str, found: &Value) -> PathError {
        PathError::TypeConflict {
            path: self.key.to_owned(),
            segment: segment.to_owned(),
            found: found.kind(),
        }
    }

    fn write(
        &self,
        current: Option<&Value>,
        depth: usize,
        value: Option<Value>,
    ) -> Result<Option<Value>, PathError> {
        let Some(&segment) = self.path.get(depth) else {
            return Ok(value);
        };
        let current = current.filter(|c| !c.is_null());
        match index_of(segment) {
            None => self.write_key(current, depth, segment, value),
            Some(index) if index > MAX_ARRAY_INDEX => Err(PathError::IndexTooLarge {
                path: self.key.to_owned(),
                index,
            }),
            Some(index) => self.write_index(current, depth, segment, index, value),
        }
    }

    fn write_key(
        &self,
        current: Option<&Value>,
        depth: usize,
        segment: &str,
        value: Option<Value>,
    ) -> Result<Option<Value>, PathError> {
        let map = match current {
            None => {
                let child = self.write(None, depth + 1, value)?;
                return Ok(child.map(|child| Value::Object(Map::unit(segment.to_owned(), child))));
            }
            Some(Value::Object(map)) => map,
            Some(other) => return Err(self.conflict(segment, other)),
        };
        let existing = map.get(segment);
        match self.write(existing, depth + 1, value)? {
            Some(child) => Ok(Some(Value::Object(map.update(segment.to_owned(), child)))),
            None if existing.is_none() && map.is_empty() => Ok(None),
            None if existing.is_some() && map.len() <= 1 => {
                let in_array_slot = depth
                    .checked_sub(1)
                    .and_then(|parent| self.path.get(parent))
                    .is_some_and(|parent| index_of(parent).is_some());
                if in_array_slot && !self.destroy_arrays {
                    Ok(Some(Value::object()))
                } else {
                    Ok(None)
                }
            }
            None => Ok(Some(Value::Object(map.without(segment)))),
        }
    }

    fn write_index(
        &self,
        current: Option<&Value>,
        depth: usize,
        segment: &str,
        index: usize,
        value: Option<Value>,
    ) -> Result<Option<Value>, PathError> {
        let array = match current {
            None => {
                let child = self.write(None, depth + 1, value)?;
                return Ok(child.map(|child| {
                    let mut array = Array::new();
                    array.set(index, child);
                    Value::Array(array)
                }));
            }
            Some(Value::Array(array)) => array,
            Some(other) => return Err(self.conflict(segment, other)),
        };
        let result = self.write(array.get(index), depth + 1, value)?;
        let mut array = array.clone();
        match result {
            Some(child) => array.set(index, child),
            None if self.destroy_arrays => {
                array.remove(index);
                if array.is_empty() {
                    return Ok(None);
                }
            }
            None => {
                if index < array.len() {
                    array.set(index, Value::Null);
                }
            }
        }
        Ok(Some(Value::Array(array)))
    }
}
