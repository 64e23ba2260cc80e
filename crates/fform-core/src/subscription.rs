#![forbid(unsafe_code)]

//! Generic "did the part I care about change" filtering for snapshots.
//!
//! A subscriber describes the keys it wants with a [`Mask`]. [`filter`] copies
//! exactly those keys out of the current snapshot and reports whether any of
//! them differ from the previous snapshot.
//!
//! # Comparison classes
//!
//! Every key of a [`Snapshot`] falls into one of three classes:
//!
//! - **nested**: listed in [`Snapshot::NESTED_KEYS`]. When the mask carries an
//!   [`Interest::Nested`] for the key, only the named sub-keys are compared,
//!   so a change to an unlisted sibling does not count.
//! - **shallow**: listed in [`Snapshot::SHALLOW_EQUAL_KEYS`], compared with
//!   [`shallow_equal`].
//! - everything else is compared with [`Snapshot::key_equal`].
//!
//! A missing previous snapshot always counts as different.

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::compare::shallow_equal;
use crate::path::to_path;
use crate::value::Value;

/// Field name enum of a snapshot type.
pub trait SnapshotKey: Copy + PartialEq + Debug + 'static {
    /// Every key, in delivery order.
    const ALL: &'static [Self];
}

/// A published, immutable view that supports partial copies.
pub trait Snapshot: Default {
    type Key: SnapshotKey;

    const SHALLOW_EQUAL_KEYS: &'static [Self::Key];
    const NESTED_KEYS: &'static [Self::Key];

    /// Plain equality of one key between two snapshots.
    fn key_equal(&self, other: &Self, key: Self::Key) -> bool;

    /// The key's content as a [`Value`], for shallow and nested comparison.
    fn value_at(&self, key: Self::Key) -> Option<Value>;

    /// Copy one key from `src` into `self`.
    fn copy_key(&mut self, src: &Self, key: Self::Key);

    /// A partial snapshot holding only the keys every subscriber receives.
    fn seed(src: &Self) -> Self {
        let _ = src;
        Self::default()
    }
}

/// How much of a key a subscriber depends on.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Interest {
    /// The whole value.
    #[default]
    Whole,
    /// Only the listed sub-keys; unlisted keys are wildcards.
    Nested(BTreeMap<String, Interest>),
}

impl Interest {
    /// Interest in the given sub-keys as whole values.
    #[must_use]
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Nested(keys.into_iter().map(|k| (k.into(), Self::Whole)).collect())
    }

    /// Interest built from path keys: `["a.b", "c"]` means `{a: {b}, c}`.
    #[must_use]
    pub fn paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        fn insert(map: &mut BTreeMap<String, Interest>, segments: &[&str]) {
            let Some((head, rest)) = segments.split_first() else {
                return;
            };
            if rest.is_empty() {
                map.insert((*head).to_owned(), Interest::Whole);
                return;
            }
            let child = map
                .entry((*head).to_owned())
                .or_insert_with(|| Interest::Nested(BTreeMap::new()));
            if let Interest::Nested(children) = child {
                insert(children, rest);
            }
        }

        let mut root = BTreeMap::new();
        for path in paths {
            insert(&mut root, &to_path(path.as_ref()));
        }
        Self::Nested(root)
    }

    /// Add (or replace) interest in one sub-key.
    #[must_use]
    pub fn and(self, key: impl Into<String>, interest: Interest) -> Self {
        let mut map = match self {
            Self::Whole => BTreeMap::new(),
            Self::Nested(map) => map,
        };
        map.insert(key.into(), interest);
        Self::Nested(map)
    }
}

/// The keys a subscriber asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask<K> {
    entries: Vec<(K, Interest)>,
}

impl<K: SnapshotKey> Mask<K> {
    /// Nothing requested.
    #[must_use]
    pub fn none() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Every key, whole.
    #[must_use]
    pub fn all() -> Self {
        Self::only(K::ALL.iter().copied())
    }

    /// Exactly these keys, whole.
    #[must_use]
    pub fn only(keys: impl IntoIterator<Item = K>) -> Self {
        keys.into_iter().fold(Self::none(), Self::with)
    }

    #[must_use]
    pub fn with(self, key: K) -> Self {
        self.with_interest(key, Interest::Whole)
    }

    /// Request `key` with a nested interest.
    #[must_use]
    pub fn with_interest(mut self, key: K, interest: Interest) -> Self {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = interest,
            None => self.entries.push((key, interest)),
        }
        self
    }

    #[must_use]
    pub fn interest(&self, key: K) -> Option<&Interest> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, interest)| interest)
    }

    #[must_use]
    pub fn contains(&self, key: K) -> bool {
        self.interest(key).is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: SnapshotKey> Default for Mask<K> {
    fn default() -> Self {
        Self::all()
    }
}

/// Compare only the parts of two values named by `interest`.
#[must_use]
pub fn nested_equal(a: Option<&Value>, b: Option<&Value>, interest: &Interest) -> bool {
    match (interest, a, b) {
        (Interest::Nested(keys), Some(a), Some(b)) if a.is_container() && b.is_container() => {
            keys.iter()
                .all(|(key, sub)| nested_equal(a.child(key), b.child(key), sub))
        }
        _ => a == b,
    }
}

/// Copy the masked keys of `state` into a partial snapshot.
///
/// Returns `None` when no masked key differs from `previous` and `force` is
/// not set.
#[must_use]
pub fn filter<S: Snapshot>(
    state: &S,
    previous: Option<&S>,
    mask: &Mask<S::Key>,
    force: bool,
) -> Option<S> {
    let mut result = S::seed(state);
    let mut different = force;
    for &key in S::Key::ALL {
        let Some(interest) = mask.interest(key) else {
            continue;
        };
        result.copy_key(state, key);
        if different {
            continue;
        }
        different = match previous {
            None => true,
            Some(previous) => !key_unchanged(state, previous, key, interest),
        };
    }
    different.then_some(result)
}

fn key_unchanged<S: Snapshot>(state: &S, previous: &S, key: S::Key, interest: &Interest) -> bool {
    if S::NESTED_KEYS.contains(&key) && matches!(interest, Interest::Nested(_)) {
        nested_equal(
            state.value_at(key).as_ref(),
            previous.value_at(key).as_ref(),
            interest,
        )
    } else if S::SHALLOW_EQUAL_KEYS.contains(&key) {
        match (state.value_at(key), previous.value_at(key)) {
            (Some(a), Some(b)) => shallow_equal(&a, &b),
            (a, b) => a == b,
        }
    } else {
        state.key_equal(previous, key)
    }
}
