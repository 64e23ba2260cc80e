#![forbid(unsafe_code)]

//! Internal mutable records behind a form.
//!
//! One [`InternalState`] exists per form. Only the form's own methods and
//! mutators (through [`MutableState`](crate::MutableState)) ever touch it;
//! everything handed to observers is a snapshot.
//!
//! # Invariants
//!
//! 1. `form.values` is always an object.
//! 2. A name is in `fields` iff it has at least one live registration or a
//!    mutator synthesised it.
//! 3. A [`FieldRecord`]'s `validating` counter equals the number of its
//!    unresolved async validator calls.
//! 4. Subscriber ids are unique per form and increase in registration order.

use std::collections::BTreeMap;
use std::rc::Rc;

use ahash::RandomState;
use fform_core::{Mask, Snapshot, Value, filter};
use indexmap::IndexMap;

use crate::config::{AfterSubmit, BeforeSubmit, FieldConfig, IsEqual, default_is_equal};
use crate::state::{FieldState, FormState};
use crate::validation::ValidatorThunk;

/// Registered fields in registration order.
pub type FieldMap = IndexMap<String, FieldRecord, RandomState>;

// ─── Form record ────────────────────────────────────────────────────────

/// Mutable form-level state. Derived flags (pristine, valid, ...) are
/// computed at publish time and not stored.
#[derive(Debug, Clone)]
pub struct FormRecord {
    pub active: Option<String>,
    pub async_errors: Value,
    pub error: Option<Value>,
    pub errors: Value,
    pub initial_values: Option<Value>,
    pub last_submitted_values: Option<Value>,
    pub reset_while_submitting: bool,
    pub submit_error: Option<Value>,
    pub submit_errors: Option<Value>,
    pub submit_failed: bool,
    pub submit_succeeded: bool,
    pub submitting: bool,
    /// Async validation passes still outstanding.
    pub validating: u32,
    pub values: Value,
}

impl FormRecord {
    pub(crate) fn new(initial_values: Option<Value>) -> Self {
        Self {
            active: None,
            async_errors: Value::object(),
            error: None,
            errors: Value::object(),
            values: initial_values.clone().unwrap_or_else(Value::object),
            initial_values,
            last_submitted_values: None,
            reset_while_submitting: false,
            submit_error: None,
            submit_errors: None,
            submit_failed: false,
            submit_succeeded: false,
            submitting: false,
            validating: 0,
        }
    }
}

// ─── Field record ───────────────────────────────────────────────────────

/// Mutable per-field interaction state.
#[derive(Clone)]
pub struct FieldRecord {
    pub name: String,
    pub active: bool,
    pub after_submit: Option<AfterSubmit>,
    pub before_submit: Option<BeforeSubmit>,
    pub data: Value,
    pub is_equal: IsEqual,
    /// Last snapshot published to this field's subscribers.
    pub last_field_state: Option<Rc<FieldState>>,
    pub modified: bool,
    pub modified_since_last_submit: bool,
    pub touched: bool,
    pub validate_fields: Option<Vec<String>>,
    pub visited: bool,
    pub(crate) validators: BTreeMap<u64, ValidatorThunk>,
    pub(crate) validating: u32,
}

impl FieldRecord {
    /// A bare record, as a mutator would synthesise it.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: false,
            after_submit: None,
            before_submit: None,
            data: Value::object(),
            is_equal: default_is_equal(),
            last_field_state: None,
            modified: false,
            modified_since_last_submit: false,
            touched: false,
            validate_fields: None,
            visited: false,
            validators: BTreeMap::new(),
            validating: 0,
        }
    }

    pub(crate) fn from_config(name: &str, config: &FieldConfig) -> Self {
        Self {
            after_submit: config.after_submit.clone(),
            before_submit: config.before_submit.clone(),
            data: config.data.clone().unwrap_or_else(Value::object),
            is_equal: config.is_equal.clone().unwrap_or_else(default_is_equal),
            validate_fields: config.validate_fields.clone(),
            ..Self::new(name)
        }
    }

    /// Clear interaction flags and forget the last published snapshot.
    pub fn reset_interaction(&mut self) {
        self.active = false;
        self.last_field_state = None;
        self.modified = false;
        self.touched = false;
        self.validating = 0;
        self.visited = false;
    }

    /// Number of validators registered for this field.
    #[must_use]
    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    #[must_use]
    pub fn is_validating(&self) -> bool {
        self.validating > 0
    }
}

impl std::fmt::Debug for FieldRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldRecord")
            .field("name", &self.name)
            .field("active", &self.active)
            .field("modified", &self.modified)
            .field("touched", &self.touched)
            .field("visited", &self.visited)
            .field("validators", &self.validators.len())
            .field("validating", &self.validating)
            .finish_non_exhaustive()
    }
}

// ─── Subscribers ────────────────────────────────────────────────────────

pub(crate) type Listener<S> = Rc<dyn Fn(&S)>;

struct Subscriber<S: Snapshot> {
    callback: Listener<S>,
    mask: Mask<S::Key>,
    notified: bool,
    defer_first: bool,
    /// A deferred first delivery is waiting for the scheduler.
    queued: bool,
    last_delivered: Option<Rc<S>>,
}

/// A snapshot ready to hand to one subscriber.
pub(crate) struct Delivery<S> {
    pub callback: Listener<S>,
    pub snapshot: Rc<S>,
    pub deferred: bool,
}

/// Subscribers of one topic (the form, or one field name), by id.
pub(crate) struct SubscriberTable<S: Snapshot> {
    entries: BTreeMap<u64, Subscriber<S>>,
}

impl<S: Snapshot> Default for SubscriberTable<S> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<S: Snapshot + PartialEq> SubscriberTable<S> {
    pub fn insert(&mut self, id: u64, callback: Listener<S>, mask: Mask<S::Key>, defer_first: bool) {
        self.entries.insert(
            id,
            Subscriber {
                callback,
                mask,
                notified: false,
                defer_first,
                queued: false,
                last_delivered: None,
            },
        );
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids in subscription order.
    pub fn ids(&self) -> smallvec::SmallVec<[u64; 8]> {
        self.entries.keys().copied().collect()
    }

    /// Filter `state` for subscriber `id`.
    ///
    /// Returns what to deliver, or `None` when the entry is gone, nothing it
    /// asked for changed, or it was already handed an identical snapshot.
    /// A never-notified entry is always forced. While a deferred first
    /// delivery is queued, newer snapshots replace the queued one instead of
    /// being delivered inline.
    pub fn prepare(&mut self, id: u64, state: &S, previous: Option<&S>, force: bool) -> Option<Delivery<S>> {
        let entry = self.entries.get_mut(&id)?;
        let first = !entry.notified;
        let result = filter(state, previous, &entry.mask, force || first)?;
        entry.notified = true;
        if entry.last_delivered.as_deref() == Some(&result) {
            return None;
        }
        let snapshot = Rc::new(result);
        entry.last_delivered = Some(Rc::clone(&snapshot));
        if entry.queued {
            return None;
        }
        let deferred = first && entry.defer_first;
        entry.queued = deferred;
        Some(Delivery {
            callback: Rc::clone(&entry.callback),
            snapshot,
            deferred,
        })
    }

    /// The latest snapshot for a queued first delivery, releasing the entry
    /// back to inline delivery.
    pub fn take_queued(&mut self, id: u64) -> Option<Delivery<S>> {
        let entry = self.entries.get_mut(&id)?;
        if !std::mem::replace(&mut entry.queued, false) {
            return None;
        }
        Some(Delivery {
            callback: Rc::clone(&entry.callback),
            snapshot: Rc::clone(entry.last_delivered.as_ref()?),
            deferred: false,
        })
    }

    /// Forget what each entry was last handed, so the next matching snapshot
    /// is delivered even if it equals the previous one.
    pub fn forget_deliveries(&mut self) {
        for entry in self.entries.values_mut().filter(|entry| !entry.queued) {
            entry.last_delivered = None;
        }
    }
}

// ─── Whole state ────────────────────────────────────────────────────────

/// Everything a form mutates.
pub struct InternalState {
    pub form: FormRecord,
    pub fields: FieldMap,
    pub(crate) field_subscribers: BTreeMap<String, SubscriberTable<FieldState>>,
    pub(crate) subscribers: SubscriberTable<FormState>,
    /// Field name currently served by each field subscription id.
    pub(crate) registrations: BTreeMap<u64, String>,
    /// Last snapshot delivered to form subscribers.
    pub(crate) last_form_state: Option<Rc<FormState>>,
    /// Last snapshot handed out by `get_state`.
    pub(crate) last_read_state: Option<Rc<FormState>>,
    next_id: u64,
}

impl InternalState {
    pub(crate) fn new(initial_values: Option<Value>) -> Self {
        Self {
            form: FormRecord::new(initial_values),
            fields: FieldMap::default(),
            field_subscribers: BTreeMap::new(),
            subscribers: SubscriberTable::default(),
            registrations: BTreeMap::new(),
            last_form_state: None,
            last_read_state: None,
            next_id: 0,
        }
    }

    pub(crate) fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Does `name` have at least one registered subscriber?
    #[must_use]
    pub fn has_subscribers(&self, name: &str) -> bool {
        self.field_subscribers.contains_key(name)
    }

    /// Clear one field's interaction flags and make its subscribers'
    /// next notification go out even if nothing they watch changed.
    pub(crate) fn reset_field_interaction(&mut self, name: &str) {
        let Some(field) = self.fields.get_mut(name) else {
            return;
        };
        field.reset_interaction();
        if self.form.active.as_deref() == Some(name) {
            self.form.active = None;
        }
        if let Some(table) = self.field_subscribers.get_mut(name) {
            table.forget_deliveries();
        }
    }

    pub(crate) fn mark_all_touched(&mut self) {
        for field in self.fields.values_mut() {
            field.touched = true;
        }
    }

    pub(crate) fn reset_modified_after_submit(&mut self) {
        for field in self.fields.values_mut() {
            field.modified_since_last_submit = false;
        }
    }
}
