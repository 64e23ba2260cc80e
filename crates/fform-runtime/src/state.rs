#![forbid(unsafe_code)]

//! Published snapshots of form and field state.
//!
//! These are the read-only views handed to subscribers. Every key can be
//! requested individually through a [`FormMask`] or [`FieldMask`]; keys a
//! subscriber did not ask for hold their `Default` value in the snapshot it
//! receives.

use std::collections::BTreeMap;

use fform_core::{Mask, Snapshot, SnapshotKey, Value};

/// Per-field boolean flags keyed by field name.
pub type FieldFlags = BTreeMap<String, bool>;

pub type FormMask = Mask<FormKey>;
pub type FieldMask = Mask<FieldKey>;

/// Declares the key enum of a snapshot together with per-key equality and
/// copy helpers.
macro_rules! snapshot_keys {
    ($snapshot:ident, $key:ident { $($variant:ident => $field:ident),* $(,)? }) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $key {
            $($variant),*
        }

        impl SnapshotKey for $key {
            const ALL: &'static [Self] = &[$($key::$variant),*];
        }

        impl $snapshot {
            fn field_equal(&self, other: &Self, key: $key) -> bool {
                match key {
                    $($key::$variant => self.$field == other.$field),*
                }
            }

            fn copy_field(&mut self, src: &Self, key: $key) {
                match key {
                    $($key::$variant => self.$field = src.$field.clone()),*
                }
            }
        }
    };
}

fn flags_value(flags: &FieldFlags) -> Value {
    flags.iter().map(|(k, v)| (k.clone(), *v)).collect()
}

// ─── Form ───────────────────────────────────────────────────────────────

/// Snapshot of the whole form.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormState {
    pub active: Option<String>,
    pub dirty: bool,
    pub dirty_fields: FieldFlags,
    pub dirty_fields_since_last_submit: FieldFlags,
    pub dirty_since_last_submit: bool,
    pub error: Option<Value>,
    pub errors: Value,
    pub has_submit_errors: bool,
    pub has_validation_errors: bool,
    pub initial_values: Option<Value>,
    pub invalid: bool,
    pub modified: FieldFlags,
    pub modified_since_last_submit: bool,
    pub pristine: bool,
    pub submit_error: Option<Value>,
    pub submit_errors: Option<Value>,
    pub submit_failed: bool,
    pub submit_succeeded: bool,
    pub submitting: bool,
    pub touched: FieldFlags,
    pub valid: bool,
    pub validating: bool,
    pub values: Value,
    pub visited: FieldFlags,
}

snapshot_keys!(FormState, FormKey {
    Active => active,
    Dirty => dirty,
    DirtyFields => dirty_fields,
    DirtyFieldsSinceLastSubmit => dirty_fields_since_last_submit,
    DirtySinceLastSubmit => dirty_since_last_submit,
    Error => error,
    Errors => errors,
    HasSubmitErrors => has_submit_errors,
    HasValidationErrors => has_validation_errors,
    InitialValues => initial_values,
    Invalid => invalid,
    Modified => modified,
    ModifiedSinceLastSubmit => modified_since_last_submit,
    Pristine => pristine,
    SubmitError => submit_error,
    SubmitErrors => submit_errors,
    SubmitFailed => submit_failed,
    SubmitSucceeded => submit_succeeded,
    Submitting => submitting,
    Touched => touched,
    Valid => valid,
    Validating => validating,
    Values => values,
    Visited => visited,
});

impl Snapshot for FormState {
    type Key = FormKey;

    const SHALLOW_EQUAL_KEYS: &'static [FormKey] = &[FormKey::Touched, FormKey::Visited];
    const NESTED_KEYS: &'static [FormKey] = &[FormKey::Values];

    fn key_equal(&self, other: &Self, key: FormKey) -> bool {
        self.field_equal(other, key)
    }

    fn value_at(&self, key: FormKey) -> Option<Value> {
        match key {
            FormKey::Touched => Some(flags_value(&self.touched)),
            FormKey::Visited => Some(flags_value(&self.visited)),
            FormKey::Values => Some(self.values.clone()),
            _ => None,
        }
    }

    fn copy_key(&mut self, src: &Self, key: FormKey) {
        self.copy_field(src, key);
    }
}

// ─── Field ──────────────────────────────────────────────────────────────

/// Snapshot of one registered field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldState {
    pub name: String,
    pub active: bool,
    pub data: Value,
    pub dirty: bool,
    pub dirty_since_last_submit: bool,
    pub error: Option<Value>,
    pub initial: Option<Value>,
    pub invalid: bool,
    pub length: Option<usize>,
    pub modified: bool,
    pub modified_since_last_submit: bool,
    pub pristine: bool,
    pub submit_error: Option<Value>,
    pub submit_failed: bool,
    pub submit_succeeded: bool,
    pub submitting: bool,
    pub touched: bool,
    pub valid: bool,
    pub validating: bool,
    pub value: Option<Value>,
    pub visited: bool,
}

snapshot_keys!(FieldState, FieldKey {
    Active => active,
    Data => data,
    Dirty => dirty,
    DirtySinceLastSubmit => dirty_since_last_submit,
    Error => error,
    Initial => initial,
    Invalid => invalid,
    Length => length,
    Modified => modified,
    ModifiedSinceLastSubmit => modified_since_last_submit,
    Pristine => pristine,
    SubmitError => submit_error,
    SubmitFailed => submit_failed,
    SubmitSucceeded => submit_succeeded,
    Submitting => submitting,
    Touched => touched,
    Valid => valid,
    Validating => validating,
    Value => value,
    Visited => visited,
});

impl Snapshot for FieldState {
    type Key = FieldKey;

    const SHALLOW_EQUAL_KEYS: &'static [FieldKey] = &[FieldKey::Data];
    const NESTED_KEYS: &'static [FieldKey] = &[FieldKey::Value];

    fn key_equal(&self, other: &Self, key: FieldKey) -> bool {
        self.field_equal(other, key)
    }

    fn value_at(&self, key: FieldKey) -> Option<Value> {
        match key {
            FieldKey::Data => Some(self.data.clone()),
            FieldKey::Value => self.value.clone(),
            _ => None,
        }
    }

    fn copy_key(&mut self, src: &Self, key: FieldKey) {
        self.copy_field(src, key);
    }

    fn seed(src: &Self) -> Self {
        Self {
            name: src.name.clone(),
            ..Self::default()
        }
    }
}
