#![forbid(unsafe_code)]

//! Derivation of published snapshots from internal records.
//!
//! Both functions are pure: the same records always produce equal snapshots,
//! and nothing derived here is written back.

use std::rc::Rc;

use fform_core::{Value, get_in, has_any_error};

use crate::record::{FieldMap, FieldRecord, FormRecord};
use crate::state::{FieldFlags, FieldState, FormState};

fn truthy(value: Option<&Value>) -> bool {
    value.is_some_and(Value::is_truthy)
}

/// An error entry as a field sees it: a whole-array error replaces the array
/// of element errors, and `Null` means no error.
fn field_error(errors: &Value, name: &str) -> Option<Value> {
    match get_in(errors, name)? {
        Value::Null => None,
        Value::Array(array) => Some(array.error().cloned().unwrap_or_else(|| Value::Array(array.clone()))),
        other => Some(other.clone()),
    }
}

/// The snapshot of one field given the current form record.
#[must_use]
pub fn publish_field_state(form: &FormRecord, field: &FieldRecord) -> FieldState {
    let name = field.name.as_str();
    let value = get_in(&form.values, name);
    let error = field_error(&form.errors, name);
    let submit_error = form
        .submit_errors
        .as_ref()
        .and_then(|errors| get_in(errors, name))
        .filter(|e| !e.is_null())
        .cloned();
    let initial = form
        .initial_values
        .as_ref()
        .and_then(|initial| get_in(initial, name));
    let pristine = (field.is_equal)(initial, value);
    let dirty_since_last_submit = form
        .last_submitted_values
        .as_ref()
        .is_some_and(|submitted| !(field.is_equal)(get_in(submitted, name), value));
    let valid = !truthy(error.as_ref()) && !truthy(submit_error.as_ref());

    FieldState {
        name: field.name.clone(),
        active: field.active,
        data: field.data.clone(),
        dirty: !pristine,
        dirty_since_last_submit,
        error,
        initial: initial.cloned(),
        invalid: !valid,
        length: value.and_then(Value::as_array).map(|array| array.len()),
        modified: field.modified,
        modified_since_last_submit: field.modified_since_last_submit,
        pristine,
        submit_error,
        submit_failed: form.submit_failed,
        submit_succeeded: form.submit_succeeded,
        submitting: form.submitting,
        touched: field.touched,
        valid,
        validating: field.is_validating(),
        value: value.cloned(),
        visited: field.visited,
    }
}

/// The form snapshot, reusing `previous` when nothing observable changed.
#[must_use]
pub fn next_form_state(
    form: &FormRecord,
    fields: &FieldMap,
    previous: Option<&Rc<FormState>>,
) -> Rc<FormState> {
    let empty = Value::object();
    let initial_values = form.initial_values.as_ref().unwrap_or(&empty);
    let last_submitted = form.last_submitted_values.as_ref().unwrap_or(&empty);

    let mut dirty_fields = FieldFlags::new();
    let mut dirty_fields_since_last_submit = FieldFlags::new();
    let mut modified = FieldFlags::new();
    let mut touched = FieldFlags::new();
    let mut visited = FieldFlags::new();
    let mut any_modified_since_submit = false;

    for (name, field) in fields {
        let value = get_in(&form.values, name);
        if !(field.is_equal)(value, get_in(initial_values, name)) {
            dirty_fields.insert(name.clone(), true);
        }
        if !(field.is_equal)(value, get_in(last_submitted, name)) {
            dirty_fields_since_last_submit.insert(name.clone(), true);
        }
        any_modified_since_submit |= field.modified_since_last_submit;
        modified.insert(name.clone(), field.modified);
        touched.insert(name.clone(), field.touched);
        visited.insert(name.clone(), field.visited);
    }

    let submitted = form.last_submitted_values.is_some();
    let pristine = dirty_fields.is_empty();
    let submit_errors_present = form.submit_errors.as_ref().is_some_and(has_any_error);
    let has_validation_errors = truthy(form.error.as_ref()) || has_any_error(&form.errors);
    let has_submit_errors = truthy(form.submit_error.as_ref()) || submit_errors_present;
    let valid = !truthy(form.error.as_ref())
        && !truthy(form.submit_error.as_ref())
        && !has_any_error(&form.errors)
        && !submit_errors_present;

    let next = FormState {
        active: form.active.clone(),
        dirty: !pristine,
        dirty_since_last_submit: submitted && !dirty_fields_since_last_submit.is_empty(),
        dirty_fields,
        dirty_fields_since_last_submit,
        error: form.error.clone(),
        errors: form.errors.clone(),
        has_submit_errors,
        has_validation_errors,
        initial_values: form.initial_values.clone(),
        invalid: !valid,
        modified,
        modified_since_last_submit: submitted && any_modified_since_submit,
        pristine,
        submit_error: form.submit_error.clone(),
        submit_errors: form.submit_errors.clone(),
        submit_failed: form.submit_failed,
        submit_succeeded: form.submit_succeeded,
        submitting: form.submitting,
        touched,
        valid,
        validating: form.validating > 0,
        values: form.values.clone(),
        visited,
    };

    match previous {
        Some(previous) if **previous == next => Rc::clone(previous),
        _ => Rc::new(next),
    }
}
