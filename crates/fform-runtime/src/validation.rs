#![forbid(unsafe_code)]

//! Validation orchestration.
//!
//! A validation pass runs the record-level validator and the field-level
//! validators in scope, merges their results into the form's error tree, and
//! tells listeners. Validators may answer synchronously or hand back a future.
//!
//! # Merge precedence
//!
//! For each field in scope the published error is, in order of preference:
//!
//! 1. the field-level error, if the field has any field-level validator;
//! 2. the record-level error for that path;
//! 3. whatever the tree already held for it, unless the pass is limited.
//!
//! When a field declares `validate_fields`, a change to it validates only that
//! field and its dependents; the errors of every other field are carried over.
//! Without a record-level validator, a pass whose scope holds no field
//! validator is skipped entirely and only notifies.
//!
//! # Invariants
//!
//! 1. Each pass that passes the fast path takes a fresh generation number.
//! 2. Async results of a pass are merged only if no later pass has started
//!    since. The `validating` count is decremented either way.
//! 3. `form.validating` equals the number of passes with unresolved futures.
//! 4. While paused, requests are recorded and their listeners still run;
//!    resuming runs one full pass if anything was blocked.
//!
//! # Failure Modes
//!
//! - **Validator future fails**: logged at `warn`, treated as "no error".
//! - **Error path conflicts**: a field name that cannot be written into the
//!   error tree (say `a.b` while `a` holds a string error) is logged at `warn`
//!   and skipped.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::rc::Rc;

use fform_core::{Map, Value, get_in, set_in, shallow_equal};
use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture, join_all};
use tracing::{debug, warn};

use crate::error::{BoxError, Result};
use crate::notify::AfterValidation;
use crate::publish::publish_field_state;
use crate::state::FieldState;
use crate::Form;

/// Key of the form-wide error inside record-level and submit error trees.
pub const FORM_ERROR: &str = "FFORM/form-error";

/// Outcome of a single validator call.
pub enum Validation {
    /// Settled now. `None` means valid.
    Ready(Option<Value>),
    /// Settles later. A failed future counts as "no error".
    Pending(LocalBoxFuture<'static, std::result::Result<Option<Value>, BoxError>>),
}

impl Validation {
    #[must_use]
    pub fn valid() -> Self {
        Self::Ready(None)
    }

    #[must_use]
    pub fn error(error: impl Into<Value>) -> Self {
        Self::Ready(Some(error.into()))
    }

    #[must_use]
    pub fn pending(
        future: impl Future<Output = std::result::Result<Option<Value>, BoxError>> + 'static,
    ) -> Self {
        Self::Pending(future.boxed_local())
    }
}

impl From<Option<Value>> for Validation {
    fn from(error: Option<Value>) -> Self {
        Self::Ready(error)
    }
}

impl std::fmt::Debug for Validation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(error) => f.debug_tuple("Ready").field(error).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Validates the whole value tree, returning an error tree.
pub type RecordValidator = Rc<dyn Fn(&Value) -> Validation>;

/// Validates one field: `(field value, all values, field snapshot)`.
pub type FieldValidator = Rc<dyn Fn(Option<&Value>, &Value, &FieldState) -> Validation>;

/// Looks up the validator currently in effect for a registration.
pub type ValidatorThunk = Rc<dyn Fn() -> Option<FieldValidator>>;

/// Pause flags, generation counter and idle waiters of one form.
#[derive(Default)]
pub(crate) struct ValidationControl {
    paused: Cell<bool>,
    blocked: Cell<bool>,
    generation: Cell<u64>,
    idle_waiters: RefCell<Vec<oneshot::Sender<()>>>,
}

/// Results collected by one pass.
struct Pass {
    generation: u64,
    scope: Vec<String>,
    limited: bool,
    has_record_validator: bool,
    record: Map,
    async_record: Map,
    field_errors: BTreeMap<String, Option<Value>>,
    field_validated: BTreeSet<String>,
}

enum Settled {
    Record(std::result::Result<Option<Value>, BoxError>),
    Field(String, std::result::Result<Option<Value>, BoxError>),
}

fn truthy(value: Option<&Value>) -> bool {
    value.is_some_and(Value::is_truthy)
}

/// Record-level results as a map. Anything but an object is "no errors".
fn error_map(errors: Option<&Value>) -> Map {
    match errors {
        Some(Value::Object(map)) => map.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(other) => {
            warn!(kind = other.kind(), "record-level errors must be an object; ignoring");
            Map::new()
        }
    }
}

impl Form {
    /// Suspend validation. Changes still notify, with stale errors.
    pub fn pause_validation(&self) {
        self.inner.validation.paused.set(true);
    }

    /// Resume validation, running one full pass if any was skipped.
    pub fn resume_validation(&self) -> Result<()> {
        let control = &self.inner.validation;
        control.paused.set(false);
        if control.blocked.replace(false) {
            self.run_validation(None, AfterValidation::FieldsThenForm)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_validation_paused(&self) -> bool {
        self.inner.validation.paused.get()
    }

    /// Resolves once no async validation is outstanding.
    pub(crate) fn when_idle(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if self.inner.state.borrow().form.validating == 0 {
            let _ = tx.send(());
        } else {
            self.inner.validation.idle_waiters.borrow_mut().push(tx);
        }
        rx
    }

    pub(crate) fn run_validation(&self, changed: Option<&str>, after: AfterValidation) -> Result<()> {
        let control = &self.inner.validation;
        if control.paused.get() {
            control.blocked.set(true);
            self.after_validation(&after);
            return Ok(());
        }

        let validate = self.inner.settings.borrow().validate.clone();
        let (thunks, dependents) = {
            let st = self.inner.state.borrow();
            let thunks: Vec<(String, Vec<_>)> = st
                .fields
                .iter()
                .map(|(name, field)| (name.clone(), field.validators.values().cloned().collect()))
                .collect();
            let dependents = changed
                .and_then(|name| st.fields.get(name))
                .and_then(|field| field.validate_fields.clone());
            (thunks, dependents)
        };
        let validators: BTreeMap<String, Vec<FieldValidator>> = thunks
            .into_iter()
            .map(|(name, thunks)| (name, thunks.iter().filter_map(|thunk| thunk()).collect::<Vec<_>>()))
            .filter(|(_, validators)| !validators.is_empty())
            .collect();
        let (scope, limited) = match (changed, dependents) {
            (Some(changed), Some(mut dependents)) => {
                dependents.push(changed.to_owned());
                (dependents, true)
            }
            _ => (self.get_registered_fields(), false),
        };
        if validate.is_none() && !scope.iter().any(|name| validators.contains_key(name)) {
            self.after_validation(&after);
            return Ok(());
        }

        let generation = control.generation.get() + 1;
        control.generation.set(generation);

        let mut pass = Pass {
            generation,
            scope,
            limited,
            has_record_validator: validate.is_some(),
            record: Map::new(),
            async_record: Map::new(),
            field_errors: BTreeMap::new(),
            field_validated: BTreeSet::new(),
        };
        let mut pending: Vec<LocalBoxFuture<'static, Settled>> = Vec::new();
        let mut pending_fields: Vec<String> = Vec::new();
        let values = self.inner.state.borrow().form.values.clone();

        if let Some(validate) = validate {
            match validate(&values) {
                Validation::Ready(errors) => pass.record = error_map(errors.as_ref()),
                Validation::Pending(future) => {
                    pending.push(future.map(Settled::Record).boxed_local());
                }
            }
        }

        let scope = pass.scope.clone();
        for name in &scope {
            let Some(field_validators) = validators.get(name) else {
                continue;
            };
            let snapshot = {
                let st = self.inner.state.borrow();
                st.fields
                    .get(name)
                    .map(|field| publish_field_state(&st.form, field))
            };
            let Some(snapshot) = snapshot else {
                continue;
            };
            pass.field_validated.insert(name.clone());
            let value = get_in(&values, name);
            let mut error: Option<Value> = None;
            for validator in field_validators {
                match validator(value, &values, &snapshot) {
                    Validation::Ready(result) => {
                        if !truthy(error.as_ref()) {
                            error = result;
                        }
                    }
                    Validation::Pending(future) => {
                        if let Some(field) = self.inner.state.borrow_mut().fields.get_mut(name) {
                            field.validating += 1;
                        }
                        pending_fields.push(name.clone());
                        let weak = self.downgrade();
                        let field_name = name.clone();
                        pending.push(
                            async move {
                                let result = future.await;
                                if let Some(form) = weak.upgrade() {
                                    form.settle_field(&field_name);
                                }
                                Settled::Field(field_name, result)
                            }
                            .boxed_local(),
                        );
                    }
                }
            }
            pass.field_errors.insert(name.clone(), error);
        }

        let has_async = !pending.is_empty();
        if has_async {
            self.inner.state.borrow_mut().form.validating += 1;
            self.after_validation(&after);
        }
        self.process_errors(&pass, false);
        self.after_validation(&after);

        if has_async {
            let weak = self.downgrade();
            // Async results can change any field's error.
            let task_after = match &after {
                AfterValidation::FormOnly => AfterValidation::FieldsThenForm,
                other => other.clone(),
            };
            let spawned = self.inner.tasks.spawn(async move {
                let settled = join_all(pending).await;
                if let Some(form) = weak.upgrade() {
                    form.finish_async_pass(pass, settled, &task_after);
                }
            });
            if let Err(err) = spawned {
                warn!(error = %err, "could not spawn async validation");
                for name in &pending_fields {
                    self.settle_field(name);
                }
                self.leave_async_pass(&after);
                return Err(err.into());
            }
        }
        Ok(())
    }

    fn settle_field(&self, name: &str) {
        if let Some(field) = self.inner.state.borrow_mut().fields.get_mut(name) {
            field.validating = field.validating.saturating_sub(1);
        }
    }

    fn finish_async_pass(&self, mut pass: Pass, settled: Vec<Settled>, after: &AfterValidation) {
        for outcome in settled {
            match outcome {
                Settled::Record(Ok(errors)) => pass.async_record = error_map(errors.as_ref()),
                Settled::Record(Err(err)) => {
                    warn!(error = %err, "record-level validator failed");
                }
                Settled::Field(name, Ok(error)) => {
                    let registered = self.inner.state.borrow().fields.contains_key(&name);
                    let current = pass.field_errors.get(&name).and_then(Option::as_ref);
                    if registered && truthy(error.as_ref()) && !truthy(current) {
                        pass.field_errors.insert(name, error);
                    }
                }
                Settled::Field(name, Err(err)) => {
                    warn!(field = %name, error = %err, "field validator failed");
                }
            }
        }

        let latest = self.inner.validation.generation.get();
        if latest > pass.generation {
            debug!(
                generation = pass.generation,
                latest, "discarding results of superseded validation"
            );
        } else {
            self.process_errors(&pass, true);
        }
        self.leave_async_pass(after);
    }

    /// Bookkeeping once every future of an async pass has settled.
    fn leave_async_pass(&self, after: &AfterValidation) {
        {
            let mut st = self.inner.state.borrow_mut();
            st.form.validating = st.form.validating.saturating_sub(1);
        }
        self.after_validation(after);

        let (idle, published_validating) = {
            let st = self.inner.state.borrow();
            (
                st.form.validating == 0,
                st.last_form_state.as_ref().is_some_and(|state| state.validating),
            )
        };
        if !idle {
            return;
        }
        let waiters = std::mem::take(&mut *self.inner.validation.idle_waiters.borrow_mut());
        for waiter in waiters {
            let _ = waiter.send(());
        }
        if published_validating {
            self.notify_form_listeners();
        }
    }

    fn process_errors(&self, pass: &Pass, after_async: bool) {
        let mut st = self.inner.state.borrow_mut();
        let st = &mut *st;

        let async_bucket = if after_async {
            pass.async_record.clone()
        } else {
            error_map(Some(&st.form.async_errors))
        };
        let carried = if pass.limited {
            error_map(Some(&st.form.errors))
        } else {
            Map::new()
        };
        // Later buckets win: im's union keeps the receiver's entries.
        let mut merged = Value::Object(async_bucket.clone().union(pass.record.clone().union(carried)));
        let record = Value::Object(pass.record.clone());

        for name in &pass.scope {
            if !st.fields.contains_key(name) {
                continue;
            }
            let record_error = get_in(&record, name).filter(|e| e.is_truthy());
            let field_error = pass
                .field_errors
                .get(name)
                .and_then(Option::as_ref)
                .filter(|e| e.is_truthy());
            let error = match (field_error, record_error) {
                (Some(error), _) if pass.field_validated.contains(name) => Some(error.clone()),
                (_, Some(error)) if pass.has_record_validator => Some(error.clone()),
                (_, None) if !pass.limited => get_in(&merged, name).cloned(),
                _ => None,
            };
            match set_in(&merged, name, error, false) {
                Ok(next) => merged = next,
                Err(err) => warn!(field = %name, error = %err, "cannot merge field error"),
            }
        }

        if !shallow_equal(&st.form.errors, &merged) {
            st.form.errors = merged;
        }
        if after_async {
            st.form.async_errors = Value::Object(pass.async_record.clone());
        }
        st.form.error = pass
            .record
            .get(FORM_ERROR)
            .or_else(|| async_bucket.get(FORM_ERROR))
            .filter(|e| !e.is_null())
            .cloned();
    }
}
