#![forbid(unsafe_code)]

//! The form handle.
//!
//! A [`Form`] is a cheap clonable handle to one engine instance. Every
//! operation is a method on it; there is no global state. Async work spawned
//! by the form holds a [`WeakForm`], so dropping every `Form` handle turns
//! in-flight tasks into no-ops.
//!
//! # Invariants
//!
//! 1. No borrow of the form's state is held while caller code runs
//!    (subscribers, validators, submit handlers, hooks). Mutators are the
//!    exception: they run inside the borrow and cannot reach the `Form`.
//! 2. [`Form::get_state`] returns the identical `Rc` until something
//!    observable changes.
//! 3. Every registration gets exactly one forced first notification.
//!
//! # Failure Modes
//!
//! - **Path conflicts**: `change`, `initialize` and `register_field` return
//!   [`FormError::Path`] and leave the values untouched.
//! - **Unsubscribe conflicts**: a path error while pruning on unregister
//!   cannot be returned from `Drop`; it is logged at `warn` and the value is
//!   left in place.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use fform_core::{Value, get_in, set_in};
use tracing::{debug, warn};

use crate::config::{ConfigValue, FieldConfig, FormConfig, Settings};
use crate::error::{FormError, Result};
use crate::notify::{AfterValidation, BatchGuard, Notifier};
use crate::publish::{next_form_state, publish_field_state};
use crate::record::{FieldRecord, InternalState};
use crate::state::{FieldMask, FieldState, FormMask, FormState};
use crate::task::TaskHost;
use crate::validation::ValidationControl;

pub(crate) struct FormInner {
    pub(crate) state: RefCell<InternalState>,
    pub(crate) settings: RefCell<Settings>,
    pub(crate) notifier: Notifier,
    pub(crate) validation: ValidationControl,
    pub(crate) tasks: TaskHost,
}

/// Handle to one form. Clones share the same form.
#[derive(Clone)]
pub struct Form {
    pub(crate) inner: Rc<FormInner>,
}

/// A non-owning [`Form`] handle.
#[derive(Clone)]
pub struct WeakForm(Weak<FormInner>);

impl WeakForm {
    #[must_use]
    pub fn upgrade(&self) -> Option<Form> {
        self.0.upgrade().map(|inner| Form { inner })
    }
}

impl fmt::Debug for WeakForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakForm")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}

/// Create a form. Fails only when `config` has no submit handler.
pub fn create_form(config: FormConfig) -> Result<Form> {
    Form::new(config)
}

impl Form {
    pub fn new(config: FormConfig) -> Result<Self> {
        let settings = Settings::from_config(&config)?;
        let initial_values = config.initial_values.filter(|values| !values.is_null());
        let form = Self {
            inner: Rc::new(FormInner {
                state: RefCell::new(InternalState::new(initial_values)),
                settings: RefCell::new(settings),
                notifier: Notifier::default(),
                validation: ValidationControl::default(),
                tasks: TaskHost::new(config.spawner),
            }),
        };
        form.run_validation(None, AfterValidation::FormOnly)?;
        Ok(form)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakForm {
        WeakForm(Rc::downgrade(&self.inner))
    }

    /// Drive the form's own task pool until every task is blocked.
    ///
    /// Returns `false` when the form runs on a host spawner.
    pub fn run_until_stalled(&self) -> bool {
        self.inner.tasks.run_until_stalled()
    }

    // ─── Values ─────────────────────────────────────────────────────────

    /// Set the value of `name`.
    pub fn change(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.change_value(name, Some(value.into()))
    }

    /// Set or, with `None`, remove the value of `name`.
    pub fn change_value(&self, name: &str, value: Option<Value>) -> Result<()> {
        {
            let mut st = self.inner.state.borrow_mut();
            let st = &mut *st;
            let current = get_in(&st.form.values, name);
            let unchanged = match st.fields.get(name) {
                Some(field) => (field.is_equal)(current, value.as_ref()),
                None => current == value.as_ref(),
            };
            if unchanged {
                return Ok(());
            }
            st.form.values = set_in(&st.form.values, name, value, false)?;
            let submitted = st.form.last_submitted_values.is_some();
            if let Some(field) = st.fields.get_mut(name) {
                field.modified = true;
                field.modified_since_last_submit = submitted;
            }
        }
        if self.inner.settings.borrow().validate_on_blur {
            self.notify_field_listeners(None);
            self.notify_form_listeners();
            Ok(())
        } else {
            self.run_validation(Some(name), AfterValidation::FieldsThenForm)
        }
    }

    /// Replace initial values and values.
    ///
    /// With `keepDirtyOnReinitialize`, fields whose value differs from their
    /// old initial value keep it.
    pub fn initialize(&self, values: impl Into<Value>) -> Result<()> {
        let values = values.into();
        let values = if values.is_null() { Value::object() } else { values };
        let keep_dirty = self.inner.settings.borrow().keep_dirty_on_reinitialize;
        {
            let mut st = self.inner.state.borrow_mut();
            let st = &mut *st;
            let mut next = values.clone();
            if keep_dirty {
                let empty = Value::object();
                let old_initial = st.form.initial_values.as_ref().unwrap_or(&empty);
                for (name, field) in &st.fields {
                    let current = get_in(&st.form.values, name);
                    if !(field.is_equal)(current, get_in(old_initial, name)) {
                        next = set_in(&next, name, current.cloned(), false)?;
                    }
                }
            }
            st.form.initial_values = Some(values);
            st.form.values = next;
        }
        self.run_validation(None, AfterValidation::FieldsThenForm)
    }

    /// [`initialize`](Self::initialize) from a function of the current values.
    pub fn initialize_with(&self, f: impl FnOnce(&Value) -> Value) -> Result<()> {
        let current = self.inner.state.borrow().form.values.clone();
        self.initialize(f(&current))
    }

    /// Forget submit state and reinitialize, by default to the current
    /// initial values.
    pub fn reset(&self, initial_values: Option<Value>) -> Result<()> {
        let initial = {
            let mut st = self.inner.state.borrow_mut();
            if st.form.submitting {
                st.form.reset_while_submitting = true;
            }
            st.form.submit_failed = false;
            st.form.submit_succeeded = false;
            st.form.submit_error = None;
            st.form.submit_errors = None;
            st.form.last_submitted_values = None;
            initial_values.or_else(|| st.form.initial_values.clone())
        };
        self.initialize(initial.unwrap_or_else(Value::object))
    }

    /// Reset every field's interaction state, then [`reset`](Self::reset),
    /// as one batch.
    pub fn restart(&self, initial_values: Option<Value>) -> Result<()> {
        self.batch(|| {
            {
                let mut st = self.inner.state.borrow_mut();
                for field in st.fields.values_mut() {
                    field.reset_interaction();
                    field.modified_since_last_submit = false;
                }
                st.form.active = None;
            }
            self.reset(initial_values)
        })
    }

    // ─── Interaction ────────────────────────────────────────────────────

    pub fn focus(&self, name: &str) {
        let changed = {
            let mut st = self.inner.state.borrow_mut();
            let st = &mut *st;
            match st.fields.get_mut(name) {
                Some(field) if !field.active => {
                    field.active = true;
                    field.visited = true;
                    st.form.active = Some(name.to_owned());
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.notify_field_listeners(None);
            self.notify_form_listeners();
        }
    }

    pub fn blur(&self, name: &str) -> Result<()> {
        {
            let mut st = self.inner.state.borrow_mut();
            let st = &mut *st;
            let Some(field) = st.fields.get_mut(name) else {
                return Ok(());
            };
            field.active = false;
            field.touched = true;
            st.form.active = None;
        }
        if self.inner.settings.borrow().validate_on_blur {
            self.run_validation(Some(name), AfterValidation::FieldsThenForm)
        } else {
            self.notify_field_listeners(None);
            self.notify_form_listeners();
            Ok(())
        }
    }

    /// Clear one field's interaction flags and force its subscribers' next
    /// notification.
    pub fn reset_field_state(&self, name: &str) -> Result<()> {
        self.inner.state.borrow_mut().reset_field_interaction(name);
        self.run_validation(None, AfterValidation::FieldsThenForm)
    }

    /// Run `f` with notifications held back, then notify once.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let result = {
            let _guard = BatchGuard::enter(&self.inner.notifier);
            f()
        };
        self.notify_field_listeners(None);
        self.notify_form_listeners();
        result
    }

    // ─── Subscriptions ──────────────────────────────────────────────────

    /// Register a field subscriber.
    ///
    /// The callback is called once right away (or through the callback
    /// scheduler with [`FieldConfig::defer_first_notification`]) and then
    /// whenever a key in `mask` changes. Dropping the returned
    /// [`Subscription`] unregisters it.
    pub fn register_field(
        &self,
        name: &str,
        callback: impl Fn(&FieldState) + 'static,
        mask: FieldMask,
        config: FieldConfig,
    ) -> Result<Subscription> {
        let (initial_write, default_write) = {
            let st = self.inner.state.borrow();
            let current = get_in(&st.form.values, name);
            let current_initial = st
                .form
                .initial_values
                .as_ref()
                .and_then(|initial| get_in(initial, name));
            let initial_write = match &config.initial_value {
                Some(initial) if current.is_none() || current == current_initial => {
                    let base = st.form.initial_values.clone().unwrap_or_else(Value::object);
                    Some((
                        set_in(&base, name, Some(initial.clone()), false)?,
                        set_in(&st.form.values, name, Some(initial.clone()), false)?,
                    ))
                }
                _ => None,
            };
            let default_write = match &config.default_value {
                Some(default)
                    if config.initial_value.is_none()
                        && current.is_none()
                        && current_initial.is_none() =>
                {
                    Some(set_in(&st.form.values, name, Some(default.clone()), false)?)
                }
                _ => None,
            };
            (initial_write, default_write)
        };
        let initial_applied = initial_write.is_some();

        let id = {
            let mut st = self.inner.state.borrow_mut();
            let st = &mut *st;
            let id = st.next_id();
            st.registrations.insert(id, name.to_owned());
            st.field_subscribers.entry(name.to_owned()).or_default().insert(
                id,
                Rc::new(callback),
                mask,
                config.defer_first_notification,
            );
            let field = st
                .fields
                .entry(name.to_owned())
                .or_insert_with(|| FieldRecord::from_config(name, &config));
            if let Some(thunk) = &config.get_validator {
                field.validators.insert(id, Rc::clone(thunk));
            }
            if let Some((initial, values)) = initial_write {
                st.form.initial_values = Some(initial);
                st.form.values = values;
            }
            if let Some(values) = default_write {
                st.form.values = values;
            }
            id
        };
        debug!(field = name, id, "field registered");

        let subscription = Subscription {
            form: self.downgrade(),
            target: Target::Field {
                id,
                silent: config.silent,
            },
        };
        let have_validator = config
            .get_validator
            .as_ref()
            .is_some_and(|thunk| thunk().is_some());
        let notify = if config.silent {
            AfterValidation::SilentField(name.to_owned())
        } else {
            AfterValidation::FormThenFields
        };
        if initial_applied {
            self.run_validation(None, notify.clone())?;
        }
        if have_validator {
            self.run_validation(None, notify)?;
        } else {
            self.after_validation(&notify);
        }
        Ok(subscription)
    }

    /// Subscribe to the form snapshot. The callback is called once right
    /// away and then whenever a key in `mask` changes.
    pub fn subscribe(&self, callback: impl Fn(&FormState) + 'static, mask: FormMask) -> Subscription {
        let (id, delivery) = {
            let mut st = self.inner.state.borrow_mut();
            let st = &mut *st;
            let id = st.next_id();
            st.subscribers.insert(id, Rc::new(callback), mask, false);
            let state = next_form_state(&st.form, &st.fields, st.last_form_state.as_ref());
            let delivery = st.subscribers.prepare(id, &state, Some(&*state), true);
            (id, delivery)
        };
        if let Some(delivery) = delivery {
            (delivery.callback)(&delivery.snapshot);
        }
        Subscription {
            form: self.downgrade(),
            target: Target::Form(id),
        }
    }

    /// Drop field subscription `id` from whichever name it serves now.
    fn unregister_field(&self, id: u64, silent: bool) {
        let Some(name) = self.inner.state.borrow_mut().registrations.remove(&id) else {
            return;
        };
        let name = name.as_str();
        let thunk = self
            .inner
            .state
            .borrow_mut()
            .fields
            .get_mut(name)
            .and_then(|field| field.validators.remove(&id));
        let validator_removed = thunk.is_some_and(|thunk| thunk().is_some());
        let destroy = self.inner.settings.borrow().destroy_on_unregister;

        let last_one = {
            let mut st = self.inner.state.borrow_mut();
            let st = &mut *st;
            let emptied = match st.field_subscribers.get_mut(name) {
                Some(table) => {
                    table.remove(id);
                    table.is_empty()
                }
                None => false,
            };
            if emptied {
                st.field_subscribers.remove(name);
                st.fields.shift_remove(name);
                if validator_removed {
                    match set_in(&st.form.errors, name, None, false) {
                        Ok(errors) => st.form.errors = errors,
                        Err(err) => warn!(field = name, error = %err, "cannot clear errors of unregistered field"),
                    }
                }
                if destroy {
                    match set_in(&st.form.values, name, None, true) {
                        Ok(values) => st.form.values = values,
                        Err(err) => warn!(field = name, error = %err, "cannot destroy value of unregistered field"),
                    }
                }
            }
            emptied
        };
        debug!(field = name, id, last_one, "field unregistered");

        if silent {
            return;
        }
        if validator_removed {
            if let Err(err) = self.run_validation(None, AfterValidation::FormThenFields) {
                warn!(field = name, error = %err, "validation after unregister failed");
            }
        } else if last_one {
            self.notify_form_listeners();
        }
    }

    // ─── Reading ────────────────────────────────────────────────────────

    /// The current form snapshot.
    #[must_use]
    pub fn get_state(&self) -> Rc<FormState> {
        let mut st = self.inner.state.borrow_mut();
        let st = &mut *st;
        let previous = st.last_read_state.clone().or_else(|| st.last_form_state.clone());
        let next = next_form_state(&st.form, &st.fields, previous.as_ref());
        st.last_read_state = Some(Rc::clone(&next));
        next
    }

    /// The last snapshot published for `name`, or a fresh one if none has
    /// been published yet. `None` when no such field is registered.
    #[must_use]
    pub fn get_field_state(&self, name: &str) -> Option<Rc<FieldState>> {
        let st = self.inner.state.borrow();
        let field = st.fields.get(name)?;
        Some(
            field
                .last_field_state
                .clone()
                .unwrap_or_else(|| Rc::new(publish_field_state(&st.form, field))),
        )
    }

    /// Registered field names, in registration order.
    #[must_use]
    pub fn get_registered_fields(&self) -> Vec<String> {
        self.inner.state.borrow().fields.keys().cloned().collect()
    }

    // ─── Configuration ──────────────────────────────────────────────────

    /// Change one option of a live form. See [`OPTION_KEYS`](crate::OPTION_KEYS).
    pub fn set_config(&self, key: &str, value: ConfigValue) -> Result<()> {
        match key {
            "callbackScheduler" => {
                let ConfigValue::CallbackScheduler(scheduler) = value else {
                    return Err(FormError::invalid_option(key, "a callback scheduler"));
                };
                self.inner.settings.borrow_mut().callback_scheduler = scheduler;
            }
            "debug" => {
                let ConfigValue::Debug(hook) = value else {
                    return Err(FormError::invalid_option(key, "a debug hook"));
                };
                self.inner.settings.borrow_mut().debug = hook;
            }
            "destroyOnUnregister" => self.set_destroy_on_unregister(value.into_bool(key)?),
            "initialValues" => {
                let ConfigValue::Values(values) = value else {
                    return Err(FormError::invalid_option(key, "values"));
                };
                self.initialize(values.unwrap_or_else(Value::object))?;
            }
            "keepDirtyOnReinitialize" => {
                self.inner.settings.borrow_mut().keep_dirty_on_reinitialize = value.into_bool(key)?;
            }
            "mutators" => {
                let ConfigValue::Mutators(mutators) = value else {
                    return Err(FormError::invalid_option(key, "a mutator table"));
                };
                self.inner.settings.borrow_mut().mutators = mutators;
            }
            "onSubmit" => {
                let ConfigValue::OnSubmit(handler) = value else {
                    return Err(FormError::invalid_option(key, "a submit handler"));
                };
                self.inner.settings.borrow_mut().on_submit = handler;
            }
            "validate" => {
                let ConfigValue::Validate(validate) = value else {
                    return Err(FormError::invalid_option(key, "a record validator"));
                };
                self.inner.settings.borrow_mut().validate = validate;
                self.run_validation(None, AfterValidation::FieldsThenForm)?;
            }
            "validateOnBlur" => {
                self.inner.settings.borrow_mut().validate_on_blur = value.into_bool(key)?;
            }
            _ => return Err(FormError::unrecognised(key)),
        }
        Ok(())
    }

    #[must_use]
    pub fn destroy_on_unregister(&self) -> bool {
        self.inner.settings.borrow().destroy_on_unregister
    }

    pub fn set_destroy_on_unregister(&self, enabled: bool) {
        self.inner.settings.borrow_mut().destroy_on_unregister = enabled;
    }
}

impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.borrow();
        f.debug_struct("Form")
            .field("values", &st.form.values)
            .field("fields", &st.fields.keys().collect::<Vec<_>>())
            .field("submitting", &st.form.submitting)
            .field("validating", &st.form.validating)
            .finish_non_exhaustive()
    }
}

// ─── Subscription ───────────────────────────────────────────────────────

enum Target {
    Form(u64),
    Field { id: u64, silent: bool },
}

/// Keeps a subscriber or field registration alive; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    form: WeakForm,
    target: Target,
}

impl Subscription {
    /// Unsubscribe now. Same as dropping.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(form) = self.form.upgrade() else {
            return;
        };
        match &self.target {
            Target::Form(id) => {
                form.inner.state.borrow_mut().subscribers.remove(*id);
            }
            Target::Field { id, silent } => form.unregister_field(*id, *silent),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Form(id) => f.debug_tuple("Subscription::Form").field(id).finish(),
            Target::Field { id, silent } => f
                .debug_struct("Subscription::Field")
                .field("id", id)
                .field("silent", silent)
                .finish(),
        }
    }
}
