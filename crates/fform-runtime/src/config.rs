#![forbid(unsafe_code)]

//! Form and field configuration.
//!
//! [`FormConfig`] is a builder covering every option a form accepts.
//! [`FormOptions`] holds the data-only subset and can be loaded from JSON,
//! so hosts can keep form policy next to the rest of their configuration:
//!
//! ```json
//! { "validateOnBlur": true, "initialValues": { "name": "" } }
//! ```
//!
//! Options can also be changed on a live form with
//! [`Form::set_config`](crate::Form::set_config), keyed by the camelCase names
//! listed in [`OPTION_KEYS`].

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use fform_core::Value;
use futures::task::LocalSpawn;
use serde::{Deserialize, Serialize};

use crate::error::{FormError, Result};
use crate::mutators::Mutator;
use crate::state::{FieldState, FormState};
use crate::submit::{SubmitCallback, SubmitHandler, SubmitOutcome};
use crate::validation::{FieldValidator, RecordValidator, Validation, ValidatorThunk};
use crate::Form;

/// Called on every notification settle with the form snapshot and a fresh
/// snapshot of every registered field.
pub type DebugHook = Rc<dyn Fn(&FormState, &BTreeMap<String, FieldState>)>;

/// Runs a deferred batch of field callbacks at some later point.
pub type CallbackScheduler = Rc<dyn Fn(Box<dyn FnOnce()>)>;

/// Equality used for dirty/pristine comparison of one field.
pub type IsEqual = Rc<dyn Fn(Option<&Value>, Option<&Value>) -> bool>;

/// Field hook run after a successful submit.
pub type AfterSubmit = Rc<dyn Fn()>;

/// Field hook run before submit; returning `false` cancels the submit.
pub type BeforeSubmit = Rc<dyn Fn() -> bool>;

/// Option names accepted by [`Form::set_config`](crate::Form::set_config).
pub const OPTION_KEYS: &[&str] = &[
    "callbackScheduler",
    "debug",
    "destroyOnUnregister",
    "initialValues",
    "keepDirtyOnReinitialize",
    "mutators",
    "onSubmit",
    "validate",
    "validateOnBlur",
];

/// Structural equality, the default [`IsEqual`].
#[must_use]
pub fn default_is_equal() -> IsEqual {
    Rc::new(|a: Option<&Value>, b: Option<&Value>| a == b)
}

// ─── FormOptions ────────────────────────────────────────────────────────

/// Data-only form options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct FormOptions {
    pub destroy_on_unregister: bool,
    pub keep_dirty_on_reinitialize: bool,
    pub validate_on_blur: bool,
    pub initial_values: Option<Value>,
}

impl FormOptions {
    /// Parse options from a JSON object. Unknown keys are rejected.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// ─── FormConfig ─────────────────────────────────────────────────────────

/// Everything needed to create a [`Form`].
#[derive(Clone, Default)]
pub struct FormConfig {
    pub(crate) callback_scheduler: Option<CallbackScheduler>,
    pub(crate) debug: Option<DebugHook>,
    pub(crate) destroy_on_unregister: bool,
    pub(crate) initial_values: Option<Value>,
    pub(crate) keep_dirty_on_reinitialize: bool,
    pub(crate) mutators: BTreeMap<String, Mutator>,
    pub(crate) on_submit: Option<SubmitHandler>,
    pub(crate) spawner: Option<Rc<dyn LocalSpawn>>,
    pub(crate) validate: Option<RecordValidator>,
    pub(crate) validate_on_blur: bool,
}

impl fmt::Debug for FormConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormConfig")
            .field("callback_scheduler", &self.callback_scheduler.is_some())
            .field("debug", &self.debug.is_some())
            .field("destroy_on_unregister", &self.destroy_on_unregister)
            .field("initial_values", &self.initial_values)
            .field("keep_dirty_on_reinitialize", &self.keep_dirty_on_reinitialize)
            .field("mutators", &self.mutators.keys().collect::<Vec<_>>())
            .field("on_submit", &self.on_submit.is_some())
            .field("spawner", &self.spawner.is_some())
            .field("validate", &self.validate.is_some())
            .field("validate_on_blur", &self.validate_on_blur)
            .finish()
    }
}

impl FormConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The submit handler. Required.
    #[must_use]
    pub fn with_on_submit(
        mut self,
        handler: impl Fn(&Value, &Form, SubmitCallback) -> SubmitOutcome + 'static,
    ) -> Self {
        self.on_submit = Some(Rc::new(handler));
        self
    }

    /// Record-level validator producing an error tree shaped like the values.
    #[must_use]
    pub fn with_validate(mut self, validate: impl Fn(&Value) -> Validation + 'static) -> Self {
        self.validate = Some(Rc::new(validate));
        self
    }

    #[must_use]
    pub fn with_initial_values(mut self, values: impl Into<Value>) -> Self {
        self.initial_values = Some(values.into());
        self
    }

    #[must_use]
    pub fn with_destroy_on_unregister(mut self, enabled: bool) -> Self {
        self.destroy_on_unregister = enabled;
        self
    }

    #[must_use]
    pub fn with_keep_dirty_on_reinitialize(mut self, enabled: bool) -> Self {
        self.keep_dirty_on_reinitialize = enabled;
        self
    }

    /// Validate on blur instead of on every change.
    #[must_use]
    pub fn with_validate_on_blur(mut self, enabled: bool) -> Self {
        self.validate_on_blur = enabled;
        self
    }

    #[must_use]
    pub fn with_mutator(
        mut self,
        name: impl Into<String>,
        mutator: impl Fn(&[Value], &mut crate::MutableState<'_>) -> Result<Option<Value>> + 'static,
    ) -> Self {
        self.mutators.insert(name.into(), Rc::new(mutator));
        self
    }

    #[must_use]
    pub fn with_debug(
        mut self,
        hook: impl Fn(&FormState, &BTreeMap<String, FieldState>) + 'static,
    ) -> Self {
        self.debug = Some(Rc::new(hook));
        self
    }

    /// Scheduler for deferred first notifications. Defaults to a task on the
    /// form's spawner.
    #[must_use]
    pub fn with_callback_scheduler(mut self, scheduler: impl Fn(Box<dyn FnOnce()>) + 'static) -> Self {
        self.callback_scheduler = Some(Rc::new(scheduler));
        self
    }

    /// Drive async work on a host executor instead of the form's own pool.
    #[must_use]
    pub fn with_spawner(mut self, spawner: Rc<dyn LocalSpawn>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Apply data-only options.
    #[must_use]
    pub fn with_options(mut self, options: FormOptions) -> Self {
        self.destroy_on_unregister = options.destroy_on_unregister;
        self.keep_dirty_on_reinitialize = options.keep_dirty_on_reinitialize;
        self.validate_on_blur = options.validate_on_blur;
        if options.initial_values.is_some() {
            self.initial_values = options.initial_values;
        }
        self
    }
}

// ─── Live settings ──────────────────────────────────────────────────────

/// Options a live form consults on every operation.
pub(crate) struct Settings {
    pub callback_scheduler: Option<CallbackScheduler>,
    pub debug: Option<DebugHook>,
    pub destroy_on_unregister: bool,
    pub keep_dirty_on_reinitialize: bool,
    pub mutators: BTreeMap<String, Mutator>,
    pub on_submit: SubmitHandler,
    pub validate: Option<RecordValidator>,
    pub validate_on_blur: bool,
}

impl Settings {
    pub(crate) fn from_config(config: &FormConfig) -> Result<Self> {
        let on_submit = config
            .on_submit
            .clone()
            .ok_or(FormError::MissingSubmitHandler)?;
        Ok(Self {
            callback_scheduler: config.callback_scheduler.clone(),
            debug: config.debug.clone(),
            destroy_on_unregister: config.destroy_on_unregister,
            keep_dirty_on_reinitialize: config.keep_dirty_on_reinitialize,
            mutators: config.mutators.clone(),
            on_submit,
            validate: config.validate.clone(),
            validate_on_blur: config.validate_on_blur,
        })
    }
}

/// A value for [`Form::set_config`](crate::Form::set_config).
#[derive(Clone)]
pub enum ConfigValue {
    Bool(bool),
    Values(Option<Value>),
    Debug(Option<DebugHook>),
    Mutators(BTreeMap<String, Mutator>),
    OnSubmit(SubmitHandler),
    Validate(Option<RecordValidator>),
    CallbackScheduler(Option<CallbackScheduler>),
}

impl ConfigValue {
    pub(crate) fn into_bool(self, key: &str) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(b),
            _ => Err(FormError::invalid_option(key, "a boolean")),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Value> for ConfigValue {
    fn from(v: Value) -> Self {
        Self::Values(Some(v))
    }
}

// ─── FieldConfig ────────────────────────────────────────────────────────

/// Per-registration field options.
#[derive(Clone, Default)]
pub struct FieldConfig {
    pub(crate) after_submit: Option<AfterSubmit>,
    pub(crate) before_submit: Option<BeforeSubmit>,
    pub(crate) data: Option<Value>,
    pub(crate) default_value: Option<Value>,
    pub(crate) defer_first_notification: bool,
    pub(crate) get_validator: Option<ValidatorThunk>,
    pub(crate) initial_value: Option<Value>,
    pub(crate) is_equal: Option<IsEqual>,
    pub(crate) silent: bool,
    pub(crate) validate_fields: Option<Vec<String>>,
}

impl FieldConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A fixed field-level validator.
    #[must_use]
    pub fn with_validator(
        self,
        validator: impl Fn(Option<&Value>, &Value, &FieldState) -> Validation + 'static,
    ) -> Self {
        let validator: FieldValidator = Rc::new(validator);
        self.with_validator_thunk(move || Some(Rc::clone(&validator)))
    }

    /// A validator looked up afresh on every validation pass.
    #[must_use]
    pub fn with_validator_thunk(
        mut self,
        thunk: impl Fn() -> Option<FieldValidator> + 'static,
    ) -> Self {
        self.get_validator = Some(Rc::new(thunk));
        self
    }

    /// Validate only this field and `fields` when this field changes.
    #[must_use]
    pub fn with_validate_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validate_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_initial_value(mut self, value: impl Into<Value>) -> Self {
        self.initial_value = Some(value.into());
        self
    }

    /// Value used when neither the form nor this config supply one.
    #[must_use]
    pub fn with_default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    #[must_use]
    pub fn with_is_equal(
        mut self,
        is_equal: impl Fn(Option<&Value>, Option<&Value>) -> bool + 'static,
    ) -> Self {
        self.is_equal = Some(Rc::new(is_equal));
        self
    }

    #[must_use]
    pub fn with_before_submit(mut self, hook: impl Fn() -> bool + 'static) -> Self {
        self.before_submit = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn with_after_submit(mut self, hook: impl Fn() + 'static) -> Self {
        self.after_submit = Some(Rc::new(hook));
        self
    }

    /// Only this field's subscribers hear about registration and removal.
    #[must_use]
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Deliver the first notification through the callback scheduler
    /// instead of inline.
    #[must_use]
    pub fn defer_first_notification(mut self) -> Self {
        self.defer_first_notification = true;
        self
    }
}

impl fmt::Debug for FieldConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldConfig")
            .field("data", &self.data)
            .field("default_value", &self.default_value)
            .field("defer_first_notification", &self.defer_first_notification)
            .field("has_validator", &self.get_validator.is_some())
            .field("initial_value", &self.initial_value)
            .field("silent", &self.silent)
            .field("validate_fields", &self.validate_fields)
            .finish_non_exhaustive()
    }
}
