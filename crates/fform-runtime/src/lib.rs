#![forbid(unsafe_code)]

//! Runtime: the reactive form engine.
//!
//! A [`Form`] owns a value tree, per-field interaction state, validation and
//! submission. Observers subscribe to masked snapshots of the form
//! ([`FormState`]) or of one field ([`FieldState`]) and are told only about
//! the keys they asked for.
//!
//! ```ignore
//! use fform_core::{Mask, Value};
//! use fform_runtime::{FieldConfig, Form, FormConfig, SubmitOutcome, Validation};
//!
//! let form = Form::new(
//!     FormConfig::new()
//!         .with_on_submit(|_, _, _| SubmitOutcome::success())
//!         .with_validate(|values| match values.child("username") {
//!             Some(name) if name.is_truthy() => Validation::valid(),
//!             _ => Validation::error(Value::from_iter([("username", "Required")])),
//!         }),
//! )?;
//! let _username = form.register_field("username", |s| println!("{:?}", s.error), Mask::all(), FieldConfig::new())?;
//! form.change("username", "bob")?;
//! ```

pub mod config;
pub mod error;
pub mod form;
pub mod mutators;
mod notify;
mod publish;
pub mod record;
pub mod state;
pub mod submit;
mod task;
pub mod validation;

pub use config::{
    AfterSubmit, BeforeSubmit, CallbackScheduler, ConfigValue, DebugHook, FieldConfig, FormConfig,
    FormOptions, IsEqual, OPTION_KEYS, default_is_equal,
};
pub use error::{BoxError, FormError, Result};
pub use form::{Form, Subscription, WeakForm, create_form};
pub use mutators::{MutableState, Mutator};
pub use record::{FieldMap, FieldRecord, FormRecord};
pub use state::{FieldFlags, FieldKey, FieldMask, FieldState, FormKey, FormMask, FormState};
pub use submit::{Submission, SubmitCallback, SubmitHandler, SubmitOutcome};
pub use validation::{FORM_ERROR, FieldValidator, RecordValidator, Validation, ValidatorThunk};
