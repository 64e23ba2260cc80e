#![forbid(unsafe_code)]

//! fform public facade crate.
//!
//! Re-exports the value model and path tools from `fform-core` and, with the
//! default `runtime` feature, the form engine from `fform-runtime`.

pub use fform_core::{Array, Interest, Map, Mask, PathError, Value, get_in, set_in, shallow_equal, to_path};

#[cfg(feature = "runtime")]
pub use fform_runtime::{
    FORM_ERROR, FieldConfig, FieldState, Form, FormConfig, FormError, FormOptions, FormState,
    Subscription, SubmitOutcome, Validation, create_form,
};

pub mod prelude {
    pub use fform_core as core;
    #[cfg(feature = "runtime")]
    pub use fform_runtime as runtime;
}
