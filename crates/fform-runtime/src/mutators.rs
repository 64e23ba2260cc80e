#![forbid(unsafe_code)]

//! Mutators: caller-supplied compound edits.
//!
//! A mutator gets direct access to the form's records through
//! [`MutableState`] and runs to completion inside one borrow. Afterwards the
//! form revalidates and notifies once, whatever the mutator touched.
//!
//! ```ignore
//! let config = FormConfig::new()
//!     .with_on_submit(|_, _, _| SubmitOutcome::success())
//!     .with_mutator("clear", |args, state| {
//!         for name in args.iter().filter_map(Value::as_str) {
//!             state.change_value(name, |_| None)?;
//!         }
//!         Ok(None)
//!     });
//! ```

use std::rc::Rc;

use fform_core::{Value, get_in, set_in};
use tracing::debug;

use crate::error::{FormError, Result};
use crate::notify::AfterValidation;
use crate::record::{FieldMap, FieldRecord, FormRecord, InternalState};
use crate::Form;

/// `(arguments, state) -> return value`.
pub type Mutator = Rc<dyn Fn(&[Value], &mut MutableState<'_>) -> Result<Option<Value>>>;

/// The records a mutator may edit.
pub struct MutableState<'a> {
    state: &'a mut InternalState,
}

impl<'a> MutableState<'a> {
    pub(crate) fn new(state: &'a mut InternalState) -> Self {
        Self { state }
    }

    #[must_use]
    pub fn form(&self) -> &FormRecord {
        &self.state.form
    }

    pub fn form_mut(&mut self) -> &mut FormRecord {
        &mut self.state.form
    }

    #[must_use]
    pub fn values(&self) -> &Value {
        &self.state.form.values
    }

    #[must_use]
    pub fn fields(&self) -> &FieldMap {
        &self.state.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldRecord> {
        self.state.fields.get(name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldRecord> {
        self.state.fields.get_mut(name)
    }

    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.state.fields.keys().cloned().collect()
    }

    /// Add a field record that no subscriber registered. Returns the record
    /// it replaced, if any.
    pub fn insert_field(&mut self, record: FieldRecord) -> Option<FieldRecord> {
        self.state.fields.insert(record.name.clone(), record)
    }

    /// Replace the value at `name` with `f(current)`. `None` removes it.
    pub fn change_value(
        &mut self,
        name: &str,
        f: impl FnOnce(Option<&Value>) -> Option<Value>,
    ) -> Result<()> {
        let next = f(get_in(&self.state.form.values, name));
        self.state.form.values = set_in(&self.state.form.values, name, next, false)?;
        Ok(())
    }

    /// Move a field's record, subscribers and value from `from` to `to`.
    /// Does nothing if `from` is not registered.
    pub fn rename_field(&mut self, from: &str, to: &str) -> Result<()> {
        if !self.state.fields.contains_key(from) {
            return Ok(());
        }
        let value = get_in(&self.state.form.values, from).cloned();
        let without = set_in(&self.state.form.values, from, None, false)?;
        let values = set_in(&without, to, value, false)?;

        let st = &mut *self.state;
        st.form.values = values;
        if let Some(mut record) = st.fields.shift_remove(from) {
            record.name = to.to_owned();
            record.last_field_state = None;
            st.fields.insert(to.to_owned(), record);
        }
        if let Some(table) = st.field_subscribers.remove(from) {
            for id in table.ids() {
                st.registrations.insert(id, to.to_owned());
            }
            st.field_subscribers.insert(to.to_owned(), table);
        }
        if st.form.active.as_deref() == Some(from) {
            st.form.active = Some(to.to_owned());
        }
        st.last_form_state = None;
        debug!(from, to, "field renamed");
        Ok(())
    }

    /// Clear one field's interaction flags.
    pub fn reset_field_state(&mut self, name: &str) {
        self.state.reset_field_interaction(name);
    }

    /// Set `key` in a field's `data`. Does nothing if the field is unknown.
    pub fn set_field_data(&mut self, name: &str, key: &str, value: impl Into<Value>) -> Result<()> {
        if let Some(field) = self.state.fields.get_mut(name) {
            field.data = set_in(&field.data, key, Some(value.into()), false)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MutableState<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableState")
            .field("form", &self.state.form)
            .field("fields", &self.state.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Form {
    /// Run the mutator registered as `name`, then revalidate and notify.
    pub fn mutate(&self, name: &str, args: &[Value]) -> Result<Option<Value>> {
        let mutator = self
            .inner
            .settings
            .borrow()
            .mutators
            .get(name)
            .cloned()
            .ok_or_else(|| FormError::UnknownMutator { name: name.to_owned() })?;
        let result = {
            let mut st = self.inner.state.borrow_mut();
            mutator(args, &mut MutableState::new(&mut st))
        };
        debug!(mutator = name, ok = result.is_ok(), "mutator ran");
        self.run_validation(None, AfterValidation::FieldsThenForm)?;
        result
    }

    /// Names of the configured mutators.
    #[must_use]
    pub fn mutator_names(&self) -> Vec<String> {
        self.inner.settings.borrow().mutators.keys().cloned().collect()
    }
}
