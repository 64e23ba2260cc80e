#![forbid(unsafe_code)]

//! Notification scheduling and dispatch.
//!
//! # Design
//!
//! Dispatch never holds a borrow of the form's state while a subscriber runs:
//! each delivery is prepared under a short borrow, then the callback is called
//! with the borrow released. Subscribers may therefore call back into the form.
//!
//! # Invariants
//!
//! 1. Inside [`Form::batch`] no listener runs. Leaving the outermost batch
//!    runs one field pass and one form pass.
//! 2. A form notification requested while one is dispatching is replayed
//!    once the current pass finishes, never nested.
//! 3. Field subscribers of one name are called in subscription order.
//! 4. A subscriber's first notification is forced. With deferral requested,
//!    that first notification is queued and every queued one is flushed
//!    together, in order, by the callback scheduler. A queued subscriber
//!    gets nothing inline and the flush hands it the latest snapshot.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::trace;

use crate::config::CallbackScheduler;
use crate::publish::{next_form_state, publish_field_state};
use crate::record::SubscriberTable;
use crate::state::{FieldState, FormState};
use crate::task::default_scheduler;
use crate::Form;

/// Listeners to run once a validation request has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AfterValidation {
    FieldsThenForm,
    FormThenFields,
    FormOnly,
    /// Only the subscribers of one field.
    SilentField(String),
}

#[derive(Default)]
pub(crate) struct Notifier {
    batch_depth: Cell<u32>,
    notifying: Cell<bool>,
    requested: Cell<bool>,
    /// Field subscription ids with a queued first delivery.
    deferred: RefCell<Vec<u64>>,
}

impl Notifier {
    pub(crate) fn in_batch(&self) -> bool {
        self.batch_depth.get() > 0
    }
}

/// Holds the batch open; closing happens on drop so a panicking closure
/// cannot leave the form muted.
pub(crate) struct BatchGuard<'a>(&'a Notifier);

impl<'a> BatchGuard<'a> {
    pub(crate) fn enter(notifier: &'a Notifier) -> Self {
        notifier.batch_depth.set(notifier.batch_depth.get() + 1);
        Self(notifier)
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.batch_depth.set(self.0.batch_depth.get().saturating_sub(1));
    }
}

struct NotifyingGuard<'a>(&'a Notifier);

impl Drop for NotifyingGuard<'_> {
    fn drop(&mut self) {
        self.0.notifying.set(false);
    }
}

impl Form {
    pub(crate) fn after_validation(&self, after: &AfterValidation) {
        match after {
            AfterValidation::FieldsThenForm => {
                self.notify_field_listeners(None);
                self.notify_form_listeners();
            }
            AfterValidation::FormThenFields => {
                self.notify_form_listeners();
                self.notify_field_listeners(None);
            }
            AfterValidation::FormOnly => self.notify_form_listeners(),
            AfterValidation::SilentField(name) => self.notify_field_listeners(Some(name)),
        }
    }

    /// Recompute the form snapshot and deliver it to form subscribers.
    pub(crate) fn notify_form_listeners(&self) {
        let notifier = &self.inner.notifier;
        if notifier.notifying.get() {
            notifier.requested.set(true);
            return;
        }
        notifier.notifying.set(true);
        let _guard = NotifyingGuard(notifier);
        loop {
            self.call_debug();
            if !notifier.in_batch() {
                let change = {
                    let mut st = self.inner.state.borrow_mut();
                    let st = &mut *st;
                    let previous = st.last_form_state.clone();
                    let next = next_form_state(&st.form, &st.fields, previous.as_ref());
                    if previous.as_ref().is_some_and(|p| Rc::ptr_eq(p, &next)) {
                        None
                    } else {
                        st.last_form_state = Some(Rc::clone(&next));
                        Some((next, previous))
                    }
                };
                if let Some((next, previous)) = change {
                    trace!("form notification pass");
                    self.dispatch_form(&next, previous.as_deref(), false);
                }
            }
            if !notifier.requested.replace(false) {
                break;
            }
        }
    }

    pub(crate) fn dispatch_form(&self, state: &FormState, previous: Option<&FormState>, force: bool) {
        let ids = self.inner.state.borrow().subscribers.ids();
        for id in ids {
            let delivery = self
                .inner
                .state
                .borrow_mut()
                .subscribers
                .prepare(id, state, previous, force);
            if let Some(delivery) = delivery {
                (delivery.callback)(&delivery.snapshot);
            }
        }
    }

    /// Publish and deliver field snapshots, for one field or all of them.
    pub(crate) fn notify_field_listeners(&self, name: Option<&str>) {
        if self.inner.notifier.in_batch() {
            return;
        }
        let names: Vec<String> = match name {
            Some(name) => vec![name.to_owned()],
            None => self.inner.state.borrow().fields.keys().cloned().collect(),
        };
        for name in names {
            let Some((state, previous, ids)) = self.publish_field(&name) else {
                continue;
            };
            let force = previous.is_none();
            for id in ids {
                let delivery = self
                    .inner
                    .state
                    .borrow_mut()
                    .field_subscribers
                    .get_mut(&name)
                    .and_then(|table| table.prepare(id, &state, previous.as_deref(), force));
                match delivery {
                    Some(delivery) if delivery.deferred => self.defer(id),
                    Some(delivery) => (delivery.callback)(&delivery.snapshot),
                    None => {}
                }
            }
        }
    }

    fn publish_field(
        &self,
        name: &str,
    ) -> Option<(Rc<FieldState>, Option<Rc<FieldState>>, smallvec::SmallVec<[u64; 8]>)> {
        let mut st = self.inner.state.borrow_mut();
        let st = &mut *st;
        let field = st.fields.get_mut(name)?;
        let state = Rc::new(publish_field_state(&st.form, field));
        let previous = field.last_field_state.replace(Rc::clone(&state));
        let ids = st
            .field_subscribers
            .get(name)
            .map(SubscriberTable::ids)
            .unwrap_or_default();
        Some((state, previous, ids))
    }

    fn callback_scheduler(&self) -> CallbackScheduler {
        let configured = self.inner.settings.borrow().callback_scheduler.clone();
        configured.unwrap_or_else(|| default_scheduler(self.inner.tasks.spawner()))
    }

    fn defer(&self, id: u64) {
        let first = {
            let mut queue = self.inner.notifier.deferred.borrow_mut();
            queue.push(id);
            queue.len() == 1
        };
        if !first {
            return;
        }
        let weak = self.downgrade();
        let scheduler = self.callback_scheduler();
        scheduler(Box::new(move || {
            if let Some(form) = weak.upgrade() {
                form.flush_deferred();
            }
        }));
    }

    fn flush_deferred(&self) {
        let queued = std::mem::take(&mut *self.inner.notifier.deferred.borrow_mut());
        trace!(count = queued.len(), "flushing deferred field notifications");
        for id in queued {
            let delivery = {
                let mut st = self.inner.state.borrow_mut();
                let st = &mut *st;
                match st.registrations.get(&id) {
                    Some(name) => st
                        .field_subscribers
                        .get_mut(name)
                        .and_then(|table| table.take_queued(id)),
                    None => None,
                }
            };
            if let Some(delivery) = delivery {
                (delivery.callback)(&delivery.snapshot);
            }
        }
    }

    fn call_debug(&self) {
        if !cfg!(debug_assertions) {
            return;
        }
        let Some(debug) = self.inner.settings.borrow().debug.clone() else {
            return;
        };
        let (state, fields) = {
            let st = self.inner.state.borrow();
            let state = next_form_state(&st.form, &st.fields, st.last_form_state.as_ref());
            let fields: BTreeMap<String, FieldState> = st
                .fields
                .iter()
                .map(|(name, field)| (name.clone(), publish_field_state(&st.form, field)))
                .collect();
            (state, fields)
        };
        debug(&state, &fields);
    }
}
