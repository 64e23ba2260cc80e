#![forbid(unsafe_code)]

//! Submission lifecycle.
//!
//! ```text
//! idle ──submit()──▶ submitting ──▶ succeeded | failed ──▶ idle
//! ```
//!
//! The submit handler answers in one of three ways, chosen by the
//! [`SubmitOutcome`] it returns: errors right away, a future, or a promise to
//! call the [`SubmitCallback`] it was given. Whatever the style, [`Form::submit`]
//! returns a [`Submission`] future resolving to the submit errors, or `None`
//! on success.
//!
//! # Invariants
//!
//! 1. `submit` while submitting resolves to `Ok(None)` and changes nothing.
//! 2. Values are recorded as last submitted before anything else is checked.
//! 3. With sync errors present the handler is never called.
//! 4. With async validation outstanding, submit waits until it has all
//!    settled and then starts over.
//! 5. A field's `before_submit` returning `false` cancels quietly.
//! 6. Exactly one completion is applied per submission.
//!
//! # Failure Modes
//!
//! - **Handler future fails**: `submitting` is cleared, no success flags are
//!   set, listeners are told, and the submission resolves to
//!   [`FormError::SubmitRejected`].
//! - **Callback dropped unused**: logged at `warn`; treated like a failed
//!   handler except the submission resolves to `Ok(None)`.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use fform_core::{Value, has_any_error};
use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture};
use tracing::{debug, warn};

use crate::error::{BoxError, FormError, Result};
use crate::form::WeakForm;
use crate::validation::FORM_ERROR;
use crate::Form;

/// How a submit handler answers.
pub enum SubmitOutcome {
    /// Finished synchronously with these errors (`None` for success).
    Errors(Option<Value>),
    /// Finishes when the future does.
    Deferred(LocalBoxFuture<'static, std::result::Result<Option<Value>, BoxError>>),
    /// The handler will call the [`SubmitCallback`] it was given.
    Callback,
}

impl SubmitOutcome {
    #[must_use]
    pub fn success() -> Self {
        Self::Errors(None)
    }

    #[must_use]
    pub fn deferred(
        future: impl Future<Output = std::result::Result<Option<Value>, BoxError>> + 'static,
    ) -> Self {
        Self::Deferred(future.boxed_local())
    }
}

/// `(values, form, callback)`.
pub type SubmitHandler = Rc<dyn Fn(&Value, &Form, SubmitCallback) -> SubmitOutcome>;

type Settlement = Result<Option<Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// The handler is still on the stack.
    Running,
    /// The handler returned [`SubmitOutcome::Callback`].
    AwaitingCallback,
    /// The callback was dropped while the handler was running.
    Dropped,
    Done,
}

/// Shared between one submission, its callback and its result future.
struct Ticket {
    phase: Cell<Phase>,
    sender: RefCell<Option<oneshot::Sender<Settlement>>>,
}

impl Ticket {
    fn new() -> (Rc<Self>, oneshot::Receiver<Settlement>) {
        let (tx, rx) = oneshot::channel();
        let ticket = Rc::new(Self {
            phase: Cell::new(Phase::Running),
            sender: RefCell::new(Some(tx)),
        });
        (ticket, rx)
    }

    fn settle(&self, result: Settlement) {
        self.phase.set(Phase::Done);
        if let Some(tx) = self.sender.borrow_mut().take() {
            let _ = tx.send(result);
        }
    }

    fn is_done(&self) -> bool {
        self.phase.get() == Phase::Done
    }
}

/// Completion handle for callback-style submit handlers.
///
/// Call [`complete`](Self::complete) exactly once. Dropping it unused after
/// returning [`SubmitOutcome::Callback`] abandons the submission.
pub struct SubmitCallback {
    form: WeakForm,
    ticket: Rc<Ticket>,
}

impl SubmitCallback {
    /// Finish the submission with these errors (`None` for success).
    pub fn complete(self, errors: Option<Value>) {
        if self.ticket.is_done() {
            return;
        }
        match self.form.upgrade() {
            Some(form) => form.complete_submission(errors, &self.ticket),
            None => self.ticket.settle(Ok(errors)),
        }
    }
}

impl Drop for SubmitCallback {
    fn drop(&mut self) {
        match self.ticket.phase.get() {
            Phase::Running => self.ticket.phase.set(Phase::Dropped),
            Phase::AwaitingCallback => {
                warn!("submit callback dropped without completing");
                if let Some(form) = self.form.upgrade() {
                    form.abandon_submission(&self.ticket, Ok(None));
                }
            }
            Phase::Dropped | Phase::Done => {}
        }
    }
}

impl std::fmt::Debug for SubmitCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitCallback")
            .field("phase", &self.ticket.phase.get())
            .finish_non_exhaustive()
    }
}

/// Result of [`Form::submit`]: submit errors, or `None` on success or when
/// nothing was submitted.
///
/// The submission progresses whether or not this future is polled.
#[must_use = "a Submission reports the outcome; the submit itself runs regardless"]
pub struct Submission {
    state: SubmissionState,
}

enum SubmissionState {
    Ready(Option<Settlement>),
    Waiting(oneshot::Receiver<Settlement>),
}

impl Submission {
    fn ready(result: Settlement) -> Self {
        Self {
            state: SubmissionState::Ready(Some(result)),
        }
    }

    fn waiting(rx: oneshot::Receiver<Settlement>) -> Self {
        Self {
            state: SubmissionState::Waiting(rx),
        }
    }
}

impl Future for Submission {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            SubmissionState::Ready(result) => Poll::Ready(result.take().unwrap_or(Ok(None))),
            // A dropped sender means the form went away mid-submit.
            SubmissionState::Waiting(rx) => rx.poll_unpin(cx).map(|r| r.unwrap_or(Ok(None))),
        }
    }
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            SubmissionState::Ready(_) => "ready",
            SubmissionState::Waiting(_) => "waiting",
        };
        f.debug_struct("Submission").field("state", &state).finish()
    }
}

impl Form {
    /// Submit the form.
    pub fn submit(&self) -> Submission {
        let has_sync_errors = {
            let mut st = self.inner.state.borrow_mut();
            if st.form.submitting {
                return Submission::ready(Ok(None));
            }
            st.form.submit_failed = false;
            st.form.submit_succeeded = false;
            st.form.last_submitted_values = Some(st.form.values.clone());
            st.form.submit_errors = None;
            st.form.submit_error = None;
            st.form.error.as_ref().is_some_and(Value::is_truthy) || has_any_error(&st.form.errors)
        };

        if has_sync_errors {
            {
                let mut st = self.inner.state.borrow_mut();
                st.mark_all_touched();
                st.reset_modified_after_submit();
                st.form.submit_failed = true;
            }
            debug!("submit blocked by validation errors");
            self.notify_form_listeners();
            self.notify_field_listeners(None);
            return Submission::ready(Ok(None));
        }

        if self.inner.state.borrow().form.validating > 0 {
            self.notify_form_listeners();
            self.notify_field_listeners(None);
            return self.submit_when_idle();
        }

        if self.before_submit_blocked() {
            debug!("submit cancelled by a field hook");
            self.notify_form_listeners();
            self.notify_field_listeners(None);
            return Submission::ready(Ok(None));
        }

        {
            let mut st = self.inner.state.borrow_mut();
            st.form.submitting = true;
            st.form.submit_failed = false;
            st.form.submit_succeeded = false;
            st.reset_modified_after_submit();
        }
        debug!("submitting");

        let (ticket, rx) = Ticket::new();
        let handler = Rc::clone(&self.inner.settings.borrow().on_submit);
        let values = self.inner.state.borrow().form.values.clone();
        let callback = SubmitCallback {
            form: self.downgrade(),
            ticket: Rc::clone(&ticket),
        };
        let outcome = handler(&values, self, callback);

        if ticket.is_done() {
            return Submission::waiting(rx);
        }
        match outcome {
            SubmitOutcome::Errors(errors) => self.complete_submission(errors, &ticket),
            SubmitOutcome::Deferred(future) => {
                self.notify_form_listeners();
                self.notify_field_listeners(None);
                let weak = self.downgrade();
                let task_ticket = Rc::clone(&ticket);
                let spawned = self.inner.tasks.spawn(async move {
                    let result = future.await;
                    let Some(form) = weak.upgrade() else {
                        task_ticket.settle(result.map_err(FormError::SubmitRejected));
                        return;
                    };
                    match result {
                        Ok(errors) => form.complete_submission(errors, &task_ticket),
                        Err(err) => {
                            debug!(error = %err, "submit handler failed");
                            form.abandon_submission(&task_ticket, Err(FormError::SubmitRejected(err)));
                        }
                    }
                });
                if let Err(err) = spawned {
                    self.abandon_submission(&ticket, Err(err.into()));
                }
            }
            SubmitOutcome::Callback => {
                if ticket.phase.get() == Phase::Dropped {
                    warn!("submit callback dropped without completing");
                    self.abandon_submission(&ticket, Ok(None));
                } else {
                    ticket.phase.set(Phase::AwaitingCallback);
                    self.notify_form_listeners();
                    self.notify_field_listeners(None);
                }
            }
        }
        Submission::waiting(rx)
    }

    /// Wait for async validation to settle, then submit again.
    fn submit_when_idle(&self) -> Submission {
        let (ticket, rx) = Ticket::new();
        let idle = self.when_idle();
        let weak = self.downgrade();
        let task_ticket = Rc::clone(&ticket);
        let spawned = self.inner.tasks.spawn(async move {
            if idle.await.is_err() {
                warn!("async validation awaited by submit was abandoned");
                task_ticket.settle(Ok(None));
                return;
            }
            let Some(form) = weak.upgrade() else {
                task_ticket.settle(Ok(None));
                return;
            };
            let submission = form.submit();
            drop(form);
            task_ticket.settle(submission.await);
        });
        match spawned {
            Ok(()) => Submission::waiting(rx),
            Err(err) => Submission::ready(Err(err.into())),
        }
    }

    fn before_submit_blocked(&self) -> bool {
        let hooks: Vec<_> = self
            .inner
            .state
            .borrow()
            .fields
            .values()
            .filter_map(|field| field.before_submit.clone())
            .collect();
        hooks.iter().any(|hook| !hook())
    }

    fn complete_submission(&self, errors: Option<Value>, ticket: &Ticket) {
        if ticket.is_done() {
            return;
        }
        let failed = errors.as_ref().is_some_and(has_any_error);
        let after_hooks = {
            let mut st = self.inner.state.borrow_mut();
            st.form.submitting = false;
            let reset_while_submitting = std::mem::take(&mut st.form.reset_while_submitting);
            if failed {
                st.form.submit_failed = true;
                st.form.submit_succeeded = false;
                st.form.submit_error = errors
                    .as_ref()
                    .and_then(|e| e.child(FORM_ERROR))
                    .filter(|e| !e.is_null())
                    .cloned();
                st.form.submit_errors = errors.clone();
                st.mark_all_touched();
                Vec::new()
            } else {
                if !reset_while_submitting {
                    st.form.submit_failed = false;
                    st.form.submit_succeeded = true;
                }
                st.fields
                    .values()
                    .filter_map(|field| field.after_submit.clone())
                    .collect()
            }
        };
        for hook in after_hooks {
            hook();
        }
        debug!(failed, "submission complete");
        self.notify_form_listeners();
        self.notify_field_listeners(None);
        ticket.settle(Ok(errors.filter(has_any_error)));
    }

    /// End a submission without recording success or failure.
    fn abandon_submission(&self, ticket: &Ticket, result: Settlement) {
        if ticket.is_done() {
            return;
        }
        {
            let mut st = self.inner.state.borrow_mut();
            st.form.submitting = false;
            st.form.reset_while_submitting = false;
        }
        self.notify_form_listeners();
        self.notify_field_listeners(None);
        ticket.settle(result);
    }
}
