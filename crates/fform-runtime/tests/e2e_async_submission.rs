//! E2E: async validation and submission.
//!
//! Async validators and submit handlers are driven by `oneshot` channels the
//! test resolves by hand, and the form's task pool is advanced with
//! `run_until_stalled`, so every interleaving here is deterministic:
//! 1. A superseded validation pass never overwrites a newer one
//! 2. Failed validator futures count as "no error"
//! 3. Submit waits for outstanding validation
//! 4. All three submit handler styles resolve the same `Submission`

#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fform_core::{Mask, Value};
use fform_runtime::{
    BoxError, FORM_ERROR, FieldConfig, FieldState, Form, FormConfig, FormError, SubmitCallback,
    SubmitOutcome, Validation,
};
use futures::FutureExt;
use futures::channel::oneshot;
use futures::executor::LocalPool;
use serde_json::json;

// ── Helpers ─────────────────────────────────────────────────────────────

type Pending = Rc<RefCell<Vec<(String, oneshot::Sender<Option<Value>>)>>>;

fn values(json: serde_json::Value) -> Value {
    Value::from(json)
}

fn config() -> FormConfig {
    FormConfig::new().with_on_submit(|_, _, _| SubmitOutcome::success())
}

fn channel_result(rx: oneshot::Receiver<Option<Value>>) -> Validation {
    Validation::pending(async move { rx.await.map_err(|err| -> BoxError { Box::new(err) }) })
}

/// A field validator that parks every call on a channel, keyed by value.
fn parked_validator(pending: &Pending) -> FieldConfig {
    let queue = Rc::clone(pending);
    FieldConfig::new().with_validator(move |value, _, _| {
        let Some(text) = value.and_then(Value::as_str) else {
            return Validation::valid();
        };
        let (tx, rx) = oneshot::channel();
        queue.borrow_mut().push((text.to_owned(), tx));
        channel_result(rx)
    })
}

fn resolve(pending: &Pending, key: &str, error: Option<Value>) {
    let index = pending
        .borrow()
        .iter()
        .position(|(k, _)| k == key)
        .expect("no parked validation for key");
    let (_, tx) = pending.borrow_mut().remove(index);
    tx.send(error).expect("validation future dropped");
}

fn recorder() -> (Rc<RefCell<Option<FieldState>>>, impl Fn(&FieldState) + 'static) {
    let slot: Rc<RefCell<Option<FieldState>>> = Rc::default();
    let writer = Rc::clone(&slot);
    (slot, move |state: &FieldState| *writer.borrow_mut() = Some(state.clone()))
}

// ── Async validation ────────────────────────────────────────────────────

#[test]
fn superseded_validation_is_discarded() {
    let form = Form::new(config()).unwrap();
    let pending: Pending = Rc::default();
    let (last, callback) = recorder();
    let _f = form
        .register_field("f", callback, Mask::all(), parked_validator(&pending))
        .unwrap();

    form.change("f", "v1").unwrap();
    form.change("f", "v2").unwrap();
    assert!(form.get_state().validating);
    assert!(last.borrow().as_ref().unwrap().validating);

    resolve(&pending, "v2", Some(Value::from("v2 is taken")));
    form.run_until_stalled();
    assert_eq!(last.borrow().as_ref().unwrap().error, Some(Value::from("v2 is taken")));
    assert!(form.get_state().validating);

    resolve(&pending, "v1", Some(Value::from("v1 is taken")));
    form.run_until_stalled();
    let state = last.borrow().clone().unwrap();
    assert_eq!(state.error, Some(Value::from("v2 is taken")));
    assert!(!state.validating);
    assert!(!form.get_state().validating);
}

#[test]
fn late_result_of_current_pass_is_applied() {
    let form = Form::new(config()).unwrap();
    let pending: Pending = Rc::default();
    let (last, callback) = recorder();
    let _f = form
        .register_field("f", callback, Mask::all(), parked_validator(&pending))
        .unwrap();
    form.change("f", "only").unwrap();
    assert_eq!(last.borrow().as_ref().unwrap().error, None);

    resolve(&pending, "only", Some(Value::from("bad")));
    form.run_until_stalled();
    assert_eq!(last.borrow().as_ref().unwrap().error, Some(Value::from("bad")));
    assert!(form.get_state().invalid);
}

#[test]
fn change_to_unvalidated_dependent_keeps_pending_result() {
    let form = Form::new(config()).unwrap();
    let pending: Pending = Rc::default();
    let (last, callback) = recorder();
    let _a = form
        .register_field("a", callback, Mask::all(), parked_validator(&pending))
        .unwrap();
    let _b = form
        .register_field("b", |_| {}, Mask::all(), FieldConfig::new().with_validate_fields(Vec::<&str>::new()))
        .unwrap();

    form.change("a", "x").unwrap();
    form.change("b", "y").unwrap();
    resolve(&pending, "x", Some(Value::from("taken")));
    form.run_until_stalled();

    assert_eq!(last.borrow().as_ref().unwrap().error, Some(Value::from("taken")));
    assert!(!form.get_state().validating);
}

#[test]
fn failed_validator_future_counts_as_valid() {
    let form = Form::new(config()).unwrap();
    let pending: Pending = Rc::default();
    let (last, callback) = recorder();
    let _f = form
        .register_field("f", callback, Mask::all(), parked_validator(&pending))
        .unwrap();
    form.change("f", "x").unwrap();
    pending.borrow_mut().clear();
    form.run_until_stalled();

    let state = last.borrow().clone().unwrap();
    assert_eq!(state.error, None);
    assert!(!state.validating);
    assert!(!form.get_state().validating);
}

#[test]
fn async_record_errors_merge() {
    let parked: Rc<RefCell<Vec<oneshot::Sender<Option<Value>>>>> = Rc::default();
    let queue = Rc::clone(&parked);
    let form = Form::new(config().with_validate(move |_| {
        let (tx, rx) = oneshot::channel();
        queue.borrow_mut().push(tx);
        channel_result(rx)
    }))
    .unwrap();
    let (last, callback) = recorder();
    let _name = form.register_field("name", callback, Mask::all(), FieldConfig::new()).unwrap();
    assert!(form.get_state().validating);

    let senders: Vec<_> = parked.borrow_mut().drain(..).collect();
    for tx in senders {
        tx.send(Some(values(json!({ "name": "taken", FORM_ERROR: "try again" }))))
            .unwrap();
    }
    form.run_until_stalled();
    let state = form.get_state();
    assert!(!state.validating);
    assert_eq!(state.error, Some(Value::from("try again")));
    assert_eq!(last.borrow().as_ref().unwrap().error, Some(Value::from("taken")));
}

#[test]
fn host_spawner_drives_validation() {
    let mut pool = LocalPool::new();
    let form = Form::new(config().with_spawner(Rc::new(pool.spawner()))).unwrap();
    let pending: Pending = Rc::default();
    let (last, callback) = recorder();
    let _f = form
        .register_field("f", callback, Mask::all(), parked_validator(&pending))
        .unwrap();
    form.change("f", "x").unwrap();
    assert!(!form.run_until_stalled());

    resolve(&pending, "x", Some(Value::from("nope")));
    pool.run_until_stalled();
    assert_eq!(last.borrow().as_ref().unwrap().error, Some(Value::from("nope")));
}

// ── Submission ──────────────────────────────────────────────────────────

#[test]
fn sync_submit_succeeds_and_runs_after_hooks() {
    let received: Rc<RefCell<Option<Value>>> = Rc::default();
    let sink = Rc::clone(&received);
    let form = Form::new(
        FormConfig::new()
            .with_initial_values(values(json!({ "a": 1 })))
            .with_on_submit(move |values, _, _| {
                *sink.borrow_mut() = Some(values.clone());
                SubmitOutcome::success()
            }),
    )
    .unwrap();
    let after = Rc::new(Cell::new(0));
    let hook = Rc::clone(&after);
    let _a = form
        .register_field(
            "a",
            |_| {},
            Mask::all(),
            FieldConfig::new().with_after_submit(move || hook.set(hook.get() + 1)),
        )
        .unwrap();

    let result = form.submit().now_or_never().unwrap().unwrap();
    assert_eq!(result, None);
    assert_eq!(*received.borrow(), Some(values(json!({ "a": 1 }))));
    assert_eq!(after.get(), 1);
    let state = form.get_state();
    assert!(state.submit_succeeded);
    assert!(!state.submitting);

    form.change("a", 2).unwrap();
    let state = form.get_state();
    assert!(state.dirty_since_last_submit);
    assert!(state.modified_since_last_submit);
}

#[test]
fn submit_errors_are_published() {
    let form = Form::new(config().with_on_submit(|_, _, _| {
        SubmitOutcome::Errors(Some(values(json!({ "a": "taken", FORM_ERROR: "rejected" }))))
    }))
    .unwrap();
    let (last, callback) = recorder();
    let _a = form.register_field("a", callback, Mask::all(), FieldConfig::new()).unwrap();

    let result = form.submit().now_or_never().unwrap().unwrap();
    assert_eq!(result, Some(values(json!({ "a": "taken", FORM_ERROR: "rejected" }))));
    let state = form.get_state();
    assert!(state.submit_failed);
    assert!(!state.submit_succeeded);
    assert!(state.has_submit_errors);
    assert_eq!(state.submit_error, Some(Value::from("rejected")));
    let field = last.borrow().clone().unwrap();
    assert_eq!(field.submit_error, Some(Value::from("taken")));
    assert!(field.touched);
    assert!(field.invalid);
}

#[test]
fn sync_errors_block_the_handler() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let form = Form::new(
        FormConfig::new()
            .with_validate(|_| Validation::error(values(json!({ "a": "required" }))))
            .with_on_submit(move |_, _, _| {
                counter.set(counter.get() + 1);
                SubmitOutcome::success()
            }),
    )
    .unwrap();
    let (last, callback) = recorder();
    let _a = form.register_field("a", callback, Mask::all(), FieldConfig::new()).unwrap();

    let result = form.submit().now_or_never().unwrap().unwrap();
    assert_eq!(result, None);
    assert_eq!(calls.get(), 0);
    let state = form.get_state();
    assert!(state.submit_failed);
    assert_eq!(state.touched.get("a"), Some(&true));
    assert!(last.borrow().as_ref().unwrap().touched);
}

#[test]
fn rejected_async_submit_propagates() {
    let form = Form::new(config().with_on_submit(|_, _, _| {
        SubmitOutcome::deferred(async { Err::<Option<Value>, BoxError>("server down".into()) })
    }))
    .unwrap();
    let submission = form.submit();
    assert!(form.get_state().submitting);

    form.run_until_stalled();
    let err = submission.now_or_never().unwrap().unwrap_err();
    assert!(matches!(err, FormError::SubmitRejected(_)));
    assert_eq!(err.rejection().unwrap().to_string(), "server down");
    let state = form.get_state();
    assert!(!state.submitting);
    assert!(!state.submit_succeeded);
    assert!(!state.submit_failed);
}

#[test]
fn async_submit_resolves_with_errors() {
    let (tx, rx) = oneshot::channel::<Option<Value>>();
    let rx = RefCell::new(Some(rx));
    let form = Form::new(config().with_on_submit(move |_, _, _| {
        let rx = rx.borrow_mut().take().expect("submitted twice");
        SubmitOutcome::deferred(async move { rx.await.map_err(|err| -> BoxError { Box::new(err) }) })
    }))
    .unwrap();
    let mut submission = form.submit();
    form.run_until_stalled();
    assert!((&mut submission).now_or_never().is_none());

    tx.send(Some(values(json!({ "a": "nope" })))).unwrap();
    form.run_until_stalled();
    let result = submission.now_or_never().unwrap().unwrap();
    assert_eq!(result, Some(values(json!({ "a": "nope" }))));
    assert!(form.get_state().submit_failed);
}

#[test]
fn blocked_submit_clears_previous_submit_errors() {
    let form = Form::new(
        FormConfig::new()
            .with_validate(|vals| match vals.child("a").and_then(Value::as_str) {
                Some("bad") => Validation::error(values(json!({ "a": "invalid" }))),
                _ => Validation::valid(),
            })
            .with_on_submit(|_, _, _| {
                SubmitOutcome::Errors(Some(values(json!({ "a": "server says no" }))))
            }),
    )
    .unwrap();
    form.change("a", "ok").unwrap();
    form.submit().now_or_never().unwrap().unwrap();
    assert!(form.get_state().has_submit_errors);

    form.change("a", "bad").unwrap();
    assert_eq!(form.submit().now_or_never().unwrap().unwrap(), None);
    let state = form.get_state();
    assert!(state.submit_failed);
    assert_eq!(state.submit_errors, None);
    assert!(!state.has_submit_errors);
}

#[test]
fn callback_submit_completes_later() {
    let slot: Rc<RefCell<Option<SubmitCallback>>> = Rc::default();
    let keep = Rc::clone(&slot);
    let form = Form::new(config().with_on_submit(move |_, _, callback| {
        *keep.borrow_mut() = Some(callback);
        SubmitOutcome::Callback
    }))
    .unwrap();

    let submission = form.submit();
    assert!(form.get_state().submitting);
    assert_eq!(form.submit().now_or_never().unwrap().unwrap(), None);

    let callback = slot.borrow_mut().take().unwrap();
    callback.complete(None);
    assert_eq!(submission.now_or_never().unwrap().unwrap(), None);
    let state = form.get_state();
    assert!(!state.submitting);
    assert!(state.submit_succeeded);
}

#[test]
fn callback_completed_inside_handler() {
    let form = Form::new(config().with_on_submit(|_, _, callback| {
        callback.complete(Some(values(json!({ "a": "bad" }))));
        SubmitOutcome::Callback
    }))
    .unwrap();
    let result = form.submit().now_or_never().unwrap().unwrap();
    assert_eq!(result, Some(values(json!({ "a": "bad" }))));
    assert!(form.get_state().submit_failed);
}

#[test]
fn dropped_callback_abandons_submission() {
    let form = Form::new(config().with_on_submit(|_, _, _callback| SubmitOutcome::Callback)).unwrap();
    let result = form.submit().now_or_never().unwrap().unwrap();
    assert_eq!(result, None);
    let state = form.get_state();
    assert!(!state.submitting);
    assert!(!state.submit_succeeded);
}

#[test]
fn before_submit_can_cancel() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let form = Form::new(FormConfig::new().with_on_submit(move |_, _, _| {
        counter.set(counter.get() + 1);
        SubmitOutcome::success()
    }))
    .unwrap();
    let _a = form
        .register_field("a", |_| {}, Mask::all(), FieldConfig::new().with_before_submit(|| false))
        .unwrap();
    let result = form.submit().now_or_never().unwrap().unwrap();
    assert_eq!(result, None);
    assert_eq!(calls.get(), 0);
    let state = form.get_state();
    assert!(!state.submitting);
    assert!(!state.submit_failed);
}

#[test]
fn reset_during_submit_suppresses_success() {
    let slot: Rc<RefCell<Option<SubmitCallback>>> = Rc::default();
    let keep = Rc::clone(&slot);
    let form = Form::new(config().with_on_submit(move |_, _, callback| {
        *keep.borrow_mut() = Some(callback);
        SubmitOutcome::Callback
    }))
    .unwrap();
    let _submission = form.submit();
    form.reset(None).unwrap();
    slot.borrow_mut().take().unwrap().complete(None);
    let state = form.get_state();
    assert!(!state.submitting);
    assert!(!state.submit_succeeded);
}

#[test]
fn submit_waits_for_async_validation() {
    let parked: Rc<RefCell<Vec<oneshot::Sender<Option<Value>>>>> = Rc::default();
    let queue = Rc::clone(&parked);
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let form = Form::new(
        FormConfig::new()
            .with_validate(move |_| {
                let (tx, rx) = oneshot::channel();
                queue.borrow_mut().push(tx);
                channel_result(rx)
            })
            .with_on_submit(move |_, _, _| {
                counter.set(counter.get() + 1);
                SubmitOutcome::success()
            }),
    )
    .unwrap();
    assert!(form.get_state().validating);

    let submission = form.submit();
    form.run_until_stalled();
    assert_eq!(calls.get(), 0);

    let senders: Vec<_> = parked.borrow_mut().drain(..).collect();
    for tx in senders {
        tx.send(None).unwrap();
    }
    form.run_until_stalled();
    assert_eq!(calls.get(), 1);
    assert_eq!(submission.now_or_never().unwrap().unwrap(), None);
    assert!(form.get_state().submit_succeeded);
}

#[test]
fn async_errors_found_before_submit_block_it() {
    let parked: Rc<RefCell<Vec<oneshot::Sender<Option<Value>>>>> = Rc::default();
    let queue = Rc::clone(&parked);
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let form = Form::new(
        FormConfig::new()
            .with_validate(move |_| {
                let (tx, rx) = oneshot::channel();
                queue.borrow_mut().push(tx);
                channel_result(rx)
            })
            .with_on_submit(move |_, _, _| {
                counter.set(counter.get() + 1);
                SubmitOutcome::success()
            }),
    )
    .unwrap();
    let submission = form.submit();
    let senders: Vec<_> = parked.borrow_mut().drain(..).collect();
    for tx in senders {
        tx.send(Some(values(json!({ "a": "bad" })))).unwrap();
    }
    form.run_until_stalled();
    assert_eq!(calls.get(), 0);
    assert_eq!(submission.now_or_never().unwrap().unwrap(), None);
    assert!(form.get_state().submit_failed);
}

#[test]
fn dropping_the_form_mid_submit_resolves_quietly() {
    let slot: Rc<RefCell<Option<SubmitCallback>>> = Rc::default();
    let keep = Rc::clone(&slot);
    let form = Form::new(config().with_on_submit(move |_, _, callback| {
        *keep.borrow_mut() = Some(callback);
        SubmitOutcome::Callback
    }))
    .unwrap();
    let submission = form.submit();
    drop(form);
    slot.borrow_mut().take().unwrap().complete(None);
    assert_eq!(submission.now_or_never().unwrap().unwrap(), None);
}
