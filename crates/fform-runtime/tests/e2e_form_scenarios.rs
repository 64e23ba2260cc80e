//! E2E: synchronous form behaviour.
//!
//! Drives a form through its public surface and checks what subscribers see:
//! 1. Snapshot identity and diff suppression
//! 2. Forced first notification, batching and pause/resume
//! 3. Validator precedence, scoped revalidation and whole-array errors
//! 4. Deferred first notifications and live configuration

#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fform_core::{Array, Interest, Mask, Value};
use fform_runtime::{
    ConfigValue, FieldConfig, FieldKey, FieldState, Form, FormConfig, FormError, FormKey,
    FormState, SubmitOutcome, Validation,
};
use serde_json::json;

// ── Helpers ─────────────────────────────────────────────────────────────

fn config() -> FormConfig {
    FormConfig::new().with_on_submit(|_, _, _| SubmitOutcome::success())
}

fn values(json: serde_json::Value) -> Value {
    Value::from(json)
}

/// Counts calls and keeps the last snapshot.
struct Probe<S> {
    calls: Rc<Cell<usize>>,
    last: Rc<RefCell<Option<S>>>,
}

impl<S: Clone + 'static> Probe<S> {
    fn new() -> Self {
        Self {
            calls: Rc::new(Cell::new(0)),
            last: Rc::new(RefCell::new(None)),
        }
    }

    fn callback(&self) -> impl Fn(&S) + 'static {
        let calls = Rc::clone(&self.calls);
        let last = Rc::clone(&self.last);
        move |state: &S| {
            calls.set(calls.get() + 1);
            *last.borrow_mut() = Some(state.clone());
        }
    }

    fn calls(&self) -> usize {
        self.calls.get()
    }

    fn last(&self) -> S {
        self.last.borrow().clone().expect("probe was never called")
    }
}

fn field_error(probe: &Probe<FieldState>) -> Option<Value> {
    probe.last().error
}

// ── Snapshots ───────────────────────────────────────────────────────────

#[test]
fn get_state_is_reference_stable() {
    let form = Form::new(config()).unwrap();
    let first = form.get_state();
    let second = form.get_state();
    assert!(Rc::ptr_eq(&first, &second));

    form.change("a", 1).unwrap();
    let third = form.get_state();
    assert!(!Rc::ptr_eq(&second, &third));
    assert!(Rc::ptr_eq(&third, &form.get_state()));
}

#[test]
fn subscriber_masked_to_one_value_ignores_siblings() {
    let form = Form::new(config()).unwrap();
    let probe = Probe::<FormState>::new();
    let _sub = form.subscribe(
        probe.callback(),
        Mask::none().with_interest(FormKey::Values, Interest::keys(["x"])),
    );
    assert_eq!(probe.calls(), 1);

    form.change("y", 1).unwrap();
    form.change("y", 2).unwrap();
    assert_eq!(probe.calls(), 1);

    form.change("x", 1).unwrap();
    assert_eq!(probe.calls(), 2);
    assert_eq!(probe.last().values, values(json!({ "x": 1, "y": 2 })));
}

#[test]
fn field_subscriber_masked_to_touched_ignores_value_changes() {
    let form = Form::new(config()).unwrap();
    let probe = Probe::<FieldState>::new();
    let _a = form
        .register_field("a", probe.callback(), Mask::only([FieldKey::Touched]), FieldConfig::new())
        .unwrap();
    form.change("a", "one").unwrap();
    form.change("a", "two").unwrap();
    assert_eq!(probe.calls(), 1);
    form.blur("a").unwrap();
    assert_eq!(probe.calls(), 2);
    assert!(probe.last().touched);
    assert_eq!(probe.last().value, None);
}

#[test]
fn new_subscriber_is_notified_once_even_with_defaults() {
    let form = Form::new(config()).unwrap();
    let probe = Probe::<FieldState>::new();
    let _a = form
        .register_field("a", probe.callback(), Mask::only([FieldKey::Error]), FieldConfig::new())
        .unwrap();
    assert_eq!(probe.calls(), 1);
    assert_eq!(probe.last().name, "a");
    assert_eq!(probe.last().error, None);
}

#[test]
fn batch_notifies_once_per_changed_field() {
    let form = Form::new(config()).unwrap();
    let form_probe = Probe::<FormState>::new();
    let a = Probe::<FieldState>::new();
    let b = Probe::<FieldState>::new();
    let c = Probe::<FieldState>::new();
    let _a = form.register_field("a", a.callback(), Mask::all(), FieldConfig::new()).unwrap();
    let _b = form.register_field("b", b.callback(), Mask::all(), FieldConfig::new()).unwrap();
    let _c = form.register_field("c", c.callback(), Mask::all(), FieldConfig::new()).unwrap();
    let _form = form.subscribe(form_probe.callback(), Mask::all());
    let before = (form_probe.calls(), a.calls(), b.calls(), c.calls());

    form.batch(|| {
        form.change("a", 1).unwrap();
        form.change("b", 2).unwrap();
        form.change("a", 3).unwrap();
    });

    assert_eq!(form_probe.calls(), before.0 + 1);
    assert_eq!(a.calls(), before.1 + 1);
    assert_eq!(b.calls(), before.2 + 1);
    assert_eq!(c.calls(), before.3);
    assert_eq!(form_probe.last().values, values(json!({ "a": 3, "b": 2 })));
}

#[test]
fn nested_batches_notify_once_at_the_end() {
    let form = Form::new(config()).unwrap();
    let probe = Probe::<FormState>::new();
    let _sub = form.subscribe(probe.callback(), Mask::only([FormKey::Values]));
    form.batch(|| {
        form.change("a", 1).unwrap();
        form.batch(|| form.change("b", 1).unwrap());
        assert_eq!(probe.calls(), 1);
    });
    assert_eq!(probe.calls(), 2);
}

#[test]
fn subscriber_mutating_the_form_is_replayed_not_nested() {
    let form = Form::new(config()).unwrap();
    let seen: Rc<RefCell<Vec<Value>>> = Rc::default();
    let log = Rc::clone(&seen);
    let handle = form.downgrade();
    let _sub = form.subscribe(
        move |state: &FormState| {
            log.borrow_mut().push(state.values.clone());
            let Some(form) = handle.upgrade() else { return };
            if state.values.child("a").is_some() && state.values.child("echo").is_none() {
                form.change("echo", true).unwrap();
            }
        },
        Mask::only([FormKey::Values]),
    );
    form.change("a", 1).unwrap();
    assert_eq!(
        *seen.borrow(),
        vec![
            values(json!({})),
            values(json!({ "a": 1 })),
            values(json!({ "a": 1, "echo": true })),
        ]
    );
}

// ── Validation ──────────────────────────────────────────────────────────

#[test]
fn required_username_scenario() {
    let form = Form::new(config().with_validate(|values| {
        match values.child("username") {
            Some(name) if name.is_truthy() => Validation::Ready(Some(Value::object())),
            _ => Validation::error(Value::from_iter([("username", "Required")])),
        }
    }))
    .unwrap();
    let probe = Probe::<FieldState>::new();
    let _username = form
        .register_field("username", probe.callback(), Mask::all(), FieldConfig::new())
        .unwrap();
    assert_eq!(field_error(&probe), Some(Value::from("Required")));
    assert!(form.get_state().invalid);

    form.change("username", "bob").unwrap();
    assert_eq!(field_error(&probe), None);
    assert!(form.get_state().valid);
}

#[test]
fn field_validator_beats_record_validator() {
    let form = Form::new(config().with_validate(|_| Validation::error(Value::from_iter([("x", "B")])))).unwrap();
    let probe = Probe::<FieldState>::new();
    let _x = form
        .register_field(
            "x",
            probe.callback(),
            Mask::all(),
            FieldConfig::new().with_validator(|_, _, _| Validation::error("A")),
        )
        .unwrap();
    assert_eq!(field_error(&probe), Some(Value::from("A")));
    assert_eq!(form.get_state().errors, values(json!({ "x": "A" })));
}

#[test]
fn record_error_applies_when_field_validator_passes() {
    let form = Form::new(config().with_validate(|_| Validation::error(Value::from_iter([("x", "B")])))).unwrap();
    let probe = Probe::<FieldState>::new();
    let _x = form
        .register_field(
            "x",
            probe.callback(),
            Mask::all(),
            FieldConfig::new().with_validator(|_, _, _| Validation::valid()),
        )
        .unwrap();
    assert_eq!(field_error(&probe), Some(Value::from("B")));
}

#[test]
fn shared_field_name_sees_one_merged_error() {
    let form = Form::new(config()).unwrap();
    let first = Probe::<FieldState>::new();
    let second = Probe::<FieldState>::new();
    let when_bad = |message: &'static str| {
        move |value: Option<&Value>, _: &Value, _: &FieldState| {
            if value.and_then(Value::as_str) == Some("bad") {
                Validation::error(message)
            } else {
                Validation::valid()
            }
        }
    };
    let _one = form
        .register_field("foo", first.callback(), Mask::all(), FieldConfig::new().with_validator(when_bad("first")))
        .unwrap();
    let _two = form
        .register_field("foo", second.callback(), Mask::all(), FieldConfig::new().with_validator(when_bad("second")))
        .unwrap();

    form.change("foo", "bad").unwrap();
    assert_eq!(field_error(&first), Some(Value::from("first")));
    assert_eq!(field_error(&second), Some(Value::from("first")));

    form.change("foo", "good").unwrap();
    assert_eq!(field_error(&first), None);
    assert_eq!(field_error(&second), None);
    assert_eq!(first.calls(), second.calls());
}

#[test]
fn removing_the_only_validator_clears_its_error() {
    let form = Form::new(config()).unwrap();
    let watcher = Probe::<FormState>::new();
    let _watch = form.subscribe(watcher.callback(), Mask::only([FormKey::Errors]));
    let field = form
        .register_field("a", |_| {}, Mask::all(), FieldConfig::new().with_validator(|_, _, _| Validation::error("no")))
        .unwrap();
    assert_eq!(watcher.last().errors, values(json!({ "a": "no" })));
    drop(field);
    assert_eq!(watcher.last().errors, values(json!({})));
}

#[test]
fn validate_fields_limits_scope_and_keeps_other_errors() {
    let form = Form::new(config().with_initial_values(values(json!({ "c": "bad" })))).unwrap();
    let c_runs = Rc::new(Cell::new(0));
    let runs = Rc::clone(&c_runs);
    let _a = form
        .register_field("a", |_| {}, Mask::all(), FieldConfig::new().with_validate_fields(["b"]))
        .unwrap();
    let _b = form
        .register_field(
            "b",
            |_| {},
            Mask::all(),
            FieldConfig::new().with_validator(|value, _, _| match value {
                Some(_) => Validation::valid(),
                None => Validation::error("b required"),
            }),
        )
        .unwrap();
    let _c = form
        .register_field(
            "c",
            |_| {},
            Mask::all(),
            FieldConfig::new().with_validator(move |value, _, _| {
                runs.set(runs.get() + 1);
                if value.and_then(Value::as_str) == Some("bad") {
                    Validation::error("c is bad")
                } else {
                    Validation::valid()
                }
            }),
        )
        .unwrap();
    let c_before = c_runs.get();
    assert_eq!(
        form.get_state().errors,
        values(json!({ "b": "b required", "c": "c is bad" }))
    );

    form.change("a", 1).unwrap();
    assert_eq!(c_runs.get(), c_before);
    assert_eq!(
        form.get_state().errors,
        values(json!({ "b": "b required", "c": "c is bad" }))
    );

    form.change("b", 1).unwrap();
    assert_eq!(c_runs.get(), c_before + 1);
    assert_eq!(form.get_state().errors, values(json!({ "c": "c is bad" })));
}

#[test]
fn whole_array_error_reaches_the_field() {
    let form = Form::new(
        config()
            .with_initial_values(values(json!({ "tags": ["rust"] })))
            .with_validate(|values| {
                let short = values
                    .child("tags")
                    .and_then(Value::as_array)
                    .is_some_and(|tags| tags.len() < 2);
                if short {
                    let marker = Array::from(vec![Value::Null]).with_error("need two tags");
                    Validation::error(Value::from_iter([("tags", Value::Array(marker))]))
                } else {
                    Validation::valid()
                }
            }),
    )
    .unwrap();
    let probe = Probe::<FieldState>::new();
    let _tags = form.register_field("tags", probe.callback(), Mask::all(), FieldConfig::new()).unwrap();
    assert_eq!(field_error(&probe), Some(Value::from("need two tags")));
    assert_eq!(probe.last().length, Some(1));

    form.change("tags", values(json!(["rust", "forms"]))).unwrap();
    assert_eq!(field_error(&probe), None);
    assert_eq!(probe.last().length, Some(2));
}

#[test]
fn form_error_key_sets_form_error() {
    let form = Form::new(config().with_validate(|_| {
        Validation::error(Value::from_iter([(fform_runtime::FORM_ERROR, "passwords differ")]))
    }))
    .unwrap();
    let state = form.get_state();
    assert_eq!(state.error, Some(Value::from("passwords differ")));
    assert!(state.has_validation_errors);
}

#[test]
fn paused_validation_runs_once_on_resume() {
    let runs = Rc::new(Cell::new(0));
    let counter = Rc::clone(&runs);
    let form = Form::new(config().with_validate(move |_| {
        counter.set(counter.get() + 1);
        Validation::valid()
    }))
    .unwrap();
    let probe = Probe::<FormState>::new();
    let _sub = form.subscribe(probe.callback(), Mask::only([FormKey::Values]));
    let runs_before = runs.get();

    form.pause_validation();
    assert!(form.is_validation_paused());
    form.change("a", 1).unwrap();
    form.change("a", 2).unwrap();
    assert_eq!(runs.get(), runs_before);
    assert_eq!(probe.calls(), 3);

    form.resume_validation().unwrap();
    assert!(!form.is_validation_paused());
    assert_eq!(runs.get(), runs_before + 1);

    form.resume_validation().unwrap();
    assert_eq!(runs.get(), runs_before + 1);
}

#[test]
fn validate_on_blur_defers_validation() {
    let runs = Rc::new(Cell::new(0));
    let counter = Rc::clone(&runs);
    let form = Form::new(
        config().with_validate_on_blur(true).with_validate(move |_| {
            counter.set(counter.get() + 1);
            Validation::valid()
        }),
    )
    .unwrap();
    let _a = form.register_field("a", |_| {}, Mask::all(), FieldConfig::new()).unwrap();
    let before = runs.get();
    form.change("a", 1).unwrap();
    assert_eq!(runs.get(), before);
    form.blur("a").unwrap();
    assert_eq!(runs.get(), before + 1);
}

// ── Deferred registration ───────────────────────────────────────────────

#[test]
fn deferred_first_notifications_flush_together_in_order() {
    let queue: Rc<RefCell<Vec<Box<dyn FnOnce()>>>> = Rc::default();
    let scheduled = Rc::clone(&queue);
    let form = Form::new(
        config().with_callback_scheduler(move |callback| scheduled.borrow_mut().push(callback)),
    )
    .unwrap();
    let order: Rc<RefCell<Vec<String>>> = Rc::default();
    let subscriber = |log: &Rc<RefCell<Vec<String>>>| {
        let log = Rc::clone(log);
        move |state: &FieldState| log.borrow_mut().push(state.name.clone())
    };
    let _a = form
        .register_field("a", subscriber(&order), Mask::all(), FieldConfig::new().defer_first_notification())
        .unwrap();
    let _b = form
        .register_field("b", subscriber(&order), Mask::all(), FieldConfig::new().defer_first_notification())
        .unwrap();
    assert!(order.borrow().is_empty());
    assert_eq!(queue.borrow().len(), 1);

    let callbacks: Vec<_> = queue.borrow_mut().drain(..).collect();
    for callback in callbacks {
        callback();
    }
    assert_eq!(*order.borrow(), vec!["a".to_owned(), "b".to_owned()]);

    form.change("a", 1).unwrap();
    assert_eq!(*order.borrow(), vec!["a".to_owned(), "b".to_owned(), "a".to_owned()]);
}

#[test]
fn change_before_flush_delivers_only_the_latest_snapshot() {
    let queue: Rc<RefCell<Vec<Box<dyn FnOnce()>>>> = Rc::default();
    let scheduled = Rc::clone(&queue);
    let form = Form::new(
        config()
            .with_initial_values(values(json!({ "a": "old" })))
            .with_callback_scheduler(move |callback| scheduled.borrow_mut().push(callback)),
    )
    .unwrap();
    let seen: Rc<RefCell<Vec<Option<Value>>>> = Rc::default();
    let log = Rc::clone(&seen);
    let _a = form
        .register_field(
            "a",
            move |state: &FieldState| log.borrow_mut().push(state.value.clone()),
            Mask::all(),
            FieldConfig::new().defer_first_notification(),
        )
        .unwrap();

    form.change("a", "new").unwrap();
    assert!(seen.borrow().is_empty());

    let callbacks: Vec<_> = queue.borrow_mut().drain(..).collect();
    for callback in callbacks {
        callback();
    }
    assert_eq!(*seen.borrow(), vec![Some(Value::from("new"))]);

    form.change("a", "newer").unwrap();
    assert_eq!(
        *seen.borrow(),
        vec![Some(Value::from("new")), Some(Value::from("newer"))]
    );
}

#[test]
fn unregistered_before_flush_gets_nothing() {
    let queue: Rc<RefCell<Vec<Box<dyn FnOnce()>>>> = Rc::default();
    let scheduled = Rc::clone(&queue);
    let form = Form::new(
        config().with_callback_scheduler(move |callback| scheduled.borrow_mut().push(callback)),
    )
    .unwrap();
    let probe = Probe::<FieldState>::new();
    let a = form
        .register_field("a", probe.callback(), Mask::all(), FieldConfig::new().defer_first_notification())
        .unwrap();
    drop(a);
    let callbacks: Vec<_> = queue.borrow_mut().drain(..).collect();
    for callback in callbacks {
        callback();
    }
    assert_eq!(probe.calls(), 0);
}

#[test]
fn default_scheduler_flushes_on_next_turn() {
    let form = Form::new(config()).unwrap();
    let probe = Probe::<FieldState>::new();
    let _a = form
        .register_field("a", probe.callback(), Mask::all(), FieldConfig::new().defer_first_notification())
        .unwrap();
    assert_eq!(probe.calls(), 0);
    assert!(form.run_until_stalled());
    assert_eq!(probe.calls(), 1);
}

#[test]
fn silent_registration_does_not_notify_the_form() {
    let form = Form::new(config()).unwrap();
    let probe = Probe::<FormState>::new();
    let _sub = form.subscribe(probe.callback(), Mask::all());
    let field = Probe::<FieldState>::new();
    let silent = form
        .register_field("a", field.callback(), Mask::all(), FieldConfig::new().silent())
        .unwrap();
    assert_eq!(field.calls(), 1);
    assert_eq!(probe.calls(), 1);
    drop(silent);
    assert_eq!(probe.calls(), 1);
}

// ── Configuration ───────────────────────────────────────────────────────

#[test]
fn set_config_rejects_unknown_keys() {
    let form = Form::new(config()).unwrap();
    let err = form.set_config("validateOnChange", ConfigValue::from(true)).unwrap_err();
    assert!(matches!(err, FormError::UnrecognisedOption { ref key } if key == "validateOnChange"));
}

#[test]
fn set_config_rejects_wrong_kinds() {
    let form = Form::new(config()).unwrap();
    let err = form
        .set_config("destroyOnUnregister", ConfigValue::from(values(json!({}))))
        .unwrap_err();
    assert!(matches!(err, FormError::InvalidOptionValue { .. }));
}

#[test]
fn set_config_applies_live() {
    let form = Form::new(config()).unwrap();
    form.set_config("destroyOnUnregister", ConfigValue::from(true)).unwrap();
    assert!(form.destroy_on_unregister());

    form.set_config("initialValues", ConfigValue::from(values(json!({ "a": 1 })))).unwrap();
    assert_eq!(form.get_state().values, values(json!({ "a": 1 })));

    let validate: fform_runtime::RecordValidator =
        Rc::new(|_: &Value| Validation::error(Value::from_iter([("a", "nope")])));
    form.set_config("validate", ConfigValue::Validate(Some(validate))).unwrap();
    assert_eq!(form.get_state().errors, values(json!({ "a": "nope" })));

    form.set_config("validate", ConfigValue::Validate(None)).unwrap();
    assert_eq!(form.get_state().errors, values(json!({ "a": "nope" })));
}

#[test]
fn debug_hook_sees_every_field() {
    let seen: Rc<RefCell<Vec<usize>>> = Rc::default();
    let log = Rc::clone(&seen);
    let form = Form::new(config().with_debug(move |_, fields| log.borrow_mut().push(fields.len()))).unwrap();
    let _a = form.register_field("a", |_| {}, Mask::all(), FieldConfig::new()).unwrap();
    let _b = form.register_field("b", |_| {}, Mask::all(), FieldConfig::new()).unwrap();
    if cfg!(debug_assertions) {
        assert_eq!(seen.borrow().last(), Some(&2));
    }
}

#[test]
fn path_conflicts_are_reported() {
    let form = Form::new(config().with_initial_values(values(json!({ "a": "text" })))).unwrap();
    let err = form.change("a.b", 1).unwrap_err();
    assert!(matches!(err, FormError::Path(_)));
    assert_eq!(form.get_state().values, values(json!({ "a": "text" })));
}

#[test]
fn options_load_from_json() {
    let options = fform_runtime::FormOptions::from_json(
        r#"{ "destroyOnUnregister": true, "initialValues": { "a": [1, 2] } }"#,
    )
    .unwrap();
    let form = Form::new(config().with_options(options)).unwrap();
    assert!(form.destroy_on_unregister());
    assert_eq!(form.get_state().values, values(json!({ "a": [1, 2] })));
}

// ── Field lifecycle ─────────────────────────────────────────────────────

#[test]
fn renamed_field_unsubscribes_under_its_new_name() {
    let form = Form::new(config().with_mutator("rename", |_, state| {
        state.rename_field("a", "c")?;
        Ok(None)
    }))
    .unwrap();
    let probe = Probe::<FieldState>::new();
    let a = form
        .register_field("a", probe.callback(), Mask::all(), FieldConfig::new())
        .unwrap();
    form.mutate("rename", &[]).unwrap();
    assert_eq!(probe.last().name, "c");
    let calls = probe.calls();

    drop(a);
    assert!(form.get_registered_fields().is_empty());
    assert!(form.get_field_state("c").is_none());
    form.change("c", 99).unwrap();
    assert_eq!(probe.calls(), calls);
}

#[test]
fn reset_field_state_repeats_an_unchanged_delivery() {
    let form = Form::new(config()).unwrap();
    let probe = Probe::<FieldState>::new();
    let _a = form
        .register_field("a", probe.callback(), Mask::only([FieldKey::Touched]), FieldConfig::new())
        .unwrap();
    assert_eq!(probe.calls(), 1);

    form.reset_field_state("a").unwrap();
    assert_eq!(probe.calls(), 2);
    assert!(!probe.last().touched);
}
