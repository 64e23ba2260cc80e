#![no_main]

use arbitrary::Arbitrary;
use fform_core::{PathError, Value, get_in, set_in};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Segment {
    Name(u8),
    Index(u8),
}

#[derive(Arbitrary, Debug)]
enum Op {
    Set { path: Vec<Segment>, value: i32 },
    Delete { path: Vec<Segment>, destroy: bool },
}

fn key(path: &[Segment]) -> String {
    let mut out = String::new();
    for segment in path.iter().take(6) {
        match segment {
            Segment::Name(n) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push((b'a' + n % 4) as char);
            }
            Segment::Index(i) => out.push_str(&format!("[{}]", i % 4)),
        }
    }
    out
}

fuzz_target!(|ops: Vec<Op>| {
    let mut root = Value::object();
    for op in ops.iter().take(64) {
        let result = match op {
            Op::Set { path, value } => {
                let key = key(path);
                let before = root.clone();
                let result = set_in(&root, &key, Some(Value::from(*value)), false);
                if let Ok(next) = &result {
                    assert_eq!(get_in(next, &key), Some(&Value::from(*value)));
                }
                // The input is never modified.
                assert_eq!(before, root);
                result
            }
            Op::Delete { path, destroy } => set_in(&root, &key(path), None, *destroy),
        };
        match result {
            Ok(next) => {
                assert!(!next.is_null());
                root = next;
            }
            Err(PathError::InvalidArgument { .. } | PathError::TypeConflict { .. }) => {}
            Err(err) => panic!("unexpected path error: {err}"),
        }
    }
});
