#![no_main]

use fform_core::{Value, get_in, set_in, to_path};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(key) = std::str::from_utf8(data) else {
        return;
    };
    let segments = to_path(key);
    for segment in &segments {
        assert!(!segment.is_empty());
        assert!(!segment.contains(['.', '[', ']']));
    }

    // Arbitrary keys must never panic, only error.
    let root = Value::object();
    assert!(get_in(&root, key).is_none());
    if let Ok(next) = set_in(&root, key, Some(Value::from(true)), false) {
        assert_eq!(get_in(&next, key), Some(&Value::from(true)));
        let cleared = set_in(&next, key, None, true).expect("clearing a path just written");
        assert!(get_in(&cleared, key).is_none());
    }
});
