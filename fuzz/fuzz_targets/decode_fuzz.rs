#![no_main]
use libfuzzer_sys::fuzz_target;
use oxidiff::engine;

fuzz_target!(|data: &[u8]| {
    // Patching arbitrary bytes must never panic, only return errors.
    let _ = engine::patch(&[], data);

    // Also with a non-empty old side.
    if data.len() >= 2 {
        let split = data.len() / 2;
        let (old, diff) = data.split_at(split);
        let _ = engine::patch(old, diff);
    }

    // A valid magic gets the parser past the first check more often.
    let mut framed = b"HDIFF13&\0".to_vec();
    framed.extend_from_slice(data);
    let _ = engine::patch(data, &framed);
});
