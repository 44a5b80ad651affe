#![no_main]
use libfuzzer_sys::fuzz_target;
use oxidiff::compress::codec::Compression;
use oxidiff::compress::encoder::DiffOptions;
use oxidiff::engine;

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let level = (data[0] % 10) as u32;
    let block_size = match data[1] % 4 {
        0 => None,
        n => Some(8usize << n),
    };
    let split = 2 + (data[2] as usize % (data.len() - 2));
    let old = &data[2..split];
    let new = &data[split..];

    let opts = DiffOptions {
        level,
        compression: Compression::None,
        block_size,
        ..Default::default()
    };
    let (diff, _) = engine::diff_with_options(old, new, &opts).unwrap();
    let patched = engine::patch(old, &diff).unwrap();
    assert_eq!(patched, new);
});
