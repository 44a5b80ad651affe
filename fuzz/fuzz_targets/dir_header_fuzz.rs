#![no_main]
use libfuzzer_sys::fuzz_target;
use oxidiff::dir::DirDiffInfo;

fuzz_target!(|data: &[u8]| {
    // Header and head-data parsing must reject garbage without panicking.
    let _ = DirDiffInfo::read(&mut &data[..]);

    let mut framed = b"HDIFF19&&fadler64\0".to_vec();
    framed.extend_from_slice(data);
    let _ = DirDiffInfo::read(&mut framed.as_slice());
});
