#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // parsing adversarial bytes must never panic; packed MZ inputs also get
    // their decompressors exercised
    if let Ok(object) = relic::Object::parse(data) {
        let _ = object.code_section();
        if let relic::Object::Mz(mz) = object {
            let _ = mz.decompress();
        }
    }
});
