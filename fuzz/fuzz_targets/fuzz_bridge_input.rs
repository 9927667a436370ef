#![no_main]

use libfuzzer_sys::fuzz_target;
use phasekeeper::transport::BridgeInput;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = serde_json::from_slice::<BridgeInput>(data) {
        let _ = serde_json::to_string(&input);
    }
});
