//! Fuzz target for batch.json configuration parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nb_core::config::BatchConfig;

fuzz_target!(|data: &[u8]| {
    // Try to parse as JSON - should never panic, only return an error
    if let Ok(config) = serde_json::from_slice::<BatchConfig>(data) {
        let _ = config.validate();
        let _ = config.pdf_options().validate();
    }
});
