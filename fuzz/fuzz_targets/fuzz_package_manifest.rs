//! Fuzz target for manifest.json parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nb_package::PackageManifest;

fuzz_target!(|data: &[u8]| {
    if let Ok(json) = std::str::from_utf8(data) {
        if let Ok(manifest) = PackageManifest::from_json(json) {
            let _ = manifest.validate();
            let _ = manifest.total_bytes();
        }
    }
});
