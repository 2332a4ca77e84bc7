//! Fuzz target for .snbx package reading.
//!
//! Packages arrive from other machines, so opening one must never panic,
//! only return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nb_package::PackageReader;

fuzz_target!(|data: &[u8]| {
    let Ok(mut reader) = PackageReader::from_bytes(data.to_vec()) else {
        return;
    };
    // Checksum verification walks every entry the manifest names
    let _ = reader.verify_all();
    let _ = reader.target_bundle_name("fallback");
});
