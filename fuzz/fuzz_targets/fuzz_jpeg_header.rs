//! Fuzz target for the JPEG frame header scan used by the asset rasterizer.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nb_core::render::asset::jpeg_dimensions;

fuzz_target!(|data: &[u8]| {
    if let Some((width, height, components)) = jpeg_dimensions(data) {
        assert!(width > 0 && height > 0);
        assert!(matches!(components, 1 | 3 | 4));
    }
});
