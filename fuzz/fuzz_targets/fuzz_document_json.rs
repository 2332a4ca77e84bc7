//! Fuzz target for bundle document.json parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nb_package::NotebookDocument;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(doc) = NotebookDocument::from_json(json) {
        let _ = doc.background_rgb();
        let _ = doc.page_size.to_points();
        // A parsed document must serialize back
        doc.to_json().expect("parsed document serializes");
    }
});
