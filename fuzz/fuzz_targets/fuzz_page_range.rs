//! Fuzz target for page range expressions.
//!
//! Whatever the expression, the selection must stay inside the document,
//! ascending and free of duplicates.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use nb_core::render::parse_page_range;

#[derive(Arbitrary, Debug)]
struct Input {
    spec: String,
    page_count: u16,
}

fuzz_target!(|input: Input| {
    let count = input.page_count as usize;
    let selection = parse_page_range(&input.spec, count);
    assert!(selection.pages.iter().all(|&p| p < count));
    assert!(selection.pages.windows(2).all(|w| w[0] < w[1]));
});
