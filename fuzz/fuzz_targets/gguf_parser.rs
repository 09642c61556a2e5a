//! Fuzz target for the GGUF parser
//!
//! Tests parser robustness against malformed container data.

#![no_main]

use grafter_gguf::GGUFParser;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let parser = GGUFParser::new();

    // Try to parse arbitrary data - should not panic
    let _ = parser.parse(data);
});
