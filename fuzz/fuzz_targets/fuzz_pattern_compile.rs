#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use logsieve::filter::PatternSet;
use logsieve::utils::DetectedEncoding;

#[derive(Arbitrary, Debug)]
struct Input {
    keep: Vec<String>,
    exclude: Vec<String>,
    gbk: bool,
    line: Vec<u8>,
}

fuzz_target!(|input: Input| {
    // Oversized keyword sets may be rejected; nothing may panic
    let encoding = if input.gbk {
        DetectedEncoding::from_label("gbk").unwrap()
    } else {
        DetectedEncoding::utf8()
    };
    if let Ok(patterns) = PatternSet::compile(&input.keep, &input.exclude, encoding) {
        let _ = patterns.accepts(&input.line);
    }
});
