#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must decode to an error or to an index whose
    // checkpoint lookups stay in bounds
    if let Ok(index) = logsieve::index::LineIndex::decode(data) {
        let total = index.total_lines();
        for line in [1, total / 2, total, total.saturating_add(1)] {
            let checkpoint = index.checkpoint_for(line);
            assert!(checkpoint.line <= line.max(1));
        }
        let reencoded = index.encode();
        assert!(logsieve::index::LineIndex::decode(&reencoded).is_ok());
    }
});
