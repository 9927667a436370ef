#![no_main]

use libfuzzer_sys::fuzz_target;
use phasekeeper::detection::MatcherLimits;
use phasekeeper::detection::matcher::{Pattern, PatternSet};

// First line is the pattern, the rest is the message.
fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let (pattern, message) = input.split_once('\n').unwrap_or((input, ""));
    let limits = MatcherLimits::default();

    let set = PatternSet::compile(
        [
            Pattern::regex(pattern, 0, 0_u8),
            Pattern::substring(pattern, 1, 1_u8),
        ],
        &limits,
    );
    if let Some(found) = set.find(message) {
        let _ = found.span.slice(message);
    }
    let _ = set.find_all(message).count();
});
