//! Fuzz target: `Reassembler::push`
//!
//! Splits the input into length-prefixed fragments and feeds them to the
//! reassembler. It must never panic and never yield a block larger than
//! its capacity.
//!
//! cargo fuzz run fuzz_reassembly

#![no_main]

use libfuzzer_sys::fuzz_target;
use nesvoy::adapters::block_transfer::Reassembler;

const CAPACITY: usize = 200;

fuzz_target!(|data: &[u8]| {
    let mut reassembler = Reassembler::new(CAPACITY);
    let mut rest = data;

    while let [len, tail @ ..] = rest {
        let n = usize::from(*len).min(tail.len());
        let (fragment, next) = tail.split_at(n);
        if let Ok(Some(block)) = reassembler.push(fragment) {
            assert!(block.len() <= CAPACITY, "block exceeds reassembly capacity");
        }
        rest = next;
    }
});
