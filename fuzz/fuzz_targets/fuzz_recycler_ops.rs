#![no_main]

use libfuzzer_sys::fuzz_target;

use recycler_rs::{Recyclable, Recycled, Recycler};

// Interprets a byte stream as an operation sequence against a `Recycler`,
// checking pool occupancy against a bounded-stack model on one thread.
//
// Byte layout:
// - Byte 0 → `max_capacity_per_thread` (0..=63)
// - Remaining bytes as `(opcode, operand)` pairs:
//   - 0 → `acquire()`
//   - 1 → `release(held[operand % len])`
//   - 2 → double release of `held[operand % len]` through a ticket clone
//   - 3 → `lease()` dropped immediately
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let max = (data[0] % 64) as usize;
    let recycler = Recycler::wrapping(max, || 0u32);
    let mut held: Vec<Recycled<u32>> = Vec::new();
    let mut pooled = 0usize;

    let ops = &data[1..];
    let mut i = 0;
    while i + 1 < ops.len() {
        let opcode = ops[i];
        let operand = ops[i + 1] as usize;
        i += 2;

        match opcode % 4 {
            // acquire
            0 => {
                held.push(recycler.acquire());
                pooled = pooled.saturating_sub(1);
            }
            // release
            1 => {
                if held.is_empty() {
                    continue;
                }
                let value = held.swap_remove(operand % held.len());
                let accepted = recycler.release(value).ok();
                if max == 0 {
                    assert_eq!(accepted, Some(false));
                } else {
                    assert_eq!(accepted, Some(true));
                    pooled = (pooled + 1).min(max);
                }
            }
            // double release
            2 => {
                if held.is_empty() || max == 0 {
                    continue;
                }
                let value = held.swap_remove(operand % held.len());
                let twin = Recycled::new(1u32, value.ticket().clone());
                assert_eq!(recycler.release(value).ok(), Some(true));
                assert!(recycler.release(twin).is_err(), "double release accepted");
                pooled = (pooled + 1).min(max);
            }
            // lease
            _ => {
                drop(recycler.lease());
                if max > 0 {
                    pooled = pooled.max(1);
                }
            }
        }

        let stats = recycler.local_stats();
        assert_eq!(stats.pooled, pooled, "pool occupancy diverged from model");
        assert!(stats.pooled <= max);
    }
});
