//! Property-based tests.
//!
//! Run with: `cargo test --test property`

mod recycler_model;
