//! Fuzzing harnesses for the framed ring.
//!
//! Writer and reader run on one thread against a heap segment, so every
//! interleaving is chosen by the fuzzer instead of the scheduler.

pub mod ring_model;
