//! Deterministic, pure logic shared by the farming loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod correlate;
pub mod errors;
pub mod geometry;
pub mod recovery;
pub mod room_selector;
pub mod session;
pub mod signal;
pub mod state;
