//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of filesystem side effects. They define the
//! record types, the line codec and undo planning, and are tested in
//! isolation.

pub mod checksum;
pub mod frame;
pub mod replay;
pub mod types;
