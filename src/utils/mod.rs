//! Process-level helpers for the pathtaker binary.

pub mod bootstrap;
pub mod retry;
