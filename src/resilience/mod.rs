//! Resilience helpers for store access.

pub mod retry;
