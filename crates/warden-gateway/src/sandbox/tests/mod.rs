//! Unit tests for sandboxed execution.

mod executor;
