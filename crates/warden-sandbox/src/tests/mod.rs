//! Unit and process-level tests for the sandbox wrapper.

mod support;
mod unit;
