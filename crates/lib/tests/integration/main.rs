//! End-to-end tests for forge-lib: real recipe trees, real build scripts.

mod common;

#[cfg(unix)]
mod build_tests;
mod plan_tests;
