//! Crate-internal test suites.

mod auth_tests;
mod cli_invoker_tests;
mod engine_tests;
