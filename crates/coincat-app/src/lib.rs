// Library root: re-exports all modules so integration tests and the binary
// share the application's public API.

pub mod app;
pub mod cli;
pub mod form;
pub mod protocol;
