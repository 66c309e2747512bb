//! Integration tests for the Plasma Cash client.

pub mod mocks;

#[cfg(test)]
mod history_tests;
#[cfg(test)]
mod watcher_tests;
