//! End-to-end tests: the real server in front of a mock ranged object store.

pub mod harness;
pub mod mock_store;

#[cfg(test)]
mod e2e;
