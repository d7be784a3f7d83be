//! Persistence for profiles, rating events, rounds, round stats and winner records

pub mod memory;

pub use memory::{InMemoryStore, Transaction};
