pub mod bootstrap;
pub mod cardinality;
pub mod config;
mod error;
pub mod gauge;
pub mod ledger;
pub mod patrol;
pub mod probe;
pub mod prom;
pub mod rule;
pub mod store;
pub mod waiter;

pub use {
    error::{Error, Result},
    patrol::{Patrol, PatrolSettings, Suppression},
};
