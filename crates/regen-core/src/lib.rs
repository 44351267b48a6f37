pub mod aggregator;
pub mod approval;
pub mod clock;
pub mod config;
pub mod error;
pub mod external;
pub mod io;
pub mod ledger;
pub mod paths;
pub mod pipeline;
pub mod store;
pub mod trigger;
pub mod types;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{RegenError, Result};
pub use pipeline::{Collaborators, Pipeline};
