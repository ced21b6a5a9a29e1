pub mod config;
pub mod executor;
pub mod github;
pub mod harvest;
pub mod model;
pub mod server;
pub mod store;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

// Re-export common types for convenience
pub use executor::*;
pub use model::*;
pub use traits::*;
