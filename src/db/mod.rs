//! Statistics storage and query engine.
//!
//! Provides the SQLite store, filter-to-query translation, period routing of
//! queries and top-N ranking.

mod engine;
mod models;
mod query;
mod ranking;
mod store;

pub use engine::*;
pub use models::*;
pub use query::*;
pub use ranking::*;
pub use store::*;
