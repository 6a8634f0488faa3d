pub mod schema;
pub mod store;

pub use store::{ResultFilter, RunStats, ScenarioStats, ScoreColumn, Store, StoredResult};
