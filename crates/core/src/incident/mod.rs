pub mod db;
pub mod dedupe;
pub mod policy;
pub mod store;

pub use db::PgIncidentStore;
pub use policy::{ConfigError, IncidentPolicy, Outcome, ProcessError};
pub use store::{IncidentStore, MemoryStore, StoreError};
