pub mod persistence;
pub mod snapshot;

pub use persistence::{load_forest, save_forest, PersistenceError};
pub use snapshot::{SnapshotDescription, SnapshotManager};
