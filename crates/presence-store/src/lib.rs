pub mod config;
pub mod error;
pub mod json_bridge;
pub mod loops;
pub mod relationship_tracker;
pub mod relationships;
pub mod schema;
pub mod store;
pub mod sweep;
pub mod threads;
pub mod tracker;

pub use config::{default_data_dir, default_db_path, load_config};
pub use error::{Result, StoreError};
pub use json_bridge::ImportReport;
pub use loops::OpenLoopStore;
pub use relationship_tracker::{RecordedEvent, RelationshipTracker};
pub use relationships::{RelationshipStore, StateWrite};
pub use store::{Store, StoreStats};
pub use sweep::{SweepReport, sweep_all};
pub use threads::ThreadStore;
pub use tracker::OpenLoopTracker;
