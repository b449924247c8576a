pub mod schema;
pub mod store;

pub use store::{StoreError, SyncHistory, SyncRun};
