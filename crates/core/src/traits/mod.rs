pub mod blob_store;
pub mod deferred_queue;
pub mod metrics;
pub mod repository;
pub mod webhook;

pub use blob_store::*;
pub use deferred_queue::*;
pub use metrics::*;
pub use repository::*;
pub use webhook::*;
