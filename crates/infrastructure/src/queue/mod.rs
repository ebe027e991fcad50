pub mod sqlite_deferred_queue;

pub use sqlite_deferred_queue::SqliteDeferredQueue;
