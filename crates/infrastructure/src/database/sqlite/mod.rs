pub mod sqlite_executor_pause_repository;
pub mod sqlite_package_repository;
pub mod sqlite_task_repository;
pub mod sqlite_worker_event_repository;

pub use sqlite_executor_pause_repository::SqliteExecutorPauseRepository;
pub use sqlite_package_repository::SqlitePackageRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
pub use sqlite_worker_event_repository::SqliteWorkerEventRepository;
