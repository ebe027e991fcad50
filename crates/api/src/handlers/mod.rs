pub mod executors;
pub mod health;
pub mod packages;
pub mod tasks;
pub mod workers;
