pub mod app;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod service;
pub mod sheet;
pub mod shutdown;
pub mod sweeper;
pub mod worker;
