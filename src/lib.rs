pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod payments;
pub mod services;
pub mod workers;
