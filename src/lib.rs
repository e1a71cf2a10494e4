pub mod config;
pub mod error;
pub mod extend;
pub mod logging;
pub mod services;
pub mod system;
pub mod ui;
pub mod units;
