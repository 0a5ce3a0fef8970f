pub mod api_connection;
pub mod cli;
pub mod config;
pub mod error;
pub mod inventory_loader;
pub mod models;
pub mod planner;
pub mod server;
pub mod stages;
