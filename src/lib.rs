// Library entry point for snapfeed
// Exposes modules for testing

pub mod api;
pub mod config;
pub mod imaging;
pub mod models;
pub mod service;
pub mod store;
