pub mod api;
pub mod config;
pub mod distance;
pub mod engine;
pub mod error;
pub mod geo;
pub mod models;
pub mod notify;
pub mod observability;
pub mod repository;
pub mod state;
