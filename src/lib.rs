pub mod config;
pub mod error;
pub mod extract;
pub mod geocode;
pub mod models;
pub mod pipeline;
pub mod scrapers;
