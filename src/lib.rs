pub mod api;
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod map;
pub mod models;
pub mod observability;
pub mod routing;
pub mod state;
pub mod view;
