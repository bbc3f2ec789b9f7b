pub mod auth;
pub mod config;
pub mod messages;
pub mod registry;
pub mod routes;
pub mod server;
pub mod store;
