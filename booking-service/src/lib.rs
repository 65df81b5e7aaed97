pub mod api;
pub mod config;
pub mod confirmation;
pub mod gateway;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod retry;
pub mod schema;
pub mod store;
pub mod sweeper;
pub mod token;
pub mod webhook;
