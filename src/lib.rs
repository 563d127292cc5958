pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod mc;
pub mod model;
pub mod render;
pub mod rollback;
pub mod server;
pub mod world;
