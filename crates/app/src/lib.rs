pub mod config;
pub mod connection;
pub mod launcher;
pub mod protocol;
pub mod server;
