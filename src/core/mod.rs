pub mod adaptive;
pub mod config;
