pub mod app;
pub mod auth;
pub mod config;
pub mod console;
pub mod error;
pub mod handlers;
pub mod openai;
pub mod reframer;
pub mod upstream;
