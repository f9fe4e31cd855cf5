pub mod api;
pub mod config;
pub mod console;
pub mod errors;
pub mod models;
pub mod notifications;
pub mod push;
pub mod service;
pub mod timeline;
