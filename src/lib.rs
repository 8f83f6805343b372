pub mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod security;
pub mod store;

pub use app::{router, AppState};
