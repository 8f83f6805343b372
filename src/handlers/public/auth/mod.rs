// handlers/public/auth/mod.rs - Token acquisition

pub mod login; // POST /auth/login

pub use login::login_post;
