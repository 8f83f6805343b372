// handlers/mod.rs - HTTP handlers
//
// public/    - no principal required (health, login)
// protected/ - behind the rate-limit gate and a per-route ownership policy

pub mod protected;
pub mod public;
