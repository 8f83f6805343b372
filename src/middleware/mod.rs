pub mod auth;
pub mod client_ip;
pub mod ownership;
pub mod rate_limit;
pub mod response;

pub use auth::principal_middleware;
pub use client_ip::{client_ip_middleware, ClientIp, TrustedProxies};
pub use ownership::{ownership_gate, OwnershipGate};
pub use rate_limit::{classify, rate_limit_middleware};
pub use response::{ApiResponse, ApiResult};
