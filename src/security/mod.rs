// security/mod.rs - Request admission: ownership, rate limiting, anomaly monitoring

pub mod anomaly;
pub mod ownership;
pub mod rate_limit;

pub use anomaly::{AnomalyMonitor, AuthContext, AuthEventFeed, RiskLevel, SecurityEvent};
pub use ownership::{OwnershipError, OwnershipPolicy, OwnershipValidator, ResourceType};
pub use rate_limit::{Admission, EndpointClass, RateLimitInfo, RateLimiter};
