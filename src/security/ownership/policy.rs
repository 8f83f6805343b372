// security/ownership/policy.rs - Declarative per-route ownership policy

use std::fmt;

use serde::Serialize;

/// Class of protected resource. New types are added as constants (or built
/// with `ResourceType::new`) and registered with a resolver at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ResourceType(&'static str);

impl ResourceType {
    pub const MEMBER: ResourceType = ResourceType("member");
    pub const MEDICATION_SCHEDULE: ResourceType = ResourceType("medication-schedule");
    pub const MEDICATION_SCHEDULE_BY_MEMBER: ResourceType = ResourceType("medication-schedule-by-member");
    pub const MEDICATION_RECORD: ResourceType = ResourceType("medication-record");
    pub const MOOD_DIARY: ResourceType = ResourceType("mood-diary");
    pub const MOOD_DIARY_BY_MEMBER: ResourceType = ResourceType("mood-diary-by-member");
    pub const SIDE_EFFECT_RECORD: ResourceType = ResourceType("side-effect-record");

    pub const fn new(name: &'static str) -> Self {
        ResourceType(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// How a raw identifier maps to its owning member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnershipStrategy {
    /// The identifier is the resource's own key
    Direct,
    /// The identifier is a child whose parent carries the owner
    ThroughSchedule,
    /// The identifier is the owning member's key
    ThroughMember,
}

/// Where the identifier lives in the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterSource {
    Path,
    Query,
    Body,
}

/// Immutable policy attached to one protected route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipPolicy {
    pub resource_type: ResourceType,
    pub parameter_name: String,
    pub source: ParameterSource,
    pub body_field_path: Option<String>,
    pub strategy: OwnershipStrategy,
}

impl OwnershipPolicy {
    pub fn path(resource_type: ResourceType, parameter_name: impl Into<String>) -> Self {
        Self::new(resource_type, parameter_name, ParameterSource::Path, None)
    }

    pub fn query(resource_type: ResourceType, parameter_name: impl Into<String>) -> Self {
        Self::new(resource_type, parameter_name, ParameterSource::Query, None)
    }

    /// Body policy; `field_path` is a dot-delimited path such as `request.memberId`
    pub fn body(resource_type: ResourceType, field_path: impl Into<String>) -> Self {
        let field_path = field_path.into();
        Self::new(resource_type, field_path.clone(), ParameterSource::Body, Some(field_path))
    }

    fn new(
        resource_type: ResourceType,
        parameter_name: impl Into<String>,
        source: ParameterSource,
        body_field_path: Option<String>,
    ) -> Self {
        Self {
            resource_type,
            parameter_name: parameter_name.into(),
            source,
            body_field_path,
            strategy: OwnershipStrategy::Direct,
        }
    }

    pub fn with_strategy(mut self, strategy: OwnershipStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Path walked inside the body; defaults to the parameter name
    pub fn field_path(&self) -> &str {
        self.body_field_path.as_deref().unwrap_or(&self.parameter_name)
    }
}
