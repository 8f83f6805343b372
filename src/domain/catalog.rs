// domain/catalog.rs - Where each resource type is stored and who owns it

use crate::security::ownership::ResourceType;

/// Storage layout for one resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSpec {
    pub resource: ResourceType,
    pub table: &'static str,
    /// Column holding the owning member id; `None` when ownership is inherited
    pub owner_column: Option<&'static str>,
    /// Reference column and type of the parent resource
    pub parent: Option<(&'static str, ResourceType)>,
}

pub static CATALOG: &[ResourceSpec] = &[
    ResourceSpec {
        resource: ResourceType::MEMBER,
        table: "members",
        owner_column: Some("id"),
        parent: None,
    },
    ResourceSpec {
        resource: ResourceType::MEDICATION_SCHEDULE,
        table: "medication_schedules",
        owner_column: Some("member_id"),
        parent: None,
    },
    ResourceSpec {
        resource: ResourceType::MEDICATION_RECORD,
        table: "medication_records",
        owner_column: None,
        parent: Some(("medication_schedule_id", ResourceType::MEDICATION_SCHEDULE)),
    },
    ResourceSpec {
        resource: ResourceType::MOOD_DIARY,
        table: "mood_diaries",
        owner_column: Some("member_id"),
        parent: None,
    },
    ResourceSpec {
        resource: ResourceType::SIDE_EFFECT_RECORD,
        table: "side_effect_records",
        owner_column: Some("member_id"),
        parent: None,
    },
];

pub fn spec_for(resource: ResourceType) -> Option<&'static ResourceSpec> {
    CATALOG.iter().find(|spec| spec.resource == resource)
}
