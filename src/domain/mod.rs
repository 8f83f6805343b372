// domain/mod.rs - Read/write access to the protected records
//
// The ownership validator only needs `ResourceLookup`: load a record by id and
// follow its owner or parent reference. Handlers use the wider `DomainStore`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::security::ownership::ResourceType;

pub mod catalog;
pub mod memory;
pub mod postgres;

pub use catalog::{spec_for, ResourceSpec, CATALOG};
pub use memory::MemoryDomainStore;
pub use postgres::PgDomainStore;

/// Errors from domain storage. A missing record is `Ok(None)`, not an error.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed record: {0}")]
    Decode(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub login_id: String,
    pub name: String,
    pub password_hash: String,
}

fn id_field(record: &Value, column: &str) -> Option<i64> {
    record.get(column).and_then(Value::as_i64)
}

#[async_trait]
pub trait ResourceLookup: Send + Sync {
    /// Load one record as JSON
    async fn fetch(&self, resource: ResourceType, id: i64) -> Result<Option<Value>, LookupError>;

    /// Owning member of a record, following parent references for types
    /// without an owner column
    async fn owner_of(&self, resource: ResourceType, id: i64) -> Result<Option<i64>, LookupError> {
        let mut resource = resource;
        let mut id = id;
        loop {
            let spec = spec_for(resource)
                .ok_or_else(|| LookupError::UnknownResource(resource.to_string()))?;
            let Some(record) = self.fetch(resource, id).await? else {
                return Ok(None);
            };
            match (spec.owner_column, spec.parent) {
                (Some(column), _) => return Ok(id_field(&record, column)),
                (None, Some((column, parent))) => match id_field(&record, column) {
                    Some(parent_id) => {
                        resource = parent;
                        id = parent_id;
                    }
                    None => return Ok(None),
                },
                (None, None) => return Ok(None),
            }
        }
    }

    /// Parent type and id referenced by a child record
    async fn parent_of(
        &self,
        resource: ResourceType,
        id: i64,
    ) -> Result<Option<(ResourceType, i64)>, LookupError> {
        let spec = spec_for(resource)
            .ok_or_else(|| LookupError::UnknownResource(resource.to_string()))?;
        let Some((column, parent)) = spec.parent else {
            return Ok(None);
        };
        Ok(self
            .fetch(resource, id)
            .await?
            .and_then(|record| id_field(&record, column))
            .map(|parent_id| (parent, parent_id)))
    }
}

#[async_trait]
pub trait DomainStore: ResourceLookup {
    async fn member_by_login(&self, login_id: &str) -> Result<Option<Member>, LookupError>;

    async fn list_for_member(
        &self,
        resource: ResourceType,
        member_id: i64,
    ) -> Result<Vec<Value>, LookupError>;

    /// Insert a record and return it with its assigned id
    async fn insert(&self, resource: ResourceType, record: Value) -> Result<Value, LookupError>;
}
