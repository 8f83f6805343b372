// domain/memory.rs - In-memory domain store for development and tests

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::{id_field, spec_for, DomainStore, LookupError, Member, ResourceLookup, ResourceSpec};
use crate::auth::hash_password;
use crate::security::ownership::ResourceType;

type Table = BTreeMap<i64, Value>;

pub struct MemoryDomainStore {
    tables: RwLock<HashMap<&'static str, Table>>,
    next_id: AtomicI64,
}

impl Default for MemoryDomainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDomainStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(10_000),
        }
    }

    /// Two members with one record of each type apiece:
    ///
    /// | member | login / password | schedule | record | diary | side effect |
    /// |---|---|---|---|---|---|
    /// | 1 | alice / alice-password | 10 | 100 | 1000 | 300 |
    /// | 2 | bob / bob-password | 20 | 200 | 2000 | 400 |
    pub async fn with_demo_data() -> Self {
        let store = Self::new();
        store.seed_demo().await;
        store
    }

    pub async fn seed_demo(&self) {
        let mut tables = self.tables.write().await;
        for (member_id, login, schedule, record, diary, side_effect) in
            [(1, "alice", 10, 100, 1000, 300), (2, "bob", 20, 200, 2000, 400)]
        {
            put(
                &mut tables,
                "members",
                json!({
                    "id": member_id,
                    "login_id": login,
                    "name": login,
                    "password_hash": hash_password(&format!("{}-password", login)),
                }),
            );
            put(
                &mut tables,
                "medication_schedules",
                json!({"id": schedule, "member_id": member_id, "name": "Vitamin D", "times_per_day": 1}),
            );
            put(
                &mut tables,
                "medication_records",
                json!({"id": record, "medication_schedule_id": schedule, "taken": true}),
            );
            put(
                &mut tables,
                "mood_diaries",
                json!({"id": diary, "member_id": member_id, "mood": "calm"}),
            );
            put(
                &mut tables,
                "side_effect_records",
                json!({"id": side_effect, "member_id": member_id, "symptom": "headache"}),
            );
        }
    }

    fn spec(resource: ResourceType) -> Result<&'static ResourceSpec, LookupError> {
        spec_for(resource).ok_or_else(|| LookupError::UnknownResource(resource.to_string()))
    }
}

fn put(tables: &mut HashMap<&'static str, Table>, table: &'static str, record: Value) {
    if let Some(id) = id_field(&record, "id") {
        tables.entry(table).or_default().insert(id, record);
    }
}

/// Owner of a row, resolved inside one read lock
fn owner_in(tables: &HashMap<&'static str, Table>, spec: &ResourceSpec, record: &Value) -> Option<i64> {
    let mut spec = spec;
    let mut record = record;
    loop {
        if let Some(column) = spec.owner_column {
            return id_field(record, column);
        }
        let (column, parent) = spec.parent?;
        let parent_id = id_field(record, column)?;
        spec = spec_for(parent)?;
        record = tables.get(spec.table)?.get(&parent_id)?;
    }
}

#[async_trait]
impl ResourceLookup for MemoryDomainStore {
    async fn fetch(&self, resource: ResourceType, id: i64) -> Result<Option<Value>, LookupError> {
        let spec = Self::spec(resource)?;
        let tables = self.tables.read().await;
        Ok(tables.get(spec.table).and_then(|t| t.get(&id)).cloned())
    }
}

#[async_trait]
impl DomainStore for MemoryDomainStore {
    async fn member_by_login(&self, login_id: &str) -> Result<Option<Member>, LookupError> {
        let tables = self.tables.read().await;
        let Some(row) = tables
            .get("members")
            .and_then(|members| members.values().find(|m| m["login_id"] == login_id))
        else {
            return Ok(None);
        };
        serde_json::from_value(row.clone())
            .map(Some)
            .map_err(|e| LookupError::Decode(e.to_string()))
    }

    async fn list_for_member(
        &self,
        resource: ResourceType,
        member_id: i64,
    ) -> Result<Vec<Value>, LookupError> {
        let spec = Self::spec(resource)?;
        let tables = self.tables.read().await;
        let Some(table) = tables.get(spec.table) else {
            return Ok(Vec::new());
        };
        Ok(table
            .values()
            .filter(|row| owner_in(&tables, spec, row) == Some(member_id))
            .cloned()
            .collect())
    }

    async fn insert(&self, resource: ResourceType, record: Value) -> Result<Value, LookupError> {
        let spec = Self::spec(resource)?;
        let Value::Object(mut fields) = record else {
            return Err(LookupError::Decode("record must be a JSON object".to_string()));
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        fields.insert("id".to_string(), json!(id));
        let record = Value::Object(fields);

        let mut tables = self.tables.write().await;
        tables.entry(spec.table).or_default().insert(id, record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn owner_follows_parent_reference() {
        let store = MemoryDomainStore::with_demo_data().await;
        assert_eq!(store.owner_of(ResourceType::MEDICATION_RECORD, 100).await.unwrap(), Some(1));
        assert_eq!(store.owner_of(ResourceType::MEDICATION_SCHEDULE, 20).await.unwrap(), Some(2));
        assert_eq!(
            store.parent_of(ResourceType::MEDICATION_RECORD, 200).await.unwrap(),
            Some((ResourceType::MEDICATION_SCHEDULE, 20))
        );
    }

    #[tokio::test]
    async fn missing_records_are_none() {
        let store = MemoryDomainStore::with_demo_data().await;
        assert_eq!(store.owner_of(ResourceType::MOOD_DIARY, 999).await.unwrap(), None);
        assert_eq!(store.parent_of(ResourceType::MEDICATION_RECORD, 999).await.unwrap(), None);
        assert_eq!(store.parent_of(ResourceType::MOOD_DIARY, 1000).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_type_is_an_error() {
        let store = MemoryDomainStore::new();
        assert!(matches!(
            store.fetch(ResourceType::new("widget"), 1).await,
            Err(LookupError::UnknownResource(_))
        ));
    }

    #[tokio::test]
    async fn insert_assigns_id_and_lists_by_owner() {
        let store = MemoryDomainStore::with_demo_data().await;
        let created = store
            .insert(
                ResourceType::MEDICATION_RECORD,
                json!({"medication_schedule_id": 10, "taken": false}),
            )
            .await
            .unwrap();
        assert!(created["id"].as_i64().is_some());

        let records = store.list_for_member(ResourceType::MEDICATION_RECORD, 1).await.unwrap();
        assert_eq!(records.len(), 2);
        let records = store.list_for_member(ResourceType::MEDICATION_RECORD, 2).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn member_lookup_by_login() {
        let store = MemoryDomainStore::with_demo_data().await;
        let alice = store.member_by_login("alice").await.unwrap().unwrap();
        assert_eq!(alice.id, 1);
        assert_eq!(alice.password_hash, hash_password("alice-password"));
        assert!(store.member_by_login("mallory").await.unwrap().is_none());
    }
}
