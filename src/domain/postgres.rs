// domain/postgres.rs - Domain store over Postgres
//
// Rows are returned as JSON with row_to_json so handlers and the ownership
// lookup share one shape with the in-memory store. Table and column names come
// from the static catalog; request-supplied column names are checked before
// they are spliced into SQL.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use super::{spec_for, DomainStore, LookupError, Member, ResourceLookup, ResourceSpec};
use crate::security::ownership::ResourceType;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS members (
        id BIGSERIAL PRIMARY KEY,
        login_id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        password_hash TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS medication_schedules (
        id BIGSERIAL PRIMARY KEY,
        member_id BIGINT NOT NULL REFERENCES members(id),
        name TEXT,
        times_per_day INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS medication_records (
        id BIGSERIAL PRIMARY KEY,
        medication_schedule_id BIGINT NOT NULL REFERENCES medication_schedules(id),
        taken BOOLEAN NOT NULL DEFAULT false,
        taken_at TEXT,
        note TEXT
    )",
    "CREATE TABLE IF NOT EXISTS mood_diaries (
        id BIGSERIAL PRIMARY KEY,
        member_id BIGINT NOT NULL REFERENCES members(id),
        mood TEXT,
        note TEXT
    )",
    "CREATE TABLE IF NOT EXISTS side_effect_records (
        id BIGSERIAL PRIMARY KEY,
        member_id BIGINT NOT NULL REFERENCES members(id),
        symptom TEXT
    )",
];

#[derive(Debug, Clone)]
pub struct PgDomainStore {
    pool: PgPool,
}

impl PgDomainStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), LookupError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn spec(resource: ResourceType) -> Result<&'static ResourceSpec, LookupError> {
        spec_for(resource).ok_or_else(|| LookupError::UnknownResource(resource.to_string()))
    }
}

fn is_valid_column(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

#[async_trait]
impl ResourceLookup for PgDomainStore {
    async fn fetch(&self, resource: ResourceType, id: i64) -> Result<Option<Value>, LookupError> {
        let spec = Self::spec(resource)?;
        let sql = format!("SELECT row_to_json(t) FROM {} t WHERE t.id = $1", spec.table);
        let row: Option<Value> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl DomainStore for PgDomainStore {
    async fn member_by_login(&self, login_id: &str) -> Result<Option<Member>, LookupError> {
        let row: Option<Value> =
            sqlx::query_scalar("SELECT row_to_json(m) FROM members m WHERE m.login_id = $1")
                .bind(login_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|value| serde_json::from_value(value).map_err(|e| LookupError::Decode(e.to_string())))
            .transpose()
    }

    async fn list_for_member(
        &self,
        resource: ResourceType,
        member_id: i64,
    ) -> Result<Vec<Value>, LookupError> {
        let spec = Self::spec(resource)?;
        let sql = match (spec.owner_column, spec.parent) {
            (Some(owner), _) => format!(
                "SELECT row_to_json(t) FROM {} t WHERE t.{} = $1 ORDER BY t.id",
                spec.table, owner
            ),
            (None, Some((column, parent))) => {
                let parent_spec = Self::spec(parent)?;
                let owner = parent_spec.owner_column.ok_or_else(|| {
                    LookupError::UnknownResource(format!("{} has no owner column", parent))
                })?;
                format!(
                    "SELECT row_to_json(c) FROM {} c JOIN {} p ON c.{} = p.id
                     WHERE p.{} = $1 ORDER BY c.id",
                    spec.table, parent_spec.table, column, owner
                )
            }
            (None, None) => return Ok(Vec::new()),
        };

        let rows: Vec<Value> = sqlx::query_scalar(&sql)
            .bind(member_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn insert(&self, resource: ResourceType, record: Value) -> Result<Value, LookupError> {
        let spec = Self::spec(resource)?;
        let Value::Object(fields) = &record else {
            return Err(LookupError::Decode("record must be a JSON object".to_string()));
        };

        let columns: Vec<&str> = fields
            .keys()
            .map(String::as_str)
            .filter(|name| *name != "id")
            .collect();
        if let Some(bad) = columns.iter().find(|name| !is_valid_column(name)) {
            return Err(LookupError::Decode(format!("invalid column name: {}", bad)));
        }
        if columns.is_empty() {
            return Err(LookupError::Decode("record has no columns".to_string()));
        }

        let column_list = columns.join(", ");
        let sql = format!(
            "INSERT INTO {table} AS t ({cols})
             SELECT {cols} FROM jsonb_populate_record(NULL::{table}, $1)
             RETURNING row_to_json(t)",
            table = spec.table,
            cols = column_list
        );
        let created: Value = sqlx::query_scalar(&sql)
            .bind(sqlx::types::Json(&record))
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_names_are_restricted() {
        assert!(is_valid_column("medication_schedule_id"));
        assert!(!is_valid_column("id; DROP TABLE members"));
        assert!(!is_valid_column("Name"));
        assert!(!is_valid_column("1st"));
        assert!(!is_valid_column(""));
    }
}
