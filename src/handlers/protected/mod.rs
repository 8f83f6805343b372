// handlers/protected/mod.rs - Member-owned records
//
// Handlers here assume the caller already passed the ownership gate for the
// route; they only load or store the record.
//
// Route                                         Policy
// GET  /medication-schedule/:medication_schedule_id   path, medication-schedule
// GET  /medication-schedule/member/:member_id         path, medication-schedule-by-member
// GET  /medication-record/:medication_record_id       path, medication-record (through schedule)
// POST /medication-record                             body medicationScheduleId, medication-schedule
// GET  /mood-diary/:mood_diary_id                     path, mood-diary
// POST /mood-diary                                    body request.memberId, mood-diary-by-member
// GET  /side-effect/list?member_id=                   query, member

pub mod medication_record;
pub mod medication_schedule;
pub mod mood_diary;
pub mod side_effect;

use serde_json::Value;

use crate::error::ApiError;

fn found(record: Option<Value>, what: &str) -> Result<Value, ApiError> {
    record.ok_or_else(|| ApiError::not_found(format!("{} not found", what)))
}
