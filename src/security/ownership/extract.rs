// security/ownership/extract.rs - Locating a resource identifier in a request
//
// Request payloads expose their fields through `Extractable` instead of being
// introspected. A dotted path such as `request.memberId` is walked segment by
// segment; each segment is tried as written and then in snake_case, and one
// level of optional wrapping is unwrapped per segment. Anything missing or of
// the wrong shape resolves to `None`.

use std::borrow::Cow;
use std::collections::HashMap;

use super::policy::{OwnershipPolicy, ParameterSource};

/// A field read from an `Extractable`
pub enum FieldValue<'a> {
    Integer(i64),
    Text(Cow<'a, str>),
    /// Optional wrapper; `None` reads as absent
    Optional(Option<Box<FieldValue<'a>>>),
    Nested(&'a dyn Extractable),
    /// Present but not usable as an identifier or a path step
    Other,
}

impl<'a> FieldValue<'a> {
    pub fn text(value: &'a str) -> Self {
        FieldValue::Text(Cow::Borrowed(value))
    }

    pub fn optional(value: Option<FieldValue<'a>>) -> Self {
        FieldValue::Optional(value.map(Box::new))
    }
}

impl std::fmt::Debug for FieldValue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "Integer({})", v),
            FieldValue::Text(v) => write!(f, "Text({:?})", v),
            FieldValue::Optional(v) => write!(f, "Optional({:?})", v),
            FieldValue::Nested(_) => f.write_str("Nested(..)"),
            FieldValue::Other => f.write_str("Other"),
        }
    }
}

/// Typed field access for request payloads
pub trait Extractable: Send + Sync {
    fn field(&self, name: &str) -> Option<FieldValue<'_>>;
}

impl Extractable for serde_json::Value {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        self.as_object()?.get(name).map(json_field)
    }
}

fn json_field(value: &serde_json::Value) -> FieldValue<'_> {
    use serde_json::Value;
    match value {
        Value::Number(n) => n.as_i64().map(FieldValue::Integer).unwrap_or(FieldValue::Other),
        Value::String(s) => FieldValue::text(s),
        Value::Null => FieldValue::Optional(None),
        Value::Object(_) => FieldValue::Nested(value),
        Value::Bool(_) | Value::Array(_) => FieldValue::Other,
    }
}

impl Extractable for HashMap<String, String> {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        self.get(name).map(|v| FieldValue::text(v))
    }
}

impl<T: Extractable> Extractable for Option<T> {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        self.as_ref()?.field(name)
    }
}

/// `memberId` -> `member_id`
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn read_segment<'a>(target: &'a dyn Extractable, segment: &str) -> Option<FieldValue<'a>> {
    if let Some(value) = target.field(segment) {
        return Some(value);
    }
    let snake = snake_case(segment);
    if snake != segment {
        return target.field(&snake);
    }
    None
}

fn unwrap_optional(value: FieldValue<'_>) -> Option<FieldValue<'_>> {
    match value {
        FieldValue::Optional(inner) => inner.map(|boxed| *boxed),
        other => Some(other),
    }
}

/// Walk a dot-delimited path from `root`
pub fn resolve_path<'a>(root: &'a dyn Extractable, path: &str) -> Option<FieldValue<'a>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }

    let mut current = root;
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        let value = unwrap_optional(read_segment(current, segment)?)?;
        if i == last {
            return Some(value);
        }
        match value {
            FieldValue::Nested(next) => current = next,
            _ => return None,
        }
    }
    None
}

/// Integer identifier from a field value. Numeric strings are parsed; other
/// shapes are rejected.
pub fn coerce_id(value: FieldValue<'_>) -> Option<i64> {
    match value {
        FieldValue::Integer(id) => Some(id),
        FieldValue::Text(text) => match text.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!("Could not parse resource id from string: {}", text);
                None
            }
        },
        FieldValue::Optional(Some(inner)) => coerce_id(*inner),
        FieldValue::Optional(None) | FieldValue::Nested(_) | FieldValue::Other => None,
    }
}

/// Actual argument values of one invocation
#[derive(Default)]
pub struct InvocationArgs<'a> {
    pub path: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Option<&'a dyn Extractable>,
}

impl<'a> InvocationArgs<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: &'a dyn Extractable) -> Self {
        self.body = Some(body);
        self
    }

    /// Identifier named by `policy`, looked up only in its declared source
    pub fn resource_id(&self, policy: &OwnershipPolicy) -> Option<i64> {
        let value = match policy.source {
            ParameterSource::Path => self.path.get(&policy.parameter_name).map(|v| FieldValue::text(v)),
            ParameterSource::Query => self.query.get(&policy.parameter_name).map(|v| FieldValue::text(v)),
            ParameterSource::Body => self.body.and_then(|body| resolve_path(body, policy.field_path())),
        }?;
        coerce_id(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::ownership::ResourceType;
    use serde_json::json;

    struct DiaryRequest {
        member_id: Option<i64>,
        title: String,
    }

    impl Extractable for DiaryRequest {
        fn field(&self, name: &str) -> Option<FieldValue<'_>> {
            match name {
                "member_id" => Some(FieldValue::optional(self.member_id.map(FieldValue::Integer))),
                "title" => Some(FieldValue::text(&self.title)),
                _ => None,
            }
        }
    }

    struct Envelope {
        request: DiaryRequest,
    }

    impl Extractable for Envelope {
        fn field(&self, name: &str) -> Option<FieldValue<'_>> {
            match name {
                "request" => Some(FieldValue::Nested(&self.request)),
                _ => None,
            }
        }
    }

    #[test]
    fn nested_json_path_resolves() {
        let body = json!({"request": {"memberId": 7}});
        assert_eq!(resolve_path(&body, "request.memberId").and_then(coerce_id), Some(7));
        assert!(resolve_path(&body, "request.missing").is_none());
    }

    #[test]
    fn camel_case_segment_falls_back_to_snake_case() {
        let body = json!({"request": {"member_id": "12"}});
        assert_eq!(resolve_path(&body, "request.memberId").and_then(coerce_id), Some(12));
    }

    #[test]
    fn typed_payload_resolves_through_accessors() {
        let envelope = Envelope {
            request: DiaryRequest {
                member_id: Some(3),
                title: "today".to_string(),
            },
        };
        assert_eq!(resolve_path(&envelope, "request.memberId").and_then(coerce_id), Some(3));
        assert_eq!(resolve_path(&envelope, "request.title").and_then(coerce_id), None);

        let empty = Envelope {
            request: DiaryRequest {
                member_id: None,
                title: String::new(),
            },
        };
        assert!(resolve_path(&empty, "request.memberId").is_none());
    }

    #[test]
    fn null_and_wrong_shapes_are_not_found() {
        let body = json!({"request": null, "flag": true, "id": 1.5, "list": [1]});
        assert!(resolve_path(&body, "request.memberId").is_none());
        assert!(resolve_path(&body, "flag").and_then(coerce_id).is_none());
        assert!(resolve_path(&body, "id").and_then(coerce_id).is_none());
        assert!(resolve_path(&body, "list.0").is_none());
        assert!(resolve_path(&body, "").is_none());
        assert!(resolve_path(&body, "request..memberId").is_none());
    }

    #[test]
    fn coerce_accepts_wrapped_values() {
        let wrapped = FieldValue::optional(Some(FieldValue::text("42")));
        assert_eq!(coerce_id(wrapped), Some(42));
        assert_eq!(coerce_id(FieldValue::text("4x")), None);
        assert_eq!(coerce_id(FieldValue::Optional(None)), None);
    }

    #[test]
    fn identifier_is_read_only_from_declared_source() {
        let policy = OwnershipPolicy::path(ResourceType::MOOD_DIARY, "mood_diary_id");
        let args = InvocationArgs::new().with_query("mood_diary_id", "5");
        assert_eq!(args.resource_id(&policy), None);

        let args = InvocationArgs::new().with_path("mood_diary_id", "5");
        assert_eq!(args.resource_id(&policy), Some(5));
    }

    #[test]
    fn body_source_uses_field_path() {
        let body = json!({"medicationScheduleId": 9});
        let policy = OwnershipPolicy::body(ResourceType::MEDICATION_SCHEDULE, "medicationScheduleId");
        let args = InvocationArgs::new().with_body(&body);
        assert_eq!(args.resource_id(&policy), Some(9));

        assert_eq!(InvocationArgs::new().resource_id(&policy), None);
    }

    #[test]
    fn snake_case_conversion() {
        assert_eq!(snake_case("memberId"), "member_id");
        assert_eq!(snake_case("medicationScheduleId"), "medication_schedule_id");
        assert_eq!(snake_case("plain"), "plain");
    }
}
