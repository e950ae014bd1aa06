//! Per-entity field mappings between the local and remote shapes.
//!
//! Every schema implicitly maps `id` ↔ `id` and `updatedAt` ↔ `updated_at`
//! (the latter as a timestamp). Explicit mappings rename fields and may
//! convert timestamps. Fields without a mapping pass through under the
//! schema's [`Naming`] rule, and excluded fields never leave the device.
//!
//! Translation is a bijection for records without excluded fields:
//! `from_remote_shape(to_remote_shape(r)) == r`. Anything that would break
//! that (two names landing on the same remote key) is rejected with
//! [`MappingError::FieldCollision`] instead of silently losing data.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::Record;

/// Local name of the implicit version field.
const LOCAL_UPDATED_AT: &str = "updatedAt";
/// Remote name of the implicit version field.
const REMOTE_UPDATED_AT: &str = "updated_at";

/// Schema mapping failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Field '{field}' of {entity_type} collides with '{other}'")]
    FieldCollision {
        entity_type: String,
        field: String,
        other: String,
    },

    #[error("Missing field '{field}' in remote {entity_type} record")]
    MissingField { entity_type: String, field: String },

    #[error("Invalid value for {entity_type}.{field}: {reason}")]
    InvalidValue {
        entity_type: String,
        field: String,
        reason: String,
    },
}

/// How a mapped field's value is converted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Value is copied unchanged.
    #[default]
    Plain,
    /// Local Unix milliseconds ↔ remote RFC3339 string.
    Timestamp,
}

/// One explicit local ↔ remote field rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub local: String,
    pub remote: String,
    #[serde(default)]
    pub kind: FieldKind,
}

/// Naming rule for fields without an explicit mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Naming {
    /// Same name on both sides.
    #[default]
    Verbatim,
    /// `camelCase` locally, `snake_case` remotely.
    CamelToSnake,
}

impl Naming {
    fn to_remote(self, local: &str) -> String {
        match self {
            Self::Verbatim => local.to_string(),
            Self::CamelToSnake => snake_case(local),
        }
    }

    fn to_local(self, remote: &str) -> String {
        match self {
            Self::Verbatim => remote.to_string(),
            Self::CamelToSnake => camel_case(remote),
        }
    }
}

/// Mapping definition for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Local table name (e.g. `tours`).
    pub entity_type: String,
    /// Remote collection name (e.g. `travel_tours`).
    pub remote_name: String,
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
    /// Local-only fields, never sent to the remote store.
    #[serde(default)]
    pub excluded: Vec<String>,
    #[serde(default)]
    pub naming: Naming,
}

impl EntitySchema {
    /// A schema with no explicit mappings and verbatim naming.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, remote_name: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            remote_name: remote_name.into(),
            fields: Vec::new(),
            excluded: Vec::new(),
            naming: Naming::Verbatim,
        }
    }

    #[must_use]
    pub fn with_naming(mut self, naming: Naming) -> Self {
        self.naming = naming;
        self
    }

    /// Add a plain rename.
    #[must_use]
    pub fn map(mut self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.fields.push(FieldMapping {
            local: local.into(),
            remote: remote.into(),
            kind: FieldKind::Plain,
        });
        self
    }

    /// Add a timestamp field (local ms ↔ remote RFC3339).
    #[must_use]
    pub fn map_timestamp(mut self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.fields.push(FieldMapping {
            local: local.into(),
            remote: remote.into(),
            kind: FieldKind::Timestamp,
        });
        self
    }

    /// Mark a local field as device-only.
    #[must_use]
    pub fn exclude(mut self, local: impl Into<String>) -> Self {
        self.excluded.push(local.into());
        self
    }

    /// Add plain camelCase → snake_case mappings for the given local names.
    #[must_use]
    pub fn with_conventional_fields(mut self, locals: &[&str]) -> Self {
        for local in locals {
            self.fields.push(FieldMapping {
                local: (*local).to_string(),
                remote: snake_case(local),
                kind: FieldKind::Plain,
            });
        }
        self
    }
}

/// A validated schema with lookup tables for both directions.
#[derive(Debug, Clone)]
struct CompiledSchema {
    schema: EntitySchema,
    /// local name → (remote name, kind)
    to_remote: HashMap<String, (String, FieldKind)>,
    /// remote name → (local name, kind)
    to_local: HashMap<String, (String, FieldKind)>,
    excluded: HashSet<String>,
}

impl CompiledSchema {
    fn compile(schema: EntitySchema) -> Result<Self, MappingError> {
        if !is_identifier(&schema.entity_type) {
            return Err(MappingError::InvalidSchema(format!(
                "entity type '{}' is not a valid identifier",
                schema.entity_type
            )));
        }
        if !is_identifier(&schema.remote_name) {
            return Err(MappingError::InvalidSchema(format!(
                "remote name '{}' of {} is not a valid identifier",
                schema.remote_name, schema.entity_type
            )));
        }

        let mut to_remote = HashMap::new();
        let mut to_local = HashMap::new();
        to_remote.insert("id".to_string(), ("id".to_string(), FieldKind::Plain));
        to_local.insert("id".to_string(), ("id".to_string(), FieldKind::Plain));
        to_remote.insert(
            LOCAL_UPDATED_AT.to_string(),
            (REMOTE_UPDATED_AT.to_string(), FieldKind::Timestamp),
        );
        to_local.insert(
            REMOTE_UPDATED_AT.to_string(),
            (LOCAL_UPDATED_AT.to_string(), FieldKind::Timestamp),
        );

        for mapping in &schema.fields {
            if mapping.local.is_empty() || mapping.remote.is_empty() {
                return Err(MappingError::InvalidSchema(format!(
                    "{} has a field mapping with an empty name",
                    schema.entity_type
                )));
            }
            if to_remote.contains_key(&mapping.local) {
                return Err(MappingError::InvalidSchema(format!(
                    "{}: local field '{}' is mapped more than once",
                    schema.entity_type, mapping.local
                )));
            }
            if to_local.contains_key(&mapping.remote) {
                return Err(MappingError::InvalidSchema(format!(
                    "{}: remote field '{}' is mapped more than once",
                    schema.entity_type, mapping.remote
                )));
            }
            to_remote.insert(mapping.local.clone(), (mapping.remote.clone(), mapping.kind));
            to_local.insert(mapping.remote.clone(), (mapping.local.clone(), mapping.kind));
        }

        let mut excluded = HashSet::new();
        for field in &schema.excluded {
            if to_remote.contains_key(field) {
                return Err(MappingError::InvalidSchema(format!(
                    "{}: field '{field}' is both mapped and excluded",
                    schema.entity_type
                )));
            }
            excluded.insert(field.clone());
        }

        Ok(Self {
            schema,
            to_remote,
            to_local,
            excluded,
        })
    }

    fn collision(&self, field: &str, other: &str) -> MappingError {
        MappingError::FieldCollision {
            entity_type: self.schema.entity_type.clone(),
            field: field.to_string(),
            other: other.to_string(),
        }
    }

    /// Remote name for a local field that has no explicit mapping.
    fn unmapped_remote_name(&self, local: &str) -> Result<String, MappingError> {
        let remote = self.schema.naming.to_remote(local);
        if let Some((mapped_local, _)) = self.to_local.get(&remote) {
            return Err(self.collision(local, mapped_local));
        }
        if self.schema.naming.to_local(&remote) != local {
            return Err(self.collision(local, &remote));
        }
        Ok(remote)
    }

    /// Local name for a remote field that has no explicit mapping.
    fn unmapped_local_name(&self, remote: &str) -> Result<String, MappingError> {
        let local = self.schema.naming.to_local(remote);
        if let Some((mapped_remote, _)) = self.to_remote.get(&local) {
            return Err(self.collision(remote, mapped_remote));
        }
        if self.schema.naming.to_remote(&local) != remote {
            return Err(self.collision(remote, &local));
        }
        Ok(local)
    }

    fn invalid_value(&self, field: &str, reason: impl Into<String>) -> MappingError {
        MappingError::InvalidValue {
            entity_type: self.schema.entity_type.clone(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    fn local_to_remote_value(
        &self,
        field: &str,
        kind: FieldKind,
        value: &Value,
    ) -> Result<Value, MappingError> {
        match kind {
            FieldKind::Plain => Ok(value.clone()),
            FieldKind::Timestamp => match value {
                Value::Null => Ok(Value::Null),
                Value::Number(n) => {
                    let millis = n
                        .as_i64()
                        .ok_or_else(|| self.invalid_value(field, "expected integer milliseconds"))?;
                    millis_to_rfc3339(millis)
                        .map(Value::String)
                        .ok_or_else(|| self.invalid_value(field, "timestamp out of range"))
                }
                _ => Err(self.invalid_value(field, "expected integer milliseconds")),
            },
        }
    }

    fn remote_to_local_value(
        &self,
        field: &str,
        kind: FieldKind,
        value: &Value,
    ) -> Result<Value, MappingError> {
        match kind {
            FieldKind::Plain => Ok(value.clone()),
            FieldKind::Timestamp => match value {
                Value::Null => Ok(Value::Null),
                Value::Number(n) if n.is_i64() => Ok(value.clone()),
                Value::String(s) => rfc3339_to_millis(s)
                    .map(Value::from)
                    .ok_or_else(|| self.invalid_value(field, format!("invalid RFC3339 timestamp '{s}'"))),
                _ => Err(self.invalid_value(field, "expected RFC3339 timestamp")),
            },
        }
    }
}

/// Registry of entity schemas, keyed by local entity type.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, CompiledSchema>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a schema, replacing any previous one for the same type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if names are not identifiers, a local or
    /// remote name is mapped twice, or an excluded field is also mapped.
    pub fn register(&mut self, schema: EntitySchema) -> Result<(), MappingError> {
        let compiled = CompiledSchema::compile(schema)?;
        let clash = self.schemas.values().find(|other| {
            other.schema.remote_name == compiled.schema.remote_name
                && other.schema.entity_type != compiled.schema.entity_type
        });
        if let Some(other) = clash {
            return Err(MappingError::InvalidSchema(format!(
                "remote collection '{}' is already used by {}",
                compiled.schema.remote_name, other.schema.entity_type
            )));
        }
        self.schemas
            .insert(compiled.schema.entity_type.clone(), compiled);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Same as `register`.
    pub fn with(mut self, schema: EntitySchema) -> Result<Self, MappingError> {
        self.register(schema)?;
        Ok(self)
    }

    fn compiled(&self, entity_type: &str) -> Result<&CompiledSchema, MappingError> {
        self.schemas
            .get(entity_type)
            .ok_or_else(|| MappingError::UnknownEntity(entity_type.to_string()))
    }

    /// Look up the schema for an entity type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` if the type was never registered.
    pub fn get(&self, entity_type: &str) -> Result<&EntitySchema, MappingError> {
        self.compiled(entity_type).map(|c| &c.schema)
    }

    #[must_use]
    pub fn contains(&self, entity_type: &str) -> bool {
        self.schemas.contains_key(entity_type)
    }

    /// Registered entity types, in sorted order.
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Translate a local record into the remote shape.
    ///
    /// # Errors
    ///
    /// `UnknownEntity`, `FieldCollision` when an unmapped field would land
    /// on a mapped remote name, or `InvalidValue` for a bad timestamp.
    pub fn to_remote_shape(
        &self,
        entity_type: &str,
        record: &Record,
    ) -> Result<Map<String, Value>, MappingError> {
        let compiled = self.compiled(entity_type)?;
        let mut out = Map::new();

        out.insert("id".to_string(), Value::String(record.id.clone()));
        out.insert(
            REMOTE_UPDATED_AT.to_string(),
            compiled.local_to_remote_value(
                LOCAL_UPDATED_AT,
                FieldKind::Timestamp,
                &Value::from(record.updated_at),
            )?,
        );

        for (local, value) in &record.fields {
            if compiled.excluded.contains(local) {
                continue;
            }
            let (remote, value) = match compiled.to_remote.get(local) {
                Some((remote, kind)) => (
                    remote.clone(),
                    compiled.local_to_remote_value(local, *kind, value)?,
                ),
                None => (compiled.unmapped_remote_name(local)?, value.clone()),
            };
            out.insert(remote, value);
        }

        Ok(out)
    }

    /// Translate a remote row into a local record.
    ///
    /// A missing or `null` `updated_at` yields version 0.
    ///
    /// # Errors
    ///
    /// `UnknownEntity`, `MissingField` without a string `id`,
    /// `FieldCollision`, or `InvalidValue` for a bad timestamp.
    pub fn from_remote_shape(
        &self,
        entity_type: &str,
        row: &Map<String, Value>,
    ) -> Result<Record, MappingError> {
        let compiled = self.compiled(entity_type)?;

        let id = match row.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => return Err(compiled.invalid_value("id", "expected string id")),
            None => {
                return Err(MappingError::MissingField {
                    entity_type: entity_type.to_string(),
                    field: "id".to_string(),
                });
            }
        };

        let updated_at = match row.get(REMOTE_UPDATED_AT) {
            None | Some(Value::Null) => 0,
            Some(value) => compiled
                .remote_to_local_value(LOCAL_UPDATED_AT, FieldKind::Timestamp, value)?
                .as_i64()
                .unwrap_or(0),
        };

        let mut fields = Map::new();
        for (remote, value) in row {
            if remote == "id" || remote == REMOTE_UPDATED_AT {
                continue;
            }
            let (local, value) = match compiled.to_local.get(remote) {
                Some((local, kind)) => (
                    local.clone(),
                    compiled.remote_to_local_value(local, *kind, value)?,
                ),
                None => (compiled.unmapped_local_name(remote)?, value.clone()),
            };
            fields.insert(local, value);
        }

        Ok(Record {
            id,
            updated_at,
            fields,
        })
    }
}

/// Convert `camelCase` to `snake_case`.
#[must_use]
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert `snake_case` to `camelCase`.
#[must_use]
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for (i, c) in name.chars().enumerate() {
        if c == '_' && i > 0 {
            upper_next = true;
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    if upper_next {
        out.push('_');
    }
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Format Unix milliseconds as RFC3339 with millisecond precision.
#[must_use]
pub fn millis_to_rfc3339(millis: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Parse an RFC3339 timestamp into Unix milliseconds.
#[must_use]
pub fn rfc3339_to_millis(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tours() -> EntitySchema {
        EntitySchema::new("tours", "travel_tours")
            .with_naming(Naming::CamelToSnake)
            .map("title", "tour_name")
            .map_timestamp("createdAt", "created_at")
            .exclude("draftNotes")
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new().with(tours()).unwrap()
    }

    fn record(fields: Value) -> Record {
        Record::new("t1", 1_718_000_000_123, fields.as_object().unwrap().clone())
    }

    #[test]
    fn test_to_remote_renames_and_converts() {
        let reg = registry();
        let rec = record(json!({"title": "Kyoto", "createdAt": 0, "seatCount": 12}));

        let remote = reg.to_remote_shape("tours", &rec).unwrap();
        assert_eq!(remote["id"], "t1");
        assert_eq!(remote["tour_name"], "Kyoto");
        assert_eq!(remote["created_at"], "1970-01-01T00:00:00.000Z");
        assert_eq!(remote["updated_at"], "2024-06-10T06:13:20.123Z");
        assert_eq!(remote["seat_count"], 12);
    }

    #[test]
    fn test_round_trip_is_identity() {
        let reg = registry();
        let rec = record(json!({"title": "Kyoto", "createdAt": 5, "seatCount": 12, "notes": null}));

        let remote = reg.to_remote_shape("tours", &rec).unwrap();
        let back = reg.from_remote_shape("tours", &remote).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_excluded_fields_stay_local() {
        let reg = registry();
        let rec = record(json!({"draftNotes": "secret"}));
        let remote = reg.to_remote_shape("tours", &rec).unwrap();
        assert!(!remote.contains_key("draft_notes"));
        assert!(!remote.contains_key("draftNotes"));
    }

    #[test]
    fn test_unmapped_field_colliding_with_mapping_is_rejected() {
        let reg = registry();
        // `tourName` would become `tour_name`, which already belongs to `title`.
        let rec = record(json!({"title": "a", "tourName": "b"}));
        let err = reg.to_remote_shape("tours", &rec).unwrap_err();
        assert!(matches!(err, MappingError::FieldCollision { .. }));

        let mut row = reg.to_remote_shape("tours", &record(json!({}))).unwrap();
        row.insert("title".into(), json!("x"));
        let err = reg.from_remote_shape("tours", &row).unwrap_err();
        assert!(matches!(err, MappingError::FieldCollision { .. }));
    }

    #[test]
    fn test_non_round_tripping_name_is_rejected() {
        let reg = registry();
        let rec = record(json!({"seat_count": 1}));
        let err = reg.to_remote_shape("tours", &rec).unwrap_err();
        assert!(matches!(err, MappingError::FieldCollision { .. }));
    }

    #[test]
    fn test_unknown_entity() {
        let err = registry()
            .to_remote_shape("rockets", &record(json!({})))
            .unwrap_err();
        assert_eq!(err, MappingError::UnknownEntity("rockets".into()));
    }

    #[test]
    fn test_register_rejects_invalid_schemas() {
        let mut reg = SchemaRegistry::new();
        assert!(reg.register(EntitySchema::new("bad-name", "x")).is_err());
        assert!(
            reg.register(EntitySchema::new("a", "a").map("x", "y").map("z", "y"))
                .is_err()
        );
        assert!(
            reg.register(EntitySchema::new("a", "a").map("x", "y").exclude("x"))
                .is_err()
        );
        assert!(reg.register(EntitySchema::new("a", "a").map("id", "uid")).is_err());
        reg.register(EntitySchema::new("a", "shared")).unwrap();
        assert!(reg.register(EntitySchema::new("b", "shared")).is_err());
    }

    #[test]
    fn test_from_remote_requires_id_and_tolerates_missing_version() {
        let reg = registry();
        let err = reg
            .from_remote_shape("tours", json!({"tour_name": "x"}).as_object().unwrap())
            .unwrap_err();
        assert!(matches!(err, MappingError::MissingField { .. }));

        let rec = reg
            .from_remote_shape("tours", json!({"id": "t9"}).as_object().unwrap())
            .unwrap();
        assert_eq!(rec.updated_at, 0);
    }

    #[test]
    fn test_case_helpers() {
        assert_eq!(snake_case("departureDate"), "departure_date");
        assert_eq!(camel_case("departure_date"), "departureDate");
        assert_eq!(snake_case("id"), "id");
        assert_eq!(camel_case(&snake_case("totalPriceUsd")), "totalPriceUsd");
    }
}
