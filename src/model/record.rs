//! Record model.
//!
//! A record is any business entity instance held by the local store. The
//! sync layer only relies on the `id` and the `updated_at` version marker;
//! every other field is carried opaquely in `fields`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A business entity instance in the local (camelCase) naming convention.
///
/// Serializes as a flat JSON object:
/// `{"id":"…","updatedAt":1718000000000,"title":"Kyoto 5D4N",…}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Client-generated identifier, identical locally and remotely.
    pub id: String,

    /// Last modification time (Unix milliseconds), used for last-writer-wins.
    #[serde(default)]
    pub updated_at: i64,

    /// Entity fields, keyed by local field name.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Local field names that are stored outside `fields`.
pub const RESERVED_FIELDS: [&str; 2] = ["id", "updatedAt"];

impl Record {
    /// Create a record from an id, a version marker and its fields.
    ///
    /// Reserved keys (`id`, `updatedAt`) are stripped from `fields`.
    #[must_use]
    pub fn new(id: impl Into<String>, updated_at: i64, mut fields: Map<String, Value>) -> Self {
        for key in RESERVED_FIELDS {
            fields.remove(key);
        }
        Self {
            id: id.into(),
            updated_at,
            fields,
        }
    }

    /// Look up a field by local name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Shallow-merge `patch` onto this record's fields.
    ///
    /// Reserved keys in the patch are ignored; a `null` value is stored
    /// as `null` rather than removing the field.
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            if RESERVED_FIELDS.contains(&key.as_str()) {
                continue;
            }
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Whether the record's field `name` equals `expected`.
    ///
    /// String fields also match the plain text form of numbers and booleans
    /// so CLI filters like `--where seats=12` work without JSON quoting.
    #[must_use]
    pub fn field_matches(&self, name: &str, expected: &Value) -> bool {
        let actual = if name == "id" {
            Some(Value::String(self.id.clone()))
        } else {
            self.fields.get(name).cloned()
        };

        match (actual, expected) {
            (Some(actual), expected) if &actual == expected => true,
            (Some(actual), Value::String(s)) => match actual {
                Value::Number(n) => n.to_string() == *s,
                Value::Bool(b) => b.to_string() == *s,
                _ => false,
            },
            _ => false,
        }
    }
}

/// Local sync state of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSyncStatus {
    /// Has local changes that are not yet confirmed by the remote store.
    Pending,
    /// Matches the last version confirmed by (or pulled from) the remote store.
    Synced,
}

impl RecordSyncStatus {
    /// String representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
        }
    }
}

impl std::fmt::Display for RecordSyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordSyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            _ => Err(format!("Unknown record sync status: {s}")),
        }
    }
}

/// A record as persisted by the local store, with its sync bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub record: Record,
    pub sync_status: RecordSyncStatus,
    /// Local tombstone: deleted on this device, delete not yet confirmed remotely.
    pub deleted: bool,
}

impl StoredRecord {
    /// A live record with local changes awaiting sync.
    #[must_use]
    pub fn pending(record: Record) -> Self {
        Self {
            record,
            sync_status: RecordSyncStatus::Pending,
            deleted: false,
        }
    }

    /// A live record matching the remote copy.
    #[must_use]
    pub fn synced(record: Record) -> Self {
        Self {
            record,
            sync_status: RecordSyncStatus::Synced,
            deleted: false,
        }
    }

    /// A tombstone for a record deleted locally.
    #[must_use]
    pub fn tombstone(record: Record) -> Self {
        Self {
            record,
            sync_status: RecordSyncStatus::Pending,
            deleted: true,
        }
    }

    /// Whether the record carries local changes not yet pushed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.sync_status == RecordSyncStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_serializes_flat() {
        let mut fields = Map::new();
        fields.insert("title".into(), json!("Kyoto"));
        let record = Record::new("r1", 42, fields);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"id": "r1", "updatedAt": 42, "title": "Kyoto"}));

        let back: Record = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_new_strips_reserved_fields() {
        let fields = json!({"id": "other", "updatedAt": 1, "seats": 4});
        let record = Record::new("r1", 10, fields.as_object().unwrap().clone());
        assert_eq!(record.id, "r1");
        assert_eq!(record.updated_at, 10);
        assert_eq!(record.fields.len(), 1);
    }

    #[test]
    fn test_merge_patch_ignores_reserved() {
        let mut record = Record::new("r1", 1, json!({"a": 1}).as_object().unwrap().clone());
        record.merge_patch(json!({"id": "x", "a": 2, "b": null}).as_object().unwrap());
        assert_eq!(record.id, "r1");
        assert_eq!(record.field("a"), Some(&json!(2)));
        assert_eq!(record.field("b"), Some(&Value::Null));
    }

    #[test]
    fn test_field_matches_plain_text() {
        let record = Record::new("r1", 1, json!({"seats": 12, "vip": true}).as_object().unwrap().clone());
        assert!(record.field_matches("seats", &json!("12")));
        assert!(record.field_matches("vip", &json!(true)));
        assert!(record.field_matches("id", &json!("r1")));
        assert!(!record.field_matches("seats", &json!("13")));
    }
}
