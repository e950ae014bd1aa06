//! Built-in entity schemas for the travel-agency tables.

use crate::mapper::{EntitySchema, MappingError, Naming, SchemaRegistry};

/// Entity types registered when the config file names none.
pub const DEFAULT_ENTITY_TYPES: &[&str] = &[
    "tours",
    "orders",
    "customers",
    "payments",
    "members",
    "quotes",
    "todos",
    "visas",
    "notes",
];

/// Registry with one conventional schema per [`DEFAULT_ENTITY_TYPES`] entry.
///
/// Each maps camelCase local names to snake_case remote names under the
/// same collection name, with `createdAt` as a timestamp.
///
/// # Errors
///
/// Never fails in practice; returns the registration error otherwise.
pub fn default_entities() -> Result<SchemaRegistry, MappingError> {
    let mut registry = SchemaRegistry::new();
    for entity_type in DEFAULT_ENTITY_TYPES {
        registry.register(
            EntitySchema::new(*entity_type, *entity_type)
                .with_naming(Naming::CamelToSnake)
                .map_timestamp("createdAt", "created_at"),
        )?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Record;
    use serde_json::json;

    #[test]
    fn test_default_entities_translate_conventionally() {
        let registry = default_entities().unwrap();
        let record = Record::new(
            "o1",
            1_718_000_000_123,
            json!({"tourId": "t1", "createdAt": 1_718_000_000_000_i64})
                .as_object()
                .unwrap()
                .clone(),
        );
        let row = registry.to_remote_shape("orders", &record).unwrap();
        assert_eq!(row["tour_id"], "t1");
        assert_eq!(row["created_at"], "2024-06-10T06:13:20.000Z");
        assert_eq!(row["updated_at"], "2024-06-10T06:13:20.123Z");
        assert_eq!(registry.from_remote_shape("orders", &row).unwrap(), record);
    }
}
