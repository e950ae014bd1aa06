//! Record command implementations (create, update, delete, get, list).
//!
//! All of these work offline: they read and write the local store and
//! leave delivery to `osync sync` or the daemon.

use crate::cli::commands::Context;
use crate::cli::{CreateArgs, ListArgs, UpdateArgs};
use crate::error::{Error, Result};
use crate::model::{Record, RecordSyncStatus, StoredRecord};
use crate::storage::RecordFilter;
use colored::Colorize;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordOutput<'a> {
    entity_type: &'a str,
    #[serde(flatten)]
    record: &'a Record,
    sync_status: RecordSyncStatus,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    deleted: bool,
}

impl<'a> RecordOutput<'a> {
    fn new(entity_type: &'a str, stored: &'a StoredRecord) -> Self {
        Self {
            entity_type,
            record: &stored.record,
            sync_status: stored.sync_status,
            deleted: stored.deleted,
        }
    }
}

#[derive(Serialize)]
struct ListOutput<'a> {
    entity_type: &'a str,
    count: usize,
    records: Vec<RecordOutput<'a>>,
}

/// Parse `--data` into a JSON object.
fn parse_data(data: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(data) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::InvalidArgument("--data must be a JSON object".to_string())),
        Err(e) => Err(Error::InvalidArgument(format!("--data is not valid JSON: {e}"))),
    }
}

/// Parse a `FIELD=VALUE` filter. The value is read as JSON when it parses,
/// otherwise taken as a string.
fn parse_filter(filter: &str) -> Result<(String, Value)> {
    let (field, raw) = filter.split_once('=').ok_or_else(|| {
        Error::InvalidArgument(format!("--where expects FIELD=VALUE, got '{filter}'"))
    })?;
    let field = field.trim();
    if field.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "--where expects FIELD=VALUE, got '{filter}'"
        )));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((field.to_string(), value))
}

fn print_record(entity_type: &str, stored: &StoredRecord) {
    let status = match stored.sync_status {
        RecordSyncStatus::Pending => "pending".yellow(),
        RecordSyncStatus::Synced => "synced".green(),
    };
    println!("{} {}/{}", "●".blue(), entity_type, stored.record.id.bold());
    println!("  Status:  {status}");
    if stored.deleted {
        println!("  {}", "Deleted locally, waiting for sync".red());
    }
    println!("  Updated: {}", format_millis(stored.record.updated_at));
    for (key, value) in &stored.record.fields {
        println!("  {key}: {value}");
    }
}

fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map_or_else(|| millis.to_string(), |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

/// Execute `osync create`.
///
/// # Errors
///
/// Returns an error for bad `--data`, an unknown entity type, or an id
/// that is already in use.
pub fn create(ctx: &Context, args: &CreateArgs) -> Result<()> {
    let manager = ctx.manager()?;
    let record = manager.create(&args.entity, parse_data(&args.data)?)?;
    let stored = StoredRecord::pending(record);

    if ctx.json {
        println!("{}", serde_json::to_string(&RecordOutput::new(&args.entity, &stored))?);
    } else {
        println!("Created {}/{} (queued for sync)", args.entity, stored.record.id);
    }
    Ok(())
}

/// Execute `osync update`.
///
/// # Errors
///
/// Returns `RecordNotFound` if the record does not exist locally.
pub fn update(ctx: &Context, args: &UpdateArgs) -> Result<()> {
    let manager = ctx.manager()?;
    let record = manager.update(&args.entity, &args.id, &parse_data(&args.data)?)?;
    let stored = StoredRecord::pending(record);

    if ctx.json {
        println!("{}", serde_json::to_string(&RecordOutput::new(&args.entity, &stored))?);
    } else {
        println!("Updated {}/{} (queued for sync)", args.entity, args.id);
    }
    Ok(())
}

/// Execute `osync delete`.
///
/// Deleting a record that does not exist is not an error.
///
/// # Errors
///
/// Returns an error for an unknown entity type or a storage failure.
pub fn delete(ctx: &Context, entity: &str, id: &str) -> Result<()> {
    let manager = ctx.manager()?;
    let deleted = manager.delete(entity, id)?;

    if ctx.json {
        let output = serde_json::json!({
            "entityType": entity,
            "id": id,
            "deleted": deleted,
        });
        println!("{output}");
    } else if deleted {
        println!("Deleted {entity}/{id} (queued for sync)");
    } else {
        println!("No {entity} record with id {id}; nothing to delete");
    }
    Ok(())
}

/// Execute `osync get`.
///
/// # Errors
///
/// Returns `RecordNotFound` if there is no live record with that id.
pub fn get(ctx: &Context, entity: &str, id: &str) -> Result<()> {
    let manager = ctx.manager()?;
    let stored = manager
        .get_stored(entity, id)?
        .filter(|stored| !stored.deleted)
        .ok_or_else(|| Error::RecordNotFound {
            entity_type: entity.to_string(),
            id: id.to_string(),
        })?;

    if ctx.json {
        println!("{}", serde_json::to_string(&RecordOutput::new(entity, &stored))?);
    } else {
        print_record(entity, &stored);
    }
    Ok(())
}

/// Execute `osync list`.
///
/// # Errors
///
/// Returns an error for a bad filter or an unknown entity type.
pub fn list(ctx: &Context, args: &ListArgs) -> Result<()> {
    let mut filter = RecordFilter::all();
    for raw in &args.filters {
        let (field, value) = parse_filter(raw)?;
        filter = filter.where_eq(field, value);
    }
    if let Some(status) = &args.status {
        let status = status
            .parse::<RecordSyncStatus>()
            .map_err(Error::InvalidArgument)?;
        filter = filter.with_status(status);
    }
    if let Some(limit) = args.limit {
        filter = filter.limit(limit);
    }
    filter.include_deleted = args.include_deleted;

    let manager = ctx.manager()?;
    let records = manager.list_stored(&args.entity, &filter)?;

    if ctx.json {
        let output = ListOutput {
            entity_type: &args.entity,
            count: records.len(),
            records: records
                .iter()
                .map(|stored| RecordOutput::new(&args.entity, stored))
                .collect(),
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No {} records.", args.entity);
        return Ok(());
    }

    println!("{} ({}):", args.entity.bold(), records.len());
    for stored in &records {
        let marker = match (stored.deleted, stored.sync_status) {
            (true, _) => "✗".red(),
            (false, RecordSyncStatus::Pending) => "○".yellow(),
            (false, RecordSyncStatus::Synced) => "●".green(),
        };
        let summary: Vec<String> = stored
            .record
            .fields
            .iter()
            .take(3)
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        println!(
            "  {marker} {} {} {}",
            stored.record.id,
            format_millis(stored.record.updated_at).dimmed(),
            summary.join(" ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_data_requires_object() {
        assert_eq!(parse_data(r#"{"a":1}"#).unwrap()["a"], 1);
        assert!(matches!(parse_data("[1,2]"), Err(Error::InvalidArgument(_))));
        assert!(matches!(parse_data("{oops"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_parse_filter_values() {
        assert_eq!(parse_filter("seats=4").unwrap(), ("seats".to_string(), json!(4)));
        assert_eq!(
            parse_filter("city=Kyoto").unwrap(),
            ("city".to_string(), json!("Kyoto"))
        );
        assert_eq!(
            parse_filter("note=a=b").unwrap(),
            ("note".to_string(), json!("a=b"))
        );
        assert!(parse_filter("novalue").is_err());
        assert!(parse_filter("=x").is_err());
    }

    #[test]
    fn test_record_output_shape() {
        let stored = StoredRecord::synced(Record::new(
            "t1",
            5,
            json!({"city": "Kyoto"}).as_object().unwrap().clone(),
        ));
        let value = serde_json::to_value(RecordOutput::new("tours", &stored)).unwrap();
        assert_eq!(value["entityType"], "tours");
        assert_eq!(value["id"], "t1");
        assert_eq!(value["updatedAt"], 5);
        assert_eq!(value["city"], "Kyoto");
        assert_eq!(value["syncStatus"], "synced");
        assert!(value.get("deleted").is_none());
    }
}
