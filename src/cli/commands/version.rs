//! `osync version`: binary version plus the on-disk and wire formats it speaks.

use crate::error::Result;
use crate::storage::schema::CURRENT_SCHEMA_VERSION;
use serde::Serialize;

/// Pull cursors are remote feed positions, not timestamps.
const CURSOR_FORMAT: &str = "change-seq";

#[derive(Debug, Serialize)]
struct VersionInfo {
    version: &'static str,
    store_schema: i32,
    cursor_format: &'static str,
    debug_build: bool,
}

impl VersionInfo {
    const fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            store_schema: CURRENT_SCHEMA_VERSION,
            cursor_format: CURSOR_FORMAT,
            debug_build: cfg!(debug_assertions),
        }
    }

    fn line(&self) -> String {
        let mut line = format!(
            "osync {} (store schema v{}, cursor {})",
            self.version, self.store_schema, self.cursor_format
        );
        if self.debug_build {
            line.push_str(" [debug]");
        }
        line
    }
}

/// Execute `osync version`.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(json: bool) -> Result<()> {
    let info = VersionInfo::current();
    if json {
        println!("{}", serde_json::to_string(&info)?);
    } else {
        println!("{}", info.line());
    }
    Ok(())
}
