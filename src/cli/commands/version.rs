//! Version command implementation.

use crate::error::Result;
use crate::storage::schema::CURRENT_SCHEMA_VERSION;
use serde::Serialize;

#[derive(Serialize)]
struct VersionOutput<'a> {
    name: &'a str,
    version: &'a str,
    build: &'a str,
    schema: i32,
}

fn version_output() -> VersionOutput<'static> {
    VersionOutput {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        build: if cfg!(debug_assertions) { "dev" } else { "release" },
        schema: CURRENT_SCHEMA_VERSION,
    }
}

/// Execute the version command.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(json: bool) -> Result<()> {
    let output = version_output();

    if json {
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!(
        "jsync version {} ({}, schema v{})",
        output.version, output.build, output.schema
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_output_json() {
        let value = serde_json::to_value(version_output()).unwrap();
        assert_eq!(value["name"], "jira-sync");
        assert_eq!(value["schema"], CURRENT_SCHEMA_VERSION);
    }
}
