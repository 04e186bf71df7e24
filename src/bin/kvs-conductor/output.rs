//! Output formatting for CLI responses.
//!
//! Supports both human-readable and JSON output formats for
//! integration with scripts and other tools.

use kvs_conductor::CleanupReport;
use kvs_conductor::ShardMap;
use kvs_conductor::TopologyReport;

/// Trait for types that can be output in multiple formats.
pub trait Outputable {
    /// Convert to JSON value for structured output.
    fn to_json(&self) -> serde_json::Value;

    /// Convert to human-readable string.
    fn to_human(&self) -> String;
}

/// Print a value in the appropriate format.
pub fn print_output<T: Outputable>(value: &T, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&value.to_json())
                .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize: {}\"}}", e))
        );
    } else {
        println!("{}", value.to_human());
    }
}

/// Print a success message.
pub fn print_success(message: &str, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "status": "success",
                "message": message
            })
        );
    } else {
        println!("{}", message);
    }
}

impl Outputable for CleanupReport {
    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }))
    }

    fn to_human(&self) -> String {
        let mut out = format!(
            "Removed {} containers, {} networks",
            self.removed_containers.len(),
            self.removed_networks.len()
        );
        if !self.failed.is_empty() {
            out.push_str(&format!("\nFailed to remove: {}", self.failed.join(", ")));
        }
        out
    }
}

/// Result of `spawn`.
pub struct SpawnOutput {
    pub shards: ShardMap,
    pub topology: TopologyReport,
}

impl Outputable for SpawnOutput {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "shards": self.shards,
            "topology": self.topology,
        })
    }

    fn to_human(&self) -> String {
        let mut out = String::from("Shards\n======\n");
        for group in self.shards.iter() {
            out.push_str(&format!("  {}: {:?}\n", group.id, group.nodes));
        }
        out.push('\n');
        out.push_str(&self.topology.to_string());
        out
    }
}
