//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::cli::args::{OutputFormat, SegrankArgs};
use crate::error::Result;
use crate::segment::index::{IndexStats, LeafCount};
use crate::storage::file::SnapshotInfo;

/// Shape of a partition.
#[derive(Debug, Serialize, Deserialize)]
pub struct LayoutResult {
    pub max_score: i64,
    pub min_leaf_width: i64,
    pub leaf_count: usize,
    pub node_count: usize,
    pub depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaves: Option<Vec<String>>,
}

/// Result of loading members into an index directory.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoadResult {
    pub path: String,
    pub leaderboard: String,
    pub members_loaded: u64,
    pub lines_skipped: usize,
    pub counters_written: usize,
    pub duration_ms: u64,
}

/// Estimated position of a score.
#[derive(Debug, Serialize, Deserialize)]
pub struct RankEstimate {
    pub score: f64,
    pub rank: u64,
    pub outranking: u64,
    pub leaf: String,
    pub leaf_count: i64,
    pub indexed_members: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MoveResult {
    pub from: Option<f64>,
    pub to: Option<f64>,
    pub indexed_members: i64,
    pub last_seq: u64,
}

/// Index statistics plus the state of the durable store.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreStats {
    pub leaderboard: String,
    pub index: IndexStats,
    pub last_seq: u64,
    pub journal_records: usize,
    pub snapshot: Option<SnapshotInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaves: Option<Vec<LeafCount>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckpointResult {
    pub path: String,
    pub last_seq: u64,
    pub counters: usize,
}

/// Output a result in the specified format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &SegrankArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in human-readable format.
fn output_human<T: Serialize>(message: &str, result: &T, args: &SegrankArgs) -> Result<()> {
    if args.verbosity() > 0 {
        println!("{message}");
        println!();
    }

    let value = serde_json::to_value(result)?;
    for line in render_human(&value, 0) {
        println!("{line}");
    }
    Ok(())
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &SegrankArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}

/// Render a JSON value as indented `key: value` lines.
fn render_human(value: &serde_json::Value, indent: usize) -> Vec<String> {
    let spaces = "  ".repeat(indent);
    let mut lines = Vec::new();

    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                match val {
                    serde_json::Value::Object(_) => {
                        lines.push(format!("{spaces}{key}:"));
                        lines.extend(render_human(val, indent + 1));
                    }
                    serde_json::Value::Array(arr) if arr.iter().any(|v| v.is_object()) => {
                        lines.push(format!("{spaces}{key}:"));
                        lines.extend(render_human(val, indent + 1));
                    }
                    _ => lines.push(format!("{spaces}{key}: {}", format_value(val))),
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr {
                match item {
                    // One row per object keeps leaf listings compact.
                    serde_json::Value::Object(obj) => {
                        let row = obj
                            .iter()
                            .map(|(key, val)| format!("{key}={}", format_value(val)))
                            .collect::<Vec<_>>()
                            .join(" ");
                        lines.push(format!("{spaces}- {row}"));
                    }
                    _ => lines.push(format!("{spaces}- {}", format_value(item))),
                }
            }
        }
        _ => lines.push(format!("{spaces}{}", format_value(value))),
    }

    lines
}

/// Format a JSON value for display.
fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(arr) => {
            let formatted_values = arr.iter().map(format_value).collect::<Vec<_>>().join(", ");
            format!("[{formatted_values}]")
        }
        serde_json::Value::Object(_) => "[object]".to_string(),
        serde_json::Value::Null => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&json!("0.0000-100.0000")), "0.0000-100.0000");
        assert_eq!(format_value(&json!(42)), "42");
        assert_eq!(format_value(&json!(false)), "false");
        assert_eq!(format_value(&json!(null)), "-");
        assert_eq!(format_value(&json!([1, 2])), "[1, 2]");
    }

    #[test]
    fn test_render_nested_objects() {
        let value = json!({
            "leaderboard": "weekly",
            "index": {"depth": 4},
            "leaves": [{"count": 2, "interval": "101.0000-200.0000"}]
        });

        let lines = render_human(&value, 0);
        assert_eq!(lines.len(), 5);
        assert!(lines.contains(&"leaderboard: weekly".to_string()));

        let index = lines.iter().position(|l| l == "index:").unwrap();
        assert_eq!(lines[index + 1], "  depth: 4");
        let leaves = lines.iter().position(|l| l == "leaves:").unwrap();
        assert_eq!(lines[leaves + 1], "  - count=2 interval=101.0000-200.0000");
    }
}
