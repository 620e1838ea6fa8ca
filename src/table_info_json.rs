//! Purpose: Build the stable stdout JSON payloads for table commands.
//! Exports: `plan_json`, `rows_json`, `enforcement_json`, `scan_report_json`, `format_bytes`.
//! Role: Keep payload shapes in one place so `main` stays parse/dispatch only.
//! Invariants: Payload schemas are stable once published; fields are additive-only.
use std::path::Path;

use serde_json::{Map, Value, json};

use partable::core::ceiling::Enforcement;
use partable::core::plan::Partition;
use partable::core::schema::{Row, Schema};

pub fn plan_json(
    path: &Path,
    schema: &Schema,
    partitions: &[Partition],
    target_bytes: u64,
) -> Value {
    let file_bytes = partitions.last().map(|p| p.end).unwrap_or(0);
    let ranges = partitions
        .iter()
        .map(|p| {
            json!({
                "index": p.index,
                "start": p.start,
                "end": p.end,
                "bytes": p.len(),
            })
        })
        .collect::<Vec<_>>();

    json!({
        "plan": {
            "path": path.display().to_string(),
            "file_bytes": file_bytes,
            "file_size": format_bytes(file_bytes),
            "target_bytes": target_bytes,
            "columns": schema.arity(),
            "partition_count": partitions.len(),
            "partitions": ranges,
        }
    })
}

pub fn rows_json(schema: &Schema, rows: &[Row]) -> Value {
    let objects = rows
        .iter()
        .map(|row| {
            let mut object = Map::new();
            for (name, value) in schema.columns().iter().zip(&row.fields) {
                object.insert(name.clone(), json!(value));
            }
            Value::Object(object)
        })
        .collect::<Vec<_>>();

    json!({
        "count": rows.len(),
        "rows": objects,
    })
}

pub fn enforcement_json(enforcement: &Enforcement) -> Value {
    match enforcement {
        Enforcement::Enforced { kind } => json!({
            "status": "enforced",
            "kind": kind.as_str(),
        }),
        Enforcement::Unprotected { attempted } => json!({
            "status": "unprotected",
            "attempted": attempted.iter().map(|kind| kind.as_str()).collect::<Vec<_>>(),
        }),
    }
}

pub struct ScanReport<'a> {
    pub path: &'a Path,
    pub time: Option<String>,
    pub file_bytes: u64,
    pub partition_count: usize,
    pub enforcement: Option<Value>,
    pub outcome: &'static str,
    /// Preview rows parsed before any full materialization (a JSON array).
    pub preview: Value,
    pub rows: Option<u64>,
    pub skipped: u64,
    pub rss_before_bytes: u64,
    pub rss_after_bytes: u64,
}

pub fn scan_report_json(report: &ScanReport<'_>) -> Value {
    let mut inner = Map::new();
    inner.insert("path".to_string(), json!(report.path.display().to_string()));
    if let Some(time) = &report.time {
        inner.insert("time".to_string(), json!(time));
    }
    inner.insert("file_bytes".to_string(), json!(report.file_bytes));
    inner.insert("file_size".to_string(), json!(format_bytes(report.file_bytes)));
    inner.insert("partition_count".to_string(), json!(report.partition_count));
    if let Some(enforcement) = &report.enforcement {
        inner.insert("ceiling".to_string(), enforcement.clone());
    }
    inner.insert("outcome".to_string(), json!(report.outcome));
    inner.insert("preview".to_string(), report.preview.clone());
    if let Some(rows) = report.rows {
        inner.insert("rows".to_string(), json!(rows));
    }
    inner.insert("skipped".to_string(), json!(report.skipped));
    inner.insert("rss_before_bytes".to_string(), json!(report.rss_before_bytes));
    inner.insert("rss_before".to_string(), json!(format_bytes(report.rss_before_bytes)));
    inner.insert("rss_after_bytes".to_string(), json!(report.rss_after_bytes));
    inner.insert("rss_after".to_string(), json!(format_bytes(report.rss_after_bytes)));

    let mut outer = Map::new();
    outer.insert("scan".to_string(), Value::Object(inner));
    Value::Object(outer)
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.2}{unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2}PB")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{format_bytes, plan_json, rows_json};
    use partable::core::plan::Partition;
    use partable::core::schema::{Row, Schema};

    #[test]
    fn format_bytes_walks_units() {
        assert_eq!(format_bytes(512), "512.00B");
        assert_eq!(format_bytes(2048), "2.00KB");
        assert_eq!(format_bytes(64 * 1024 * 1024), "64.00MB");
        assert_eq!(format_bytes(16 * 1024 * 1024 * 1024), "16.00GB");
    }

    #[test]
    fn plan_json_reports_ranges_in_order() {
        let schema = Schema::new(vec!["a".to_string(), "b".to_string()]).expect("schema");
        let partitions = vec![
            Partition { index: 0, start: 0, end: 30 },
            Partition { index: 1, start: 30, end: 80 },
        ];
        let value = plan_json(Path::new("d.csv"), &schema, &partitions, 25);
        let plan = value.get("plan").expect("plan object");
        assert_eq!(plan.get("file_bytes").and_then(|v| v.as_u64()), Some(80));
        assert_eq!(plan.get("partition_count").and_then(|v| v.as_u64()), Some(2));
        assert_eq!(plan["partitions"][1]["start"], 30);
    }

    #[test]
    fn rows_json_maps_fields_to_column_names() {
        let schema = Schema::new(vec!["id".to_string(), "city".to_string()]).expect("schema");
        let rows = vec![Row { fields: vec!["7".to_string(), "hangzhou".to_string()] }];
        let value = rows_json(&schema, &rows);
        assert_eq!(value["count"], 1);
        assert_eq!(value["rows"][0]["city"], "hangzhou");
    }
}
