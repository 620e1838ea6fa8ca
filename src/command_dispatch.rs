//! Purpose: Hold top-level CLI command dispatch for `partable`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Command behavior, output envelopes, and exit code semantics stay unchanged.
//! Invariants: Helpers in `main.rs` remain the source of shared parse/emit logic.

use super::*;

use partable::core::ceiling::{self, Enforcement};
use partable::core::guard::{self, MaterializeOutcome};
use partable::core::table::LazyTable;

pub(super) fn dispatch_command(command: Command, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            clap_complete::aot::generate(shell, &mut cmd, "partable", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_json(json!({ "version": env!("CARGO_PKG_VERSION") }));
            Ok(RunOutcome::ok())
        }
        Command::Plan { source } => {
            let schema = load_schema(&source)?;
            let options = table_options(&source)?;
            let table = LazyTable::open(&source.file, schema, options)?;
            emit_json(plan_json(
                table.path(),
                table.schema(),
                table.partitions(),
                options.target_partition_bytes,
            ));
            Ok(RunOutcome::ok())
        }
        Command::Preview { source, rows } => {
            let schema = load_schema(&source)?;
            let options = table_options(&source)?;
            let mut table = LazyTable::open(&source.file, schema, options)?;
            let preview = table.preview(rows)?;
            emit_json(rows_json(table.schema(), &preview));
            emit_skipped_notice(&table, "preview", color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Scan { source, memory_limit, mode, full, head } => {
            let rss_before = ceiling::resident_memory_bytes();

            let mut enforcement_value = None;
            if let Some(limit) = &memory_limit {
                let limit_bytes = parse_size(limit)?;
                // Strict-mode refusal propagates here, before any read.
                let enforcement = ceiling::enforce(limit_bytes, mode.into())?;
                if let Enforcement::Unprotected { attempted } = &enforcement {
                    let mut details = Map::new();
                    details.insert(
                        "attempted".to_string(),
                        json!(attempted.iter().map(|kind| kind.as_str()).collect::<Vec<_>>()),
                    );
                    emit_notice(
                        &Notice {
                            kind: "ceiling-refused".to_string(),
                            time: notice_time_now().unwrap_or_default(),
                            cmd: "scan".to_string(),
                            file: source.file.display().to_string(),
                            message: "memory ceiling refused; proceeding unprotected".to_string(),
                            details,
                        },
                        color_mode,
                    );
                }
                enforcement_value = Some(enforcement_json(&enforcement));
            }

            let schema = load_schema(&source)?;
            let options = table_options(&source)?;
            let mut table = LazyTable::open(&source.file, schema, options)?;

            let preview = table.preview(head)?;
            let preview_value = rows_json(table.schema(), &preview);

            let (outcome, rows, exit_code) = if full {
                match guard::run(|| table.materialize())? {
                    MaterializeOutcome::Table(full_table) => {
                        ("complete", Some(full_table.len() as u64), 0)
                    }
                    MaterializeOutcome::OutOfMemory { rss_bytes } => {
                        let mut details = Map::new();
                        details.insert("rss_bytes".to_string(), json!(rss_bytes));
                        details.insert("rss".to_string(), json!(format_bytes(rss_bytes)));
                        emit_notice(
                            &Notice {
                                kind: "out-of-memory".to_string(),
                                time: notice_time_now().unwrap_or_default(),
                                cmd: "scan".to_string(),
                                file: source.file.display().to_string(),
                                message: "materialization ran out of memory; table stays usable"
                                    .to_string(),
                                details,
                            },
                            color_mode,
                        );
                        ("out-of-memory", None, to_exit_code(ErrorKind::OutOfMemory))
                    }
                }
            } else {
                ("preview-only", None, 0)
            };

            emit_skipped_notice(&table, "scan", color_mode);

            let file_bytes = table.partitions().last().map(|p| p.end).unwrap_or(0);
            let report = ScanReport {
                path: table.path(),
                time: notice_time_now(),
                file_bytes,
                partition_count: table.partitions().len(),
                enforcement: enforcement_value,
                outcome,
                preview: preview_value
                    .get("rows")
                    .cloned()
                    .unwrap_or_else(|| json!([])),
                rows,
                skipped: table.skipped_row_count(),
                rss_before_bytes: rss_before,
                rss_after_bytes: ceiling::resident_memory_bytes(),
            };
            emit_json(scan_report_json(&report));
            Ok(RunOutcome::with_code(exit_code))
        }
    }
}

fn emit_skipped_notice(table: &LazyTable, cmd: &str, color_mode: ColorMode) {
    let skipped = table.skipped_row_count();
    if skipped == 0 {
        return;
    }
    let mut details = Map::new();
    details.insert("skipped".to_string(), json!(skipped));
    emit_notice(
        &Notice {
            kind: "skipped-rows".to_string(),
            time: notice_time_now().unwrap_or_default(),
            cmd: cmd.to_string(),
            file: table.path().display().to_string(),
            message: format!("skipped {skipped} malformed records"),
            details,
        },
        color_mode,
    );
}
