//! Purpose: `partable` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Commands emit stable stdout payloads; stderr carries errors and notices.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `core::error::to_exit_code`.
//! Invariants: All ingestion goes through `core::table::LazyTable` (lock + plan + cache).
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod notice;
mod table_info_json;

use notice::{Notice, notice_json};
use partable::core::ceiling::EnforceMode;
use partable::core::error::{Error, ErrorKind, to_exit_code};
use partable::core::schema::{BadRowPolicy, Schema, TableOptions};
use table_info_json::{
    ScanReport, enforcement_json, format_bytes, plan_json, rows_json, scan_report_json,
};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(err.to_string().lines().next().unwrap_or("invalid arguments").to_string())
                        .with_hint("Run `partable --help` for usage."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command, color_mode).map_err(|err| (err, color_mode))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "partable",
    version,
    about = "Bounded-memory ingestion for delimited files that outgrow process memory",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Files are split into record-aligned partitions and parsed lazily.

Mental model:
  - `plan` shows the partition layout (offsets only, nothing parsed)
  - `preview` parses just enough partitions to show the first rows
  - `scan` optionally enforces a memory ceiling and walks the whole file
"#,
    after_help = r#"EXAMPLES
  $ partable plan events.csv --columns user_id,city,amount
  $ partable preview events.csv --columns user_id,city,amount -n 5
  $ partable scan events.csv --schema-file cols.json --memory-limit 1G --full

LEARN MORE
  $ partable <command> --help
  https://github.com/sandover/partable"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, ValueEnum)]
enum BadRowPolicyCli {
    Skip,
    Fail,
}

impl From<BadRowPolicyCli> for BadRowPolicy {
    fn from(policy: BadRowPolicyCli) -> Self {
        match policy {
            BadRowPolicyCli::Skip => BadRowPolicy::Skip,
            BadRowPolicyCli::Fail => BadRowPolicy::Fail,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, ValueEnum)]
enum EnforceModeCli {
    Strict,
    Degraded,
}

impl From<EnforceModeCli> for EnforceMode {
    fn from(mode: EnforceModeCli) -> Self {
        match mode {
            EnforceModeCli::Strict => EnforceMode::Strict,
            EnforceModeCli::Degraded => EnforceMode::Degraded,
        }
    }
}

#[derive(Args)]
struct SourceArgs {
    #[arg(help = "Delimited text file to ingest", value_hint = ValueHint::FilePath)]
    file: PathBuf,
    #[arg(
        long,
        value_delimiter = ',',
        help = "Ordered column names; the schema is supplied, never inferred"
    )]
    columns: Vec<String>,
    #[arg(
        long,
        value_name = "PATH",
        conflicts_with = "columns",
        help = "JSON array of column names",
        value_hint = ValueHint::FilePath
    )]
    schema_file: Option<PathBuf>,
    #[arg(long, default_value = ",", help = "Single-character field delimiter")]
    delimiter: String,
    #[arg(long, help = "Treat row 0 as a header record, not data")]
    header: bool,
    #[arg(
        long,
        default_value = "64M",
        help = "Target partition size (bytes or K/M/G; a target, not a cap)"
    )]
    partition_bytes: String,
    #[arg(
        short = 'e',
        long = "errors",
        default_value = "skip",
        value_enum,
        help = "Malformed-record policy: skip|fail"
    )]
    errors: BadRowPolicyCli,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Show the partition plan without parsing anything",
        after_help = r#"EXAMPLES
  $ partable plan events.csv --columns user_id,city --partition-bytes 64M

NOTES
  - Planning reads only small windows near each boundary; cost is O(partitions)
  - Sizes: 64K, 1M, 8M, 1G (K/M/G are 1024-based)"#
    )]
    Plan {
        #[command(flatten)]
        source: SourceArgs,
    },
    #[command(
        about = "Parse just enough partitions to show the first rows",
        after_help = r#"EXAMPLES
  $ partable preview events.csv --columns user_id,city -n 10

NOTES
  - Reads the minimal prefix of partitions needed for N rows, never the whole file"#
    )]
    Preview {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(short = 'n', long = "rows", default_value_t = 5, help = "Rows to show")]
        rows: usize,
    },
    #[command(
        about = "Walk the file under an optional memory ceiling",
        after_help = r#"EXAMPLES
  $ partable scan events.csv --schema-file cols.json --memory-limit 1G
  $ partable scan events.csv --schema-file cols.json --memory-limit 1G --full

NOTES
  - Without --full only a bounded preview is parsed (safe near a tight ceiling)
  - With --full the whole file is materialized under the oom guard; an
    allocation failure is reported as a typed out-of-memory outcome
  - --mode strict makes a refused ceiling fatal; degraded proceeds with a warning"#
    )]
    Scan {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, value_name = "SIZE", help = "Memory ceiling (bytes or K/M/G)")]
        memory_limit: Option<String>,
        #[arg(
            long,
            default_value = "degraded",
            value_enum,
            help = "Ceiling enforcement mode: strict|degraded"
        )]
        mode: EnforceModeCli,
        #[arg(long, help = "Materialize the whole file, not just a preview")]
        full: bool,
        #[arg(long, default_value_t = 5, help = "Preview rows included in the report")]
        head: usize,
    },
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
    #[command(about = "Print version information as JSON")]
    Version,
}

fn parse_size(input: &str) -> Result<u64, Error> {
    let trimmed = input.trim();
    let split = trimmed
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map(|(idx, _)| idx)
        .unwrap_or(trimmed.len());
    let digits = trimmed[..split].trim();
    let suffix = trimmed[split..].trim();

    let value: u64 = digits.parse().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid size")
            .with_hint("Use bytes or K/M/G (e.g. 64M).")
            .with_source(err)
    })?;

    let multiplier = match suffix {
        "" => 1,
        "K" | "k" => 1024,
        "M" | "m" => 1024 * 1024,
        "G" | "g" => 1024 * 1024 * 1024,
        _ => {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("invalid size suffix")
                .with_hint("Use K/M/G (e.g. 64M)."));
        }
    };

    value.checked_mul(multiplier).ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message("size overflow")
            .with_hint("Use a smaller size value.")
    })
}

fn parse_delimiter(input: &str) -> Result<u8, Error> {
    let bytes = input.as_bytes();
    if bytes.len() != 1 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("delimiter must be a single byte")
            .with_hint("Pass one character, e.g. --delimiter ',' or a literal tab."));
    }
    Ok(bytes[0])
}

fn load_schema(source: &SourceArgs) -> Result<Schema, Error> {
    if let Some(path) = &source.schema_file {
        let text = std::fs::read_to_string(path).map_err(|err| {
            let kind = match err.kind() {
                io::ErrorKind::NotFound => ErrorKind::NotFound,
                io::ErrorKind::PermissionDenied => ErrorKind::Permission,
                _ => ErrorKind::Io,
            };
            Error::new(kind)
                .with_message("failed to read schema file")
                .with_path(path)
                .with_source(err)
        })?;
        let columns: Vec<String> = serde_json::from_str(&text).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("schema file must be a JSON array of column names")
                .with_path(path)
                .with_source(err)
        })?;
        return Schema::new(columns);
    }
    if source.columns.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("a schema is required")
            .with_hint("Use --columns a,b,c or --schema-file cols.json."));
    }
    Schema::new(source.columns.clone())
}

fn table_options(source: &SourceArgs) -> Result<TableOptions, Error> {
    let target = parse_size(&source.partition_bytes)?;
    Ok(TableOptions::new(target)
        .with_delimiter(parse_delimiter(&source.delimiter)?)
        .with_header(source.header)
        .with_bad_rows(source.errors.into()))
}

fn notice_time_now() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

#[derive(Copy, Clone)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, use_color: bool, color: AnsiColor) -> String {
    if !use_color {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_json(value: Value) {
    let json = serde_json::to_string(&value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {} (file: {})", notice.message, notice.file);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Arity => "record arity mismatch".to_string(),
        ErrorKind::Ceiling => "memory ceiling refused".to_string(),
        ErrorKind::OutOfMemory => "out of memory".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(partition) = err.partition() {
        inner.insert("partition".to_string(), json!(partition));
    }
    if let Some(rows_parsed) = err.rows_parsed() {
        inner.insert("rows_parsed".to_string(), json!(rows_parsed));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(partition) = err.partition() {
        lines.push(format!(
            "{} {partition}",
            colorize_label("partition:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(rows_parsed) = err.rows_parsed() {
        lines.push(format!(
            "{} {rows_parsed}",
            colorize_label("rows parsed:", use_color, AnsiColor::Yellow)
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{error_json, parse_delimiter, parse_size};
    use partable::core::error::{Error, ErrorKind};

    #[test]
    fn parse_size_accepts_bytes_and_kmg() {
        assert_eq!(parse_size("4096").expect("bytes"), 4096);
        assert_eq!(parse_size("64K").expect("kib"), 64 * 1024);
        assert_eq!(parse_size("64M").expect("mib"), 64 * 1024 * 1024);
        assert_eq!(parse_size("1g").expect("gib"), 1024 * 1024 * 1024);
        assert_eq!(parse_size(" 8 M ").expect("padded"), 8 * 1024 * 1024);
    }

    #[test]
    fn parse_size_rejects_iec_suffixes() {
        let err = parse_size("64MiB").expect_err("iec suffix");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = parse_size("lots").expect_err("not a size");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn parse_delimiter_requires_a_single_byte() {
        assert_eq!(parse_delimiter(",").expect("comma"), b',');
        assert_eq!(parse_delimiter("\t").expect("tab"), b'\t');
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("ab").is_err());
    }

    #[test]
    fn error_json_carries_read_context() {
        let err = Error::new(ErrorKind::Arity)
            .with_message("expected 2 fields, found 3")
            .with_partition(1)
            .with_rows_parsed(40);
        let value = error_json(&err);
        let obj = value.get("error").expect("error object");
        assert_eq!(obj["kind"], "Arity");
        assert_eq!(obj["partition"], 1);
        assert_eq!(obj["rows_parsed"], 40);
    }
}
