use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use enatrieve::{Client, OutputFormat, OutputTarget, QuerySpec, Retrieval, default_output_name};

#[derive(Debug, Parser)]
#[command(name = "enatrieve", version)]
#[command(about = "Fetch ENA sequencing-run metadata for a taxonomy id and library strategy")]
struct Cli {
    /// NCBI taxonomy identifier to query
    #[arg(long = "tax-id", alias = "tax_id")]
    tax_id: String,

    /// Library strategy to filter on
    #[arg(long, default_value = "RNA-Seq")]
    strategy: String,

    /// Match only this taxon (tax_eq) instead of it and all descendants (tax_tree)
    #[arg(long)]
    exact: bool,

    /// Maximum number of records to request; 0 means no limit
    #[arg(long, default_value_t = 0)]
    limit: u64,

    /// Output format (tsv or json)
    #[arg(long, default_value = "tsv")]
    format: OutputFormat,

    /// Output file, or '-' for stdout. Defaults to enatrieved_<tax_id>_<strategy>[_exact].<format>
    #[arg(short, long)]
    output: Option<String>,

    /// Print a metadata summary to stderr after the download (not available with '-o -')
    #[arg(long)]
    summary: bool,

    /// Log file path (default: logs/enatrieve_<timestamp>.log). Set to '' to disable file logging
    #[arg(long)]
    log: Option<String>,

    /// Search endpoint URL (overrides ENATRIEVE_URL and .enatrieverc)
    #[arg(long)]
    url: Option<String>,

    /// Total request timeout in seconds, body included; 0 means no limit
    #[arg(long)]
    timeout: Option<f64>,

    /// Do not show the progress spinner
    #[arg(long)]
    no_progress: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match init_logging(cli.log.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(2);
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<enatrieve::Error>()
                .map(|e| e.kind().exit_code())
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let query = QuerySpec::new(&cli.tax_id, &cli.strategy, cli.exact)?;
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_name(&query, cli.format));

    let mut retrieval = Retrieval::new(query, OutputTarget::parse(&output));
    retrieval.format = cli.format;
    retrieval.limit = cli.limit;
    retrieval.summary = cli.summary;
    retrieval.progress = !cli.no_progress;
    retrieval.validate()?;

    info!(
        "tax_id={} strategy={} exact={} limit={} output={}",
        cli.tax_id, cli.strategy, cli.exact, cli.limit, output
    );

    let timeout = match cli.timeout {
        Some(secs) if secs == 0.0 => None,
        Some(secs) => Some(
            Duration::try_from_secs_f64(secs)
                .with_context(|| format!("invalid --timeout value {secs}"))?,
        ),
        None => None,
    };
    let client = Client::new(cli.url.clone(), timeout, cli.insecure.then_some(false))?;

    let outcome = retrieval.run(&client)?;
    if let Some(summary) = outcome.summary {
        summary
            .write_report(&mut io::stderr().lock())
            .context("failed to write summary")?;
    }
    Ok(())
}

/// Logs go to stderr and, unless disabled with an empty path, to a log file.
fn init_logging(log: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .without_time();

    let log_path = match log {
        Some("") => None,
        Some(path) => Some(PathBuf::from(path)),
        None => Some(default_log_path()),
    };

    let (file_layer, guard) = match &log_path {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(&dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Some(path) = &log_path {
        let shown = std::path::absolute(path).unwrap_or_else(|_| path.clone());
        info!("logging to file: {}", shown.display());
    }
    Ok(guard)
}

fn default_log_path() -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    PathBuf::from(format!("logs/enatrieve_{timestamp}.log"))
}

fn split_log_path(path: &Path) -> Result<(PathBuf, &std::ffi::OsStr)> {
    let name = path
        .file_name()
        .with_context(|| format!("log path {} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["enatrieve", "--tax-id", "562"]).unwrap();
        assert_eq!(cli.strategy, "RNA-Seq");
        assert_eq!(cli.limit, 0);
        assert_eq!(cli.format, OutputFormat::Tsv);
        assert!(!cli.exact && !cli.summary);
        assert!(cli.output.is_none());
    }

    #[test]
    fn test_cli_underscore_alias() {
        let cli = Cli::try_parse_from([
            "enatrieve", "--tax_id", "7460", "--exact", "--format", "json", "-o", "-",
        ])
        .unwrap();
        assert_eq!(cli.tax_id, "7460");
        assert!(cli.exact);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.output.as_deref(), Some("-"));
    }

    #[test]
    fn test_summary_to_stdout_fails_before_network() {
        let cli = Cli::try_parse_from([
            "enatrieve",
            "--tax-id",
            "562",
            "--summary",
            "-o",
            "-",
            "--url",
            "http://127.0.0.1:9/",
        ])
        .unwrap();
        let err = run(&cli).unwrap_err();
        let err = err.downcast_ref::<enatrieve::Error>().unwrap();
        assert_eq!(err.kind(), enatrieve::ErrorKind::Config);
    }

    #[test]
    fn test_split_log_path() {
        let (dir, name) = split_log_path(Path::new("run.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, "run.log");

        let (dir, _) = split_log_path(Path::new("logs/a/run.log")).unwrap();
        assert_eq!(dir, PathBuf::from("logs/a"));
    }
}
