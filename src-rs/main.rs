mod annotations;
mod drive;
mod error;
mod google;
mod overlay;
mod pipeline;
mod sheets;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use drive::{FolderResolver, GoogleDrive};
use google::GoogleClient;
use pipeline::{RecordErrorPolicy, RowAggregator, RunOptions};
use sheets::GoogleSheets;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "annot-publish",
    version,
    about = "Publish UI-interaction annotation folders to a reviewable Google Sheet"
)]
struct Cli {
    /// Root folder laid out as <root>/<folder>/act_annots/<annotation>/annot_dtls.json
    root: String,
    /// Destination spreadsheet id
    #[arg(long, env = "ANNOT_SHEET_ID")]
    sheet_id: String,
    /// Google Drive folder that receives the screenshot hierarchy
    #[arg(long, env = "ANNOT_DRIVE_FOLDER_ID")]
    drive_folder_id: String,
    /// OAuth bearer token with Drive and Sheets scopes
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,
    /// Local directory mirrored as the Drive folder root
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,
    /// Worksheet tab name (default: the root argument)
    #[arg(long)]
    worksheet: Option<String>,
    /// First data row; row 1 holds the headers
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(2..))]
    start_row: u32,
    /// Policy for annotations that cannot be read or lack required fields
    #[arg(long, value_enum, default_value_t = RecordErrorPolicy::Abort)]
    on_record_error: RecordErrorPolicy,
    /// Delete each rendered *_bbox image after it is uploaded
    #[arg(long, action = ArgAction::SetTrue)]
    remove_overlays: bool,
    /// Also write the run report JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_json = env::var("ANNOT_LOG_JSON")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}

fn run(cli: Cli) -> Result<()> {
    let root = strip_trailing_separators(&cli.root);
    let worksheet = cli.worksheet.clone().unwrap_or_else(|| root.clone());
    let root_path = Path::new(&root);
    if !root_path.is_dir() {
        anyhow::bail!("input folder not found: {root}");
    }

    let resolver = FolderResolver::new(cli.drive_folder_id.clone(), cli.base_dir.clone());
    resolver
        .ensure_contains(root_path)
        .with_context(|| format!("input folder {root} cannot be mirrored to Drive"))?;

    let client = GoogleClient::new(&cli.access_token)?;
    let drive = GoogleDrive::new(client.clone());
    let sheets_api = GoogleSheets::new(client);

    let options = RunOptions {
        on_record_error: cli.on_record_error,
        remove_overlays: cli.remove_overlays,
    };
    let mut aggregator = RowAggregator::new(&drive, resolver, options);

    let rows = aggregator.collect_rows(root_path)?;
    let written = sheets::write_rows(&sheets_api, &cli.sheet_id, &worksheet, &rows, cli.start_row)?;
    let report = aggregator.finish(&root, &worksheet, written);

    let payload = serde_json::to_string_pretty(&report)?;
    if let Some(path) = &cli.report {
        fs::write(path, &payload)
            .with_context(|| format!("failed to write report: {}", path.display()))?;
    }
    println!("{payload}");
    Ok(())
}

/// `data/run1///` -> `data/run1`; a bare separator is kept as is.
fn strip_trailing_separators(input: &str) -> String {
    let trimmed = input.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        input.to_string()
    } else {
        trimmed.to_string()
    }
}
