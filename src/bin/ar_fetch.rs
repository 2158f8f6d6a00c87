//! ar-fetch CLI
//!
//! Retrieves digital delivery receipts (AR) for a batch of tracking codes:
//! logs into the portal, submits a bulk query and saves one receipt file per
//! code into the output directory, then prints a saved/unavailable summary.

use ar_fetch::batch::{self, BatchSummary, MAX_BATCH_SIZE};
use ar_fetch::capture::{CaptureConfig, CaptureEngine};
use ar_fetch::navigator::{Credentials, Navigator, NavigatorConfig};
use ar_fetch::scanner::ResultsScanner;
use ar_fetch::{BrowserSession, LaunchOptions};
use clap::Parser;
use indexmap::IndexSet;
use std::io::{BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "ar-fetch",
    version,
    about = "Retrieve digital delivery receipts (AR) for a batch of tracking codes"
)]
struct Cli {
    /// Tracking codes to retrieve receipts for; read from stdin when neither
    /// codes nor --input are given
    codes: Vec<String>,

    /// Read tracking codes from a file, one per line
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Output directory for receipt files
    #[arg(long, default_value = "downloads_ar", value_name = "DIR")]
    output: PathBuf,

    /// Portal entry URL (falls back to AR_FETCH_URL)
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Portal username (falls back to AR_FETCH_USER)
    #[arg(long)]
    username: Option<String>,

    /// Portal password (falls back to AR_FETCH_PASS)
    #[arg(long)]
    password: Option<String>,

    /// Launch the browser with a visible window
    #[arg(long)]
    headed: bool,

    /// Path to the Chrome/Chromium binary
    #[arg(long, value_name = "PATH")]
    chrome_path: Option<PathBuf>,

    /// Overall capture budget per code, in seconds
    #[arg(long, default_value_t = 20, value_name = "SECS")]
    budget_secs: u64,

    /// Print the summary as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let url = option_or_env(cli.url.clone(), "AR_FETCH_URL")
        .ok_or("missing portal URL: pass --url or set AR_FETCH_URL")?;
    let username = option_or_env(cli.username.clone(), "AR_FETCH_USER")
        .ok_or("missing username: pass --username or set AR_FETCH_USER")?;
    let password = option_or_env(cli.password.clone(), "AR_FETCH_PASS")
        .ok_or("missing password: pass --password or set AR_FETCH_PASS")?;

    let identifiers = collect_identifiers(&cli)?;
    if identifiers.is_empty() {
        return Err("no tracking codes given".into());
    }
    if identifiers.len() > MAX_BATCH_SIZE {
        return Err(format!("{} codes exceed the batch cap of {}", identifiers.len(), MAX_BATCH_SIZE).into());
    }

    eprintln!("Retrieving receipts for {} code(s) into {}", identifiers.len(), cli.output.display());

    let mut options = LaunchOptions::new().headless(!cli.headed);
    if let Some(path) = cli.chrome_path.clone() {
        options = options.chrome_path(path);
    }
    let session = BrowserSession::launch(options)?;

    let navigator = Navigator::new(
        &session,
        Credentials { username, password },
        NavigatorConfig::new(url, cli.output.join("diagnostics")),
    );
    let results = navigator.open_results(&identifiers)?;

    let report = ResultsScanner::new(&results).scan(&identifiers)?;

    let config = CaptureConfig {
        overall_budget: Duration::from_secs(cli.budget_secs),
        ..CaptureConfig::default()
    };
    let engine = CaptureEngine::new(&session, results, &cli.output, config)?;

    let summary = batch::run_batch(&session, &engine, &identifiers, &report)?;
    engine.finish();
    let _ = session.close();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, &cli.output);
    }

    Ok(())
}

fn option_or_env(value: Option<String>, var: &str) -> Option<String> {
    value.or_else(|| std::env::var(var).ok()).filter(|v| !v.is_empty())
}

/// Gather codes from arguments, the input file, or stdin — deduplicated,
/// first occurrence wins, order preserved
fn collect_identifiers(cli: &Cli) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut codes: IndexSet<String> = IndexSet::new();

    for code in &cli.codes {
        let trimmed = code.trim();
        if !trimmed.is_empty() {
            codes.insert(trimmed.to_string());
        }
    }

    if let Some(path) = &cli.input {
        let content = std::fs::read_to_string(path)?;
        for line in content.lines() {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                codes.insert(trimmed.to_string());
            }
        }
    }

    if codes.is_empty() {
        read_stdin_codes(&mut codes)?;
    }

    Ok(codes.into_iter().collect())
}

fn read_stdin_codes(codes: &mut IndexSet<String>) -> std::io::Result<()> {
    if std::io::stdin().is_terminal() {
        eprintln!("Enter tracking codes, one per line (blank line to finish):");
    }
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        codes.insert(trimmed.to_string());
    }
    Ok(())
}

fn print_summary(summary: &BatchSummary, output: &Path) {
    println!();
    println!("== Receipts saved to {} ==", output.display());
    for code in &summary.saved {
        println!("  + {}", code);
    }
    if !summary.unavailable.is_empty() {
        println!();
        println!("== No receipt available / not captured ==");
        for code in &summary.unavailable {
            println!("  - {}", code);
        }
    }
}
