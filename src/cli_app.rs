//! Top-level CLI definition and dispatch.

use std::collections::BTreeMap;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::thread;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{ColoredString, Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use privacy_sweep::core::cancel::CancellationToken;
use privacy_sweep::core::config::Config;
use privacy_sweep::core::errors::PswError;
use privacy_sweep::core::model::{Category, PrivacyItem, ReportData, RiskTier, ScanResult};
use privacy_sweep::engine::PrivacyEngine;
use privacy_sweep::logger::activity::{
    ActivityLogConfig, ActivityLogger, spawn_activity_logger,
};
use privacy_sweep::platform::os::Os;
use privacy_sweep::risk::scoring::ExposureRating;
use privacy_sweep::scanner::engine::ScanEvent;

/// psweep: find, score and safely remove local privacy artifacts.
#[derive(Debug, Parser)]
#[command(
    name = "psweep",
    author,
    version,
    about = "Privacy Sweep - local privacy artifact scanner and cleaner",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Scan for privacy artifacts and report the exposure score.
    Scan(ScanArgs),
    /// Scan, then back up and remove the selected artifacts.
    Clean(CleanArgs),
    /// List persisted cleanup session reports.
    Reports(ReportsArgs),
    /// Decrypt a backed-up artifact to a new file.
    Restore(RestoreArgs),
    /// Check the signature chain of a session's operation log.
    VerifyLog(VerifyLogArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct SelectionArgs {
    /// Artifact tables to use (defaults to the running OS).
    #[arg(long, value_name = "OS", value_parser = parse_os)]
    os: Option<Os>,
    /// Restrict to these categories (repeatable).
    #[arg(long = "category", value_name = "CATEGORY", value_parser = parse_category)]
    categories: Vec<Category>,
    /// Lowest risk tier to include (`high` keeps only high-risk items).
    #[arg(long, value_name = "TIER", value_parser = parse_tier)]
    min_risk: Option<RiskTier>,
    /// Suppress the progress line on stderr.
    #[arg(long)]
    no_progress: bool,
}

#[derive(Debug, Clone, Args)]
struct ScanArgs {
    #[command(flatten)]
    selection: SelectionArgs,
    /// Maximum number of artifacts to list (human output).
    #[arg(long, default_value_t = 20, value_name = "N")]
    top: usize,
}

#[derive(Debug, Clone, Args)]
struct CleanArgs {
    #[command(flatten)]
    selection: SelectionArgs,
    /// Print the cleanup plan without touching anything.
    #[arg(long)]
    dry_run: bool,
    /// Skip interactive confirmation prompt.
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Clone, Args)]
struct ReportsArgs {
    /// Show at most N reports, newest first.
    #[arg(long, value_name = "N")]
    limit: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct RestoreArgs {
    /// Content fingerprint of the artifact (from a report).
    #[arg(value_name = "FINGERPRINT")]
    fingerprint: String,
    /// Destination file. Must not exist.
    #[arg(value_name = "DEST")]
    dest: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct VerifyLogArgs {
    /// Session id (from a report).
    #[arg(value_name = "SESSION")]
    session: String,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

fn parse_os(raw: &str) -> Result<Os, String> {
    raw.parse::<Os>().map_err(|e| e.to_string())
}

fn parse_category(raw: &str) -> Result<Category, String> {
    raw.parse::<Category>().map_err(|e| e.to_string())
}

fn parse_tier(raw: &str) -> Result<RiskTier, String> {
    raw.parse::<RiskTier>().map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<PswError> for CliError {
    fn from(err: PswError) -> Self {
        match err {
            PswError::InvalidConfig { .. }
            | PswError::MissingConfig { .. }
            | PswError::ConfigParse { .. }
            | PswError::UnsupportedPlatform { .. }
            | PswError::InvalidPattern { .. }
            | PswError::BackupNotFound { .. } => Self::User(err.to_string()),
            PswError::Serialization { .. } => Self::Internal(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Scan(args) => run_scan(cli, args),
        Command::Clean(args) => run_clean(cli, args),
        Command::Reports(args) => run_reports(cli, args),
        Command::Restore(args) => run_restore(cli, args),
        Command::VerifyLog(args) => run_verify_log(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── session ────────────────────

/// Engine plus the activity logger thread feeding its log file.
struct EngineSession {
    engine: PrivacyEngine,
    logger: ActivityLogger,
    logger_join: Option<thread::JoinHandle<()>>,
}

impl EngineSession {
    fn open(cli: &Cli) -> Result<Self, CliError> {
        let config = Config::load(cli.config.as_deref())?;
        let (logger, join) =
            spawn_activity_logger(ActivityLogConfig::for_path(&config.paths.activity_log()))?;
        let engine = PrivacyEngine::new(config)?.with_activity(logger.clone());
        Ok(Self {
            engine,
            logger,
            logger_join: Some(join),
        })
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        self.logger.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
    }
}

// ──────────────────── scan ────────────────────

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let session = EngineSession::open(cli)?;
    let scan = scan_with_progress(&session.engine, &args.selection, mode)?;
    let items = selected_view(&scan, &args.selection);
    let score = session.engine.score(&items);

    match mode {
        OutputMode::Human => {
            print_scan_header(&scan, score);
            print_category_summary(&items);
            print_item_table(&items, args.top);
            if !items.is_empty() {
                println!("  Use 'psweep clean' to back up and remove these artifacts.");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "scan",
                "os": scan.os(),
                "score": score,
                "rating": ExposureRating::from_score(score),
                "cancelled": scan.cancelled(),
                "skipped": scan.skipped(),
                "duration_ms": u64::try_from(scan.duration().as_millis()).unwrap_or(u64::MAX),
                "scanned_at": scan.scanned_at(),
                "total_bytes": items.iter().map(PrivacyItem::size).sum::<u64>(),
                "categories": category_summary_json(&items),
                "items": items,
            });
            write_json_line(&payload)?;
        }
    }

    if scan.cancelled() {
        return Err(CliError::Partial("scan cancelled; results are incomplete".to_string()));
    }
    Ok(())
}

/// Run a background scan, draining progress events until it finishes.
/// Ctrl-C cancels through the scan's token.
fn scan_with_progress(
    engine: &PrivacyEngine,
    selection: &SelectionArgs,
    mode: OutputMode,
) -> Result<ScanResult, CliError> {
    let os = match selection.os {
        Some(os) => os,
        None => Os::current()?,
    };
    let token = CancellationToken::new();
    let sig_id = match signal_hook::flag::register(signal_hook::consts::SIGINT, token.as_flag()) {
        Ok(id) => Some(id),
        Err(e) => {
            eprintln!("[PSW-CLI] warning: cannot install Ctrl-C handler: {e}");
            None
        }
    };

    let show_progress =
        mode == OutputMode::Human && !selection.no_progress && io::stderr().is_terminal();
    let handle = engine.spawn_scan(os, token)?;
    for event in handle.events() {
        if !show_progress {
            continue;
        }
        match event {
            ScanEvent::Started { roots, .. } => {
                eprintln!("Scanning {} locations for {os}...", roots);
            }
            ScanEvent::Progress {
                items_found,
                entries_skipped,
                percent,
            } => {
                eprint!("\r  {percent:>3}%  {items_found} artifacts, {entries_skipped} skipped");
                let _ = io::stderr().flush();
            }
            ScanEvent::EntrySkipped { .. } => {}
            ScanEvent::Finished { cancelled, .. } => {
                eprintln!();
                if cancelled {
                    eprintln!("{}", "Scan cancelled.".yellow());
                }
            }
        }
    }
    let result = handle.join();

    if let Some(id) = sig_id {
        signal_hook::low_level::unregister(id);
    }
    Ok(result?)
}

/// Apply category and tier filters: unselected items are left out of the view.
fn apply_selection(items: &mut [PrivacyItem], selection: &SelectionArgs) {
    for item in items {
        let category_ok =
            selection.categories.is_empty() || selection.categories.contains(&item.category());
        let tier_ok = selection.min_risk.is_none_or(|min| item.risk() <= min);
        item.set_selected(category_ok && tier_ok);
    }
}

fn selected_view(scan: &ScanResult, selection: &SelectionArgs) -> Vec<PrivacyItem> {
    let mut items = scan.items().to_vec();
    apply_selection(&mut items, selection);
    items.retain(PrivacyItem::selected);
    items
}

fn print_scan_header(scan: &ScanResult, score: u8) {
    println!(
        "Privacy Exposure Scan ({})\n  Scanned in {:.1}s, {} unreadable entries skipped\n",
        scan.os(),
        scan.duration().as_secs_f64(),
        scan.skipped(),
    );
    println!(
        "  Exposure score: {} ({})\n",
        paint_score(score, &score.to_string()),
        paint_score(score, ExposureRating::from_score(score).label()),
    );
}

fn print_category_summary(items: &[PrivacyItem]) {
    if items.is_empty() {
        println!("  No privacy artifacts found.");
        return;
    }
    println!("  {:<20}  {:>7}  {:>10}  {:<6}", "Category", "Items", "Size", "Risk");
    println!("  {}", "-".repeat(50));
    for (category, (count, bytes, tier)) in summarize(items) {
        println!(
            "  {:<20}  {:>7}  {:>10}  {}",
            category.label(),
            count,
            format_bytes(bytes),
            paint_tier(tier),
        );
    }
    println!();
}

fn print_item_table(items: &[PrivacyItem], top: usize) {
    if items.is_empty() || top == 0 {
        return;
    }
    let mut ranked: Vec<&PrivacyItem> = items.iter().collect();
    ranked.sort_by(|a, b| a.risk().cmp(&b.risk()).then(b.size().cmp(&a.size())));

    println!(
        "  {:>3}  {:<56}  {:>10}  {:<6}",
        "#", "Path", "Size", "Risk"
    );
    println!("  {}", "-".repeat(82));
    for (i, item) in ranked.iter().take(top).enumerate() {
        println!(
            "  {:>3}  {:<56}  {:>10}  {}",
            i + 1,
            truncate_path(item.path(), 56),
            format_bytes(item.size()),
            paint_tier(item.risk()),
        );
    }
    if ranked.len() > top {
        println!("  ... {} more", ranked.len() - top);
    }
    println!();
}

/// Per-category (count, bytes, tier) in canonical category order.
fn summarize(items: &[PrivacyItem]) -> BTreeMap<Category, (usize, u64, RiskTier)> {
    let mut summary = BTreeMap::new();
    for item in items {
        let entry = summary
            .entry(item.category())
            .or_insert((0usize, 0u64, item.risk()));
        entry.0 += 1;
        entry.1 += item.size();
    }
    summary
}

fn category_summary_json(items: &[PrivacyItem]) -> Vec<Value> {
    summarize(items)
        .into_iter()
        .map(|(category, (count, bytes, tier))| {
            json!({
                "category": category,
                "label": category.label(),
                "items": count,
                "bytes": bytes,
                "risk": tier,
            })
        })
        .collect()
}

// ──────────────────── clean ────────────────────

fn run_clean(cli: &Cli, args: &CleanArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let session = EngineSession::open(cli)?;
    let scan = scan_with_progress(&session.engine, &args.selection, mode)?;
    if scan.cancelled() {
        return Err(CliError::Partial(
            "scan cancelled; nothing was cleaned".to_string(),
        ));
    }

    let mut inventory = scan.into_items();
    apply_selection(&mut inventory, &args.selection);
    let selected: Vec<&PrivacyItem> = inventory.iter().filter(|i| i.selected()).collect();
    let selected_bytes: u64 = selected.iter().map(|i| i.size()).sum();

    if args.dry_run {
        match mode {
            OutputMode::Human => {
                println!(
                    "Cleanup plan (dry run): {} artifacts, {}",
                    selected.len(),
                    format_bytes(selected_bytes)
                );
                for item in &selected {
                    println!(
                        "  [{}] {} ({})",
                        paint_tier(item.risk()),
                        item.path().display(),
                        format_bytes(item.size())
                    );
                }
            }
            OutputMode::Json => {
                let payload = json!({
                    "command": "clean",
                    "dry_run": true,
                    "selected": selected.len(),
                    "selected_bytes": selected_bytes,
                    "items": selected,
                });
                write_json_line(&payload)?;
            }
        }
        return Ok(());
    }

    let confirmed = if args.yes || selected.is_empty() {
        true
    } else if mode == OutputMode::Human && io::stdin().is_terminal() {
        confirm(&format!(
            "Back up and remove {} artifacts ({})? [y/N] ",
            selected.len(),
            format_bytes(selected_bytes)
        ))?
    } else {
        return Err(CliError::User(
            "cleanup needs confirmation; pass --yes for non-interactive use".to_string(),
        ));
    };
    if !confirmed {
        println!("Aborted; nothing was removed.");
        return Ok(());
    }

    let report = session.engine.cleanup(&mut inventory, true)?;
    let failures: Vec<_> = report
        .cleaned_items
        .iter()
        .filter(|o| o.disposition.is_failure())
        .collect();

    match mode {
        OutputMode::Human => print_clean_summary(&report),
        OutputMode::Json => {
            let payload = json!({
                "command": "clean",
                "dry_run": false,
                "report": report,
            });
            write_json_line(&payload)?;
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(CliError::Partial(format!(
            "{} of {} selected artifacts were not removed",
            failures.len(),
            report.cleaned_items.len()
        )))
    }
}

fn confirm(prompt: &str) -> Result<bool, CliError> {
    let mut stdout = io::stdout().lock();
    write!(stdout, "{prompt}")?;
    stdout.flush()?;
    drop(stdout);

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_clean_summary(report: &ReportData) {
    let removed = report.removed_items().count();
    println!("Cleanup session {}", report.session_id);
    println!(
        "  Score: {} -> {}",
        paint_score(report.initial_score, &report.initial_score.to_string()),
        paint_score(report.final_score, &report.final_score.to_string()),
    );
    println!(
        "  Removed: {} of {} selected, {} reclaimed",
        removed,
        report.cleaned_items.len(),
        format_bytes(report.total_bytes_saved)
    );
    for outcome in &report.cleaned_items {
        if outcome.disposition.is_removed() {
            continue;
        }
        let label = if outcome.disposition.is_failure() {
            outcome.disposition.label().red()
        } else {
            outcome.disposition.label().dimmed()
        };
        match outcome.disposition.reason() {
            Some(reason) => println!(
                "  [{label}] {}: {reason}",
                outcome.item.path().display()
            ),
            None => println!("  [{label}] {}", outcome.item.path().display()),
        }
    }
}

// ──────────────────── reports / restore / verify ────────────────────

fn run_reports(cli: &Cli, args: &ReportsArgs) -> Result<(), CliError> {
    let session = EngineSession::open(cli)?;
    let mut reports = session.engine.list_reports()?;
    if let Some(limit) = args.limit {
        reports.truncate(limit);
    }

    match output_mode(cli) {
        OutputMode::Human => {
            if reports.is_empty() {
                println!("No cleanup sessions recorded.");
                return Ok(());
            }
            println!(
                "  {:<26}  {:<20}  {:>9}  {:>7}  {:>10}",
                "Session", "When", "Score", "Removed", "Reclaimed"
            );
            println!("  {}", "-".repeat(80));
            for report in &reports {
                println!(
                    "  {:<26}  {:<20}  {:>4} ->{:>3}  {:>7}  {:>10}",
                    report.session_id,
                    report.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    report.initial_score,
                    report.final_score,
                    report.removed_items().count(),
                    format_bytes(report.total_bytes_saved),
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "reports",
                "count": reports.len(),
                "reports": reports,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_restore(cli: &Cli, args: &RestoreArgs) -> Result<(), CliError> {
    let session = EngineSession::open(cli)?;
    let bytes = session.engine.restore(&args.fingerprint, &args.dest)?;

    match output_mode(cli) {
        OutputMode::Human => {
            let short: String = args.fingerprint.chars().take(12).collect();
            println!(
                "Restored {short} ({}) to {}",
                format_bytes(bytes),
                args.dest.display()
            );
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "restore",
                "fingerprint": args.fingerprint,
                "dest": args.dest.to_string_lossy(),
                "bytes": bytes,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_verify_log(cli: &Cli, args: &VerifyLogArgs) -> Result<(), CliError> {
    let session = EngineSession::open(cli)?;
    let verification = session.engine.verify_session_log(&args.session)?;

    match output_mode(cli) {
        OutputMode::Human => {
            if verification.is_intact() {
                println!(
                    "{} {} entries verified in {}",
                    "OK".green(),
                    verification.valid_entries,
                    verification.path.display()
                );
            } else {
                println!(
                    "{} line {}: {}",
                    "TAMPERED".red().bold(),
                    verification.first_invalid_line.unwrap_or_default(),
                    verification.reason.as_deref().unwrap_or("unknown"),
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "verify-log",
                "session": args.session,
                "intact": verification.is_intact(),
                "verification": verification,
            });
            write_json_line(&payload)?;
        }
    }

    match verification.first_invalid_line {
        None => Ok(()),
        Some(line) => Err(CliError::Runtime(format!(
            "operation log for {} failed verification at line {line}",
            args.session
        ))),
    }
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;
            let hash = config.stable_hash()?;

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("# hash: {hash}");
                    println!("{}", config.to_toml_string()?);
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "hash": hash,
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

// ──────────────────── output helpers ────────────────────

fn paint_score(score: u8, text: &str) -> ColoredString {
    match ExposureRating::from_score(score) {
        ExposureRating::Excellent => text.green().bold(),
        ExposureRating::Compromised => text.yellow().bold(),
        ExposureRating::CriticalRisk => text.red().bold(),
    }
}

fn paint_tier(tier: RiskTier) -> ColoredString {
    let label = format!("{:<6}", tier.label());
    let label = label.as_str();
    match tier {
        RiskTier::High => label.red(),
        RiskTier::Medium => label.yellow(),
        RiskTier::Low => label.normal(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn truncate_path(path: &std::path::Path, max_len: usize) -> String {
    let s = path.to_string_lossy();
    let chars = s.chars().count();
    if chars <= max_len {
        s.to_string()
    } else {
        let tail: String = s.chars().skip(chars - (max_len - 3)).collect();
        format!("...{tail}")
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("PSW_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "psweep",
            "--config",
            "/tmp/psweep.toml",
            "--json",
            "--no-color",
            "reports",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["psweep", "reports", "--json", "--no-color"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_all_subcommands() {
        let cases = [
            vec!["psweep", "scan"],
            vec!["psweep", "scan", "--os", "windows", "--top", "5"],
            vec!["psweep", "scan", "--category", "browser", "--category", "temp"],
            vec!["psweep", "clean", "--min-risk", "medium", "--yes"],
            vec!["psweep", "clean", "--dry-run", "--no-progress"],
            vec!["psweep", "reports", "--limit", "3"],
            vec!["psweep", "restore", "ab12", "/tmp/out"],
            vec!["psweep", "verify-log", "20260101T000000Z-0011aabb"],
            vec!["psweep", "config", "path"],
            vec!["psweep", "config", "show"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn rejects_unknown_os_and_category() {
        assert!(Cli::try_parse_from(["psweep", "scan", "--os", "plan9"]).is_err());
        assert!(Cli::try_parse_from(["psweep", "scan", "--category", "cookies"]).is_err());
        assert!(Cli::try_parse_from(["psweep", "clean", "--min-risk", "extreme"]).is_err());
    }

    #[test]
    fn restore_requires_fingerprint_and_dest() {
        assert!(Cli::try_parse_from(["psweep", "restore"]).is_err());
        assert!(Cli::try_parse_from(["psweep", "restore", "ab12"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["psweep", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some(" Human "), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("bogus"), false), OutputMode::Json);
    }

    #[test]
    fn exit_codes_follow_contract() {
        assert_eq!(CliError::User(String::new()).exit_code(), 1);
        assert_eq!(CliError::Runtime(String::new()).exit_code(), 2);
        assert_eq!(CliError::Internal(String::new()).exit_code(), 3);
        assert_eq!(CliError::Partial(String::new()).exit_code(), 4);
    }

    #[test]
    fn engine_errors_map_to_exit_classes() {
        let user: CliError = PswError::UnsupportedPlatform {
            details: "plan9".to_string(),
        }
        .into();
        assert_eq!(user.exit_code(), 1);

        let runtime: CliError = PswError::Runtime {
            details: "boom".to_string(),
        }
        .into();
        assert_eq!(runtime.exit_code(), 2);
    }

    #[test]
    fn formats_bytes_and_paths() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
        let path = std::path::Path::new("/home/user/.cache/mozilla/firefox/profile/cache2");
        let short = truncate_path(path, 20);
        assert_eq!(short.chars().count(), 20);
        assert!(short.starts_with("..."));
    }
}
