//! Snipline - staged snippet promotion pipeline CLI
//!
//! ## Commands
//!
//! - `engines`: List engines and slot usage
//! - `hash`: Print the content hash of a snippet file
//! - `promote`: Stage, execute, verify and promote snippet files
//! - `history`: Show the promotion ledger
//! - `slots`: Show current slot occupants
//! - `evict`: Clear one slot
//! - `list`: List staged candidates, optionally by state
//! - `show`: Print one staging record as JSON
//! - `audit`: Print the audit trail of one staging id

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use snipline_core::audit::{AuditEntry, JsonlAuditSink};
use snipline_core::metrics::METRICS;
use snipline_core::slots::Occupant;
use snipline_core::telemetry::{init_tracing, level_for_verbosity};
use snipline_core::{
    hasher, render, PipelineConfig, ProcessSandbox, PromotionController, RunReport, SnippetSpec,
    SubmitRequest,
};
use snipline_state::{Language, PromotionRecord, StagingId, StagingRecord, StagingState};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "snipline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Staged snippet promotion pipeline", long_about = None)]
struct Cli {
    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true, env = "SNIPLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the ledger, audit log and rendered snippets
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List engines with their slot usage
    Engines,

    /// Print the content hash of a snippet file
    Hash {
        file: PathBuf,

        /// Language (default: inferred from the file extension)
        #[arg(short, long)]
        language: Option<Language>,
    },

    /// Stage, execute, verify and promote snippet files
    Promote(PromoteArgs),

    /// Show promotion history, oldest first
    History {
        /// Only promotions on this engine
        #[arg(short, long)]
        engine: Option<String>,

        /// Only promotions of this label
        #[arg(long)]
        label: Option<String>,
    },

    /// Show current slot occupants
    Slots {
        /// Only this engine
        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Clear a slot, e.g. `evict m2`
    Evict {
        #[arg(value_parser = parse_address)]
        address: SlotAddress,
    },

    /// List staged candidates, oldest first
    List {
        /// Only records in this state (staged, running, passed, failed, promoted)
        #[arg(short, long)]
        state: Option<StagingState>,
    },

    /// Print one staging record as JSON
    Show { staging_id: StagingId },

    /// Print the audit trail of one staging id
    Audit { staging_id: StagingId },
}

/// Engine code followed by a 1-based position, as in `m2`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SlotAddress {
    engine: String,
    position: u32,
}

impl std::fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.engine, self.position)
    }
}

fn parse_address(s: &str) -> std::result::Result<SlotAddress, String> {
    let split = s
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| format!("{s:?} has no position; expected e.g. m2"))?;
    let (engine, position) = s.split_at(split);
    if engine.is_empty() || !engine.chars().all(|c| c.is_ascii_lowercase()) {
        return Err(format!("{s:?} does not start with an engine code"));
    }
    let position: u32 = position
        .parse()
        .map_err(|_| format!("{s:?} has an invalid position"))?;
    if position == 0 {
        return Err(format!("{s:?}: positions are 1-based"));
    }
    Ok(SlotAddress {
        engine: engine.to_string(),
        position,
    })
}

#[derive(Args, Debug, Clone, Default)]
struct PromoteArgs {
    /// Snippet source files
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Language (default: inferred from each file's extension)
    #[arg(short, long)]
    language: Option<Language>,

    /// Slot label (default: the file stem)
    #[arg(long)]
    label: Option<String>,

    /// Engine code (default: the language's engine)
    #[arg(short, long)]
    engine: Option<String>,

    /// Expected stdout, compared after trimming trailing whitespace
    #[arg(long)]
    expect_stdout: Option<String>,

    /// Expected exit code (default: 0)
    #[arg(long)]
    expect_exit: Option<i32>,

    /// Wall-clock budget for the snippet in milliseconds
    #[arg(long)]
    time_budget_ms: Option<u64>,
}

impl PromoteArgs {
    fn spec(&self) -> SnippetSpec {
        SnippetSpec {
            expected_stdout: self.expect_stdout.clone(),
            expected_exit_code: self.expect_exit,
            time_budget_ms: self.time_budget_ms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json, level_for_verbosity(cli.verbose));

    if let Commands::Hash { file, language } = &cli.command {
        return cmd_hash(file, *language);
    }

    let config = load_config(cli.config.as_deref(), cli.data_dir.clone())?;
    if let Commands::Audit { staging_id } = &cli.command {
        let sink = JsonlAuditSink::open(config.audit_path())?;
        return cmd_audit(&sink, staging_id, cli.json).await.map(|_| ());
    }
    let controller = Arc::new(
        PromotionController::from_config(&config, Arc::new(ProcessSandbox::new()))
            .await
            .context("Failed to start promotion controller")?,
    );

    let result = match cli.command {
        Commands::Engines => cmd_engines(&controller),
        Commands::Hash { .. } => Ok(()),
        Commands::Promote(args) => cmd_promote(&controller, &config.snippets_dir(), &args, cli.json)
            .await
            .map(|_| ()),
        Commands::History { engine, label } => {
            cmd_history(&controller, engine.as_deref(), label.as_deref(), cli.json).await
        }
        Commands::Slots { engine } => cmd_slots(&controller, engine.as_deref()),
        Commands::Evict { address } => cmd_evict(&controller, &address).await.map(|_| ()),
        Commands::List { state } => cmd_list(&controller, state, cli.json).await.map(|_| ()),
        Commands::Show { staging_id } => cmd_show(&controller, &staging_id).await,
        Commands::Audit { .. } => Ok(()),
    };

    METRICS.flush();
    result
}

/// Config file (or defaults) with environment overrides, then `--data-dir`.
fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let mut config = PipelineConfig::default();
            config.apply_env()?;
            config
        }
    };
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    config.validate()?;
    debug!(data_dir = %config.data_dir.display(), "configuration loaded");
    Ok(config)
}

fn language_for(path: &Path, explicit: Option<Language>) -> Result<Language> {
    if let Some(language) = explicit {
        return Ok(language);
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(Language::from_extension)
        .with_context(|| {
            format!(
                "Cannot infer language of {}; pass --language",
                path.display()
            )
        })
}

fn read_source(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    String::from_utf8(bytes).with_context(|| format!("{} is not valid UTF-8", path.display()))
}

/// Print the content hash of a file
fn cmd_hash(path: &Path, language: Option<Language>) -> Result<()> {
    let language = language_for(path, language)?;
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let hash = hasher::hash_bytes(language, &bytes)?;

    println!("{}  {}", hash, path.display());
    println!("Short: {}", hash.short());
    Ok(())
}

/// List engines
fn cmd_engines(controller: &PromotionController) -> Result<()> {
    println!(
        "{:<4} {:<12} {:<12} {:>9}",
        "CODE", "NAME", "LANGUAGE", "SLOTS"
    );
    for engine in controller.registry().engines() {
        let used = controller.allocator().occupants(&engine.code)?.len();
        println!(
            "{:<4} {:<12} {:<12} {:>4}/{:<4}",
            engine.code,
            engine.name,
            engine.language.as_str(),
            used,
            engine.slot_capacity
        );
    }
    Ok(())
}

/// Promote files; returns the rendered artifact paths.
async fn cmd_promote(
    controller: &Arc<PromotionController>,
    snippets_dir: &Path,
    args: &PromoteArgs,
    json: bool,
) -> Result<Vec<PathBuf>> {
    let mut ids = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let language = language_for(path, args.language)?;
        let source = read_source(path)?;
        let label = match &args.label {
            Some(label) => label.clone(),
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        };
        let mut request = SubmitRequest::new(language, source, label).with_spec(args.spec());
        if let Some(engine) = &args.engine {
            request = request.on_engine(engine.clone());
        }
        let id = controller
            .submit(request)
            .await
            .with_context(|| format!("Failed to stage {}", path.display()))?;
        ids.push((path.clone(), id));
    }

    let reports = controller
        .run_many(ids.iter().map(|(_, id)| id.clone()).collect())
        .await;

    let mut artifacts = Vec::new();
    let mut rejected = 0usize;
    for ((path, id), report) in ids.iter().zip(reports) {
        match report {
            Ok(report) => {
                if json {
                    println!("{}", serde_json::to_string(&report)?);
                } else {
                    print_report(path, &report);
                }
                match &report.promotion {
                    Some(promotion) => {
                        let record = controller.store().get(id).await?;
                        let artifact = render::write_artifact(
                            snippets_dir,
                            promotion,
                            &record.snippet.source,
                        )?;
                        if !json {
                            println!("    wrote {}", artifact.display());
                        }
                        artifacts.push(artifact);
                    }
                    None if report.state != StagingState::Promoted => rejected += 1,
                    None => {}
                }
            }
            Err(err) => {
                warn!(staging_id = %id, error = %err, "promotion failed");
                println!("ERROR     {}  {}  {}", id, path.display(), err);
                rejected += 1;
            }
        }
    }

    if rejected > 0 {
        bail!("{rejected} of {} snippet(s) were not promoted", ids.len());
    }
    Ok(artifacts)
}

fn print_report(path: &Path, report: &RunReport) {
    match (&report.promotion, report.state) {
        (Some(promotion), _) => println!(
            "PROMOTED  {}  {}  {}  {:.4}s{}",
            report.staging_id,
            path.display(),
            promotion.address(),
            promotion.spec_time_secs,
            if report.reused_verdict { "  (reused verdict)" } else { "" }
        ),
        (None, StagingState::Failed) => {
            let violations = report
                .verification
                .as_ref()
                .map(|v| v.violations.join("; "))
                .unwrap_or_default();
            println!(
                "FAILED    {}  {}  {}",
                report.staging_id,
                path.display(),
                violations
            );
        }
        (None, state) => println!(
            "{:<9} {}  {}",
            state.as_str(),
            report.staging_id,
            path.display()
        ),
    }
}

/// Show promotion history
async fn cmd_history(
    controller: &PromotionController,
    engine: Option<&str>,
    label: Option<&str>,
    json: bool,
) -> Result<()> {
    let history: Vec<PromotionRecord> = controller
        .ledger()
        .history()
        .await?
        .into_iter()
        .filter(|r| engine.map_or(true, |e| r.engine_code == e))
        .filter(|r| label.map_or(true, |l| r.label == l))
        .collect();

    if history.is_empty() {
        if !json {
            println!("No promotions found");
        }
        return Ok(());
    }

    for record in history {
        if json {
            println!("{}", serde_json::to_string(&record)?);
            continue;
        }
        let retired = record
            .retired
            .as_ref()
            .map(|id| format!("  retired {id}"))
            .unwrap_or_default();
        println!(
            "#{:<5} {}  {:<5} {}  {}  {}  {:.4}s{}",
            record.seq,
            record.promoted_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.address(),
            record.staging_id,
            record.content_hash.short(),
            record.label,
            record.spec_time_secs,
            retired
        );
    }
    Ok(())
}

/// Show slot occupants
fn cmd_slots(controller: &PromotionController, engine: Option<&str>) -> Result<()> {
    if let Some(code) = engine {
        controller.registry().get(code)?;
    }
    let mut any = false;
    for e in controller
        .registry()
        .engines()
        .filter(|e| engine.map_or(true, |code| e.code == code))
    {
        for (position, occupant) in controller.allocator().occupants(&e.code)? {
            any = true;
            println!(
                "{:<5} {}  {}  {}",
                e.address(position),
                occupant.staging_id,
                occupant.promoted_at.format("%Y-%m-%d %H:%M:%S UTC"),
                occupant.label
            );
        }
    }
    if !any {
        println!("No occupied slots");
    }
    Ok(())
}

/// Evict a slot's occupant; the eviction is journaled in the ledger.
async fn cmd_evict(
    controller: &PromotionController,
    address: &SlotAddress,
) -> Result<Option<Occupant>> {
    let evicted = controller
        .evict_slot(&address.engine, address.position)
        .await
        .with_context(|| format!("Failed to evict {address}"))?;
    match &evicted {
        Some(occupant) => println!(
            "Evicted {}: {}  {}",
            address, occupant.staging_id, occupant.label
        ),
        None => println!("{address} is empty"),
    }
    Ok(evicted)
}

/// List staging records
async fn cmd_list(
    controller: &PromotionController,
    state: Option<StagingState>,
    json: bool,
) -> Result<Vec<StagingRecord>> {
    let records = controller.store().list(state).await?;
    if records.is_empty() && !json {
        println!("No staged snippets");
    }
    for record in &records {
        if json {
            println!("{}", serde_json::to_string(record)?);
            continue;
        }
        println!(
            "{:<9} {}  {}  {:<4} {}  {}{}",
            record.state.as_str(),
            record.staging_id,
            record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.engine_code.as_deref().unwrap_or("-"),
            record.content_hash.short(),
            record.snippet.label,
            record
                .failure_reason
                .as_ref()
                .map(|r| format!("  ({r})"))
                .unwrap_or_default()
        );
    }
    Ok(records)
}

/// Print a staging record and its promotion, if any
async fn cmd_show(controller: &PromotionController, id: &StagingId) -> Result<()> {
    let record = controller
        .store()
        .get(id)
        .await
        .with_context(|| format!("No staging record {id}"))?;
    let promotion = controller.ledger().find_by_staging_id(id).await?;
    let shown = serde_json::json!({ "record": record, "promotion": promotion });
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}

/// Print the audit trail of one staging id
async fn cmd_audit(sink: &JsonlAuditSink, id: &StagingId, json: bool) -> Result<Vec<AuditEntry>> {
    let entries = sink
        .read_for(id)
        .await
        .with_context(|| format!("Failed to read {}", sink.path().display()))?;
    if entries.is_empty() && !json {
        println!("No audit entries for {id}");
    }
    for entry in &entries {
        if json {
            println!("{}", serde_json::to_string(entry)?);
        } else {
            println!(
                "{}  {:<20} {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
                serde_json::to_value(entry.event)?
                    .as_str()
                    .unwrap_or_default(),
                entry.details
            );
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn bash_controller() -> Arc<PromotionController> {
        Arc::new(PromotionController::builder(Arc::new(ProcessSandbox::new())).build())
    }

    async fn controller_in(data_dir: &Path) -> Arc<PromotionController> {
        let config = load_config(None, Some(data_dir.to_path_buf())).unwrap();
        Arc::new(
            PromotionController::from_config(&config, Arc::new(ProcessSandbox::new()))
                .await
                .unwrap(),
        )
    }

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn promote_flags_parse() {
        let cli = Cli::try_parse_from([
            "snipline",
            "-vv",
            "promote",
            "fact.c",
            "--language",
            "c",
            "--label",
            "Factorial",
            "--engine",
            "m",
            "--expect-stdout",
            "3628800",
            "--time-budget-ms",
            "2000",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Promote(args) => {
                assert_eq!(args.language, Some(Language::C));
                assert_eq!(args.engine.as_deref(), Some("m"));
                let spec = args.spec();
                assert_eq!(spec.expected_stdout.as_deref(), Some("3628800"));
                assert_eq!(spec.expected_exit_code, None);
                assert_eq!(spec.time_budget_ms, Some(2000));
            }
            _ => panic!("expected promote"),
        }
    }

    #[test]
    fn unknown_language_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["snipline", "hash", "x", "--language", "cobol"]).is_err());
    }

    #[test]
    fn language_is_inferred_from_extension() {
        assert_eq!(
            language_for(Path::new("fact.c"), None).unwrap(),
            Language::C
        );
        assert_eq!(
            language_for(Path::new("fact.txt"), Some(Language::Go)).unwrap(),
            Language::Go
        );
        assert!(language_for(Path::new("README"), None).is_err());
    }

    #[test]
    fn data_dir_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snipline.toml");
        std::fs::write(&path, "data_dir = \"/elsewhere\"\n").unwrap();
        let config = load_config(Some(path.as_path()), Some(dir.path().join("data"))).unwrap();
        assert_eq!(config.data_dir, dir.path().join("data"));
    }

    #[test]
    fn hash_rejects_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.sh");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(cmd_hash(&path, None).is_err());
    }

    #[tokio::test]
    async fn promote_writes_rendered_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("greet.sh");
        std::fs::write(&file, "echo hello\n").unwrap();
        let snippets = dir.path().join("snippets");

        let args = PromoteArgs {
            files: vec![file],
            expect_stdout: Some("hello".into()),
            ..PromoteArgs::default()
        };
        let artifacts = cmd_promote(&bash_controller(), &snippets, &args, false)
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 1);
        let artifact = &artifacts[0];
        assert!(artifact.starts_with(snippets.join("bash")));
        let name = artifact.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("n1_stg-"));
        assert!(name.ends_with(".sh"));

        let text = std::fs::read_to_string(artifact).unwrap();
        assert!(text.contains("#  label:       greet"));
        assert!(text.ends_with("echo hello\n"));
    }

    #[tokio::test]
    async fn promote_reports_spec_failures() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("wrong.sh");
        std::fs::write(&file, "echo 41\n").unwrap();

        let args = PromoteArgs {
            files: vec![file],
            expect_stdout: Some("42".into()),
            ..PromoteArgs::default()
        };
        let err = cmd_promote(&bash_controller(), dir.path(), &args, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 of 1"));
    }

    #[test]
    fn slot_addresses_parse() {
        assert_eq!(
            parse_address("m2").unwrap(),
            SlotAddress {
                engine: "m".into(),
                position: 2
            }
        );
        assert_eq!(parse_address("n12").unwrap().to_string(), "n12");
        assert!(parse_address("m").is_err());
        assert!(parse_address("2").is_err());
        assert!(parse_address("m0").is_err());
        assert!(parse_address("M2").is_err());
        assert!(parse_address("m2x").is_err());
    }

    #[test]
    fn operator_commands_parse() {
        let cli = Cli::try_parse_from(["snipline", "evict", "n3"]).unwrap();
        assert!(matches!(cli.command, Commands::Evict { address } if address.position == 3));

        let cli = Cli::try_parse_from(["snipline", "list", "--state", "failed"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::List {
                state: Some(StagingState::Failed)
            }
        ));

        let id = StagingId::generate();
        let cli = Cli::try_parse_from(["snipline", "audit", id.as_str()]).unwrap();
        assert!(matches!(cli.command, Commands::Audit { staging_id } if staging_id == id));

        assert!(Cli::try_parse_from(["snipline", "show", "not-an-id"]).is_err());
        assert!(Cli::try_parse_from(["snipline", "list", "--state", "done"]).is_err());
    }

    #[tokio::test]
    async fn eviction_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let args = PromoteArgs {
            files: vec![script(dir.path(), "greet.sh", "echo hello\n")],
            ..PromoteArgs::default()
        };
        let c = controller_in(&data).await;
        cmd_promote(&c, &data.join("snippets"), &args, false)
            .await
            .unwrap();
        let address = parse_address("n1").unwrap();
        let evicted = cmd_evict(&c, &address).await.unwrap().unwrap();
        assert_eq!(evicted.label, "greet");
        drop(c);

        let c = controller_in(&data).await;
        assert!(c.allocator().occupant("n", 1).unwrap().is_none());
        assert!(cmd_evict(&c, &address).await.unwrap().is_none());
        assert!(cmd_evict(&c, &parse_address("zz1").unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn list_filters_persisted_records_by_state() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let good = PromoteArgs {
            files: vec![script(dir.path(), "good.sh", "echo 42\n")],
            expect_stdout: Some("42".into()),
            ..PromoteArgs::default()
        };
        let bad = PromoteArgs {
            files: vec![script(dir.path(), "bad.sh", "echo 41\n")],
            expect_stdout: Some("42".into()),
            ..PromoteArgs::default()
        };
        {
            let c = controller_in(&data).await;
            cmd_promote(&c, &data.join("snippets"), &good, false)
                .await
                .unwrap();
            assert!(cmd_promote(&c, &data.join("snippets"), &bad, false)
                .await
                .is_err());
        }

        let c = controller_in(&data).await;
        assert_eq!(cmd_list(&c, None, false).await.unwrap().len(), 2);
        let failed = cmd_list(&c, Some(StagingState::Failed), false)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].snippet.label, "bad");
        assert!(failed[0].failure_reason.is_some());
        let promoted = cmd_list(&c, Some(StagingState::Promoted), true)
            .await
            .unwrap();
        assert_eq!(promoted[0].snippet.label, "good");

        cmd_show(&c, &failed[0].staging_id).await.unwrap();
        assert!(cmd_show(&c, &StagingId::generate()).await.is_err());
    }

    #[tokio::test]
    async fn audit_reads_one_staging_id() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let args = PromoteArgs {
            files: vec![
                script(dir.path(), "one.sh", "echo 1\n"),
                script(dir.path(), "two.sh", "echo 2\n"),
            ],
            ..PromoteArgs::default()
        };
        let c = controller_in(&data).await;
        cmd_promote(&c, &data.join("snippets"), &args, false)
            .await
            .unwrap();
        let one = c
            .store()
            .list(None)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.snippet.label == "one")
            .unwrap();

        let config = load_config(None, Some(data.clone())).unwrap();
        let sink = JsonlAuditSink::open(config.audit_path()).unwrap();
        let entries = cmd_audit(&sink, &one.staging_id, false).await.unwrap();
        assert!(!entries.is_empty());
        assert!(entries
            .iter()
            .all(|e| e.staging_id.as_ref() == Some(&one.staging_id)));
        assert_eq!(
            entries.last().unwrap().event,
            snipline_core::audit::AuditEventType::PromotionCompleted
        );
        assert!(cmd_audit(&sink, &StagingId::generate(), true)
            .await
            .unwrap()
            .is_empty());
    }
}
