use almanac::{
    archive, layout, AppData, CloudflareRemote, Config, GithubRemote, LocalStore, RemotePaths,
    RemoteStore, Resolution, SyncEngine, SyncOutcome,
};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use colored::Colorize;
use sha2::{Digest, Sha256};

#[derive(Parser, Debug)]
#[command(name = "almanac")]
#[command(version, about = "Personal productivity data with GitHub-backed sync")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a starter config and an empty local document
    Init,

    /// Show local and remote state without changing anything
    Status,

    /// Run one bidirectional sync cycle
    Sync,

    /// Resolve a detected conflict by choosing a side
    Resolve {
        /// Which side wins
        #[arg(value_enum)]
        choice: Choice,
    },

    /// One-time data migrations
    Migrate {
        #[command(subcommand)]
        target: MigrateTarget,
    },

    /// Sweep aged records into yearly archive files
    Archive {
        /// Compute and print the sweep without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Merge one year's archive back into the live document
    Restore { year: i32 },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum MigrateTarget {
    /// Convert a legacy single-file remote to the split layout
    Split,

    /// Copy the GitHub-hosted document to a Cloudflare sync endpoint and
    /// verify the round trip
    Cloudflare,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Choice {
    Local,
    Remote,
    Cancel,
}

impl From<Choice> for Resolution {
    fn from(choice: Choice) -> Self {
        match choice {
            Choice::Local => Resolution::Local,
            Choice::Remote => Resolution::Remote,
            Choice::Cancel => Resolution::Cancel,
        }
    }
}

fn main() {
    // stderr logging, RUST_LOG-style filtering via the env; the handle
    // must stay alive for the duration of the run
    let _logger = flexi_logger::Logger::try_with_env_or_str("info")
        .and_then(|logger| logger.log_to_stderr().start())
        .ok();

    let cli = Cli::parse();

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            1
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Command::Init => cmd_init(),
        Command::Status => cmd_status(),
        Command::Sync => cmd_sync(),
        Command::Resolve { choice } => cmd_resolve(choice),
        Command::Migrate { target } => match target {
            MigrateTarget::Split => cmd_migrate_split(),
            MigrateTarget::Cloudflare => cmd_migrate_cloudflare(),
        },
        Command::Archive { dry_run } => cmd_archive(dry_run),
        Command::Restore { year } => cmd_restore(year),
        Command::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "almanac",
                &mut std::io::stdout(),
            );
            Ok(0)
        }
    }
}

/// Build the configured remote: GitHub when configured, else Cloudflare.
fn open_remote(config: &Config) -> Result<Box<dyn RemoteStore>, Box<dyn std::error::Error>> {
    if config.github.owner.is_some() {
        let (owner, repo, branch, token) = config.github_required()?;
        return Ok(Box::new(GithubRemote::new(owner, repo, branch, token)));
    }
    if let Some(api_url) = config.cloudflare_api_url() {
        return Ok(Box::new(CloudflareRemote::new(
            api_url,
            config.cloudflare_api_key(),
        )));
    }
    Err("no remote configured; set [github] or [cloudflare] in .almanac/config.toml".into())
}

fn open_engine(config: &Config) -> Result<SyncEngine, Box<dyn std::error::Error>> {
    let store = LocalStore::open(config.store_path());
    let remote = open_remote(config)?;
    let paths = RemotePaths::new(config.github.base_path.clone());
    Ok(SyncEngine::new(store, remote, paths))
}

fn print_outcome(outcome: SyncOutcome, engine: &SyncEngine) {
    match outcome {
        SyncOutcome::Pushed => println!("{} local changes pushed to remote", "✓".green()),
        SyncOutcome::Pulled => println!("{} remote changes pulled into local store", "✓".green()),
        SyncOutcome::UpToDate => println!("{} already up to date", "✓".green()),
        SyncOutcome::Conflict => {
            println!("{} both sides changed since the last sync", "!".yellow().bold());
            if let Some(conflict) = engine.pending_conflict() {
                println!(
                    "  local:  {} tasks, modified {}",
                    conflict.local.tasks.len(),
                    stamp(conflict.local_modified)
                );
                println!(
                    "  remote: {} tasks, modified {}",
                    conflict.remote.tasks.len(),
                    stamp(conflict.remote_modified)
                );
            }
            println!(
                "  run {} to pick a side",
                "almanac resolve <local|remote|cancel>".cyan()
            );
        }
    }
}

fn stamp(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}

fn cmd_init() -> Result<i32, Box<dyn std::error::Error>> {
    let dir = std::path::Path::new(".almanac");
    let config_path = dir.join("config.toml");
    if config_path.exists() {
        println!("{} {} already exists", "✓".green(), config_path.display());
        return Ok(0);
    }
    std::fs::create_dir_all(dir)?;
    std::fs::write(
        &config_path,
        "\
# almanac configuration
[github]
# owner = \"you\"
# repo = \"life-data\"
# branch = \"main\"
# base_path = \"data/tasks.json\"
# token: prefer the ALMANAC_GITHUB_TOKEN environment variable

[cloudflare]
# api_url = \"https://sync.example.workers.dev\"
# api_key: prefer the ALMANAC_CF_API_KEY environment variable

[archive]
# daily_record_days = 365
# completed_task_days = 365
# memo_days = 365
",
    )?;

    let store = LocalStore::open(dir.join("almanac.json"));
    store.save(&AppData::empty())?;

    println!("{} wrote {}", "✓".green(), config_path.display());
    println!("  edit it, then run {}", "almanac sync".cyan());
    Ok(0)
}

fn cmd_status() -> Result<i32, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let store = LocalStore::open(config.store_path());
    let data = store.load()?;

    println!("{}", "Local".bold());
    println!("  path:          {}", store.path().display());
    println!("  tasks:         {}", data.tasks.len());
    println!("  memos:         {}", data.memos.len());
    println!("  daily records: {}", data.daily_records.len());
    println!("  last modified: {}", stamp(store.last_modified()?));
    println!("  last synced:   {}", stamp(data.last_synced));

    let remote = open_remote(&config)?;
    let paths = RemotePaths::new(config.github.base_path.clone());
    let layout = layout::detect_layout(remote.as_ref(), &paths)?;

    println!("{}", "Remote".bold());
    println!("  layout:        {}", layout);
    Ok(0)
}

fn cmd_sync() -> Result<i32, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let mut engine = open_engine(&config)?;
    let outcome = engine.sync_bidirectional()?;
    print_outcome(outcome, &engine);
    Ok(0)
}

/// The CLI is one-shot, so resolution re-detects the conflict first and
/// then applies the chosen side.
fn cmd_resolve(choice: Choice) -> Result<i32, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let mut engine = open_engine(&config)?;

    match engine.sync_bidirectional()? {
        SyncOutcome::Conflict => {
            let outcome = engine.resolve_conflict(choice.into())?;
            match outcome {
                SyncOutcome::Conflict => {
                    println!("{} conflict left unresolved", "!".yellow());
                }
                other => print_outcome(other, &engine),
            }
            Ok(0)
        }
        outcome => {
            println!("{} no conflict to resolve (sync says: {})", "✓".green(), outcome);
            Ok(0)
        }
    }
}

fn cmd_migrate_split() -> Result<i32, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let remote = open_remote(&config)?;
    let paths = RemotePaths::new(config.github.base_path.clone());

    layout::migrate_legacy_to_split(remote.as_ref(), &paths)?;
    println!("{} remote is on the split layout", "✓".green());
    Ok(0)
}

/// Digest of the canonical document form, with the `lastSynced` marker
/// zeroed out: the Worker assigns its own stamp on import, so it is not
/// part of the comparison.
fn content_digest(data: &AppData) -> Result<String, serde_json::Error> {
    let mut canonical = data.clone();
    canonical.last_synced = None;
    let serialized = serde_json::to_vec(&canonical)?;
    let mut hasher = Sha256::new();
    hasher.update(&serialized);
    Ok(format!("{:x}", hasher.finalize()))
}

fn cmd_migrate_cloudflare() -> Result<i32, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let (owner, repo, branch, token) = config.github_required()?;
    let api_url = config
        .cloudflare_api_url()
        .ok_or("missing [cloudflare] api_url or ALMANAC_CF_API_URL")?;

    let github = GithubRemote::new(owner, repo, branch, token);
    let paths = RemotePaths::new(config.github.base_path.clone());

    println!("loading from GitHub...");
    let Some((data, _)) = layout::load_auto_detect(&github, &paths)? else {
        return Err("the GitHub remote holds no data to migrate".into());
    };
    let source_digest = content_digest(&data)?;

    println!("importing into the sync endpoint...");
    let cloudflare = CloudflareRemote::new(api_url, config.cloudflare_api_key());
    cloudflare.push(&data)?;

    println!("verifying...");
    let Some((echoed, _)) = cloudflare.pull(None)? else {
        return Err("the sync endpoint returned no data after import".into());
    };
    let echoed_digest = content_digest(&echoed)?;

    if source_digest == echoed_digest {
        println!("{} migration verified ({} tasks)", "✓".green(), data.tasks.len());
        Ok(0)
    } else {
        eprintln!("{} verification mismatch", "✗".red().bold());
        eprintln!("  source: {}", source_digest);
        eprintln!("  echoed: {}", echoed_digest);
        Ok(1)
    }
}

fn cmd_archive(dry_run: bool) -> Result<i32, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let store = LocalStore::open(config.store_path());
    let data = store.load()?;

    let bundles = archive::archive_old_data(&data, &config.archive_config(), chrono::Utc::now());
    if bundles.is_empty() {
        println!("{} nothing old enough to archive", "✓".green());
        return Ok(0);
    }

    for bundle in &bundles {
        println!(
            "  {}: {} daily records, {} tasks, {} memos",
            bundle.year.to_string().bold(),
            bundle.daily_records.len(),
            bundle.completed_tasks.len(),
            bundle.old_memos.len()
        );
    }

    if dry_run {
        println!("{} dry run; nothing written", "✓".green());
        return Ok(0);
    }

    let remote = open_remote(&config)?;
    let paths = RemotePaths::new(config.github.base_path.clone());
    let written = archive::write_archives(remote.as_ref(), &paths, &bundles);
    println!(
        "{} wrote {} of {} archive file(s)",
        "✓".green(),
        written.len(),
        bundles.len()
    );
    println!("  archived records stay in the live document until you remove them");
    Ok(0)
}

fn cmd_restore(year: i32) -> Result<i32, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let remote = open_remote(&config)?;
    let paths = RemotePaths::new(config.github.base_path.clone());

    let Some(bundle) = archive::load_archived_data(remote.as_ref(), &paths, year)? else {
        return Err(format!("no archive found for {}", year).into());
    };

    let store = LocalStore::open(config.store_path());
    let data = store.load()?;
    let restored = archive::restore_from_archive(&bundle, &data);
    store.save(&restored)?;

    println!(
        "{} restored {} record(s) from {}",
        "✓".green(),
        bundle.record_count(),
        year
    );
    Ok(0)
}
