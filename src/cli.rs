// Command-line surface. All reconciliation logic lives in core; this layer
// parses flags, overlays profiles, and prints outcomes.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::core::diff::ChangeKind;
use crate::core::downloader::Downloader;
use crate::core::error::{UpdaterError, UpdaterResult};
use crate::core::http::{auth_token_from_env, build_http_client};
use crate::core::index::PackageIndex;
use crate::core::manifest::Mode;
use crate::core::merge;
use crate::core::profile::{self, Profile};
use crate::core::side::InstallSide;
use crate::core::state::{game_dir, ExtraModSpec, LocalState};
use crate::core::updater::{self, InitOptions, Options, UpdateOutcome};

#[derive(Parser)]
#[command(name = "packsync", version, about = "Keeps a game instance in sync with Starforge modpack releases")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging.
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Show pending changes without writing anything
    Status {
        #[arg(long, default_value = ".")]
        instance: PathBuf,
    },
    /// Initialize tracking for an existing installation
    Init {
        #[arg(long, default_value = ".")]
        instance: PathBuf,
        /// Install side: client or server
        #[arg(long)]
        side: String,
        /// Installed pack version; defaults to the manifest's current one
        #[arg(long, default_value = "")]
        config_version: String,
        /// Release channel: daily or experimental; inferred when omitted
        #[arg(long, default_value = "")]
        mode: String,
    },
    /// Bring the instance up to date with the manifest
    Update(UpdateArgs),
    /// Update several profiles sequentially, fetching remote data once
    UpdateAll {
        #[arg(required = true)]
        profiles: Vec<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
    },
    /// Manage mods excluded from the manifest
    Exclude {
        #[arg(long, default_value = ".", global = true)]
        instance: PathBuf,
        #[command(subcommand)]
        action: ListAction,
    },
    /// Manage extra mods outside the manifest
    Extra {
        #[arg(long, default_value = ".", global = true)]
        instance: PathBuf,
        #[command(subcommand)]
        action: ExtraAction,
    },
    /// Manage saved option profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Inspect tracked configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, clap::Args)]
struct UpdateArgs {
    #[arg(long, default_value = ".")]
    instance: PathBuf,
    /// Load defaults from a saved profile
    #[arg(long)]
    profile: Option<String>,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    force: bool,
    /// Override manifest pins with the newest available versions
    #[arg(long)]
    latest: bool,
    /// Parallel downloads (0 = default)
    #[arg(long, default_value_t = 0)]
    concurrency: usize,
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    #[arg(long)]
    no_cache: bool,
}

#[derive(Subcommand)]
enum ListAction {
    /// Add a mod name
    Add { name: String },
    /// Remove a mod name
    Remove { name: String },
    /// List current entries
    List,
}

#[derive(Subcommand)]
enum ExtraAction {
    /// Add or replace an extra mod
    Add {
        name: String,
        /// Pinned version; empty means latest at resolve time
        #[arg(long, default_value = "")]
        version: String,
        /// Empty, upstream:<owner>/<repo>, or a direct URL
        #[arg(long, default_value = "")]
        source: String,
        /// CLIENT, SERVER or BOTH; defaults to BOTH
        #[arg(long, default_value = "")]
        side: String,
    },
    Remove {
        name: String,
    },
    List,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Save the given options under a name
    Save {
        name: String,
        #[arg(long)]
        instance: Option<String>,
        #[arg(long)]
        side: Option<String>,
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        latest: Option<bool>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        cache_dir: Option<String>,
        #[arg(long)]
        no_cache: Option<bool>,
    },
    List,
    /// Print a saved profile
    Show {
        name: String,
    },
    Delete {
        name: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Diff tracked files against the last-update baseline
    Inspect {
        #[arg(long, default_value = ".")]
        instance: PathBuf,
        #[arg(long)]
        all: bool,
    },
    /// Unified diff of one file against the tracked pack version
    Diff {
        #[arg(long, default_value = ".")]
        instance: PathBuf,
        /// File path, either config/<rest> or relative to config/
        path: String,
    },
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "packsync=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, draining in-flight work");
            ctrl_c_cancel.cancel();
        }
    });

    match dispatch(cli.command, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Command, cancel: &CancellationToken) -> UpdaterResult<()> {
    let client = build_http_client()?;
    let auth_token = auth_token_from_env();

    match command {
        Command::Status { instance } => {
            let outcome = updater::status(&client, &instance, auth_token.as_deref()).await?;
            println!("Mode:      {}", outcome.mode);
            println!("Current:   {}", outcome.current_version);
            println!("Latest:    {}", outcome.latest_version);
            println!("Updated:   {}", outcome.last_updated);
            if outcome.up_to_date {
                println!("\nAlready up to date.");
                return Ok(());
            }

            let s = outcome.summary;
            println!("\nChanges available:");
            println!(
                "  {} added, {} removed, {} updated, {} unchanged",
                s.added, s.removed, s.updated, s.unchanged
            );
            if outcome.current_version != outcome.latest_version {
                println!("  Config: {} -> {}", outcome.current_version, outcome.latest_version);
            }
            if !outcome.excluded.is_empty() {
                println!("  Excluding: {}", outcome.excluded.join(", "));
            }
            if !outcome.extras.is_empty() {
                println!("  Extra mods: {}", outcome.extras.join(", "));
            }
            Ok(())
        }

        Command::Init {
            instance,
            side,
            config_version,
            mode,
        } => {
            let side = InstallSide::parse(&side).ok_or_else(|| {
                UpdaterError::Other("side must be 'client' or 'server'".to_string())
            })?;
            let outcome = updater::init(
                &client,
                &InitOptions {
                    instance_dir: instance,
                    side,
                    config_version,
                    mode,
                    auth_token,
                },
                cancel,
            )
            .await?;

            println!("\nInitialized: detected {} mods", outcome.mods);
            println!("  Config version: {}", outcome.config_version);
            if !outcome.unmatched.is_empty() {
                println!(
                    "  {} jars not recognized (user-added or unknown):",
                    outcome.unmatched.len()
                );
                for f in &outcome.unmatched {
                    println!("    - {f}");
                }
            }
            if outcome.excluded_preserved > 0 {
                println!("  {} excluded mod(s) preserved", outcome.excluded_preserved);
            }
            if outcome.extras_preserved > 0 {
                println!("  {} extra mod(s) preserved", outcome.extras_preserved);
            }
            println!("\nRun 'update' to bring the instance up to date.");
            Ok(())
        }

        Command::Update(args) => {
            let opts = build_update_options(&args, auth_token)?;
            let outcome = updater::update(&client, &opts, None, cancel).await?;
            print_update_outcome(&outcome, opts.dry_run);
            Ok(())
        }

        Command::UpdateAll {
            profiles,
            dry_run,
            force,
        } => {
            println!("Fetching manifest and package index (shared)...");
            // Profiles on the same channel share one fetch; others refetch.
            let shared = updater::fetch_shared_data(&client, Mode::Daily).await?;

            let mut first_err: Option<UpdaterError> = None;
            for name in &profiles {
                println!("\n=== {name} ===");
                let result = async {
                    let p = profile::load(name)?;
                    let instance = p.instance_dir.clone().ok_or_else(|| {
                        UpdaterError::Other(format!("profile {name:?} has no instance-dir set"))
                    })?;
                    let opts = Options {
                        instance_dir: PathBuf::from(instance),
                        dry_run,
                        force,
                        latest: p.latest.unwrap_or(false),
                        concurrency: p.concurrency.unwrap_or(0),
                        auth_token: auth_token.clone(),
                        cache_dir: p.cache_dir.as_ref().map(PathBuf::from),
                        no_cache: p.no_cache.unwrap_or(false),
                    };
                    let outcome = updater::update(&client, &opts, Some(&shared), cancel).await?;
                    print_update_outcome(&outcome, dry_run);
                    Ok::<_, UpdaterError>(())
                }
                .await;

                if let Err(e) = result {
                    eprintln!("  {name}: {e}");
                    first_err.get_or_insert(e);
                }
            }
            match first_err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        Command::Exclude { instance, action } => {
            let mut state = LocalState::load(&instance).await?;
            match action {
                ListAction::Add { name } => {
                    if !state.exclude_mods.contains(&name) {
                        state.exclude_mods.push(name.clone());
                        state.exclude_mods.sort();
                        state.save(&instance).await?;
                        println!("Excluded {name}");
                    }
                }
                ListAction::Remove { name } => {
                    let before = state.exclude_mods.len();
                    state.exclude_mods.retain(|m| m != &name);
                    if state.exclude_mods.len() != before {
                        state.save(&instance).await?;
                        println!("No longer excluding {name}");
                    }
                }
                ListAction::List => {
                    for name in &state.exclude_mods {
                        println!("{name}");
                    }
                }
            }
            Ok(())
        }

        Command::Extra { instance, action } => {
            let mut state = LocalState::load(&instance).await?;
            match action {
                ExtraAction::Add {
                    name,
                    version,
                    source,
                    side,
                } => {
                    state.extra_mods.insert(
                        name.clone(),
                        ExtraModSpec {
                            version,
                            source,
                            side,
                        },
                    );
                    state.save(&instance).await?;
                    println!("Added extra mod {name}");
                }
                ExtraAction::Remove { name } => {
                    if state.extra_mods.remove(&name).is_some() {
                        state.save(&instance).await?;
                        println!("Removed extra mod {name}");
                    }
                }
                ExtraAction::List => {
                    for (name, spec) in &state.extra_mods {
                        let version = if spec.version.is_empty() { "latest" } else { spec.version.as_str() };
                        let source = if spec.source.is_empty() { "index" } else { spec.source.as_str() };
                        println!("{name}  version={version}  source={source}");
                    }
                }
            }
            Ok(())
        }

        Command::Profile { action } => {
            match action {
                ProfileAction::Save {
                    name,
                    instance,
                    side,
                    mode,
                    latest,
                    concurrency,
                    cache_dir,
                    no_cache,
                } => {
                    profile::save(
                        &name,
                        &Profile {
                            instance_dir: instance,
                            side,
                            mode,
                            concurrency,
                            latest,
                            cache_dir,
                            no_cache,
                        },
                    )?;
                    println!("Saved profile {name}");
                }
                ProfileAction::List => {
                    for name in profile::list()? {
                        println!("{name}");
                    }
                }
                ProfileAction::Show { name } => {
                    let p = profile::load(&name)?;
                    let rendered = toml::to_string(&p).map_err(|e| {
                        UpdaterError::Other(format!("encoding profile {name:?}: {e}"))
                    })?;
                    print!("{rendered}");
                }
                ProfileAction::Delete { name } => {
                    profile::delete(&name)?;
                    println!("Deleted profile {name}");
                }
            }
            Ok(())
        }

        Command::Config { action } => match action {
            ConfigAction::Inspect { instance, all } => {
                let state = LocalState::load(&instance).await?;
                let game_dir = game_dir(&instance);
                let diffs = merge::diff_config_files(&game_dir, &state.config_hashes, all)?;
                for d in &diffs {
                    println!("{:<9} {}", d.status.as_str(), d.path);
                }
                if diffs.is_empty() {
                    println!("No tracked file changes.");
                }
                Ok(())
            }
            ConfigAction::Diff { instance, path } => {
                let state = LocalState::load(&instance).await?;
                let game_dir = game_dir(&instance);
                let index = PackageIndex::fetch(&client).await?;
                let downloader = Downloader::new(client.clone()).with_auth_token(auth_token);

                let outcome = merge::diff_file_against_pack(
                    &downloader,
                    &game_dir,
                    &index,
                    &state.config_version,
                    &path,
                    cancel,
                )
                .await?;

                println!("{:<9} {}", outcome.status.as_str(), outcome.resolved_path);
                if outcome.diff.is_empty() {
                    println!("No differences against pack version {}.", state.config_version);
                } else {
                    print!("{}", outcome.diff);
                }
                Ok(())
            }
        },
    }
}

fn build_update_options(args: &UpdateArgs, auth_token: Option<String>) -> UpdaterResult<Options> {
    let mut opts = Options {
        instance_dir: args.instance.clone(),
        dry_run: args.dry_run,
        force: args.force,
        latest: args.latest,
        concurrency: args.concurrency,
        auth_token,
        cache_dir: args.cache_dir.clone(),
        no_cache: args.no_cache,
    };

    // Profile values fill in anything the flags left at defaults.
    if let Some(name) = &args.profile {
        let p = profile::load(name)?;
        if let Some(instance) = p.instance_dir {
            opts.instance_dir = PathBuf::from(instance);
        }
        if !args.latest {
            opts.latest = p.latest.unwrap_or(false);
        }
        if args.concurrency == 0 {
            opts.concurrency = p.concurrency.unwrap_or(0);
        }
        if args.cache_dir.is_none() {
            opts.cache_dir = p.cache_dir.map(PathBuf::from);
        }
        if !args.no_cache {
            opts.no_cache = p.no_cache.unwrap_or(false);
        }
    }
    Ok(opts)
}

fn print_update_outcome(outcome: &UpdateOutcome, dry_run: bool) {
    let s = outcome.summary;
    if outcome.up_to_date {
        return;
    }

    if dry_run {
        println!("\nDry run - no changes made:");
        println!(
            "  {} would be added, {} removed, {} updated, {} unchanged",
            s.added, s.removed, s.updated, s.unchanged
        );
        for c in &outcome.changes {
            match c.kind {
                ChangeKind::Added => println!("  + {} {}", c.name, c.new_version),
                ChangeKind::Removed => println!("  - {} {}", c.name, c.old_version),
                ChangeKind::Updated => {
                    println!("  ~ {} {} -> {}", c.name, c.old_version, c.new_version)
                }
                ChangeKind::Unchanged => {}
            }
        }
        return;
    }

    println!(
        "\nDone: {} added, {} removed, {} updated, {} unchanged",
        s.added, s.removed, s.updated, s.unchanged
    );
    if outcome.old_version != outcome.new_version {
        println!("  Config: {} -> {}", outcome.old_version, outcome.new_version);
    }
    if outcome.config_merged > 0 || outcome.config_conflict > 0 {
        println!(
            "  Config files: {} updated/merged, {} conflicts",
            outcome.config_merged, outcome.config_conflict
        );
        for f in &outcome.conflict_files {
            println!("    ! {f} (pack version saved as {f}.packnew)");
        }
    }
}
