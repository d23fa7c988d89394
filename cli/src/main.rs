//! Hangar CLI - command-line access to the dashboard backend.
//!
//! ```text
//! hangar teams
//! hangar refresh <team>
//! hangar list <kind> <team> [tenant]
//! hangar watch <instances|volumes> <team> <tenant> <id> [status...]
//! ```
//!
//! `watch` registers a poll target for one entity, prints every status
//! change and exits once the entity reached one of the given statuses (or
//! disappeared, when no status is given).

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use std::{
    env,
    fs::{self, OpenOptions},
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use hangar_config::{ConfigError, HangarConfig};
use hangar_store::{Dashboard, ResourceKind, ResourceStore, TokioTimer};
use hangar_transport::{HttpSettings, HttpTransport, Transport};
use hangar_types::{
    Entity, EntityId, InstanceStatus, Scope, TeamId, TenantId, TerminalStatuses, VolumeStatus,
};

const USAGE: &str = "\
usage:
  hangar teams
  hangar refresh <team>
  hangar list <instances|volumes|keypairs|flavors|images|volumetypes> <team> [tenant]
  hangar watch <instances|volumes> <team> <tenant> <id> [status...]";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // stdout carries command output; logs go to stderr instead.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: next to the config file, ~/.hangar/logs/hangar.log
    if let Some(config_path) = HangarConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("hangar.log"));
    }

    candidates.push(PathBuf::from(".hangar").join("logs").join("hangar.log"));

    candidates
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Instances,
    Volumes,
    KeyPairs,
    Flavors,
    Images,
    VolumeTypes,
}

impl Kind {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "instances" => Ok(Self::Instances),
            "volumes" => Ok(Self::Volumes),
            "keypairs" | "key-pairs" => Ok(Self::KeyPairs),
            "flavors" => Ok(Self::Flavors),
            "images" => Ok(Self::Images),
            "volumetypes" | "volume-types" => Ok(Self::VolumeTypes),
            other => bail!("unknown resource kind `{other}`"),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Teams,
    Refresh {
        team: TeamId,
    },
    List {
        kind: Kind,
        scope: Scope,
    },
    Watch {
        kind: Kind,
        scope: Scope,
        id: EntityId,
        statuses: Vec<String>,
    },
}

fn parse_id(raw: Option<&String>, what: &str) -> Result<u64> {
    let raw = raw.ok_or_else(|| anyhow!("missing {what}\n{USAGE}"))?;
    raw.parse()
        .with_context(|| format!("{what} must be a number, got `{raw}`"))
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let Some(name) = args.first() else {
            bail!("{USAGE}");
        };
        match name.as_str() {
            "teams" => Ok(Self::Teams),
            "refresh" => Ok(Self::Refresh {
                team: TeamId::new(parse_id(args.get(1), "team")?),
            }),
            "list" => {
                let kind = Kind::parse(args.get(1).ok_or_else(|| anyhow!("{USAGE}"))?)?;
                let team = TeamId::new(parse_id(args.get(2), "team")?);
                let scope = match args.get(3) {
                    Some(_) => Scope::tenant(team, TenantId::new(parse_id(args.get(3), "tenant")?)),
                    None => Scope::team(team),
                };
                Ok(Self::List { kind, scope })
            }
            "watch" => {
                let kind = Kind::parse(args.get(1).ok_or_else(|| anyhow!("{USAGE}"))?)?;
                if !matches!(kind, Kind::Instances | Kind::Volumes) {
                    bail!("only instances and volumes have a status to watch");
                }
                let team = TeamId::new(parse_id(args.get(2), "team")?);
                let tenant = TenantId::new(parse_id(args.get(3), "tenant")?);
                let id = args
                    .get(4)
                    .map(EntityId::new)
                    .ok_or_else(|| anyhow!("missing entity id\n{USAGE}"))?;
                Ok(Self::Watch {
                    kind,
                    scope: Scope::tenant(team, tenant),
                    id,
                    statuses: args[5..].to_vec(),
                })
            }
            "-h" | "--help" | "help" => bail!("{USAGE}"),
            other => bail!("unknown command `{other}`\n{USAGE}"),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Command failed");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &[String]) -> Result<()> {
    let command = Command::parse(args)?;

    let config = resolve_config(HangarConfig::load())?;
    let transport = HttpTransport::new(HttpSettings::from_config(&config)?)?;
    tracing::debug!(base_url = %transport.base_url(), ?command, "Starting");
    let dashboard = Dashboard::new(
        Arc::new(transport) as Arc<dyn Transport>,
        Arc::new(TokioTimer),
        config.polling.interval(),
    );

    match command {
        Command::Teams => {
            for team in dashboard.fetch_teams().await? {
                print_json(&team)?;
            }
        }
        Command::Refresh { team } => {
            dashboard.fetch_teams().await?;
            if dashboard.team(team).is_none() {
                bail!("team {team} not found");
            }
            dashboard.set_active_team(team);
            let mut failed = 0;
            for (tenant, outcome) in dashboard.fetch_all().await {
                match outcome {
                    Ok(()) => println!("tenant {tenant}: ok"),
                    Err(err) => {
                        failed += 1;
                        println!("tenant {tenant}: {err}");
                    }
                }
            }
            let selection = dashboard.selection();
            println!(
                "instances: {} ({} live), volumes: {}, key pairs: {}",
                dashboard.instances().active_view(&selection).len(),
                dashboard.instances().live_view(&selection).len(),
                dashboard.volumes().active_view(&selection).len(),
                dashboard.key_pairs().active_view(&selection).len(),
            );
            let totals = dashboard.team_totals();
            println!(
                "team totals: {} instances, {} vCPUs, {:.1} GB RAM",
                totals.instances, totals.vcpus, totals.ram_gb
            );
            if failed > 0 {
                bail!("{failed} tenant(s) could not be refreshed");
            }
        }
        Command::List { kind, scope } => match kind {
            Kind::Instances => list(dashboard.instances(), scope).await?,
            Kind::Volumes => list(dashboard.volumes(), scope).await?,
            Kind::KeyPairs => list(dashboard.key_pairs(), scope).await?,
            Kind::Flavors => list(dashboard.flavors(), scope).await?,
            Kind::Images => list(dashboard.images(), scope).await?,
            Kind::VolumeTypes => list(dashboard.volume_types(), scope).await?,
        },
        Command::Watch {
            kind,
            scope,
            id,
            statuses,
        } => match kind {
            Kind::Instances => {
                let terminal = statuses.iter().map(|s| InstanceStatus::parse(s)).collect();
                watch(dashboard.instances(), scope, &id, terminal).await?;
            }
            Kind::Volumes => {
                let terminal = statuses.iter().map(|s| VolumeStatus::parse(s)).collect();
                watch(dashboard.volumes(), scope, &id, terminal).await?;
            }
            Kind::KeyPairs | Kind::Flavors | Kind::Images | Kind::VolumeTypes => {
                bail!("only instances and volumes have a status to watch");
            }
        },
    }

    Ok(())
}

/// A missing config file means defaults; an unreadable or invalid one is an
/// error rather than a silent fallback.
fn resolve_config(loaded: Result<Option<HangarConfig>, ConfigError>) -> Result<HangarConfig> {
    let config = loaded.context("Failed to load configuration")?;
    Ok(config.unwrap_or_default())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

async fn list<K: ResourceKind>(store: &ResourceStore<K>, scope: Scope) -> Result<()> {
    for entity in store.fetch_scope(scope).await? {
        print_json(&entity.snapshot())?;
    }
    Ok(())
}

async fn watch<K: ResourceKind>(
    store: &ResourceStore<K>,
    scope: Scope,
    id: &EntityId,
    terminal: TerminalStatuses<<K::Entity as Entity>::Status>,
) -> Result<()>
where
    <K::Entity as Entity>::Status: Serialize,
{
    store.fetch_scope(scope).await?;
    let handle = store
        .by_id(id)
        .ok_or_else(|| anyhow!("{} {id} not found in {scope:?}", K::NAME))?;

    let mut last = handle.status();
    print_status(id, last.as_ref())?;

    let mut revisions = store.cache().subscribe();
    store.poller().register_target(id.clone(), terminal);

    loop {
        tokio::select! {
            () = store.poller().wait_until_idle() => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = store.by_id(id).and_then(|handle| handle.status());
                if current != last {
                    print_status(id, current.as_ref())?;
                    last = current;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                store.poller().shutdown();
                bail!("interrupted");
            }
        }
    }

    match store.by_id(id) {
        Some(handle) => {
            let current = handle.status();
            if current != last {
                print_status(id, current.as_ref())?;
            }
        }
        None => println!("{id}: gone"),
    }
    Ok(())
}

fn print_status<S: Serialize>(id: &EntityId, status: Option<&S>) -> Result<()> {
    match status {
        Some(status) => println!("{id}: {}", serde_json::to_string(status)?),
        None => println!("{id}: (no status)"),
    }
    Ok(())
}
