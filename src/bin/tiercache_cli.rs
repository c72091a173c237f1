//! tiercache CLI: 缓存后端连通性检查、命名空间查看与清理的命令行工具
//!
//! Usage:
//!   tiercache-cli ping [--config <path>]              Check the distributed tier
//!   tiercache-cli stats [--config <path>]             Show backend state and namespaces
//!   tiercache-cli get <ns> <key> [--config <path>]    Print a cached value as JSON
//!   tiercache-cli clear <ns> [--config <path>]        Drop every key of a namespace
//!   tiercache-cli namespaces [--config <path>]        List namespace settings

use anyhow::{bail, Context};
use std::path::PathBuf;
use tiercache::{CacheService, CacheSettings, HealthState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "ping" => cmd_ping(&args[2..]).await,
        "stats" => cmd_stats(&args[2..]).await,
        "get" => cmd_get(&args[2..]).await,
        "clear" => cmd_clear(&args[2..]).await,
        "namespaces" => cmd_namespaces(&args[2..]),
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"tiercache-cli: 双层缓存命令行工具

USAGE:
    tiercache-cli <COMMAND> [OPTIONS]

COMMANDS:
    ping                        Check that the distributed tier answers
    stats                       Show backend state and registered namespaces
    get <ns> <key>              Print a cached value as JSON
    clear <ns>                  Drop every key of a namespace from both tiers
    namespaces                  List namespace TTL, capacity and tier selection
    version                     Show version information
    help                        Show this help message

OPTIONS:
    --config <path>             YAML settings file

ENVIRONMENT:
    TIERCACHE_REDIS_URL         Distributed tier URL (overrides the settings file)
    RUST_LOG                    Log filter, e.g. tiercache=debug"#
    );
}

fn cmd_version() {
    println!("tiercache-cli {}", env!("CARGO_PKG_VERSION"));
}

/// Split `--config <path>` out of the argument list.
fn split_args(args: &[String]) -> anyhow::Result<(Option<PathBuf>, Vec<&str>)> {
    let mut config = None;
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter.next().context("--config requires a path")?;
            config = Some(PathBuf::from(path));
        } else {
            rest.push(arg.as_str());
        }
    }
    Ok((config, rest))
}

fn load_settings(path: Option<PathBuf>) -> anyhow::Result<CacheSettings> {
    let settings = match path {
        Some(p) => CacheSettings::from_file(&p)
            .with_context(|| format!("failed to load {}", p.display()))?
            .with_env_overrides(),
        None => CacheSettings::default().with_env_overrides(),
    };
    settings.validate()?;
    Ok(settings)
}

async fn connect(args: &[String]) -> anyhow::Result<(CacheService, Vec<&str>)> {
    let (config, rest) = split_args(args)?;
    let settings = load_settings(config)?;
    let cache = CacheService::from_settings(&settings).await?;
    Ok((cache, rest))
}

async fn cmd_ping(args: &[String]) -> anyhow::Result<()> {
    let (cache, _) = connect(args).await?;
    let stats = cache.stats();
    match (stats.backend, stats.backend_state) {
        (None, _) => bail!("no distributed tier configured (set TIERCACHE_REDIS_URL)"),
        (Some(name), HealthState::Degraded) => {
            let reason = cache
                .health()
                .snapshot(cache.backend_name())
                .last_reason
                .unwrap_or_default();
            bail!("{name} unreachable: {reason}")
        }
        (Some(name), _) => println!("{name}: PONG"),
    }
    cache.shutdown().await;
    Ok(())
}

async fn cmd_stats(args: &[String]) -> anyhow::Result<()> {
    let (cache, _) = connect(args).await?;
    let stats = cache.stats();
    println!("backend:        {}", stats.backend.unwrap_or("none (local-only)"));
    println!("backend state:  {}", stats.backend_state);
    println!("connected:      {}", stats.backend_connected);
    println!("local entries:  {}", stats.local_entries);
    println!("namespaces:     {}", stats.namespaces.join(", "));
    cache.shutdown().await;
    Ok(())
}

async fn cmd_get(args: &[String]) -> anyhow::Result<()> {
    let (cache, rest) = connect(args).await?;
    let [ns, key] = rest[..] else {
        bail!("usage: tiercache-cli get <ns> <key>");
    };
    let value: Option<serde_json::Value> = cache.get(ns, key).await;
    cache.shutdown().await;
    match value {
        Some(v) => println!("{}", serde_json::to_string_pretty(&v)?),
        None => bail!("{ns}:{key} not found"),
    }
    Ok(())
}

async fn cmd_clear(args: &[String]) -> anyhow::Result<()> {
    let (cache, rest) = connect(args).await?;
    let [ns] = rest[..] else {
        bail!("usage: tiercache-cli clear <ns>");
    };
    if cache.backend_state() == HealthState::Degraded {
        bail!("distributed tier is degraded; refusing to clear only the local tier");
    }
    let removed = cache.clear_namespace(ns).await;
    cache.shutdown().await;
    println!("removed {removed} entries from '{ns}'");
    Ok(())
}

fn cmd_namespaces(args: &[String]) -> anyhow::Result<()> {
    let (config, _) = split_args(args)?;
    let settings = load_settings(config)?;
    let registry = settings.registry();
    println!("{:<16} {:>10} {:>10}  tier", "NAMESPACE", "TTL (s)", "CAPACITY");
    for name in registry.names() {
        let cfg = registry.resolve(&name);
        let tier = if cfg.use_distributed_tier {
            "distributed+local"
        } else {
            "local"
        };
        println!(
            "{:<16} {:>10} {:>10}  {}",
            name, cfg.ttl_seconds, cfg.max_local_entries, tier
        );
    }
    let fallback = registry.fallback();
    println!(
        "{:<16} {:>10} {:>10}  (unregistered namespaces)",
        "*", fallback.ttl_seconds, fallback.max_local_entries
    );
    Ok(())
}
