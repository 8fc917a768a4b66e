//! medialease - store inspector
//!
//! Lists stored media, stages export copies and dumps the handle table
//! for a directory-backed store.

use anyhow::{bail, Context, Result};
use medialease_core::{ContentId, ResourceConfig};
use medialease_handles::MemoryPlatform;
use medialease_media::MediaResources;
use medialease_store::DirectoryStore;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const USAGE: &str =
    "usage: medialease <store-dir> [scan | import <file> | stage <id> | remove <id> | snapshot | clear-staged]";

enum Command {
    Scan,
    Import(PathBuf),
    Stage(ContentId),
    Remove(ContentId),
    Snapshot,
    ClearStaged,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<(PathBuf, Command)> {
    let root = args.next().map(PathBuf::from).context(USAGE)?;
    let command = match args.next().as_deref() {
        None | Some("scan") => Command::Scan,
        Some("import") => Command::Import(args.next().map(PathBuf::from).context(USAGE)?),
        Some("stage") => {
            let id = args.next().context(USAGE)?;
            Command::Stage(id.parse().with_context(|| format!("invalid media id: {id}"))?)
        }
        Some("remove") => {
            let id = args.next().context(USAGE)?;
            Command::Remove(id.parse().with_context(|| format!("invalid media id: {id}"))?)
        }
        Some("snapshot") => Command::Snapshot,
        Some("clear-staged") => Command::ClearStaged,
        Some(other) => bail!("unknown command '{other}'\n{USAGE}"),
    };
    Ok((root, command))
}

fn load_config() -> Result<ResourceConfig> {
    match std::env::var_os("MEDIALEASE_CONFIG") {
        Some(path) => ResourceConfig::from_json_file(&path)
            .with_context(|| format!("loading config from {}", PathBuf::from(&path).display())),
        None => Ok(ResourceConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs on stderr, JSON output on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (root, command) = parse_args(std::env::args().skip(1))?;
    let config = load_config()?;

    let store = Arc::new(DirectoryStore::open(&root).await?);
    let resources = MediaResources::new(config, store.clone(), Arc::new(MemoryPlatform::new()))?;
    info!(store = %root.display(), "medialease inspector starting");

    let output = match command {
        Command::Scan => {
            let items = resources.loader().scan_library().await?;
            let flagged: Vec<_> = items.iter().filter(|m| m.needs_attention()).collect();
            json!({ "items": items, "needs_attention": flagged })
        }
        Command::Import(path) => {
            let id = store.import_file(&path).await?;
            json!({ "id": id })
        }
        Command::Stage(id) => {
            let source = resources.loader().load_source(id).await?;
            let path = resources.resolve_path(&source).await?;
            json!({ "id": id, "path": path })
        }
        Command::Remove(id) => {
            resources.remove_media(id).await?;
            json!({ "removed": id })
        }
        Command::Snapshot => {
            let loader = resources.loader();
            for meta in loader.scan_library().await? {
                if meta.needs_attention() {
                    continue;
                }
                loader.open(meta.id, "inspector").await?;
            }
            json!({
                "entries": resources.debug_snapshot(),
                "stats": resources.stats(),
            })
        }
        Command::ClearStaged => {
            let removed = resources.exports().clear_staged().await?;
            json!({ "removed": removed })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    resources.shutdown();
    Ok(())
}
