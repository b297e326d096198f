use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use lantern_cache::{connect_or_noop, NoopResolutionCache, ResolutionCache, SqliteResolutionCache};
use lantern_core::{ResourceDescriptor, ResourceKind};
use lantern_resolver::{BackendConfig, BatchResolver, HttpResolverBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Resolve external video-platform ids to decentralized locators.
#[derive(Debug, Parser)]
#[command(name = "lantern", version, about)]
struct Args {
    /// Resolver backend to query (odysee, finder).
    #[arg(long, default_value = "odysee")]
    backend: String,

    /// Resource kind of the ids.
    #[arg(long, value_enum, default_value_t = KindArg::Video)]
    kind: KindArg,

    /// Durable cache location.
    #[arg(long, default_value = "lantern-cache.db")]
    cache_path: PathBuf,

    /// Skip the durable cache for this invocation.
    #[arg(long)]
    no_cache: bool,

    /// Drop every cached resolution and exit.
    #[arg(long)]
    clear_cache: bool,

    /// External ids to resolve.
    ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Video,
    Channel,
}

impl From<KindArg> for ResourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Video => ResourceKind::Video,
            KindArg::Channel => ResourceKind::Channel,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if args.clear_cache {
        let cache = SqliteResolutionCache::connect(&args.cache_path).await?;
        cache.clear_all().await?;
        println!("cache cleared");
        return Ok(());
    }

    if args.ids.is_empty() {
        bail!("no ids to resolve");
    }

    let config = BackendConfig::by_name(&args.backend)?;
    let backend = HttpResolverBackend::new(config)?;
    let cache: Arc<dyn ResolutionCache> = if args.no_cache {
        Arc::new(NoopResolutionCache)
    } else {
        connect_or_noop(&args.cache_path).await
    };
    let resolver = BatchResolver::new(Arc::new(backend), cache);

    let kind = ResourceKind::from(args.kind);
    let descriptors: Vec<ResourceDescriptor> = args
        .ids
        .iter()
        .map(|id| ResourceDescriptor::new(id, kind))
        .collect();

    let results = resolver
        .resolve_with_progress(&descriptors, |fraction| {
            debug!(fraction, "resolution progress");
        })
        .await;

    for descriptor in &descriptors {
        match results.get(&descriptor.id) {
            Some(resolved) => println!("{}\t{}", descriptor.id, resolved.locator),
            None => println!("{}\t-", descriptor.id),
        }
    }

    Ok(())
}
