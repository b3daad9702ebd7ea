//! Content Hub command line
//!
//! Resolves ancestors, visibility and cache state for items of a collection
//! hierarchy loaded from a JSON file.

use anyhow::Result;
use clap::{Parser, Subcommand};
use content_hub_core::{
    cache::{KeyValueStore, MemoryKeyValueStore, RedisKeyValueStore},
    permissions::PublicVisibility,
    AncestorResolver, HubConfig, ItemId, MemoryCollectionStore, RequestScopedAncestorCache,
    StoreParentSource, TieredAncestorCache,
};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "content-hub")]
#[command(about = "Ancestor resolution and visibility for collection hierarchies")]
struct Cli {
    /// JSON array of collections
    #[arg(short, long, global = true, default_value = "collections.json")]
    tree: PathBuf,

    /// JSON config file; the environment is used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the ancestors of one or more items
    Ancestors {
        #[arg(required = true)]
        ids: Vec<ItemId>,

        /// Skip hidden collections, linking through to their parents
        #[arg(long)]
        exclude_hidden: bool,
    },

    /// Whether every path from an item to a root crosses a hidden collection
    Hidden { id: ItemId },

    /// Decide public-but-not-advertised visibility of an item
    Visible {
        id: ItemId,

        /// Ids the caller can read directly
        #[arg(long, value_delimiter = ',')]
        read: Vec<ItemId>,

        /// Ids readable through public grants
        #[arg(long, value_delimiter = ',')]
        public: Vec<ItemId>,

        /// The item itself is not shown in overviews
        #[arg(long)]
        not_advertised: bool,
    },

    /// Evict an item from the ancestor caches
    Flush { id: ItemId },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HubConfig::load(path)?,
        None => HubConfig::from_env()?,
    };

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let resolver = build_resolver(&cli.tree, &config).await?;

    match cli.command {
        Commands::Ancestors { ids, exclude_hidden } => {
            let ancestors = resolver.document_ancestors(&ids, exclude_hidden).await?;
            println!("{}", serde_json::to_string_pretty(&ancestors)?);
        }
        Commands::Hidden { id } => {
            let hidden = resolver.is_hidden_in_ancestors(&id).await?;
            println!("{}", json!({ "id": id, "hiddenInAncestors": hidden }));
        }
        Commands::Visible {
            id,
            read,
            public,
            not_advertised,
        } => {
            let ancestors = resolver.get_ancestors(&[id.clone()]).await?;
            let visibility = PublicVisibility::new(
                read.into_iter().collect::<HashSet<_>>(),
                public.into_iter().collect::<HashSet<_>>(),
            );
            let visible = visibility.is_visible(&id, !not_advertised, &ancestors);
            println!("{}", json!({ "id": id, "visible": visible }));
        }
        Commands::Flush { id } => {
            resolver.flush_cache(&id).await?;
            info!("Flushed cached ancestors of {}", id);
        }
        Commands::Config => {}
    }

    Ok(())
}

async fn build_resolver(tree: &Path, config: &HubConfig) -> Result<AncestorResolver> {
    let store = Arc::new(MemoryCollectionStore::load(tree)?);
    let source = Arc::new(StoreParentSource::new(store));

    let persistent: Arc<dyn KeyValueStore> = match &config.cache.redis_url {
        Some(url) => Arc::new(RedisKeyValueStore::connect(url).await?),
        None => {
            info!("No REDIS_URL configured, using an in-process ancestor cache");
            Arc::new(MemoryKeyValueStore::new())
        }
    };
    let tiered = Arc::new(
        TieredAncestorCache::new(source, persistent).with_key_prefix(config.cache.key_prefix.clone()),
    );
    let scoped = Arc::new(RequestScopedAncestorCache::new(tiered));
    Ok(AncestorResolver::new(scoped))
}
