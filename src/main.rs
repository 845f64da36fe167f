mod logging;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use entity_pager::cache::{MemoryStore, QueryStore, Record, SortOrder, SqliteStore};
use entity_pager::config::Config;
use entity_pager::{HttpFetcher, OrgScope, PagerConfig, PaginatedCache};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "entity-pager")]
#[command(about = "Fetch and page through REST entity collections")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/entity-pager/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Organization id to scope requests to
  #[arg(short, long)]
  org: Option<String>,

  /// Entity key as configured under `entities`, e.g. users
  entity: String,

  /// Page to load
  #[arg(short, long, default_value_t = 1, conflicts_with = "pages")]
  page: u32,

  /// Inclusive page range to load, e.g. 2-5
  #[arg(long, value_parser = parse_page_range)]
  pages: Option<(u32, u32)>,

  /// Field to sort the output by (default: most recently updated first)
  #[arg(short, long)]
  sort: Option<String>,

  /// Sort direction for --sort
  #[arg(long, default_value_t = SortOrder::default())]
  order: SortOrder,

  /// Don't fetch pages missing below the highest loaded one
  #[arg(long)]
  no_gap_fill: bool,
}

fn parse_page_range(s: &str) -> Result<(u32, u32), String> {
  let (start, end) = s
    .split_once('-')
    .ok_or_else(|| format!("expected a range like 2-5, got '{}'", s))?;
  let start: u32 = start
    .trim()
    .parse()
    .map_err(|_| format!("invalid start page '{}'", start))?;
  let end: u32 = end
    .trim()
    .parse()
    .map_err(|_| format!("invalid end page '{}'", end))?;
  if start == 0 || start > end {
    return Err(format!("invalid page range {}-{}", start, end));
  }
  Ok((start, end))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(config.log_dir.as_deref())?;

  let path = config.entity_path(&args.entity)?;
  let fetcher = HttpFetcher::new(&config.api, path)?;

  let mut pager_config = config.cache.pager_config(&args.entity);
  if args.no_gap_fill {
    pager_config = pager_config.without_gap_fill();
  }

  // Command line org wins over the config file
  let scope = OrgScope::from_option(args.org.clone().or_else(|| config.org_id.clone()));
  if !scope.is_resolved() {
    return Err(eyre!(
      "No organization given. Pass --org or set org_id in the config file."
    ));
  }

  if config.cache.persist {
    let store = SqliteStore::open()?.with_cache_time(config.cache.cache_time());
    run(&args, pager_config, fetcher, Arc::new(store), scope).await
  } else {
    let store = MemoryStore::new().with_cache_time(config.cache.cache_time());
    run(&args, pager_config, fetcher, Arc::new(store), scope).await
  }
}

async fn run<S: QueryStore>(
  args: &Args,
  pager_config: PagerConfig,
  fetcher: HttpFetcher,
  store: Arc<S>,
  scope: OrgScope,
) -> Result<()> {
  let cache: PaginatedCache<Record, HttpFetcher, S> =
    PaginatedCache::builder(pager_config, fetcher, store)
      .scope(scope)
      .build();

  match args.pages {
    Some((start, end)) => {
      cache.set_page_number(start);
      cache.fetch_more_entities(start, end).await?;
    }
    None => {
      cache.set_page_number(args.page);
      cache.load_current_page().await?;
    }
  }

  let filled = cache.fill_gaps().await?;
  if !filled.is_empty() {
    info!("{}: filled gaps {:?}", args.entity, filled);
  }

  let view = match &args.sort {
    Some(property) => cache.sort_entities(property, args.order),
    None => cache.data(),
  };
  if view.is_empty() {
    warn!("{}: no entities loaded", args.entity);
  }

  let output =
    serde_json::to_string_pretty(&view).map_err(|e| eyre!("Failed to encode output: {}", e))?;
  println!("{}", output);

  let state = cache.state();
  eprintln!(
    "{}: {} shown, {} total, pages {:?} of {} loaded",
    args.entity,
    view.len(),
    state.total_items,
    state.loaded_pages,
    state.total_pages
  );

  Ok(())
}
