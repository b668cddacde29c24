//! coverwatch: time-windowed site coverage lookups.
//!
//! Single-binary Tokio application that:
//! 1. Resolves monitoring groups and their sites from config
//! 2. Buckets query ranges into calendar windows
//! 3. Serves coverage from a TTL cache, refreshing entries in the background
//! 4. Falls back to stale data or "no data available" when the upstream fails

mod config;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info, warn};

use common::{AppConfig, CoverStatus, CoverageResult, TimeRange};
use coverage::payload::iso_millis;
use coverage::{
    filter_by_cover_status, CoverageService, Direction, SiteStore, StaticSiteStore,
    WindowCalculator,
};
use coverage_client::HttpCoverageClient;

/// Site coverage lookups with caching and background refresh
#[derive(Parser)]
#[command(name = "coverwatch", about = "Time-windowed site coverage lookups")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Query coverage for one group and print it as JSON.
    Coverage {
        /// Group name from the config file.
        #[arg(long)]
        group: String,

        /// Comma-separated site names (default: every site of the group).
        #[arg(long, value_delimiter = ',')]
        sites: Vec<String>,

        /// Range start, RFC 3339 (default: the group's live window).
        #[arg(long, value_parser = parse_timestamp, requires = "to")]
        from: Option<DateTime<Utc>>,

        /// Range end, RFC 3339.
        #[arg(long, value_parser = parse_timestamp, requires = "from")]
        to: Option<DateTime<Utc>>,

        /// Keep only these statuses (full, partial, empty). No data counts as empty.
        #[arg(long, value_delimiter = ',')]
        status: Vec<CoverStatus>,
    },

    /// Show the window containing a timestamp, optionally stepping from it.
    Window {
        /// Window length in seconds.
        #[arg(long)]
        length: u64,

        /// Timestamp to bucket, RFC 3339 (default: now).
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,

        /// Step back this many windows.
        #[arg(long, default_value_t = 0, conflicts_with = "next")]
        prev: u32,

        /// Step forward this many windows (never past the live window).
        #[arg(long, default_value_t = 0)]
        next: u32,
    },

    /// Poll coverage for groups periodically until Ctrl+C.
    Watch {
        /// Groups to watch (default: all configured groups).
        #[arg(long, value_delimiter = ',')]
        groups: Vec<String>,
    },
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "coverwatch=info,coverage=info,coverage_client=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    // Load configuration.
    let cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let windows = match WindowCalculator::from_timezone_name(&cfg.window.timezone) {
        Ok(w) => w,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Command::Window {
        length,
        at,
        prev,
        next,
    } = cli.command
    {
        if let Err(e) = run_window(&windows, length, at, prev, next) {
            error!("Window calculation failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let store = Arc::new(StaticSiteStore::from_config(&cfg.groups));
    let service = match build_service(&cfg, windows, Arc::clone(&store)) {
        Ok(s) => s,
        Err(e) => {
            error!("Startup error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Cache: ttl={}s refresh_at={:.0}% max_refreshes={}",
        cfg.cache.ttl_seconds,
        cfg.cache.refresh_threshold_percentage * 100.0,
        cfg.cache.max_concurrent_refreshes
    );
    info!("Upstream: {}", cfg.upstream.resolve_url());

    match cli.command {
        Command::Coverage {
            group,
            sites,
            from,
            to,
            status,
        } => {
            let range = match (from, to) {
                (Some(from), Some(to)) => Some(TimeRange::new(from, to)),
                _ => None,
            };
            if let Err(e) = run_coverage(&service, store.as_ref(), &group, sites, range, &status).await
            {
                error!("Coverage query failed: {}", e);
                std::process::exit(1);
            }
        }
        Command::Watch { groups } => {
            let groups = if groups.is_empty() {
                let mut all: Vec<String> = store.group_names().map(str::to_string).collect();
                all.sort();
                all
            } else {
                groups
            };
            if groups.is_empty() {
                error!("No groups to watch; add [[groups]] to the config file");
                std::process::exit(1);
            }
            run_watch(service, store, groups, &cfg).await;
        }
        Command::Window { .. } => {}
    }
}

fn build_service(
    cfg: &AppConfig,
    windows: WindowCalculator,
    store: Arc<StaticSiteStore>,
) -> common::Result<CoverageService> {
    let client = HttpCoverageClient::new(&cfg.upstream)?;
    CoverageService::new(
        cfg.cache.clone(),
        cfg.upstream.clone(),
        windows,
        store,
        Arc::new(client),
    )
}

async fn site_names(store: &dyn SiteStore, group: &str) -> common::Result<Vec<String>> {
    Ok(store
        .find_sites_for_group(group)
        .await?
        .into_iter()
        .map(|s| s.site_name)
        .collect())
}

async fn run_coverage(
    service: &CoverageService,
    store: &dyn SiteStore,
    group: &str,
    sites: Vec<String>,
    range: Option<TimeRange>,
    status: &[CoverStatus],
) -> common::Result<()> {
    let sites = if sites.is_empty() {
        site_names(store, group).await?
    } else {
        sites
    };
    let range = match range {
        Some(r) => r,
        None => service.live_range(group, Utc::now()).await?,
    };

    let results = service.get_coverage(group, &sites, range).await?;
    let results = filter_by_cover_status(&results, status);

    let out = json!({
        "group": group,
        "from": iso_millis(&range.from),
        "to": iso_millis(&range.to),
        "sites": results,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn run_window(
    windows: &WindowCalculator,
    length: u64,
    at: Option<DateTime<Utc>>,
    prev: u32,
    next: u32,
) -> common::Result<()> {
    let now = Utc::now();
    let mut window = windows.window_for(at.unwrap_or(now), length)?;

    let (direction, steps) = if prev > 0 {
        (Direction::Prev, prev)
    } else {
        (Direction::Next, next)
    };
    for _ in 0..steps {
        let moved = windows.navigate(window.start, direction, window.length, now)?;
        if moved == window.start {
            warn!("Already at the live window, not stepping further");
            break;
        }
        window.start = moved;
    }

    let out = json!({
        "timezone": windows.timezone().name(),
        "length_seconds": length,
        "start": iso_millis(&window.start),
        "end": iso_millis(&windows.window_end(window.start, length)?),
        "live_start": iso_millis(&windows.current_window_start(length, now)?),
        "can_navigate_next": windows.can_navigate_next(window.start, length, now)?,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn summarize(results: &[CoverageResult]) -> (usize, usize, usize, usize) {
    results.iter().fold((0, 0, 0, 0), |(full, partial, empty, none), r| {
        match r.status() {
            Some(CoverStatus::Full) => (full + 1, partial, empty, none),
            Some(CoverStatus::Partial) => (full, partial + 1, empty, none),
            Some(CoverStatus::Empty) => (full, partial, empty + 1, none),
            None => (full, partial, empty, none + 1),
        }
    })
}

async fn run_watch(
    service: CoverageService,
    store: Arc<StaticSiteStore>,
    groups: Vec<String>,
    cfg: &AppConfig,
) {
    // Task 1: Coverage polling
    let poll_service = service.clone();
    let poll_interval = Duration::from_secs(cfg.watch.interval_secs);
    let poll_handle = tokio::spawn(async move {
        loop {
            for group in &groups {
                let outcome = async {
                    let sites = site_names(store.as_ref(), group).await?;
                    let range = poll_service.live_range(group, Utc::now()).await?;
                    poll_service.get_coverage(group, &sites, range).await
                }
                .await;

                match outcome {
                    Ok(results) => {
                        let (full, partial, empty, none) = summarize(&results);
                        info!(
                            "Group {}: full={} partial={} empty={} no_data={}",
                            group, full, partial, empty, none
                        );
                    }
                    Err(e) => warn!("Coverage for group {} failed: {}", group, e),
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    });

    // Task 2: Heartbeat
    let hb_service = service.clone();
    let hb_interval = Duration::from_secs(cfg.watch.heartbeat_secs);
    let heartbeat_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(hb_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let stats = hb_service.refresh_stats();
            let queue = hb_service.refresh_queue();
            info!(
                "HEARTBEAT: cached={} in_flight={} queued={} refreshes accepted={} dedup={} ok={} failed={}",
                hb_service.cached_entries(),
                queue.in_flight_len(),
                queue.queue_depth(),
                stats.accepted,
                stats.deduplicated,
                stats.completed,
                stats.failed
            );
        }
    });

    // ── Wait for shutdown ────────────────────────────────────────────
    info!("coverwatch is running. Press Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        r = poll_handle => {
            error!("Polling task exited: {:?}", r);
        }
        r = heartbeat_handle => {
            error!("Heartbeat task exited: {:?}", r);
        }
    }

    let in_flight = service.refresh_queue().in_flight_len();
    if in_flight > 0 {
        info!("Waiting for {} in-flight refreshes...", in_flight);
        service.refresh_queue().wait_idle().await;
    }

    info!("coverwatch shut down.");
}
