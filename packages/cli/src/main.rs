#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line front end for the `SafeWalk` live report core.
//!
//! ```text
//! safewalk feed [--lat 38.9 --lon -77.03]
//! safewalk list [--type theft]
//! safewalk stats
//! safewalk nearby --lat 38.9 --lon -77.03
//! safewalk vote 1234 up
//! safewalk route --from-lat .. --from-lon .. --to-lat .. --to-lon ..
//! ```
//!
//! Configuration comes from `--config <file>` when given, otherwise from
//! `SAFEWALK_*` environment variables.

mod render;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use safewalk_backend::polling::{PollingChangeFeed, snapshot_resume_point};
use safewalk_backend::rest::RestBackend;
use safewalk_backend::route::HttpRouteClient;
use safewalk_backend::{BackendConfig, ReportSource, RouteClient};
use safewalk_geography::Coordinate;
use safewalk_realtime::RealtimeBridge;
use safewalk_report_models::{ReportId, TypeFilter, VoteDirection};
use safewalk_store::ReportStore;
use safewalk_vote::{SessionIdentity, VoteEngine};

#[derive(Parser)]
#[command(name = "safewalk", about = "Live crime report feed, votes and safer routes")]
struct Cli {
    /// Path to a TOML config file (environment variables still override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the latest reports and follow new ones until Ctrl-C
    Feed {
        /// Reference latitude for the nearby count
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        /// Reference longitude for the nearby count
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },
    /// List the latest reports, optionally of one type
    List {
        /// Crime type to show (e.g., "theft"), or "all"
        #[arg(long = "type", default_value = "all")]
        kind: TypeFilter,
    },
    /// Show aggregate counters over the latest reports
    Stats,
    /// List recent reports within 5 km of a point
    Nearby {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },
    /// Vote on a report; repeating the same vote retracts it
    Vote {
        /// Report ID
        id: i64,
        /// "up" or "down"
        direction: VoteDirection,
    },
    /// Ask the routing service for a safer walking route
    Route {
        #[arg(long, allow_hyphen_values = true)]
        from_lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        from_lon: f64,
        #[arg(long, allow_hyphen_values = true)]
        to_lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        to_lon: f64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BackendConfig::load(path)?,
        None => BackendConfig::from_env()?,
    };
    let backend = RestBackend::new(&config)?;
    let store = Arc::new(ReportStore::new());

    match cli.command {
        Commands::Feed { lat, lon } => {
            let reference = lat.zip(lon).map(|(lat, lon)| Coordinate::new(lat, lon));
            let resume = load_snapshot(&backend, &store, config.snapshot_limit).await;
            follow(&config, backend, &store, reference, resume).await?;
        }
        Commands::List { kind } => {
            load_snapshot(&backend, &store, config.snapshot_limit).await;
            let reports = store.filter_by_type(&kind);
            let now = chrono::Utc::now();

            println!("{}", render::report_header());
            for report in &reports {
                println!("{}", render::report_line(report, now, None));
            }
            println!("\n{} report(s); types: {}", reports.len(), store.categories().join(", "));
        }
        Commands::Stats => {
            load_snapshot(&backend, &store, config.snapshot_limit).await;
            let stats = store.aggregate_stats(chrono::Utc::now());
            println!("{}", render::stats_summary(&stats));
        }
        Commands::Nearby { lat, lon } => {
            load_snapshot(&backend, &store, config.snapshot_limit).await;
            let reference = Coordinate::new(lat, lon);
            let now = chrono::Utc::now();
            let reports = store.nearby_recent_default(Some(reference), now);

            println!("{}", render::report_header());
            for report in &reports {
                println!("{}", render::report_line(report, now, Some(reference)));
            }
            println!("\n{} recent report(s) nearby", reports.len());
        }
        Commands::Vote { id, direction } => {
            load_snapshot(&backend, &store, config.snapshot_limit).await;
            let identity = config
                .user_id
                .as_deref()
                .map_or_else(SessionIdentity::anonymous, SessionIdentity::signed_in);
            let engine = VoteEngine::new(store.clone(), Arc::new(backend), Arc::new(identity));
            let report_id = ReportId(id);

            if let Err(e) = engine.hydrate(&[report_id]).await {
                log::warn!("Could not load your existing vote: {e}");
            }
            let outcome = engine.cast_vote(report_id, direction).await;
            println!("{}", render::vote_outcome(&outcome));

            match store.get(report_id) {
                Some(report) => println!("Now +{}/-{}", report.upvotes, report.downvotes),
                None => println!("Report {report_id} is not among the latest reports"),
            }
        }
        Commands::Route {
            from_lat,
            from_lon,
            to_lat,
            to_lon,
        } => {
            let Some(url) = config.routing_url.clone() else {
                eprintln!("No routing service configured (set SAFEWALK_ROUTING_URL)");
                std::process::exit(1);
            };
            let client = reqwest::Client::builder()
                .timeout(config.request_timeout())
                .build()?;
            let route = HttpRouteClient::new(client, url)
                .safer_route(
                    Coordinate::new(from_lat, from_lon),
                    Coordinate::new(to_lat, to_lon),
                )
                .await?;
            println!("{}", render::route_summary(&route));
        }
    }

    Ok(())
}

/// Loads the initial snapshot. A failed fetch leaves the store empty; the
/// commands still run against whatever arrives later.
///
/// Returns the id the live feed should resume after, if the snapshot
/// provides one.
async fn load_snapshot(
    source: &dyn ReportSource,
    store: &ReportStore,
    limit: u32,
) -> Option<i64> {
    match source.fetch_reports(limit).await {
        Ok(rows) => {
            let resume = snapshot_resume_point(&rows);
            store.load_snapshot(rows);
            resume
        }
        Err(e) => {
            log::warn!("Initial fetch failed, continuing with an empty list: {e}");
            eprintln!("Warning: could not load reports ({e})");
            None
        }
    }
}

/// Follows live inserts until Ctrl-C, printing a status line every poll
/// interval.
async fn follow(
    config: &BackendConfig,
    backend: RestBackend,
    store: &Arc<ReportStore>,
    reference: Option<Coordinate>,
    resume_after: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut feed = PollingChangeFeed::new(backend, config.poll_interval());
    if let Some(id) = resume_after {
        feed = feed.resume_after(id);
    }
    let mut bridge = RealtimeBridge::new(Arc::new(feed), store.clone());
    bridge.activate().await?;
    println!("Following new reports, Ctrl-C to stop");

    let mut ticker = tokio::time::interval(config.poll_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = chrono::Utc::now();
                let mut line = render::stats_summary(&store.aggregate_stats(now));
                if let Some(reference) = reference {
                    let nearby = store.nearby_recent_default(Some(reference), now).len();
                    line.push_str(&format!(", {nearby} nearby"));
                }
                if !bridge.is_active() {
                    line.push_str(" (feed stopped)");
                }
                println!("{line}");
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    bridge.deactivate();
    let stats = bridge.stats();
    println!(
        "Stopped: {} new, {} duplicate, {} dropped",
        stats.inserted, stats.duplicates, stats.dropped
    );
    Ok(())
}
