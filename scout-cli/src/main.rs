mod commands;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use scout_core::constants::{DEFAULT_STEP_SIZE_DEG, DEFAULT_TELEPORT_FACTOR};
use scout_core::spiral::SpiralParams;
use scout_core::{LatLon, RouteOptions};

use crate::commands::{
    classify_histories, clock_now, evaluate_point, format_clock, load_geofences, parse_point,
    plan_route, read_candidates, read_histories, spiral_path,
};

#[derive(Parser, Debug)]
#[command(name = "scout-cli")]
#[command(about = "Offline tooling for spawn inference, geofences and scan routes")]
struct Cli {
    /// Print JSON instead of key=value lines
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay sighting histories through spawn classification
    Classify {
        #[arg(long)]
        history: PathBuf,
        /// Treat the owning cell as fully band-scanned
        #[arg(long, default_value_t = false)]
        cell_done: bool,
        /// Unix time to evaluate at (defaults to each entity's last sighting)
        #[arg(long)]
        now: Option<i64>,
        #[arg(long, default_value_t = 0)]
        spawn_delay_secs: i64,
        /// Worker threads (defaults to one per core)
        #[arg(long)]
        jobs: Option<usize>,
    },
    /// Check a point against inclusion and exclusion geofences
    Geofence {
        #[arg(long)]
        include: PathBuf,
        #[arg(long)]
        exclude: Option<PathBuf>,
        /// <lat,lon>
        #[arg(long, allow_hyphen_values = true)]
        point: String,
        /// Comma separated geofence names to restrict inclusion to
        #[arg(long)]
        name: Option<String>,
    },
    /// Preview the exploration spiral around a centre
    Spiral {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, default_value_t = 24)]
        steps: usize,
        #[arg(long, default_value_t = DEFAULT_STEP_SIZE_DEG)]
        step_size: f64,
        /// 0 means unlimited
        #[arg(long, default_value_t = 0.0)]
        max_radius_km: f64,
    },
    /// Build a nearest-neighbour tour over candidate targets
    Route {
        #[arg(long)]
        candidates: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long)]
        max_points: Option<usize>,
        #[arg(long, default_value_t = 0.0)]
        min_separation_m: f64,
        #[arg(long, default_value_t = false)]
        oldest_first: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { json, command } = Cli::parse();

    match command {
        Commands::Classify {
            history,
            cell_done,
            now,
            spawn_delay_secs,
            jobs,
        } => {
            let histories = read_histories(&history)?;
            tracing::info!(
                entities = histories.len(),
                cell_done,
                "replaying sighting histories"
            );
            let classified = if let Some(jobs) = jobs {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(jobs)
                    .build()
                    .context("failed to build rayon threadpool")?;
                pool.install(|| classify_histories(&histories, cell_done, now, spawn_delay_secs))
            } else {
                classify_histories(&histories, cell_done, now, spawn_delay_secs)
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&classified)?);
            } else {
                if let Some(now) = now {
                    println!("now={}", clock_now(now));
                }
                for entity in &classified {
                    println!(
                        "{:24} kind={} links={} seen={} unseen={} tth_found={} window={}-{}{}",
                        entity.id,
                        entity.kind,
                        entity.links,
                        format_clock(entity.latest_seen),
                        format_clock(entity.earliest_unseen),
                        entity.tth_found,
                        format_clock(entity.predicted_start),
                        format_clock(entity.predicted_end),
                        if entity.double_window { " double_window" } else { "" },
                    );
                }
            }
        }
        Commands::Geofence {
            include,
            exclude,
            point,
            name,
        } => {
            let set = load_geofences(&include, exclude.as_deref())?;
            let point = parse_point(&point)?;
            let verdict = evaluate_point(&set, point, name.as_deref());

            if json {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else {
                println!("point={},{}", verdict.point.lat, verdict.point.lon);
                println!("allowed={}", verdict.allowed);
                println!("inside_included={}", verdict.inside_included.join(","));
                println!("inside_excluded={}", verdict.inside_excluded.join(","));
                if let Some(bbox) = set.boundary(name.as_deref()) {
                    println!(
                        "boundary={},{} {},{}",
                        bbox.min_lat, bbox.min_lon, bbox.max_lat, bbox.max_lon
                    );
                }
            }
        }
        Commands::Spiral {
            lat,
            lon,
            steps,
            step_size,
            max_radius_km,
        } => {
            if !(step_size.is_finite() && step_size > 0.0) {
                return Err(anyhow!("step size must be a positive number, got {step_size}"));
            }
            let params = SpiralParams {
                step_size_deg: step_size,
                teleport_factor: DEFAULT_TELEPORT_FACTOR,
                max_radius_km,
            };
            let path = spiral_path(LatLon::new(lat, lon), steps, &params);

            if json {
                println!("{}", serde_json::to_string_pretty(&path)?);
            } else {
                for (index, point) in path.iter().enumerate() {
                    println!("{:4} {},{}", index + 1, point.lat, point.lon);
                }
            }
        }
        Commands::Route {
            candidates,
            lat,
            lon,
            max_points,
            min_separation_m,
            oldest_first,
        } => {
            let candidates = read_candidates(&candidates)?;
            let pool = candidates.len();
            let options = RouteOptions {
                max_points,
                min_separation_m,
                oldest_first,
            };
            let stops = plan_route(LatLon::new(lat, lon), candidates, &options);
            tracing::info!(candidates = pool, stops = stops.len(), "route planned");

            if json {
                println!("{}", serde_json::to_string_pretty(&stops)?);
            } else {
                let total_m: f64 = stops.iter().map(|stop| stop.leg_m).sum();
                for (index, stop) in stops.iter().enumerate() {
                    println!(
                        "{:4} {:24} {},{} leg={:.0}m",
                        index + 1,
                        stop.id.as_deref().unwrap_or("-"),
                        stop.location.lat,
                        stop.location.lon,
                        stop.leg_m,
                    );
                }
                println!("stops={} total={:.0}m", stops.len(), total_m);
            }
        }
    }

    Ok(())
}
