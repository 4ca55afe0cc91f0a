mod eta;
mod fleet;
mod geo;
mod notify;
mod prefs;
mod proximity;
mod routes;
mod simulation;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use crate::prefs::PrefsStore;
use crate::routes::RouteTable;
use crate::simulation::{SimConfig, Simulator};

#[derive(Parser)]
#[command(name = "citybus-live")]
#[command(about = "Simulated municipal bus tracking with live ETA prediction")]
struct Args {
    /// Motion simulation tick in milliseconds
    #[arg(long, default_value_t = 1000)]
    tick_ms: u64,

    /// Simulated-time speedup over real time
    #[arg(long, default_value_t = 10.0)]
    speed_multiplier: f64,

    /// Average bus speed in km/h
    #[arg(long, default_value_t = 25.0)]
    avg_speed_kph: f64,

    /// GPS-reliability tick in milliseconds
    #[arg(long, default_value_t = 10000)]
    gps_tick_ms: u64,

    /// Per-bus probability of a GPS flip each GPS tick
    #[arg(long, default_value_t = 0.15)]
    gps_flip_probability: f64,

    /// Stop after this many seconds (runs until interrupted if omitted)
    #[arg(long)]
    run_secs: Option<u64>,

    /// Preference store location
    #[arg(long, default_value = "citybus_prefs.json")]
    prefs_path: PathBuf,

    /// Record and run a route/stop search before the simulation starts
    #[arg(long)]
    query: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()?;
    let args = Args::parse();

    let config = SimConfig {
        tick_ms: args.tick_ms,
        speed_multiplier: args.speed_multiplier,
        avg_speed_kph: args.avg_speed_kph,
        gps_tick_ms: args.gps_tick_ms,
        gps_flip_probability: args.gps_flip_probability,
        ..SimConfig::default()
    };

    let routes = Arc::new(RouteTable::mysuru());
    log::info!(
        "Loaded {} routes covering {} stops",
        routes.iter().count(),
        routes.all_stops().len()
    );

    let mut prefs = PrefsStore::open(&args.prefs_path);
    log::info!("Favorite buses: {:?}", prefs.favorites());
    if let Some(query) = &args.query {
        prefs.add_search_term(query);
        let result = routes::search(&routes, query);
        log::info!(
            "Search '{}': buses {:?}, {} matching stops",
            query,
            result.bus_ids,
            result.stops.len()
        );
        for stop in &result.stops {
            log::info!("  {} (routes {})", stop.name, stop.route_numbers.join(", "));
        }
    }

    let (tx, rx) = notify::channel();
    let banner = notify::spawn_logger(rx);
    let sim = Arc::new(Simulator::new(routes, config, tx));
    let (motion, gps) = sim.spawn();

    let demo = tokio::spawn(run_demo(sim.clone()));

    if let Some(secs) = args.run_secs {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        log::info!("Run duration elapsed, stopping simulation");
        motion.abort();
        gps.abort();
        demo.abort();
        banner.abort();
        return Ok(());
    }

    tokio::select! {
        _ = motion => log::error!("Motion simulator exited"),
        _ = gps => log::error!("GPS simulator exited"),
        _ = demo => log::error!("Demo driver exited"),
    }
    Ok(())
}

/// Scripted rider session: let the fleet run, start live tracking for a
/// while (this is what drives approaching/arrived notifications), then stop
/// and keep reporting.
async fn run_demo(sim: Arc<Simulator>) {
    tokio::time::sleep(Duration::from_secs(5)).await;
    report_fleet(&sim).await;

    sim.toggle_user_tracking().await;
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        report_fleet(&sim).await;
    }
    sim.toggle_user_tracking().await;
    log::info!("Tracking session ended, fleet reset to initial state");

    loop {
        tokio::time::sleep(Duration::from_secs(15)).await;
        report_fleet(&sim).await;
    }
}

async fn report_fleet(sim: &Simulator) {
    let state = sim.snapshot().await;
    for bus in &state.buses {
        let Some(route) = sim.routes().get(bus.id) else {
            continue;
        };
        let eta = eta::route_completion_eta(bus, route, sim.config().avg_speed_kph);
        log::info!(
            "{}: {} | {} | route done in ~{} min",
            bus.name,
            fleet::status_text(bus, route),
            if bus.gps_active {
                "GPS active"
            } else {
                "predictive mode"
            },
            eta
        );
    }

    let Some(user) = state.user_position else {
        return;
    };
    let Some(stop) = proximity::nearest_stop(user, sim.routes().all_stops()) else {
        log::info!("Rider is not near any known stop");
        return;
    };
    log::info!("Rider's nearest stop: {}", stop.name);
    let mut arrivals = vec![];
    for bus in &state.buses {
        let Some(route) = sim.routes().get(bus.id) else {
            continue;
        };
        if let Some(minutes) = eta::eta_to_stop(bus, &stop.name, route, sim.config().avg_speed_kph)
        {
            arrivals.push((minutes, routes::route_number(&bus.name).to_string()));
        }
    }
    arrivals.sort();
    for (minutes, number) in arrivals {
        log::info!("  Route {number} arriving in ~{minutes} min");
    }
}
