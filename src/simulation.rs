use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::eta::{self, StopSchedule};
use crate::fleet::{initial_fleet, Bus};
use crate::geo::{haversine_distance, LatLng};
use crate::notify::{Notification, NotificationSender};
use crate::proximity::ProximityWatcher;
use crate::routes::{BusId, RouteTable};

/// Minutes added per operator delay command.
pub const DELAY_INCREMENT_MIN: i64 = 5;

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Motion tick length.
    pub tick_ms: u64,
    pub avg_speed_kph: f64,
    /// How much faster than real time the simulation runs.
    pub speed_multiplier: f64,
    /// Dwell applied when a bus reaches a stop.
    pub dwell_ms: i64,
    /// GPS-reliability tick length.
    pub gps_tick_ms: u64,
    /// Probability per GPS tick that a bus flips its GPS flag.
    pub gps_flip_probability: f64,
    /// How long a manual GPS toggle suppresses the automatic simulator.
    pub manual_override_ms: i64,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            tick_ms: 1000,
            avg_speed_kph: 25.0,
            speed_multiplier: 10.0,
            dwell_ms: 5000,
            gps_tick_ms: 10_000,
            gps_flip_probability: 0.15,
            manual_override_ms: 30_000,
        }
    }
}

/// Advance the whole fleet by one motion tick. Pure: the previous collection
/// is read, a fully-updated replacement is returned.
pub fn advance_fleet(buses: &[Bus], routes: &RouteTable, config: &SimConfig) -> Vec<Bus> {
    buses
        .iter()
        .map(|bus| match routes.get(bus.id) {
            Some(route) => advance_bus(bus, route, config),
            None => bus.clone(),
        })
        .collect()
}

fn advance_bus(bus: &Bus, route: &[crate::routes::Stop], config: &SimConfig) -> Bus {
    // Degenerate route: leave the bus static.
    if route.len() < 2 {
        return bus.clone();
    }
    let mut next = bus.clone();

    if bus.dwell_remaining_ms > 0 {
        let remaining = bus.dwell_remaining_ms - config.tick_ms as i64;
        if remaining <= 0 {
            // Dwell over: move onto the next segment, wrapping to the origin
            // when the last stop is reached so buses run indefinitely.
            let mut index = bus.route_index + 1;
            if index >= route.len() - 1 {
                index = 0;
            }
            next.route_index = index;
            next.progress = 0.0;
            next.dwell_remaining_ms = 0;
        } else {
            next.dwell_remaining_ms = remaining;
        }
        return next;
    }

    let start = route[bus.route_index.min(route.len() - 1)].position;
    let Some(end_stop) = route.get(bus.route_index + 1) else {
        // Out-of-segment index: put the bus back at the route origin.
        next.route_index = 0;
        next.progress = 0.0;
        next.position = start;
        return next;
    };
    let end = end_stop.position;
    let segment_km = haversine_distance(start, end);
    let travel_km = (config.avg_speed_kph / 3600.0)
        * (config.tick_ms as f64 / 1000.0)
        * config.speed_multiplier;
    // A zero-length segment is traversed instantaneously.
    let increment = if segment_km > 0.0 {
        travel_km / segment_km
    } else {
        1.0
    };
    let progress = bus.progress + increment;

    if progress >= 1.0 {
        next.progress = 1.0;
        next.position = end;
        next.dwell_remaining_ms = config.dwell_ms;
    } else {
        next.progress = progress;
        next.position = interpolate(start, end, progress);
    }
    next
}

fn interpolate(start: LatLng, end: LatLng, progress: f64) -> LatLng {
    LatLng {
        lat: start.lat + (end.lat - start.lat) * progress,
        lng: start.lng + (end.lng - start.lng) * progress,
    }
}

/// One GPS-reliability tick: every bus outside the manual-override window
/// flips its GPS flag with the configured probability.
pub fn gps_sweep<R: Rng>(
    buses: &mut [Bus],
    config: &SimConfig,
    now: DateTime<Utc>,
    rng: &mut R,
) {
    let window = chrono::Duration::milliseconds(config.manual_override_ms);
    let probability = config.gps_flip_probability.clamp(0.0, 1.0);
    for bus in buses {
        let manually_overridden = bus
            .last_manual_toggle
            .map(|t| now.signed_duration_since(t) < window)
            .unwrap_or(false);
        if manually_overridden {
            continue;
        }
        if rng.gen_bool(probability) {
            bus.gps_active = !bus.gps_active;
        }
    }
}

/// Everything the two timers mutate, replaced wholesale under one lock per
/// tick so readers only ever observe complete states.
#[derive(Debug, Clone)]
pub struct FleetState {
    pub buses: Vec<Bus>,
    pub user_position: Option<LatLng>,
    pub tracking: bool,
}

/// Owns the fleet and the two periodic simulators; all commands and queries
/// go through here.
pub struct Simulator {
    state: Arc<RwLock<FleetState>>,
    routes: Arc<RouteTable>,
    config: SimConfig,
    watcher: Arc<Mutex<ProximityWatcher>>,
    notifier: NotificationSender,
}

impl Simulator {
    pub fn new(routes: Arc<RouteTable>, config: SimConfig, notifier: NotificationSender) -> Self {
        let state = FleetState {
            buses: initial_fleet(&routes),
            user_position: None,
            tracking: false,
        };
        Simulator {
            state: Arc::new(RwLock::new(state)),
            routes,
            config,
            watcher: Arc::new(Mutex::new(ProximityWatcher::new())),
            notifier,
        }
    }

    /// Spawn the motion and GPS timer tasks. Dropping the handles (or
    /// aborting them) stops the timers; ticks are never interrupted mid-way.
    pub fn spawn(&self) -> (JoinHandle<()>, JoinHandle<()>) {
        let motion = {
            let state = self.state.clone();
            let routes = self.routes.clone();
            let config = self.config.clone();
            let watcher = self.watcher.clone();
            let notifier = self.notifier.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_millis(config.tick_ms));
                loop {
                    interval.tick().await;
                    let fired = {
                        let mut state = state.write().await;
                        let advanced = advance_fleet(&state.buses, &routes, &config);
                        state.buses = advanced;
                        match (state.tracking, state.user_position) {
                            (true, Some(user)) => watcher.lock().unwrap().evaluate(
                                user,
                                &state.buses,
                                &routes,
                                config.avg_speed_kph,
                            ),
                            _ => vec![],
                        }
                    };
                    for notification in fired {
                        if notifier.send(notification).is_err() {
                            return;
                        }
                    }
                }
            })
        };

        let gps = {
            let state = self.state.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_millis(config.gps_tick_ms));
                // The first interval tick fires immediately; skip it so the
                // fleet starts with its configured GPS flags.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let mut state = state.write().await;
                    let mut rng = rand::thread_rng();
                    gps_sweep(&mut state.buses, &config, Utc::now(), &mut rng);
                }
            })
        };

        (motion, gps)
    }

    pub async fn snapshot(&self) -> FleetState {
        self.state.read().await.clone()
    }

    /// Operator GPS toggle: flips unconditionally and suppresses the
    /// automatic simulator for the override window.
    pub async fn toggle_gps(&self, bus_id: BusId) -> Option<bool> {
        let mut state = self.state.write().await;
        let bus = state.buses.iter_mut().find(|b| b.id == bus_id)?;
        bus.gps_active = !bus.gps_active;
        bus.last_manual_toggle = Some(Utc::now());
        let message = if bus.gps_active {
            format!("{} GPS signal has been restored", bus.name)
        } else {
            format!("{} is now in Prediction Mode", bus.name)
        };
        let active = bus.gps_active;
        drop(state);
        self.notify(Notification::info("GPS Status Updated", message).with_duration(5000));
        Some(active)
    }

    pub async fn add_delay(&self, bus_id: BusId) -> Option<i64> {
        let mut state = self.state.write().await;
        let bus = state.buses.iter_mut().find(|b| b.id == bus_id)?;
        bus.manual_delay_min += DELAY_INCREMENT_MIN;
        let message = format!("Added a {DELAY_INCREMENT_MIN}-minute delay to {}", bus.name);
        let delay = bus.manual_delay_min;
        drop(state);
        self.notify(Notification::info("Delay Added", message).with_duration(5000));
        Some(delay)
    }

    /// Start or stop the simulated rider session. Stopping resets the whole
    /// fleet to its initial state (a demo-reset policy, not a general
    /// requirement) and wipes the notification memory so the next session
    /// starts fresh.
    pub async fn toggle_user_tracking(&self) -> bool {
        let mut state = self.state.write().await;
        if state.tracking {
            state.tracking = false;
            state.user_position = None;
            state.buses = initial_fleet(&self.routes);
            self.watcher.lock().unwrap().clear();
            return false;
        }

        let Some(origin) = self.routes.get(1).and_then(|route| route.first().cloned()) else {
            log::error!("Cannot start tracking: rider anchor stop is missing");
            return false;
        };
        state.user_position = Some(origin.position);
        state.tracking = true;
        stage_tracking_demo(&mut state.buses, &self.routes, origin.position);
        drop(state);
        self.notify(Notification::success(
            "Live Tracking On",
            "You will now receive live alerts for nearby buses.".to_string(),
        ));
        true
    }

    pub async fn route_completion_eta(&self, bus_id: BusId) -> Option<i64> {
        let state = self.state.read().await;
        let bus = state.buses.iter().find(|b| b.id == bus_id)?;
        let route = self.routes.get(bus_id)?;
        Some(eta::route_completion_eta(bus, route, self.config.avg_speed_kph))
    }

    pub async fn eta_to_stop(&self, bus_id: BusId, stop_name: &str) -> Option<i64> {
        let state = self.state.read().await;
        let bus = state.buses.iter().find(|b| b.id == bus_id)?;
        let route = self.routes.get(bus_id)?;
        eta::eta_to_stop(bus, stop_name, route, self.config.avg_speed_kph)
    }

    pub async fn schedule(&self, bus_id: BusId) -> Option<Vec<StopSchedule>> {
        let state = self.state.read().await;
        let bus = state.buses.iter().find(|b| b.id == bus_id)?;
        let route = self.routes.get(bus_id)?;
        Some(eta::schedule_for_bus(
            bus,
            route,
            Utc::now(),
            self.config.avg_speed_kph,
        ))
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    fn notify(&self, notification: Notification) {
        if self.notifier.send(notification).is_err() {
            log::warn!("Notification consumer is gone, dropping event");
        }
    }
}

/// Stage the fleet for a demonstrable tracking session: Bus 95 on final
/// approach to the rider's stop, Buses 301 and 62 parked within the arrival
/// radius, so the notification path is exercised immediately.
fn stage_tracking_demo(buses: &mut [Bus], routes: &RouteTable, rider: LatLng) {
    for bus in buses {
        match bus.id {
            1 => {
                let Some(route) = routes.get(1).filter(|r| r.len() >= 2) else {
                    continue;
                };
                let index = route.len() - 2;
                let progress = 0.65;
                bus.route_index = index;
                bus.progress = progress;
                bus.position =
                    interpolate(route[index].position, route[index + 1].position, progress);
                bus.dwell_remaining_ms = 0;
            }
            4 => {
                bus.position = LatLng {
                    lat: rider.lat + 0.00001,
                    lng: rider.lng + 0.00001,
                };
                bus.dwell_remaining_ms = 5000;
            }
            6 => {
                bus.position = LatLng {
                    lat: rider.lat + 0.00002,
                    lng: rider.lng + 0.00002,
                };
                bus.dwell_remaining_ms = 5000;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify;
    use crate::routes::Stop;
    use rand::rngs::mock::StepRng;
    use std::collections::BTreeMap;

    fn km_north(km: f64) -> f64 {
        km * 180.0 / (std::f64::consts::PI * crate::geo::EARTH_RADIUS_KM)
    }

    fn stop(name: &str, lat: f64) -> Stop {
        Stop {
            name: name.to_string(),
            position: LatLng { lat, lng: 0.0 },
        }
    }

    fn single_route(stops: Vec<Stop>) -> RouteTable {
        let mut routes = BTreeMap::new();
        routes.insert(1, stops);
        RouteTable::new(routes)
    }

    fn test_bus(routes: &RouteTable) -> Bus {
        Bus {
            id: 1,
            name: "Bus 95".to_string(),
            description: String::new(),
            position: routes.get(1).unwrap()[0].position,
            route_index: 0,
            progress: 0.0,
            dwell_remaining_ms: 0,
            gps_active: true,
            manual_delay_min: 0,
            last_manual_toggle: None,
        }
    }

    fn always_flip() -> StepRng {
        StepRng::new(0, 0)
    }

    fn never_flip() -> StepRng {
        StepRng::new(u64::MAX, 0)
    }

    #[test]
    fn progress_increases_monotonically_between_stops() {
        let routes = single_route(vec![stop("A", 0.0), stop("B", km_north(5.0))]);
        let config = SimConfig::default();
        let mut buses = vec![test_bus(&routes)];
        let mut last_progress = 0.0;
        for _ in 0..10 {
            buses = advance_fleet(&buses, &routes, &config);
            assert!(buses[0].progress > last_progress);
            assert_eq!(buses[0].dwell_remaining_ms, 0);
            last_progress = buses[0].progress;
        }
    }

    #[test]
    fn reaching_a_stop_snaps_position_and_starts_dwell() {
        let routes = single_route(vec![stop("A", 0.0), stop("B", km_north(5.0))]);
        let config = SimConfig::default();
        let mut bus = test_bus(&routes);
        bus.progress = 0.999;
        let buses = advance_fleet(&[bus], &routes, &config);
        assert_eq!(buses[0].progress, 1.0);
        assert_eq!(buses[0].dwell_remaining_ms, config.dwell_ms);
        assert_eq!(buses[0].position, routes.get(1).unwrap()[1].position);
    }

    #[test]
    fn dwell_counts_down_then_advances_segment() {
        let routes = single_route(vec![
            stop("A", 0.0),
            stop("B", km_north(5.0)),
            stop("C", km_north(8.0)),
        ]);
        let config = SimConfig::default();
        let mut bus = test_bus(&routes);
        bus.route_index = 0;
        bus.progress = 1.0;
        bus.dwell_remaining_ms = 2000;

        let buses = advance_fleet(&[bus], &routes, &config);
        assert_eq!(buses[0].dwell_remaining_ms, 1000);
        assert_eq!(buses[0].route_index, 0);

        let buses = advance_fleet(&buses, &routes, &config);
        assert_eq!(buses[0].dwell_remaining_ms, 0);
        assert_eq!(buses[0].route_index, 1);
        assert_eq!(buses[0].progress, 0.0);
    }

    #[test]
    fn last_segment_dwell_wraps_to_route_origin() {
        let routes = single_route(vec![
            stop("A", 0.0),
            stop("B", km_north(5.0)),
            stop("C", km_north(8.0)),
        ]);
        let config = SimConfig::default();
        let mut bus = test_bus(&routes);
        bus.route_index = 1; // last traversable segment
        bus.progress = 1.0;
        bus.dwell_remaining_ms = 1000;

        let buses = advance_fleet(&[bus], &routes, &config);
        assert_eq!(buses[0].route_index, 0);
        assert_eq!(buses[0].progress, 0.0);
    }

    #[test]
    fn zero_length_segment_is_traversed_instantly() {
        let routes = single_route(vec![stop("A", 0.0), stop("A again", 0.0)]);
        let config = SimConfig::default();
        let buses = advance_fleet(&[test_bus(&routes)], &routes, &config);
        assert_eq!(buses[0].progress, 1.0);
        assert_eq!(buses[0].dwell_remaining_ms, config.dwell_ms);
    }

    #[test]
    fn degenerate_route_leaves_bus_unmodified() {
        let routes = single_route(vec![stop("A", 0.0)]);
        let config = SimConfig::default();
        let bus = test_bus(&routes);
        let buses = advance_fleet(&[bus.clone()], &routes, &config);
        assert_eq!(buses[0].route_index, bus.route_index);
        assert_eq!(buses[0].progress, bus.progress);
        assert_eq!(buses[0].position, bus.position);
    }

    #[test]
    fn gps_sweep_flips_and_honors_probability() {
        let routes = single_route(vec![stop("A", 0.0), stop("B", km_north(5.0))]);
        let config = SimConfig::default();
        let now = Utc::now();

        let mut buses = vec![test_bus(&routes)];
        gps_sweep(&mut buses, &config, now, &mut always_flip());
        assert!(!buses[0].gps_active);
        gps_sweep(&mut buses, &config, now, &mut always_flip());
        assert!(buses[0].gps_active);

        gps_sweep(&mut buses, &config, now, &mut never_flip());
        assert!(buses[0].gps_active);
    }

    #[test]
    fn gps_sweep_respects_manual_override_window() {
        let routes = single_route(vec![stop("A", 0.0), stop("B", km_north(5.0))]);
        let config = SimConfig::default();
        let now = Utc::now();

        let mut buses = vec![test_bus(&routes)];
        buses[0].last_manual_toggle = Some(now - chrono::Duration::milliseconds(10_000));
        gps_sweep(&mut buses, &config, now, &mut always_flip());
        assert!(buses[0].gps_active, "flip inside the override window");

        buses[0].last_manual_toggle = Some(now - chrono::Duration::milliseconds(31_000));
        gps_sweep(&mut buses, &config, now, &mut always_flip());
        assert!(!buses[0].gps_active, "window expired, flip applies");
    }

    #[tokio::test]
    async fn manual_toggle_flips_and_stamps_override() {
        let (tx, mut rx) = notify::channel();
        let sim = Simulator::new(
            Arc::new(RouteTable::mysuru()),
            SimConfig::default(),
            tx,
        );
        let active = sim.toggle_gps(1).await;
        assert_eq!(active, Some(false));

        let state = sim.snapshot().await;
        let bus = state.buses.iter().find(|b| b.id == 1).unwrap();
        assert!(!bus.gps_active);
        assert!(bus.last_manual_toggle.is_some());

        let n = rx.recv().await.unwrap();
        assert_eq!(n.title, "GPS Status Updated");
        assert!(n.message.contains("Prediction Mode"));

        assert_eq!(sim.toggle_gps(99).await, None);
    }

    #[tokio::test]
    async fn delay_accumulates_in_five_minute_steps() {
        let (tx, _rx) = notify::channel();
        let sim = Simulator::new(
            Arc::new(RouteTable::mysuru()),
            SimConfig::default(),
            tx,
        );
        assert_eq!(sim.add_delay(1).await, Some(5));
        assert_eq!(sim.add_delay(1).await, Some(10));
        assert_eq!(sim.route_completion_eta(1).await.is_some(), true);
    }

    #[tokio::test]
    async fn tracking_session_stages_demo_and_resets_on_stop() {
        let (tx, mut rx) = notify::channel();
        let routes = Arc::new(RouteTable::mysuru());
        let sim = Simulator::new(routes.clone(), SimConfig::default(), tx);

        assert!(sim.toggle_user_tracking().await);
        let state = sim.snapshot().await;
        assert!(state.tracking);
        let rider = state.user_position.unwrap();
        assert_eq!(rider, routes.get(1).unwrap()[0].position);

        let bus_95 = state.buses.iter().find(|b| b.id == 1).unwrap();
        let route_95 = routes.get(1).unwrap();
        assert_eq!(bus_95.route_index, route_95.len() - 2);
        assert!(bus_95.progress > 0.0);

        let bus_301 = state.buses.iter().find(|b| b.id == 4).unwrap();
        assert!(haversine_distance(rider, bus_301.position) < 0.02);

        let n = rx.recv().await.unwrap();
        assert_eq!(n.title, "Live Tracking On");

        assert!(!sim.toggle_user_tracking().await);
        let state = sim.snapshot().await;
        assert!(!state.tracking);
        assert!(state.user_position.is_none());
        let bus_95 = state.buses.iter().find(|b| b.id == 1).unwrap();
        assert_eq!(bus_95.route_index, 0);
        assert_eq!(bus_95.progress, 0.0);
    }

    #[tokio::test]
    async fn eta_queries_read_live_state() {
        let (tx, _rx) = notify::channel();
        let sim = Simulator::new(
            Arc::new(RouteTable::mysuru()),
            SimConfig::default(),
            tx,
        );
        // Bus 1 starts at the CBS origin; its own origin stop is not a valid
        // target, the next one is.
        assert_eq!(sim.eta_to_stop(1, "Ramaswamy Circle").await.is_some(), true);
        assert_eq!(sim.eta_to_stop(1, "Nowhere").await, None);
        let schedule = sim.schedule(1).await.unwrap();
        assert_eq!(schedule.len(), 6);
    }
}
