use chrono::{DateTime, Duration, Utc};

use crate::fleet::Bus;
use crate::geo::haversine_distance;
use crate::routes::Stop;

/// Average time a bus halts at each intermediate stop, in minutes.
pub const DWELL_TIME_MINUTES: f64 = 1.0;

fn travel_minutes(km: f64, avg_speed_kph: f64) -> f64 {
    (km / avg_speed_kph) * 60.0
}

/// Minutes until the bus finishes its route: live distance to the next stop,
/// then every remaining segment with one dwell unit per intermediate stop,
/// plus the manual delay. Degenerates to the manual delay alone once the last
/// traversable segment is reached.
pub fn route_completion_eta(bus: &Bus, route: &[Stop], avg_speed_kph: f64) -> i64 {
    if route.len() < 2 || bus.route_index >= route.len() - 1 {
        return bus.manual_delay_min;
    }
    let next = &route[bus.route_index + 1];
    let mut minutes = travel_minutes(haversine_distance(bus.position, next.position), avg_speed_kph);
    for i in bus.route_index + 1..route.len() - 1 {
        minutes += DWELL_TIME_MINUTES;
        minutes += travel_minutes(
            haversine_distance(route[i].position, route[i + 1].position),
            avg_speed_kph,
        );
    }
    (minutes + bus.manual_delay_min as f64).round() as i64
}

/// Minutes until the bus reaches the named stop. `None` when the stop is not
/// on the route or is at/behind the bus's current segment start; a target that
/// is already passed is not an error, just not applicable.
pub fn eta_to_stop(bus: &Bus, target_name: &str, route: &[Stop], avg_speed_kph: f64) -> Option<i64> {
    let target_index = route.iter().position(|s| s.name == target_name)?;
    if target_index <= bus.route_index {
        return None;
    }
    let next = route.get(bus.route_index + 1)?;

    let mut total_km = haversine_distance(bus.position, next.position);
    for i in bus.route_index + 1..target_index {
        total_km += haversine_distance(route[i].position, route[i + 1].position);
    }

    // The bus halts at every stop strictly between its next stop and the
    // target, but not at the target itself.
    let dwell_stops = target_index - (bus.route_index + 1);
    let minutes = travel_minutes(total_km, avg_speed_kph)
        + dwell_stops as f64 * DWELL_TIME_MINUTES
        + bus.manual_delay_min as f64;
    Some(minutes.round() as i64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopStatus {
    Arrived,
    Current,
    Upcoming,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StopSchedule {
    pub stop: Stop,
    pub status: StopStatus,
    pub arrival: Option<DateTime<Utc>>,
    pub departure: Option<DateTime<Utc>>,
}

fn minutes_duration(minutes: f64) -> Duration {
    Duration::milliseconds((minutes * 60_000.0) as i64)
}

/// Ordered arrival/departure schedule for every stop on the route, walking
/// forward from `now`. Stops already passed report `Arrived` with no times;
/// the immediate next stop is `Current`. A fully-consumed route yields an
/// all-`Arrived` end-of-line schedule.
pub fn schedule_for_bus(
    bus: &Bus,
    route: &[Stop],
    now: DateTime<Utc>,
    avg_speed_kph: f64,
) -> Vec<StopSchedule> {
    let next_idx = bus.route_index + 1;
    if next_idx >= route.len() {
        return route
            .iter()
            .map(|stop| StopSchedule {
                stop: stop.clone(),
                status: StopStatus::Arrived,
                arrival: None,
                departure: None,
            })
            .collect();
    }

    let mut timings = vec![None; route.len()];
    let time_to_next = travel_minutes(
        haversine_distance(bus.position, route[next_idx].position),
        avg_speed_kph,
    );
    let mut arrival = now + minutes_duration(time_to_next);
    timings[next_idx] = Some((arrival, arrival + minutes_duration(DWELL_TIME_MINUTES)));

    for i in next_idx + 1..route.len() {
        let segment_minutes = travel_minutes(
            haversine_distance(route[i - 1].position, route[i].position),
            avg_speed_kph,
        );
        let (_, previous_departure) = timings[i - 1].unwrap();
        arrival = previous_departure + minutes_duration(segment_minutes);
        timings[i] = Some((arrival, arrival + minutes_duration(DWELL_TIME_MINUTES)));
    }

    let delay = minutes_duration(bus.manual_delay_min as f64);
    route
        .iter()
        .enumerate()
        .map(|(i, stop)| {
            if i <= bus.route_index {
                return StopSchedule {
                    stop: stop.clone(),
                    status: StopStatus::Arrived,
                    arrival: None,
                    departure: None,
                };
            }
            let (arrival, departure) = timings[i].unwrap();
            StopSchedule {
                stop: stop.clone(),
                status: if i == next_idx {
                    StopStatus::Current
                } else {
                    StopStatus::Upcoming
                },
                arrival: Some(arrival + delay),
                departure: Some(departure + delay),
            }
        })
        .collect()
}
