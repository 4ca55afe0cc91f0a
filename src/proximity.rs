use std::collections::HashMap;

use crate::eta::eta_to_stop;
use crate::fleet::Bus;
use crate::geo::{haversine_distance, LatLng};
use crate::notify::Notification;
use crate::routes::{BusId, RouteTable, Stop};

/// A stop further away than this is not associated with the rider at all.
pub const NEARBY_STOP_MAX_KM: f64 = 2.0;
/// Bus-to-rider distance below which the bus counts as arrived (20 m).
pub const ARRIVAL_RADIUS_KM: f64 = 0.02;
/// Approaching alerts fire for ETAs in [0, this) minutes.
pub const APPROACH_WINDOW_MIN: i64 = 5;

/// Nearest known stop to the rider by linear-scan minimum haversine distance,
/// or `None` when everything is out of range.
pub fn nearest_stop(user: LatLng, stops: &[Stop]) -> Option<&Stop> {
    let nearest = stops.iter().min_by(|a, b| {
        haversine_distance(user, a.position)
            .total_cmp(&haversine_distance(user, b.position))
    })?;
    if haversine_distance(user, nearest.position) > NEARBY_STOP_MAX_KM {
        return None;
    }
    Some(nearest)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotifyLevel {
    Approaching,
    Arrived,
}

/// Per-bus memory of the last notification episode. A bus notifies once per
/// continuous approaching/arrived episode; leaving both states re-arms it.
#[derive(Debug, Default)]
pub struct ProximityWatcher {
    notified: HashMap<BusId, NotifyLevel>,
}

impl ProximityWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify every bus against the rider's nearest stop and return the
    /// notifications that should fire this tick.
    pub fn evaluate(
        &mut self,
        user: LatLng,
        buses: &[Bus],
        routes: &RouteTable,
        avg_speed_kph: f64,
    ) -> Vec<Notification> {
        let Some(stop) = nearest_stop(user, routes.all_stops()) else {
            return vec![];
        };

        let mut fired = vec![];
        for bus in buses {
            let Some(route) = routes.get(bus.id) else {
                continue;
            };
            let distance = haversine_distance(user, bus.position);
            let eta = eta_to_stop(bus, &stop.name, route, avg_speed_kph);

            if distance < ARRIVAL_RADIUS_KM {
                if self.notified.get(&bus.id) != Some(&NotifyLevel::Arrived) {
                    fired.push(Notification::alert(
                        "Bus Arrived!",
                        format!("{} has arrived at your stop!", bus.name),
                    ));
                    self.notified.insert(bus.id, NotifyLevel::Arrived);
                }
            } else if matches!(eta, Some(m) if (0..APPROACH_WINDOW_MIN).contains(&m)) {
                if !self.notified.contains_key(&bus.id) {
                    // A rounded 0 would read as "0 minutes away"; floor at 1.
                    // True arrival is the distance check above, not this path.
                    let minutes = eta.unwrap_or(0).max(1);
                    let plural = if minutes > 1 { "s" } else { "" };
                    fired.push(
                        Notification::info(
                            "Bus Approaching",
                            format!("{} is about {minutes} minute{plural} away.", bus.name),
                        )
                        .with_duration(8000),
                    );
                    self.notified.insert(bus.id, NotifyLevel::Approaching);
                }
            } else {
                self.notified.remove(&bus.id);
            }
        }
        fired
    }

    /// Forget every episode; called when a tracking session ends so the next
    /// session starts with no notification history.
    pub fn clear(&mut self) {
        self.notified.clear();
    }
}
