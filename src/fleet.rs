use chrono::{DateTime, Utc};

use crate::geo::LatLng;
use crate::routes::{bus_details, BusId, RouteTable, Stop};

/// Live state of one bus. `position` is derived from `route_index`/`progress`
/// every tick, never authoritative on its own.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Bus {
    pub id: BusId,
    pub name: String,
    pub description: String,
    pub position: LatLng,
    /// Index of the stop at the start of the segment being traversed.
    pub route_index: usize,
    /// Fractional position in [0, 1] along the current segment.
    pub progress: f64,
    /// Milliseconds left stationary at the stop just reached; 0 = in motion.
    pub dwell_remaining_ms: i64,
    pub gps_active: bool,
    pub manual_delay_min: i64,
    /// Guards the GPS simulator from undoing an explicit operator toggle.
    pub last_manual_toggle: Option<DateTime<Utc>>,
}

/// All buses parked at their route origin, carrying the static per-line
/// details (initial delays included).
pub fn initial_fleet(routes: &RouteTable) -> Vec<Bus> {
    bus_details()
        .iter()
        .filter_map(|details| {
            let origin = routes.get(details.id)?.first()?.position;
            Some(Bus {
                id: details.id,
                name: details.name.to_string(),
                description: details.description.to_string(),
                position: origin,
                route_index: 0,
                progress: 0.0,
                dwell_remaining_ms: 0,
                gps_active: details.gps_active,
                manual_delay_min: details.manual_delay_min,
                last_manual_toggle: None,
            })
        })
        .collect()
}

/// Human-readable status line for fleet listings.
pub fn status_text(bus: &Bus, route: &[Stop]) -> String {
    let next_stop = route.get(bus.route_index + 1);
    if bus.dwell_remaining_ms > 0 {
        match next_stop {
            Some(stop) => format!("At {}", stop.name),
            None => "At terminal".to_string(),
        }
    } else {
        match next_stop {
            Some(stop) => format!("En route to {}", stop.name),
            None => "Approaching terminal".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_fleet_starts_at_route_origins() {
        let routes = RouteTable::mysuru();
        let fleet = initial_fleet(&routes);
        assert_eq!(fleet.len(), 6);
        for bus in &fleet {
            let route = routes.get(bus.id).unwrap();
            assert_eq!(bus.position, route[0].position);
            assert_eq!(bus.route_index, 0);
            assert_eq!(bus.progress, 0.0);
            assert_eq!(bus.dwell_remaining_ms, 0);
            assert!(bus.last_manual_toggle.is_none());
        }
    }

    #[test]
    fn initial_delays_come_from_line_details() {
        let routes = RouteTable::mysuru();
        let fleet = initial_fleet(&routes);
        let bus_301 = fleet.iter().find(|b| b.id == 4).unwrap();
        assert_eq!(bus_301.manual_delay_min, 10);
    }

    #[test]
    fn status_text_reflects_dwell_and_motion() {
        let routes = RouteTable::mysuru();
        let mut bus = initial_fleet(&routes).remove(0);
        let route = routes.get(bus.id).unwrap();
        assert_eq!(status_text(&bus, route), "En route to Ramaswamy Circle");
        bus.dwell_remaining_ms = 3000;
        assert_eq!(status_text(&bus, route), "At Ramaswamy Circle");
    }
}
