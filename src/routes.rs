use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::geo::LatLng;

pub type BusId = u32;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Stop {
    pub name: String,
    pub position: LatLng,
}

impl Stop {
    fn new(name: &str, lat: f64, lng: f64) -> Self {
        Stop {
            name: name.to_string(),
            position: LatLng { lat, lng },
        }
    }
}

/// Static description of one bus line. Ids are 1:1 with routes.
#[derive(Debug, Clone, Copy)]
pub struct BusDetails {
    pub id: BusId,
    pub name: &'static str,
    pub description: &'static str,
    pub gps_active: bool,
    pub manual_delay_min: i64,
}

pub fn bus_details() -> [BusDetails; 6] {
    [
        BusDetails {
            id: 1,
            name: "Bus 95",
            description:
                "Mainline route connecting the central bus stand to the residential hub of Srirampura.",
            gps_active: true,
            manual_delay_min: 0,
        },
        BusDetails {
            id: 2,
            name: "Bus 201",
            description: "A high-frequency route serving the IT corridor and Infosys Campus.",
            gps_active: true,
            manual_delay_min: 2,
        },
        BusDetails {
            id: 3,
            name: "Bus 313A",
            description: "Limited stop service to the Hebbal Industrial Area.",
            gps_active: true,
            manual_delay_min: 5,
        },
        BusDetails {
            id: 4,
            name: "Bus 301",
            description: "Tourist-focused route running from the city to Chamundi Hills.",
            gps_active: true,
            manual_delay_min: 10,
        },
        BusDetails {
            id: 5,
            name: "Bus 150",
            description: "Connects the university campus to the Kuvempunagar residential area.",
            gps_active: true,
            manual_delay_min: 1,
        },
        BusDetails {
            id: 6,
            name: "Bus 62",
            description:
                "Feeder service for the northern industrial suburbs and Columbia Asia Hospital.",
            gps_active: true,
            manual_delay_min: 8,
        },
    ]
}

/// The route number shown to riders, e.g. "95" for "Bus 95".
pub fn route_number(bus_name: &str) -> &str {
    bus_name.split_whitespace().nth(1).unwrap_or("")
}

/// Ordered stop sequences per bus id, plus a de-duplicated list of all known
/// stops. Loop routes repeat the origin stop at the end.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: BTreeMap<BusId, Vec<Stop>>,
    all_stops: Vec<Stop>,
}

impl RouteTable {
    pub fn new(routes: BTreeMap<BusId, Vec<Stop>>) -> Self {
        let mut seen = HashSet::new();
        let mut all_stops = vec![];
        for stops in routes.values() {
            for stop in stops {
                if seen.insert(stop.name.clone()) {
                    all_stops.push(stop.clone());
                }
            }
        }
        RouteTable { routes, all_stops }
    }

    /// The six Mysuru city routes.
    pub fn mysuru() -> Self {
        let mut routes = BTreeMap::new();
        routes.insert(
            1,
            vec![
                Stop::new("City Bus Stand (CBS)", 12.3138, 76.6483),
                Stop::new("Ramaswamy Circle", 12.3050, 76.6450),
                Stop::new("Ballal Circle", 12.2982, 76.6380),
                Stop::new("Srirampura Water Tank", 12.2965, 76.6233),
                Stop::new("Srirampura Last Stop", 12.2965, 76.6033),
                Stop::new("City Bus Stand (CBS)", 12.3138, 76.6483),
            ],
        );
        routes.insert(
            2,
            vec![
                Stop::new("Railway Station", 12.3155, 76.6424),
                Stop::new("CFTRI", 12.320, 76.630),
                Stop::new("Kuvempunagar", 12.2882, 76.6219),
                Stop::new("Infosys Campus", 12.348, 76.598),
            ],
        );
        routes.insert(
            3,
            vec![
                Stop::new("City Bus Stand (CBS)", 12.3138, 76.6483),
                Stop::new("Metagalli", 12.33, 76.62),
                Stop::new("Hebbal Industrial Area", 12.36, 76.61),
            ],
        );
        routes.insert(
            4,
            vec![
                Stop::new("City Bus Stand (CBS)", 12.3138, 76.6483),
                Stop::new("Mysore Palace", 12.3051, 76.6552),
                Stop::new("Mysore Zoo", 12.300, 76.660),
                Stop::new("Chamundi Hills", 12.275, 76.670),
            ],
        );
        routes.insert(
            5,
            vec![
                Stop::new("University of Mysore", 12.307, 76.625),
                Stop::new("Gangotri Glades", 12.310, 76.615),
                Stop::new("Ramakrishna Nagar Circle", 12.285, 76.618),
                Stop::new("Kuvempunagar Complex", 12.2882, 76.6219),
            ],
        );
        routes.insert(
            6,
            vec![
                Stop::new("Suburban Bus Stand", 12.320, 76.655),
                Stop::new("Columbia Asia Hospital", 12.335, 76.660),
                Stop::new("Ring Road Circle", 12.345, 76.650),
                Stop::new("Naganahalli Gate", 12.365, 76.645),
            ],
        );
        RouteTable::new(routes)
    }

    pub fn get(&self, id: BusId) -> Option<&[Stop]> {
        self.routes.get(&id).map(|stops| stops.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (BusId, &[Stop])> {
        self.routes.iter().map(|(id, stops)| (*id, stops.as_slice()))
    }

    /// Every known stop, de-duplicated by name. Stops with identical names on
    /// different routes are the same physical stop.
    pub fn all_stops(&self) -> &[Stop] {
        &self.all_stops
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StopMatch {
    pub name: String,
    pub route_numbers: Vec<String>,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct SearchResult {
    pub bus_ids: Vec<BusId>,
    pub stops: Vec<StopMatch>,
}

/// Case-insensitive substring search over bus names and stop names.
pub fn search(table: &RouteTable, query: &str) -> SearchResult {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return SearchResult::default();
    }

    let details = bus_details();
    let bus_ids = details
        .iter()
        .filter(|d| d.name.to_lowercase().contains(&query))
        .map(|d| d.id)
        .collect();

    let mut matches: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (id, stops) in table.iter() {
        let number = details
            .iter()
            .find(|d| d.id == id)
            .map(|d| route_number(d.name))
            .unwrap_or("");
        for stop in stops {
            if stop.name.to_lowercase().contains(&query) {
                matches
                    .entry(stop.name.clone())
                    .or_default()
                    .insert(number.to_string());
            }
        }
    }

    let stops = matches
        .into_iter()
        .map(|(name, route_numbers)| StopMatch {
            name,
            route_numbers: route_numbers.into_iter().collect(),
        })
        .collect();

    SearchResult { bus_ids, stops }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_six_routes_of_at_least_two_stops() {
        let table = RouteTable::mysuru();
        assert_eq!(table.iter().count(), 6);
        for (_, stops) in table.iter() {
            assert!(stops.len() >= 2);
        }
    }

    #[test]
    fn route_95_closes_its_loop() {
        let table = RouteTable::mysuru();
        let route = table.get(1).unwrap();
        assert_eq!(route.first().unwrap().name, route.last().unwrap().name);
        assert_eq!(
            route.first().unwrap().position,
            route.last().unwrap().position
        );
    }

    #[test]
    fn all_stops_dedups_by_name() {
        let table = RouteTable::mysuru();
        let cbs_count = table
            .all_stops()
            .iter()
            .filter(|s| s.name == "City Bus Stand (CBS)")
            .count();
        assert_eq!(cbs_count, 1);
    }

    #[test]
    fn search_finds_buses_and_stops() {
        let table = RouteTable::mysuru();
        let result = search(&table, "palace");
        assert!(result.bus_ids.is_empty());
        assert_eq!(result.stops.len(), 1);
        assert_eq!(result.stops[0].name, "Mysore Palace");
        assert_eq!(result.stops[0].route_numbers, vec!["301"]);

        let result = search(&table, "95");
        assert_eq!(result.bus_ids, vec![1]);
    }

    #[test]
    fn search_on_shared_stop_lists_all_serving_routes() {
        let table = RouteTable::mysuru();
        let result = search(&table, "city bus stand");
        assert_eq!(result.stops.len(), 1);
        assert_eq!(result.stops[0].route_numbers, vec!["301", "313A", "95"]);
    }

    #[test]
    fn empty_query_matches_nothing() {
        let table = RouteTable::mysuru();
        let result = search(&table, "   ");
        assert!(result.bus_ids.is_empty());
        assert!(result.stops.is_empty());
    }
}
