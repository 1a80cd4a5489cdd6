pub mod geocoder;

use crate::models::order::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// City/state/zip tokens pulled out of a free-text address such as
/// "123 Main St, Fredericksburg, VA 22401". Region matching and the
/// no-coordinates distance heuristic both work on these tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressParts {
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

pub fn parse_address(address: &str) -> AddressParts {
    let segments: Vec<&str> = address
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let mut parts = AddressParts::default();

    for segment in segments.iter().rev() {
        let tokens: Vec<&str> = segment.split_whitespace().collect();
        let mut consumed = 0;

        for token in &tokens {
            if parts.zip.is_none() && token.len() == 5 && token.chars().all(|c| c.is_ascii_digit())
            {
                parts.zip = Some((*token).to_string());
                consumed += 1;
            } else if parts.state.is_none()
                && token.len() == 2
                && token.chars().all(|c| c.is_ascii_uppercase())
            {
                parts.state = Some((*token).to_string());
                consumed += 1;
            }
        }

        // A segment that was not state/zip tokens is a place name; the
        // right-most such segment is the city.
        if consumed < tokens.len() && parts.city.is_none() {
            parts.city = Some(segment.to_string());
        }
    }

    // Single-segment addresses ("Fredericksburg") are a bare place name.
    if parts.city.is_none() && parts.state.is_none() && parts.zip.is_none() {
        let trimmed = address.trim();
        if !trimmed.is_empty() {
            parts.city = Some(trimmed.to_string());
        }
    }

    parts
}

/// Crude distance proxy for addresses the geocoder could not resolve.
/// Shared tokens shrink the estimate; totally unrelated addresses read as a
/// long leg rather than an unknown.
pub fn heuristic_km(a: &AddressParts, b: &AddressParts) -> f64 {
    let same = |x: &Option<String>, y: &Option<String>| match (x, y) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => false,
    };

    if same(&a.zip, &b.zip) {
        3.0
    } else if same(&a.city, &b.city) {
        8.0
    } else if same(&a.state, &b.state) {
        40.0
    } else {
        120.0
    }
}

/// Travel-time proxy used for chain gaps and the time-feasibility gate.
pub fn travel_minutes(distance_km: f64, average_speed_kmh: f64) -> i64 {
    if average_speed_kmh <= 0.0 {
        return 0;
    }
    (distance_km / average_speed_kmh * 60.0).ceil() as i64
}

/// Cache key for geocoder lookups; repeat lookups of the same address must
/// be free regardless of spacing and case.
pub fn normalize_address(address: &str) -> String {
    address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{
        AddressParts, haversine_km, heuristic_km, normalize_address, parse_address,
        travel_minutes,
    };
    use crate::models::order::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 38.3032,
            lng: -77.4605,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn fredericksburg_to_reston_is_around_73_km() {
        let fredericksburg = GeoPoint {
            lat: 38.3032,
            lng: -77.4605,
        };
        let reston = GeoPoint {
            lat: 38.9586,
            lng: -77.3570,
        };
        let distance = haversine_km(&fredericksburg, &reston);
        assert!((distance - 73.0).abs() < 10.0);
    }

    #[test]
    fn parses_city_state_zip() {
        let parts = parse_address("123 Main St, Fredericksburg, VA 22401");
        assert_eq!(parts.city.as_deref(), Some("Fredericksburg"));
        assert_eq!(parts.state.as_deref(), Some("VA"));
        assert_eq!(parts.zip.as_deref(), Some("22401"));
    }

    #[test]
    fn bare_place_name_becomes_city() {
        let parts = parse_address("Reston");
        assert_eq!(parts.city.as_deref(), Some("Reston"));
        assert!(parts.state.is_none());
    }

    #[test]
    fn heuristic_prefers_shared_tokens() {
        let a = parse_address("1 Elm St, Fredericksburg, VA 22401");
        let same_zip = parse_address("9 Oak St, Fredericksburg, VA 22401");
        let same_state = parse_address("2 Pine Rd, Reston, VA 20190");
        let other_state = parse_address("5 Maple Ave, Bethesda, MD 20814");

        assert!(heuristic_km(&a, &same_zip) < heuristic_km(&a, &same_state));
        assert!(heuristic_km(&a, &same_state) < heuristic_km(&a, &other_state));
    }

    #[test]
    fn heuristic_handles_missing_tokens() {
        let known = parse_address("Fredericksburg, VA 22401");
        let empty = AddressParts::default();
        assert_eq!(heuristic_km(&known, &empty), 120.0);
    }

    #[test]
    fn travel_minutes_rounds_up() {
        assert_eq!(travel_minutes(10.0, 30.0), 20);
        assert_eq!(travel_minutes(10.1, 30.0), 21);
        assert_eq!(travel_minutes(5.0, 0.0), 0);
    }

    #[test]
    fn normalized_addresses_collapse_case_and_whitespace() {
        assert_eq!(
            normalize_address("  123 Main St,   Fredericksburg,  VA "),
            normalize_address("123 MAIN st, Fredericksburg, VA")
        );
    }
}
