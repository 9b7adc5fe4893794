use serde::{Deserialize, Serialize};

use crate::constants::{CELL_SIZE_DEG, EARTH_RADIUS_KM};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Clients report `0,0` when they do not know where they are.
    pub fn is_unset(&self) -> bool {
        self.lat == 0.0 && self.lon == 0.0
    }

    pub fn rounded(self) -> Self {
        Self::new(round5(self.lat), round5(self.lon))
    }
}

/// Smallest coordinate step a client can be handed.
pub const COORDINATE_QUANTUM_DEG: f64 = 0.000_01;

/// Coordinates handed to clients carry five decimals (~1 m).
pub fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

pub fn distance_km(a: LatLon, b: LatLon) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

pub fn distance_m(a: LatLon, b: LatLon) -> f64 {
    distance_km(a, b) * 1000.0
}

/// Point reached by travelling `distance_m` from `origin` on an initial
/// bearing in degrees clockwise from north.
pub fn destination(origin: LatLon, bearing_deg: f64, distance_m: f64) -> LatLon {
    let angular = distance_m / 1000.0 / EARTH_RADIUS_KM;
    let bearing = bearing_deg.to_radians();
    let lat1 = origin.lat.to_radians();
    let lon1 = origin.lon.to_radians();

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * angular.sin() * lat1.cos()).atan2(angular.cos() - lat1.sin() * lat2.sin());

    LatLon::new(lat2.to_degrees(), lon2.to_degrees())
}

/// Parses `lat,lon` (whitespace tolerant).
pub fn parse_lat_lon(text: &str) -> Option<LatLon> {
    let (lat, lon) = text.split_once(',')?;
    let lat = lat.trim().parse::<f64>().ok()?;
    let lon = lon.trim().parse::<f64>().ok()?;
    (lat.is_finite() && lon.is_finite()).then_some(LatLon::new(lat, lon))
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn around(center: LatLon, half_span_deg: f64) -> Self {
        Self {
            min_lat: center.lat - half_span_deg,
            max_lat: center.lat + half_span_deg,
            min_lon: center.lon - half_span_deg,
            max_lon: center.lon + half_span_deg,
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = LatLon>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let mut bbox = Self {
            min_lat: first.lat,
            max_lat: first.lat,
            min_lon: first.lon,
            max_lon: first.lon,
        };
        for point in points {
            bbox.min_lat = bbox.min_lat.min(point.lat);
            bbox.max_lat = bbox.max_lat.max(point.lat);
            bbox.min_lon = bbox.min_lon.min(point.lon);
            bbox.max_lon = bbox.max_lon.max(point.lon);
        }
        Some(bbox)
    }

    pub fn contains(&self, point: LatLon) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lon >= self.min_lon
            && point.lon <= self.max_lon
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lon: self.min_lon.min(other.min_lon),
            max_lon: self.max_lon.max(other.max_lon),
        }
    }
}

/// Identity of a fixed-size map tile: latitude and longitude tile indices
/// packed as `lat_index << 32 | lon_index`.
pub type CellId = u64;

pub fn cell_id(point: LatLon) -> CellId {
    let lat_index = (point.lat / CELL_SIZE_DEG).floor() as i32;
    let lon_index = (point.lon / CELL_SIZE_DEG).floor() as i32;
    (u64::from(lat_index as u32) << 32) | u64::from(lon_index as u32)
}

pub fn cell_center(id: CellId) -> LatLon {
    let lat_index = (id >> 32) as u32 as i32;
    let lon_index = id as u32 as i32;
    LatLon::new(
        (f64::from(lat_index) + 0.5) * CELL_SIZE_DEG,
        (f64::from(lon_index) + 0.5) * CELL_SIZE_DEG,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_matches_known_pair() {
        // Paris -> London, roughly 343.5 km.
        let paris = LatLon::new(48.8566, 2.3522);
        let london = LatLon::new(51.5074, -0.1278);
        let km = distance_km(paris, london);
        assert!((km - 343.5).abs() < 1.0, "got {km}");
        assert_eq!(distance_m(paris, paris), 0.0);
    }

    #[test]
    fn destination_travels_requested_distance() {
        let origin = LatLon::new(40.0, -74.0);
        for bearing in [0.0, 90.0, 181.0, 270.0] {
            let moved = destination(origin, bearing, 250.0);
            assert!((distance_m(origin, moved) - 250.0).abs() < 0.01);
        }
    }

    #[test]
    fn cell_ids_are_stable_and_round_trip_their_center() {
        let point = LatLon::new(-33.8688, 151.2093);
        let id = cell_id(point);
        assert_eq!(id, cell_id(LatLon::new(-33.86881, 151.20931)));
        assert_eq!(cell_id(cell_center(id)), id);
        assert!(distance_m(point, cell_center(id)) < 70.0);
    }

    #[test]
    fn parse_lat_lon_accepts_spaces_and_rejects_garbage() {
        assert_eq!(parse_lat_lon(" 1.5 , -2.25"), Some(LatLon::new(1.5, -2.25)));
        assert_eq!(parse_lat_lon("1.5"), None);
        assert_eq!(parse_lat_lon("north,south"), None);
    }

    #[test]
    fn round5_trims_to_five_decimals() {
        assert_eq!(round5(1.234_567_8), 1.234_57);
        assert_eq!(LatLon::new(-0.000_004, 2.0).rounded(), LatLon::new(-0.0, 2.0));
    }
}
