//! Named inclusion/exclusion polygons.
//!
//! File format: a `[name]` line opens a polygon, each following `lat,lon`
//! line appends a vertex. Blank lines and `#` comments are skipped.

use crate::error::GeofenceError;
use crate::geo::{parse_lat_lon, BoundingBox, LatLon};

#[derive(Clone, Debug, PartialEq)]
pub struct Geofence {
    pub name: String,
    vertices: Vec<LatLon>,
    bbox: Option<BoundingBox>,
}

impl Geofence {
    pub fn new(name: impl Into<String>, vertices: Vec<LatLon>) -> Self {
        let bbox = if vertices.len() >= 3 {
            BoundingBox::from_points(vertices.iter().copied())
        } else {
            None
        };
        Self {
            name: name.into(),
            vertices,
            bbox,
        }
    }

    pub fn vertices(&self) -> &[LatLon] {
        &self.vertices
    }

    /// `None` for degenerate polygons (fewer than 3 vertices).
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.bbox
    }

    /// Edge-parity ray cast. Each edge counts its upper longitude endpoint
    /// only, so a ray through a shared vertex is counted once.
    pub fn contains(&self, point: LatLon) -> bool {
        let Some(bbox) = self.bbox else {
            return false;
        };
        if !bbox.contains(point) {
            return false;
        }

        let n = self.vertices.len();
        let mut inside = false;
        let mut a = self.vertices[0];
        for i in 1..=n {
            let b = self.vertices[i % n];
            if point.lon > a.lon.min(b.lon)
                && point.lon <= a.lon.max(b.lon)
                && point.lat <= a.lat.max(b.lat)
            {
                // a.lon != b.lon is implied by the strict/inclusive bounds above.
                let crossing = (point.lon - a.lon) * (b.lat - a.lat) / (b.lon - a.lon) + a.lat;
                if a.lat == b.lat || point.lat <= crossing {
                    inside = !inside;
                }
            }
            a = b;
        }
        inside
    }
}

pub fn parse_geofences(text: &str) -> Result<Vec<Geofence>, GeofenceError> {
    let mut fences = Vec::new();
    let mut name = String::new();
    let mut vertices = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            if !vertices.is_empty() || !name.is_empty() {
                fences.push(Geofence::new(std::mem::take(&mut name), std::mem::take(&mut vertices)));
            }
            name = header.trim().to_string();
            continue;
        }
        let vertex = parse_lat_lon(line).ok_or_else(|| GeofenceError::InvalidVertex {
            line: index + 1,
            text: line.to_string(),
        })?;
        vertices.push(vertex);
    }

    if !vertices.is_empty() || !name.is_empty() {
        fences.push(Geofence::new(name, vertices));
    }
    Ok(fences)
}

/// Comma separated, case-insensitive. An empty filter matches everything.
pub fn name_matches(name: &str, filter: Option<&str>) -> bool {
    let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) else {
        return true;
    };
    filter
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .any(|entry| entry.eq_ignore_ascii_case(name))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeofenceSet {
    included: Vec<Geofence>,
    excluded: Vec<Geofence>,
}

impl GeofenceSet {
    pub fn new(included: Vec<Geofence>, excluded: Vec<Geofence>) -> Self {
        Self { included, excluded }
    }

    pub fn from_texts(
        included: Option<&str>,
        excluded: Option<&str>,
    ) -> Result<Self, GeofenceError> {
        Ok(Self {
            included: included.map(parse_geofences).transpose()?.unwrap_or_default(),
            excluded: excluded.map(parse_geofences).transpose()?.unwrap_or_default(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.included.is_empty() && self.excluded.is_empty()
    }

    pub fn included(&self) -> &[Geofence] {
        &self.included
    }

    pub fn excluded(&self) -> &[Geofence] {
        &self.excluded
    }

    /// Exclusion wins over everything, then a missing inclusion set admits
    /// the point, otherwise an inclusion polygon matching `filter` must
    /// contain it.
    pub fn allows(&self, point: LatLon, filter: Option<&str>) -> bool {
        if self.excluded.iter().any(|fence| fence.contains(point)) {
            return false;
        }
        if self.included.is_empty() {
            return true;
        }
        self.included
            .iter()
            .filter(|fence| name_matches(&fence.name, filter))
            .any(|fence| fence.contains(point))
    }

    /// Union bounding box of the inclusion polygons matching `filter`.
    pub fn boundary(&self, filter: Option<&str>) -> Option<BoundingBox> {
        self.included
            .iter()
            .filter(|fence| name_matches(&fence.name, filter))
            .filter_map(Geofence::bounding_box)
            .reduce(BoundingBox::union)
    }

    pub fn retain_allowed<T>(
        &self,
        items: Vec<T>,
        filter: Option<&str>,
        location: impl Fn(&T) -> LatLon,
    ) -> Vec<T> {
        if self.is_empty() {
            return items;
        }
        items
            .into_iter()
            .filter(|item| self.allows(location(item), filter))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(name: &str, min: f64, max: f64) -> Geofence {
        Geofence::new(
            name,
            vec![
                LatLon::new(min, min),
                LatLon::new(min, max),
                LatLon::new(max, max),
                LatLon::new(max, min),
            ],
        )
    }

    #[test]
    fn square_contains_interior_and_rejects_exterior() {
        let fence = square("park", 0.0, 1.0);
        assert!(fence.contains(LatLon::new(0.5, 0.5)));
        assert!(!fence.contains(LatLon::new(1.5, 0.5)));
        assert!(!fence.contains(LatLon::new(0.5, -0.1)));
    }

    #[test]
    fn concave_polygon_notch_is_outside() {
        // A "U": the notch between the arms is outside.
        let fence = Geofence::new(
            "u",
            vec![
                LatLon::new(0.0, 0.0),
                LatLon::new(0.0, 3.0),
                LatLon::new(3.0, 3.0),
                LatLon::new(3.0, 2.0),
                LatLon::new(1.0, 2.0),
                LatLon::new(1.0, 1.0),
                LatLon::new(3.0, 1.0),
                LatLon::new(3.0, 0.0),
            ],
        );
        assert!(fence.contains(LatLon::new(0.5, 1.5)));
        assert!(fence.contains(LatLon::new(2.0, 0.5)));
        assert!(!fence.contains(LatLon::new(2.0, 1.5)));
    }

    #[test]
    fn ray_through_vertex_is_counted_once() {
        let diamond = Geofence::new(
            "diamond",
            vec![
                LatLon::new(0.0, 1.0),
                LatLon::new(1.0, 2.0),
                LatLon::new(2.0, 1.0),
                LatLon::new(1.0, 0.0),
            ],
        );
        assert!(diamond.contains(LatLon::new(0.5, 1.0)));
        assert!(diamond.contains(LatLon::new(1.5, 1.0)));
        assert!(!diamond.contains(LatLon::new(2.5, 1.0)));
    }

    #[test]
    fn degenerate_polygon_never_contains() {
        let line = Geofence::new("line", vec![LatLon::new(0.0, 0.0), LatLon::new(1.0, 1.0)]);
        assert!(line.bounding_box().is_none());
        assert!(!line.contains(LatLon::new(0.5, 0.5)));
        assert!(!Geofence::new("empty", Vec::new()).contains(LatLon::new(0.0, 0.0)));
    }

    #[test]
    fn exclusion_beats_inclusion() {
        let set = GeofenceSet::new(vec![square("city", 0.0, 10.0)], vec![square("lake", 4.0, 6.0)]);
        assert!(set.allows(LatLon::new(1.0, 1.0), None));
        assert!(!set.allows(LatLon::new(5.0, 5.0), None));
        assert!(!set.allows(LatLon::new(5.0, 5.0), Some("city")));
    }

    #[test]
    fn no_inclusion_set_admits_everything_outside_exclusions() {
        let set = GeofenceSet::new(Vec::new(), vec![square("lake", 4.0, 6.0)]);
        assert!(set.allows(LatLon::new(50.0, 50.0), Some("anything")));
        assert!(!set.allows(LatLon::new(5.0, 5.0), None));
    }

    #[test]
    fn name_filter_selects_inclusion_polygons() {
        let set = GeofenceSet::new(
            vec![square("North", 0.0, 1.0), square("South", 2.0, 3.0)],
            Vec::new(),
        );
        let north = LatLon::new(0.5, 0.5);
        assert!(set.allows(north, Some("north")));
        assert!(set.allows(north, Some("south, NORTH")));
        assert!(!set.allows(north, Some("south")));
        assert!(set.allows(north, Some("")));
    }

    #[test]
    fn boundary_unions_matching_fences() {
        let set = GeofenceSet::new(
            vec![square("a", 0.0, 1.0), square("b", 2.0, 3.0)],
            Vec::new(),
        );
        let both = set.boundary(None).unwrap();
        assert_eq!((both.min_lat, both.max_lat), (0.0, 3.0));
        let only_b = set.boundary(Some("b")).unwrap();
        assert_eq!((only_b.min_lon, only_b.max_lon), (2.0, 3.0));
        assert!(set.boundary(Some("c")).is_none());
    }

    #[test]
    fn parses_named_polygons() {
        let text = "# city limits\n[Downtown]\n0,0\n0,1\n1,1\n\n[Harbor]\n2,2\n2,3\n3,3\n";
        let fences = parse_geofences(text).unwrap();
        assert_eq!(fences.len(), 2);
        assert_eq!(fences[0].name, "Downtown");
        assert_eq!(fences[1].vertices().len(), 3);
    }

    #[test]
    fn parse_reports_bad_vertex_line() {
        let err = parse_geofences("[x]\n0,0\nnot a point\n").unwrap_err();
        assert_eq!(
            err,
            GeofenceError::InvalidVertex {
                line: 3,
                text: "not a point".to_string()
            }
        );
    }
}
