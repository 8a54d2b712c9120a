//! Great-circle distance between WGS84 coordinates.

/// Mean Earth radius in meters used by every straight-line distance.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A longitude/latitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Haversine distance to `other`, rounded to whole meters.
    pub fn distance_to(&self, other: &Self) -> f64 {
        haversine(self.lon, self.lat, other.lon, other.lat)
    }

    /// Format as the `lon,lat` pair routing services expect in URL paths.
    pub fn to_path_segment(&self) -> String {
        format!("{},{}", self.lon, self.lat)
    }
}

/// Haversine great-circle distance in meters, rounded to the nearest meter.
///
/// Inputs are not range-checked; NaN or infinite coordinates produce a
/// non-finite result.
pub fn haversine(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (lon1, lat1, lon2, lat2) = (
        lon1.to_radians(),
        lat1.to_radians(),
        lon2.to_radians(),
        lat2.to_radians(),
    );
    let dlon = lon2 - lon1;
    let dlat = lat2 - lat1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // clamp guards asin against rounding slightly above 1 for antipodal points
    let c = 2.0 * a.sqrt().clamp(0.0, 1.0).asin();
    (EARTH_RADIUS_METERS * c).round()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_points_are_zero_meters_apart() {
        assert_eq!(haversine(-122.33, 47.61, -122.33, 47.61), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = haversine(-122.33, 47.61, -122.30, 47.65);
        let b = haversine(-122.30, 47.65, -122.33, 47.61);
        assert_eq!(a, b);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let meters = haversine(0.0, 0.0, 0.0, 1.0);
        assert_eq!(meters, 111_195.0);
    }

    #[test]
    fn nan_input_propagates() {
        assert!(haversine(f64::NAN, 0.0, 0.0, 0.0).is_nan());
    }

    #[test]
    fn coordinate_path_segment_is_lon_then_lat() {
        let coordinate = Coordinate::new(-122.33, 47.61);
        assert_eq!(coordinate.to_path_segment(), "-122.33,47.61");
    }
}
