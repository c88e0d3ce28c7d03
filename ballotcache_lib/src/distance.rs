//! Great-circle distance between coordinates.

use serde::{Deserialize, Serialize};

/// Mean earth radius in statute miles.
pub const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Ballots farther than this from the voter are never substituted.
pub const MAX_SEARCH_RADIUS_MILES: f64 = 25.0;

/// Rough miles per degree of latitude, used only for the SQL prefilter box.
const MILES_PER_DEGREE: f64 = 69.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Distance in miles using the spherical law of cosines.
    pub fn miles_to(&self, other: &GeoPoint) -> f64 {
        if self == other {
            return 0.0;
        }
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let delta_lon = (other.longitude - self.longitude).to_radians();

        // Rounding can push the cosine a hair past 1.0 for identical points.
        let cos_angle = (lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * delta_lon.cos())
            .clamp(-1.0, 1.0);
        cos_angle.acos() * EARTH_RADIUS_MILES
    }
}

/// Latitude/longitude box that contains every point within `radius_miles`
/// of a center. Used to narrow SQL candidates before exact distances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    /// `None` when the box touches a pole and longitude gives no bound.
    pub longitude_range: Option<(f64, f64)>,
}

impl BoundingBox {
    pub fn around(center: GeoPoint, radius_miles: f64) -> Self {
        // Pad by 10% so the box never clips a point the exact check would keep.
        let lat_delta = radius_miles * 1.1 / MILES_PER_DEGREE;
        let min_latitude = center.latitude - lat_delta;
        let max_latitude = center.latitude + lat_delta;

        let widest = center.latitude.abs() + lat_delta;
        let longitude_range = if widest >= 89.0 {
            None
        } else {
            let lon_delta = lat_delta / widest.to_radians().cos();
            let min = center.longitude - lon_delta;
            let max = center.longitude + lon_delta;
            if min < -180.0 || max > 180.0 {
                None
            } else {
                Some((min, max))
            }
        };

        Self {
            min_latitude,
            max_latitude,
            longitude_range,
        }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        if point.latitude < self.min_latitude || point.latitude > self.max_latitude {
            return false;
        }
        match self.longitude_range {
            Some((min, max)) => point.longitude >= min && point.longitude <= max,
            None => true,
        }
    }
}
