//! Great-circle distance and initial bearing on a spherical Earth.

use crate::types::GeoPoint;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters.
///
/// Swapping the arguments yields the identical value: the latitude delta is
/// squared and the cosine product is commutative.
pub fn distance(a: GeoPoint, b: GeoPoint) -> f64 {
    if a == b {
        return 0.0;
    }

    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points
    let c = 2.0 * h.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Initial bearing from `a` towards `b`, degrees clockwise from north in `[0, 360)`.
///
/// Identical points have no direction; the bearing is defined as 0.
pub fn bearing(a: GeoPoint, b: GeoPoint) -> f64 {
    if a == b {
        return 0.0;
    }

    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();

    normalize_degrees(y.atan2(x).to_degrees())
}

/// Fold any angle into `[0, 360)`.
pub(crate) fn normalize_degrees(deg: f64) -> f64 {
    let folded = deg.rem_euclid(360.0);
    // rem_euclid of a tiny negative value rounds up to exactly 360
    if folded >= 360.0 {
        0.0
    } else {
        folded
    }
}

/// Smallest angle between two bearings, in `[0, 180]`.
pub(crate) fn angular_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % 360.0;
    diff.min(360.0 - diff)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon)
    }

    fn assert_rel_eq(a: f64, b: f64) {
        let scale = a.abs().max(b.abs()).max(1.0);
        assert!((a - b).abs() / scale < 1e-6, "{} != {}", a, b);
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        assert_eq!(distance(p(0.0, 0.0), p(0.0, 0.0)), 0.0);
        assert_eq!(distance(p(78.22, 15.65), p(78.22, 15.65)), 0.0);
        assert_eq!(distance(p(-90.0, 0.0), p(-90.0, 0.0)), 0.0);
    }

    #[test]
    fn test_one_degree_at_equator() {
        let d = distance(p(0.0, 0.0), p(0.0, 1.0));
        assert!(110_000.0 < d && d < 112_000.0, "got {}", d);
    }

    #[test]
    fn test_grenoble_to_lyon() {
        let d = distance(p(45.1885, 5.7278), p(45.7640, 4.8357));
        assert!(80_000.0 < d && d < 100_000.0, "got {}", d);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let points = [
            p(0.0, 0.0),
            p(78.22, 15.65),
            p(78.92, 11.93),
            p(-33.86, 151.21),
            p(45.8326, 6.8586),
            p(89.9, -179.9),
            p(-89.9, 179.9),
        ];
        for a in points {
            for b in points {
                assert_rel_eq(distance(a, b), distance(b, a));
            }
        }
    }

    #[test]
    fn test_antipodal_distance_is_half_circumference() {
        let d = distance(p(0.0, 0.0), p(0.0, 180.0));
        assert_rel_eq(d, std::f64::consts::PI * EARTH_RADIUS_M);
    }

    #[test]
    fn test_cardinal_bearings() {
        let east = bearing(p(0.0, 0.0), p(0.0, 1.0));
        assert!((east - 90.0).abs() < 1e-9, "east {}", east);

        let north = bearing(p(0.0, 0.0), p(1.0, 0.0));
        assert!(north.abs() < 1e-9, "north {}", north);

        let west = bearing(p(0.0, 0.0), p(0.0, -1.0));
        assert!((west - 270.0).abs() < 1e-9, "west {}", west);

        let south = bearing(p(1.0, 0.0), p(0.0, 0.0));
        assert!((south - 180.0).abs() < 1e-9, "south {}", south);
    }

    #[test]
    fn test_bearing_to_self_is_zero() {
        assert_eq!(bearing(p(0.0, 0.0), p(0.0, 0.0)), 0.0);
        assert_eq!(bearing(p(78.5, 15.0), p(78.5, 15.0)), 0.0);
    }

    #[test]
    fn test_bearing_is_directional() {
        let a = p(78.22, 15.65);
        let b = p(78.92, 11.93);
        let ab = bearing(a, b);
        let ba = bearing(b, a);
        // On a sphere the return bearing is not simply ab + 180
        assert!((ab - 315.33).abs() < 0.01, "ab {}", ab);
        assert!((ba - 131.68).abs() < 0.01, "ba {}", ba);
        assert!(((ab + 180.0) % 360.0 - ba).abs() > 1.0);
    }

    #[test]
    fn test_bearing_stays_in_range() {
        let points = [p(0.0, 0.0), p(10.0, -170.0), p(-45.0, 179.0), p(89.0, 0.0), p(-89.0, 90.0)];
        for a in points {
            for b in points {
                let br = bearing(a, b);
                assert!((0.0..360.0).contains(&br), "bearing {} out of range", br);
            }
        }
    }

    #[test]
    fn test_normalize_degrees() {
        assert_eq!(normalize_degrees(-90.0), 270.0);
        assert_eq!(normalize_degrees(360.0), 0.0);
        assert_eq!(normalize_degrees(-1e-18), 0.0);
        assert_eq!(normalize_degrees(725.0), 5.0);
    }

    #[test]
    fn test_angular_difference_wraps() {
        assert_eq!(angular_difference(350.0, 10.0), 20.0);
        assert_eq!(angular_difference(10.0, 350.0), 20.0);
        assert_eq!(angular_difference(90.0, 270.0), 180.0);
    }
}
