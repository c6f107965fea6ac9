/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres between two lat/lng points in degrees.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

pub fn valid_coordinates(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

/// Index and distance of the closest point. Ties keep the earlier entry.
pub fn nearest(origin: (f64, f64), points: &[(f64, f64)]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &(lat, lng)) in points.iter().enumerate() {
        let dist = haversine_km(origin.0, origin.1, lat, lng);
        match best {
            Some((_, d)) if dist >= d => {}
            _ => best = Some((i, dist)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_to_self() {
        assert!(haversine_km(14.5995, 120.9842, 14.5995, 120.9842).abs() < 1e-9);
    }

    #[test]
    fn manila_to_cebu_is_about_570_km() {
        let d = haversine_km(14.5995, 120.9842, 10.3157, 123.8854);
        assert!((d - 570.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = haversine_km(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111.19).abs() < 0.05, "got {d}");
    }

    #[test]
    fn coordinate_bounds() {
        assert!(valid_coordinates(-90.0, 180.0));
        assert!(!valid_coordinates(90.5, 0.0));
        assert!(!valid_coordinates(0.0, -181.0));
        assert!(!valid_coordinates(f64::NAN, 0.0));
    }

    #[test]
    fn nearest_picks_minimum_and_keeps_first_on_tie() {
        let origin = (14.60, 120.98);
        let branches = [(10.31, 123.88), (14.55, 121.02), (14.55, 121.02)];
        let (idx, dist) = nearest(origin, &branches).unwrap();
        assert_eq!(idx, 1);
        assert!(dist < 10.0);
        assert_eq!(nearest(origin, &[]), None);
    }
}
