use crate::models::driver::GeoPoint;

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

pub fn haversine_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_km(a, b) * 1_000.0
}

#[cfg(test)]
mod tests {
    use super::{haversine_km, haversine_meters};
    use crate::models::driver::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint::new(19.4326, -99.1332);
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn mexico_city_to_puebla_is_around_105_km() {
        let cdmx = GeoPoint::new(19.4326, -99.1332);
        let puebla = GeoPoint::new(19.0414, -98.2063);
        let distance = haversine_km(&cdmx, &puebla);
        assert!((distance - 105.0).abs() < 5.0);
    }

    #[test]
    fn small_jitter_is_tens_of_meters() {
        let from = GeoPoint::new(19.4326, -99.1332);
        let to = GeoPoint::new(19.4330, -99.1335);
        let meters = haversine_meters(&from, &to);
        assert!(meters > 40.0 && meters < 60.0, "got {meters}");
    }
}
