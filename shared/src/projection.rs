//! Geographic (EPSG:4326, lon/lat degrees) to planar web mercator
//! (EPSG:3857, metres) and back.

use crate::geojson::{Feature, Geometry, Position};

pub const EARTH_RADIUS_M: f64 = 6_378_137.0;
/// Latitude at which web mercator becomes square.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

pub fn lonlat_to_planar(p: Position) -> Position {
    let lat = p.y.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = EARTH_RADIUS_M * p.x.to_radians();
    let y = EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    Position::new(x, y)
}

pub fn planar_to_lonlat(p: Position) -> Position {
    let lon = (p.x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (p.y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    Position::new(lon, lat)
}

pub fn geometry_to_planar(geometry: &Geometry) -> Geometry {
    geometry.map_positions(lonlat_to_planar)
}

pub fn geometry_to_lonlat(geometry: &Geometry) -> Geometry {
    geometry.map_positions(planar_to_lonlat)
}

/// Reproject a feature's geometry to lon/lat for submission to a store.
pub fn feature_to_lonlat(mut feature: Feature) -> Feature {
    feature.geometry = feature.geometry.as_ref().map(geometry_to_lonlat);
    feature
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        let diff = (actual - expected).abs();
        assert!(
            diff < tolerance,
            "expected {expected}, got {actual} (diff: {diff})"
        );
    }

    #[test]
    fn origin_maps_to_origin() {
        let p = lonlat_to_planar(Position::new(0.0, 0.0));
        assert_close(p.x, 0.0, 1e-9);
        assert_close(p.y, 0.0, 1e-6);
    }

    #[test]
    fn antimeridian_is_half_circumference() {
        let p = lonlat_to_planar(Position::new(180.0, 0.0));
        assert_close(p.x, 20_037_508.342_789_244, 1e-6);
    }

    #[test]
    fn round_trip_is_stable() {
        let dakar = Position::new(-17.35, 14.76);
        let back = planar_to_lonlat(lonlat_to_planar(dakar));
        assert_close(back.x, dakar.x, 1e-9);
        assert_close(back.y, dakar.y, 1e-9);
    }

    #[test]
    fn polar_latitudes_are_clamped() {
        let p = lonlat_to_planar(Position::new(0.0, 90.0));
        assert!(p.y.is_finite());
        assert_close(p.y, lonlat_to_planar(Position::new(0.0, MAX_LATITUDE)).y, 1e-6);
    }

    #[test]
    fn geometry_structure_is_preserved() {
        let polygon = Geometry::Polygon(vec![vec![
            Position::new(-17.0, 14.0),
            Position::new(-16.0, 14.0),
            Position::new(-16.0, 15.0),
            Position::new(-17.0, 14.0),
        ]]);
        let Geometry::Polygon(rings) = geometry_to_lonlat(&geometry_to_planar(&polygon)) else {
            panic!("polygon should stay a polygon");
        };
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].len(), 4);
        assert_close(rings[0][2].y, 15.0, 1e-9);
    }
}
