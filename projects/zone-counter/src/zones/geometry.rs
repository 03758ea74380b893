use geo::algorithm::coordinate_position::{CoordPos, CoordinatePosition};
use geo_types::{Coord, LineString, Polygon};

/// Integer pixel coordinate in working-resolution space.
pub type ZonePoint = [i32; 2];

/// Convert zone points to a geo_types Polygon (the ring is closed implicitly)
pub fn to_geo_polygon(points: &[ZonePoint]) -> Polygon<f64> {
    let coords: Vec<(f64, f64)> = points
        .iter()
        .map(|p| (p[0] as f64, p[1] as f64))
        .collect();
    Polygon::new(LineString::from(coords), vec![])
}

/// Point-in-polygon test; points on an edge or vertex count as inside.
pub fn contains_point(polygon: &Polygon<f64>, x: f64, y: f64) -> bool {
    polygon.coordinate_position(&Coord { x, y }) != CoordPos::Outside
}

/// Vertex mean, used as the anchor for zone labels.
pub fn label_anchor(points: &[ZonePoint]) -> ZonePoint {
    if points.is_empty() {
        return [0, 0];
    }
    let n = points.len() as i64;
    let (sx, sy) = points.iter().fold((0i64, 0i64), |(sx, sy), p| {
        (sx + p[0] as i64, sy + p[1] as i64)
    });
    [(sx / n) as i32, (sy / n) as i32]
}
