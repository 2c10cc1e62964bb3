//! Geographic values used by geo queries, aggregations, and sorts.

use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

impl GeoPoint {
    /// Create a validated point.
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(SearchError::invalid(format!(
                "latitude {} is outside [-90, 90]",
                lat
            )));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(SearchError::invalid(format!(
                "longitude {} is outside [-180, 180]",
                lon
            )));
        }
        Ok(Self { lat, lon })
    }

    /// Object form: `{"lat": .., "lon": ..}`.
    pub fn to_json(&self) -> Value {
        json!({ "lat": self.lat, "lon": self.lon })
    }

    /// GeoJSON position: `[lon, lat]`.
    pub fn to_position(&self) -> Value {
        json!([self.lon, self.lat])
    }

    /// Parse either wire form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => {
                let lat = map.get("lat")?.as_f64()?;
                let lon = map.get("lon")?.as_f64()?;
                Some(Self { lat, lon })
            }
            Value::Array(items) if items.len() == 2 => Some(Self {
                lon: items[0].as_f64()?,
                lat: items[1].as_f64()?,
            }),
            _ => None,
        }
    }
}

/// Distance units accepted by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    /// Kilometers.
    Kilometers,
    /// Meters.
    Meters,
    /// Centimeters.
    Centimeters,
    /// Millimeters.
    Millimeters,
    /// Miles.
    Miles,
    /// Yards.
    Yards,
    /// Feet.
    Feet,
    /// Inches.
    Inches,
    /// Nautical miles.
    NauticalMiles,
}

impl DistanceUnit {
    /// Wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceUnit::Kilometers => "km",
            DistanceUnit::Meters => "m",
            DistanceUnit::Centimeters => "cm",
            DistanceUnit::Millimeters => "mm",
            DistanceUnit::Miles => "mi",
            DistanceUnit::Yards => "yd",
            DistanceUnit::Feet => "ft",
            DistanceUnit::Inches => "in",
            DistanceUnit::NauticalMiles => "nmi",
        }
    }

    /// Parse a wire spelling.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "km" => DistanceUnit::Kilometers,
            "m" => DistanceUnit::Meters,
            "cm" => DistanceUnit::Centimeters,
            "mm" => DistanceUnit::Millimeters,
            "mi" => DistanceUnit::Miles,
            "yd" => DistanceUnit::Yards,
            "ft" => DistanceUnit::Feet,
            "in" => DistanceUnit::Inches,
            "nmi" | "NM" => DistanceUnit::NauticalMiles,
            _ => return None,
        })
    }
}

/// A distance with its unit, rendered as `"3km"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distance {
    /// Magnitude.
    pub value: f64,
    /// Unit.
    pub unit: DistanceUnit,
}

impl Distance {
    /// Create a non-negative distance.
    pub fn new(value: f64, unit: DistanceUnit) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(SearchError::invalid(format!(
                "distance {} must be a non-negative number",
                value
            )));
        }
        Ok(Self { value, unit })
    }

    /// Shorthand for kilometers.
    pub fn km(value: f64) -> Result<Self> {
        Self::new(value, DistanceUnit::Kilometers)
    }

    /// Parse `"3km"`, `"500m"`, `"1.5mi"`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let split = s.find(|c: char| c.is_ascii_alphabetic())?;
        let (number, unit) = s.split_at(split);
        let value = number.trim().parse().ok()?;
        Self::new(value, DistanceUnit::parse(unit)?).ok()
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.as_str())
    }
}

/// How distances are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeoDistanceType {
    /// Great-circle distance.
    #[default]
    Arc,
    /// Faster planar approximation.
    Plane,
}

impl GeoDistanceType {
    /// Wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoDistanceType::Arc => "arc",
            GeoDistanceType::Plane => "plane",
        }
    }

    /// Parse a wire spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "arc" => Some(GeoDistanceType::Arc),
            "plane" => Some(GeoDistanceType::Plane),
            _ => None,
        }
    }
}

/// Spatial relation between an indexed shape and a query shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeoShapeRelation {
    /// Shapes overlap.
    #[default]
    Intersects,
    /// Shapes do not overlap.
    Disjoint,
    /// Indexed shape lies within the query shape.
    Within,
    /// Indexed shape contains the query shape.
    Contains,
}

impl GeoShapeRelation {
    /// Wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoShapeRelation::Intersects => "intersects",
            GeoShapeRelation::Disjoint => "disjoint",
            GeoShapeRelation::Within => "within",
            GeoShapeRelation::Contains => "contains",
        }
    }

    /// Parse a wire spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "intersects" => Some(GeoShapeRelation::Intersects),
            "disjoint" => Some(GeoShapeRelation::Disjoint),
            "within" => Some(GeoShapeRelation::Within),
            "contains" => Some(GeoShapeRelation::Contains),
            _ => None,
        }
    }
}

/// An inline GeoJSON shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// A single point.
    Point(GeoPoint),
    /// Axis-aligned rectangle, upper-left and lower-right corners.
    Envelope {
        /// Upper-left corner.
        top_left: GeoPoint,
        /// Lower-right corner.
        bottom_right: GeoPoint,
    },
    /// Polygon with an outer ring and optional holes.
    Polygon(Vec<Vec<GeoPoint>>),
}

impl Shape {
    /// Create an envelope; the top edge must not lie below the bottom edge.
    pub fn envelope(top_left: GeoPoint, bottom_right: GeoPoint) -> Result<Self> {
        if top_left.lat < bottom_right.lat {
            return Err(SearchError::invalid(
                "envelope top-left latitude is below bottom-right latitude",
            ));
        }
        Ok(Shape::Envelope {
            top_left,
            bottom_right,
        })
    }

    /// Create a polygon from closed rings of at least four positions.
    pub fn polygon(rings: Vec<Vec<GeoPoint>>) -> Result<Self> {
        if rings.is_empty() {
            return Err(SearchError::invalid("polygon requires an outer ring"));
        }
        for ring in &rings {
            if ring.len() < 4 {
                return Err(SearchError::invalid(
                    "polygon ring requires at least four positions",
                ));
            }
            if ring.first() != ring.last() {
                return Err(SearchError::invalid("polygon ring must be closed"));
            }
        }
        Ok(Shape::Polygon(rings))
    }

    /// GeoJSON form.
    pub fn to_json(&self) -> Value {
        match self {
            Shape::Point(point) => json!({
                "type": "point",
                "coordinates": point.to_position(),
            }),
            Shape::Envelope {
                top_left,
                bottom_right,
            } => json!({
                "type": "envelope",
                "coordinates": [top_left.to_position(), bottom_right.to_position()],
            }),
            Shape::Polygon(rings) => json!({
                "type": "polygon",
                "coordinates": rings
                    .iter()
                    .map(|ring| ring.iter().map(GeoPoint::to_position).collect::<Vec<_>>())
                    .collect::<Vec<_>>(),
            }),
        }
    }

    /// Parse GeoJSON.
    pub fn from_json(value: &Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?.to_ascii_lowercase();
        let coordinates = value.get("coordinates")?;
        match kind.as_str() {
            "point" => GeoPoint::from_json(coordinates).map(Shape::Point),
            "envelope" => {
                let corners = coordinates.as_array()?;
                Some(Shape::Envelope {
                    top_left: GeoPoint::from_json(corners.first()?)?,
                    bottom_right: GeoPoint::from_json(corners.get(1)?)?,
                })
            }
            "polygon" => {
                let rings = coordinates
                    .as_array()?
                    .iter()
                    .map(|ring| {
                        ring.as_array()?
                            .iter()
                            .map(GeoPoint::from_json)
                            .collect::<Option<Vec<_>>>()
                    })
                    .collect::<Option<Vec<_>>>()?;
                Some(Shape::Polygon(rings))
            }
            _ => None,
        }
    }
}

/// A shape stored in another document.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedShape {
    /// Index holding the shape document.
    pub index: String,
    /// Shape document id.
    pub id: String,
    /// Field holding the shape.
    pub path: String,
}

impl IndexedShape {
    /// Reference a stored shape.
    pub fn new(
        index: impl Into<String>,
        id: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<Self> {
        let shape = Self {
            index: index.into(),
            id: id.into(),
            path: path.into(),
        };
        if shape.index.is_empty() || shape.id.is_empty() || shape.path.is_empty() {
            return Err(SearchError::invalid(
                "indexed shape requires index, id, and path",
            ));
        }
        Ok(shape)
    }
}

/// A bounding box as reported by a `geo_bounds` aggregation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBox {
    /// Upper-left corner.
    pub top_left: GeoPoint,
    /// Lower-right corner.
    pub bottom_right: GeoPoint,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_validation() {
        assert!(GeoPoint::new(31.2, 121.4).is_ok());
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -180.5).is_err());
    }

    #[test]
    fn test_point_wire_forms() {
        let point = GeoPoint::new(40.0, 116.0).unwrap();
        assert_eq!(point.to_position(), json!([116.0, 40.0]));
        assert_eq!(GeoPoint::from_json(&json!([116.0, 40.0])), Some(point));
        assert_eq!(
            GeoPoint::from_json(&json!({"lat": 40.0, "lon": 116.0})),
            Some(point)
        );
    }

    #[test]
    fn test_distance_display_and_parse() {
        let distance = Distance::km(3.0).unwrap();
        assert_eq!(distance.to_string(), "3km");
        assert_eq!(Distance::parse("3km"), Some(distance));
        assert_eq!(
            Distance::parse("1.5mi"),
            Some(Distance::new(1.5, DistanceUnit::Miles).unwrap())
        );
        assert!(Distance::parse("far").is_none());
        assert!(Distance::new(-1.0, DistanceUnit::Meters).is_err());
    }

    #[test]
    fn test_polygon_requires_closed_ring() {
        let a = GeoPoint::new(0.0, 0.0).unwrap();
        let b = GeoPoint::new(0.0, 1.0).unwrap();
        let c = GeoPoint::new(1.0, 1.0).unwrap();

        assert!(Shape::polygon(vec![vec![a, b, c]]).is_err());
        assert!(Shape::polygon(vec![vec![a, b, c, b]]).is_err());
        assert!(Shape::polygon(vec![vec![a, b, c, a]]).is_ok());
    }

    #[test]
    fn test_envelope_orientation() {
        let top_left = GeoPoint::new(40.0, 116.0).unwrap();
        let bottom_right = GeoPoint::new(39.0, 117.0).unwrap();
        assert!(Shape::envelope(top_left, bottom_right).is_ok());
        assert!(Shape::envelope(bottom_right, top_left).is_err());
    }

    #[test]
    fn test_shape_json_inverse() {
        let shape = Shape::envelope(
            GeoPoint::new(40.0, 116.0).unwrap(),
            GeoPoint::new(39.0, 117.0).unwrap(),
        )
        .unwrap();
        let encoded = shape.to_json();
        assert_eq!(encoded["type"], "envelope");
        assert_eq!(Shape::from_json(&encoded), Some(shape));
    }
}
