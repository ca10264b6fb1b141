//! Point-in-polygon base district lookup against a GeoJSON boundary file.
//!
//! Coordinates in GeoJSON are `[longitude, latitude]`. Polygons and
//! multipolygons are both accepted, interior rings are holes. When a point sits
//! exactly on an edge shared by two districts the first feature in file order
//! wins.

use crate::core::label::{self, DistrictLabel};
use crate::domain::model::GeoPoint;
use crate::domain::ports::BaseDistrictSource;
use crate::utils::error::{LookupError, Result};
use async_trait::async_trait;
use geo::{BoundingRect, Coord, Intersects, LineString, MultiPolygon, Point, Polygon, Rect};
use serde_json::Value;

/// Property names that carry a ready-made label, in order of preference.
const LABEL_KEYS: &[&str] = &[
    "district",
    "district_name",
    "districtlabel",
    "district_label",
    "name",
    "label",
    "DISTRICT",
    "DIST_LABEL",
    "HOUSE_DIST",
    "HSE_DIST",
    "BASEHSE22",
    "basehse22",
    "BASE_LABEL",
];
const COUNTY_KEYS: &[&str] = &["county", "County", "COUNTY", "CNTY_NAME"];
const NUMBER_KEYS: &[&str] = &["district_n", "district_no", "DIST_NO", "DISTRICT_N", "HSE_DISTNO"];

struct District {
    label: DistrictLabel,
    bbox: Option<Rect<f64>>,
    shape: MultiPolygon<f64>,
}

pub struct BoundaryIndex {
    districts: Vec<District>,
}

impl BoundaryIndex {
    pub fn from_geojson_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let features = value["features"].as_array().ok_or_else(|| LookupError::Config {
            message: "boundary file is not a GeoJSON FeatureCollection".to_string(),
        })?;

        let mut districts = Vec::new();
        for feature in features {
            let Some(shape) = parse_geometry(&feature["geometry"]) else {
                continue;
            };
            let Some(label) = feature_label(&feature["properties"]) else {
                tracing::debug!("Skipping boundary feature without a usable district label");
                continue;
            };
            districts.push(District {
                label,
                bbox: shape.bounding_rect(),
                shape,
            });
        }
        tracing::info!("Loaded {} district boundaries", districts.len());
        Ok(Self { districts })
    }

    pub fn len(&self) -> usize {
        self.districts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.districts.is_empty()
    }

    /// First district (in file order) whose area or boundary contains the point.
    pub fn find(&self, point: GeoPoint) -> Option<&DistrictLabel> {
        let pt = Point::new(point.longitude, point.latitude);
        self.districts
            .iter()
            .filter(|d| d.bbox.map_or(true, |bbox| bbox.intersects(&pt)))
            .find(|d| d.shape.intersects(&pt))
            .map(|d| &d.label)
    }
}

#[async_trait]
impl BaseDistrictSource for BoundaryIndex {
    fn name(&self) -> &str {
        "boundary"
    }

    async fn base_district(&self, point: GeoPoint) -> Result<Option<DistrictLabel>> {
        Ok(self.find(point).cloned())
    }
}

fn feature_label(props: &Value) -> Option<DistrictLabel> {
    for key in LABEL_KEYS {
        if let Some(raw) = props.get(*key).and_then(value_text) {
            if let Ok(label) = label::normalize(&raw, None) {
                if label.is_canonical() {
                    return Some(label);
                }
            }
        }
    }

    let county = COUNTY_KEYS
        .iter()
        .find_map(|k| props.get(*k).and_then(value_text))?;
    let number = NUMBER_KEYS
        .iter()
        .find_map(|k| props.get(*k).and_then(value_text))?;
    label::normalize(&number, Some(&county))
        .ok()
        .filter(DistrictLabel::is_canonical)
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_geometry(geometry: &Value) -> Option<MultiPolygon<f64>> {
    let coords = geometry["coordinates"].as_array()?;
    match geometry["type"].as_str()? {
        "Polygon" => parse_polygon(coords).map(|p| MultiPolygon(vec![p])),
        "MultiPolygon" => {
            let polygons: Vec<_> = coords
                .iter()
                .filter_map(Value::as_array)
                .filter_map(|p| parse_polygon(p))
                .collect();
            (!polygons.is_empty()).then_some(MultiPolygon(polygons))
        }
        _ => None,
    }
}

/// `[exterior, hole, hole, ...]`
fn parse_polygon(rings: &[Value]) -> Option<Polygon<f64>> {
    let mut rings = rings.iter().filter_map(Value::as_array).map(|r| parse_ring(r));
    let exterior = rings.next()??;
    let interiors = rings.flatten().collect();
    Some(Polygon::new(exterior, interiors))
}

fn parse_ring(coords: &[Value]) -> Option<LineString<f64>> {
    let points: Vec<Coord<f64>> = coords
        .iter()
        .filter_map(Value::as_array)
        .filter_map(|pair| {
            Some(Coord {
                x: pair.first()?.as_f64()?,
                y: pair.get(1)?.as_f64()?,
            })
        })
        .collect();
    // Polygon::new closes the ring if needed.
    (points.len() >= 3).then(|| LineString(points))
}
