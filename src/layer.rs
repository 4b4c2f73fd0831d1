use std::fmt;
use std::io::{Read, Write};

use geo::{BoundingRect, Geometry, Rect};
use geojson::{
    Feature as GeoJsonFeature, FeatureCollection, GeoJson, Geometry as GeoJsonGeometry,
    Value as GeoJsonValue,
};
use geozero::wkb::Wkb;
use geozero::ToGeo;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::reader::{Record, Value};

pub type Properties = Map<String, JsonValue>;

/// Coordinate reference system identifier such as `EPSG:3857`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Crs(String);

impl Crs {
    pub fn new(code: &str) -> Self {
        Crs(code.trim().to_uppercase())
    }

    pub fn epsg(code: u32) -> Self {
        Crs(format!("EPSG:{}", code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub properties: Properties,
}

impl Feature {
    pub fn new(geometry: impl Into<Geometry<f64>>, properties: Properties) -> Self {
        Self {
            geometry: geometry.into(),
            properties,
        }
    }
}

/// Features sharing one coordinate reference system.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryLayer {
    crs: Crs,
    features: Vec<Feature>,
}

impl GeometryLayer {
    pub fn new(crs: Crs) -> Self {
        Self {
            crs,
            features: Vec::new(),
        }
    }

    pub fn from_features(crs: Crs, features: Vec<Feature>) -> Self {
        Self { crs, features }
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Build a layer from reader records.
    ///
    /// The geometry column holds WKB (GeoParquet) or GeoJSON text (delimited
    /// files); every other column becomes an attribute. Rows with a null
    /// geometry are skipped.
    pub fn from_records<I>(records: I, geometry_column: &str, crs: Crs) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        let mut layer = GeometryLayer::new(crs);
        let mut skipped = 0usize;

        for (index, record) in records.into_iter().enumerate() {
            let record = record?;
            let geometry = match record.get(geometry_column) {
                Some(Value::Null) => {
                    skipped += 1;
                    continue;
                }
                Some(value) => decode_geometry(value).map_err(|reason| {
                    Error::decode(&format!("{} (row {})", geometry_column, index), reason)
                })?,
                None => {
                    return Err(Error::Validation(format!(
                        "Geometry column '{}' not found in records",
                        geometry_column
                    )))
                }
            };

            let properties = record
                .iter()
                .filter(|(name, _)| *name != geometry_column)
                .map(|(name, value)| (name.to_string(), value.to_json()))
                .collect();
            layer.push(Feature::new(geometry, properties));
        }

        if skipped > 0 {
            warn!(skipped, geometry_column, "Skipped rows without geometry");
        }
        debug!(features = layer.len(), crs = %layer.crs, "Built layer from records");
        Ok(layer)
    }

    /// Read a GeoJSON FeatureCollection. Features without a geometry, or with
    /// a geometry type other than (multi)polygon or linestring, are skipped.
    pub fn from_geojson_reader<R: Read>(reader: R, crs: Crs) -> Result<Self> {
        let geojson = GeoJson::from_reader(reader)
            .map_err(|e| Error::decode("GeoJSON input", e))?;

        let fc = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            _ => {
                return Err(Error::decode(
                    "GeoJSON input",
                    "expected a FeatureCollection",
                ))
            }
        };

        let total_features = fc.features.len();
        let mut layer = GeometryLayer::new(crs);
        for feature in fc.features.into_iter() {
            if let Some(geometry) = feature.geometry {
                match geometry_from_geojson(geometry.value) {
                    Ok(Some(geom)) => {
                        layer.push(Feature::new(geom, feature.properties.unwrap_or_default()))
                    }
                    Ok(None) => continue,
                    Err(reason) => return Err(Error::decode("GeoJSON input", reason)),
                }
            }
        }
        info!(total_features, loaded = layer.len(), "Loaded GeoJSON layer");
        Ok(layer)
    }

    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .features
            .iter()
            .map(|feature| GeoJsonFeature {
                bbox: None,
                geometry: Some(GeoJsonGeometry::new(GeoJsonValue::from(&feature.geometry))),
                id: None,
                properties: Some(feature.properties.clone()),
                foreign_members: None,
            })
            .collect();

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    pub fn write_geojson<W: Write>(&self, writer: W) -> Result<()> {
        let feature_collection = self.to_feature_collection();
        serde_json::to_writer_pretty(writer, &feature_collection)
            .map_err(|e| Error::Io(e.into()))?;
        Ok(())
    }

    /// Bounding rectangle over every feature, `None` for an empty layer.
    pub fn total_bounds(&self) -> Option<Rect<f64>> {
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        let mut found = false;

        for feature in &self.features {
            if let Some(bbox) = feature.geometry.bounding_rect() {
                min_x = min_x.min(bbox.min().x);
                min_y = min_y.min(bbox.min().y);
                max_x = max_x.max(bbox.max().x);
                max_y = max_y.max(bbox.max().y);
                found = true;
            }
        }

        found.then(|| Rect::new((min_x, min_y), (max_x, max_y)))
    }
}

pub(crate) fn geometry_type(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

fn decode_geometry(value: &Value) -> std::result::Result<Geometry<f64>, String> {
    match value {
        Value::Binary(bytes) => Wkb(bytes.clone()).to_geo().map_err(|e| e.to_string()),
        Value::Text(text) => {
            let geojson: GeoJson = text.parse().map_err(|e: geojson::Error| e.to_string())?;
            let geometry = match geojson {
                GeoJson::Geometry(geometry) => geometry,
                GeoJson::Feature(GeoJsonFeature {
                    geometry: Some(geometry),
                    ..
                }) => geometry,
                _ => return Err("expected a GeoJSON geometry".to_string()),
            };
            geometry_from_geojson(geometry.value)?
                .ok_or_else(|| "unsupported GeoJSON geometry type".to_string())
        }
        other => Err(format!("cannot decode a geometry from {:?}", other)),
    }
}

/// Convert GeoJSON polygons, multipolygons and linestrings; other types yield
/// `None`.
fn geometry_from_geojson(
    value: GeoJsonValue,
) -> std::result::Result<Option<Geometry<f64>>, String> {
    let positions: Vec<&Vec<f64>> = match &value {
        GeoJsonValue::LineString(line) => line.iter().collect(),
        GeoJsonValue::Polygon(rings) => rings.iter().flatten().collect(),
        GeoJsonValue::MultiPolygon(polygons) => polygons.iter().flatten().flatten().collect(),
        _ => return Ok(None),
    };
    if let Some(short) = positions.iter().find(|p| p.len() < 2) {
        return Err(format!("position with {} values", short.len()));
    }
    Geometry::try_from(value)
        .map(Some)
        .map_err(|e: geojson::Error| e.to_string())
}
