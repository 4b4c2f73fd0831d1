//! Spatial overlay of a base geography with a community layer.
//!
//! Every base feature is intersected with the overlay features whose
//! envelopes touch it. Pairs that genuinely overlap produce one output feature
//! carrying both attribute sets, the intersection area in native planar units
//! and the share of the base feature's reference area that the intersection
//! covers.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};

use geo::{Area, BooleanOps, BoundingRect, Geometry, MultiPolygon, Polygon};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, error, info, warn};

use crate::community::{
    CommunityDescriptor, CommunityRegistry, AREA_INTERSECTION_COLUMN, PERCENT_COVER_COLUMN,
};
use crate::error::{Error, Result};
use crate::layer::{geometry_type, Feature, GeometryLayer, Properties};

/// A layer with the two derived columns appended to every feature.
pub type OverlayResult = GeometryLayer;

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub registry: CommunityRegistry,
    pub area_column: String,
    pub percent_column: String,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            registry: CommunityRegistry::builtin(),
            area_column: AREA_INTERSECTION_COLUMN.to_string(),
            percent_column: PERCENT_COVER_COLUMN.to_string(),
        }
    }
}

/// Outcome of one community in [`overlay_many`].
#[derive(Debug)]
pub struct OverlayOutcome {
    pub community: String,
    pub result: Result<OverlayResult>,
}

/// Intersect `base` with `other` for the named community.
///
/// Unknown communities and mismatched coordinate systems are rejected before
/// any geometry is touched. Failures during the geometric work are logged and
/// returned as [`Error::Computation`]; no partial layer is produced.
pub fn overlay(
    community_id: &str,
    base: &GeometryLayer,
    other: &GeometryLayer,
    config: &OverlayConfig,
) -> Result<OverlayResult> {
    let descriptor = config.registry.validate(community_id)?;

    if base.crs() != other.crs() {
        return Err(Error::Validation(format!(
            "Coordinate reference systems differ: base layer is {}, {} layer is {}",
            base.crs(),
            community_id,
            other.crs()
        )));
    }

    info!(
        community = community_id,
        base_features = base.len(),
        overlay_features = other.len(),
        "Generating overlay"
    );

    match intersect_layers(descriptor, base, other, config) {
        Ok(result) => {
            info!(community = community_id, features = result.len(), "Overlay complete");
            Ok(result)
        }
        Err(e) => {
            error!(community = community_id, error = %e, "Overlay failed");
            Err(e)
        }
    }
}

/// Run one overlay per community. A failing pair is logged and recorded in
/// its outcome; the remaining pairs still run.
pub fn overlay_many(
    base: &GeometryLayer,
    layers: &[(&str, &GeometryLayer)],
    config: &OverlayConfig,
) -> Vec<OverlayOutcome> {
    layers
        .iter()
        .map(|(community, layer)| {
            let result = overlay(community, base, layer, config);
            if let Err(e) = &result {
                warn!(community = *community, error = %e, "Skipping community");
            }
            OverlayOutcome {
                community: community.to_string(),
                result,
            }
        })
        .collect()
}

type Envelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

fn intersect_layers(
    descriptor: &CommunityDescriptor,
    base: &GeometryLayer,
    other: &GeometryLayer,
    config: &OverlayConfig,
) -> Result<OverlayResult> {
    let base_shapes = polygonal_shapes(base, "base")?;
    let other_shapes = polygonal_shapes(other, descriptor.id)?;

    let envelopes: Vec<Envelope> = other_shapes
        .iter()
        .enumerate()
        .filter_map(|(index, shape)| {
            shape.bounding_rect().map(|rect| {
                GeomWithData::new(
                    Rectangle::from_corners(rect.min().into(), rect.max().into()),
                    index,
                )
            })
        })
        .collect();
    let tree = RTree::bulk_load(envelopes);

    let mut result = GeometryLayer::new(base.crs().clone());
    let mut pairs_tested = 0usize;

    for (i, base_shape) in base_shapes.iter().enumerate() {
        let Some(rect) = base_shape.bounding_rect() else {
            continue;
        };
        let query = AABB::from_corners(rect.min().into(), rect.max().into());
        let mut candidates: Vec<usize> = tree
            .locate_in_envelope_intersecting(&query)
            .map(|envelope| envelope.data)
            .collect();
        candidates.sort_unstable();

        let base_feature = &base.features()[i];
        for j in candidates {
            pairs_tested += 1;
            let other_feature = &other.features()[j];
            let shape = intersect(base_shape, &other_shapes[j], i, j)?;

            let area = shape.unsigned_area();
            if !(area > 0.0) {
                continue;
            }

            let reference = reference_area(base_feature, descriptor.reference_area, i)?;
            let percent = round4(area / reference * 100.0);
            if percent > 100.0 {
                warn!(
                    community = descriptor.id,
                    base_feature = i,
                    percent,
                    "Intersection exceeds the reference area"
                );
            }

            let mut properties =
                merge_properties(&base_feature.properties, &other_feature.properties);
            properties.insert(config.area_column.clone(), json!(area));
            properties.insert(config.percent_column.clone(), json!(percent));

            let geometry = match (&base_feature.geometry, &other_feature.geometry) {
                (Geometry::Polygon(_), Geometry::Polygon(_)) if shape.0.len() == 1 => {
                    shape.0.into_iter().next().map(Geometry::Polygon)
                }
                _ => Some(Geometry::MultiPolygon(shape)),
            };
            if let Some(geometry) = geometry {
                result.push(Feature {
                    geometry,
                    properties,
                });
            }
        }
    }

    debug!(community = descriptor.id, pairs_tested, "Candidate pairs intersected");
    Ok(result)
}

fn polygonal_shapes(layer: &GeometryLayer, label: &str) -> Result<Vec<MultiPolygon<f64>>> {
    layer
        .features()
        .iter()
        .enumerate()
        .map(|(index, feature)| {
            let polygons: Vec<Polygon<f64>> = match &feature.geometry {
                Geometry::Polygon(p) => vec![p.clone()],
                Geometry::MultiPolygon(mp) => mp.0.clone(),
                Geometry::Rect(r) => vec![r.to_polygon()],
                Geometry::Triangle(t) => vec![t.to_polygon()],
                other => {
                    return Err(Error::Computation(format!(
                        "{} feature {} has non-polygonal geometry {}",
                        label,
                        index,
                        geometry_type(other)
                    )))
                }
            };
            Ok(MultiPolygon::new(polygons))
        })
        .collect()
}

fn intersect(
    a: &MultiPolygon<f64>,
    b: &MultiPolygon<f64>,
    i: usize,
    j: usize,
) -> Result<MultiPolygon<f64>> {
    // The sweep-line implementation panics on some degenerate inputs.
    catch_unwind(AssertUnwindSafe(|| a.intersection(b))).map_err(|_| {
        Error::Computation(format!(
            "Intersection of base feature {} with overlay feature {} failed",
            i, j
        ))
    })
}

fn reference_area(feature: &Feature, column: &str, index: usize) -> Result<f64> {
    let value = match feature.properties.get(column) {
        Some(JsonValue::Number(n)) => n.as_f64(),
        Some(JsonValue::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match value {
        Some(area) if area.is_finite() && area > 0.0 => Ok(area),
        _ => Err(Error::Computation(format!(
            "Base feature {} has no usable reference area in '{}'",
            index, column
        ))),
    }
}

/// Union of both attribute sets; names present on both sides get `_1` (base)
/// and `_2` (overlay) suffixes.
fn merge_properties(base: &Properties, other: &Properties) -> Properties {
    let shared: HashSet<&String> = base.keys().filter(|k| other.contains_key(*k)).collect();

    let mut merged = Properties::new();
    for (key, value) in base {
        if shared.contains(key) {
            merged.insert(format!("{}_1", key), value.clone());
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in other {
        if shared.contains(key) {
            merged.insert(format!("{}_2", key), value.clone());
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Four decimals, halves to even.
fn round4(value: f64) -> f64 {
    (value * 10_000.0).round_ties_even() / 10_000.0
}
