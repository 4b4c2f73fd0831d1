use geo::Rect;
use proj::Proj;
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Planar projection the bounds are expressed in.
pub const SOURCE_CRS: &str = "EPSG:3857";
/// Geographic system the center is reported in.
pub const TARGET_CRS: &str = "EPSG:4326";

/// Geographic center of a Web Mercator bounding box, as `(latitude, longitude)`.
///
/// The rectangle's centroid is taken in planar coordinates and transformed as a
/// single point. Transform failures are logged and returned as
/// [`Error::Computation`].
pub fn center(bounds: Rect<f64>) -> Result<(f64, f64)> {
    let centroid = bounds.center();
    if !centroid.x.is_finite() || !centroid.y.is_finite() {
        error!(?bounds, "Bounds are not finite");
        return Err(Error::Computation(format!(
            "Cannot compute the center of non-finite bounds {:?}",
            bounds
        )));
    }

    let transform = Proj::new_known_crs(SOURCE_CRS, TARGET_CRS, None).map_err(|e| {
        error!(error = %e, "Unable to build coordinate transform");
        Error::Computation(format!("{} to {} transform: {}", SOURCE_CRS, TARGET_CRS, e))
    })?;

    let (lon, lat) = transform.convert((centroid.x, centroid.y)).map_err(|e| {
        error!(?bounds, error = %e, "Coordinate transform failed");
        Error::Computation(format!(
            "Unable to transform ({}, {}) to {}: {}",
            centroid.x, centroid.y, TARGET_CRS, e
        ))
    })?;

    debug!(lat, lon, "State center");
    Ok((lat, lon))
}
