pub mod center;
pub mod community;
pub mod error;
pub mod layer;
pub mod logging;
pub mod overlay;
pub mod reader;
pub mod settings;
pub mod storage;

pub use center::center;
pub use community::{CommunityDescriptor, CommunityRegistry, LayerStyle};
pub use error::{Error, Result};
pub use layer::{Crs, Feature, GeometryLayer};
pub use overlay::{overlay, overlay_many, OverlayConfig, OverlayOutcome, OverlayResult};
pub use reader::{DataFormat, DataReader, Record, RecordStream, Value};
pub use settings::{Environment, Settings};
pub use storage::{OpenMode, StorageBackend, StorageContext};

/// How a geometry layer is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Rows from a format reader with a geometry column.
    Records(DataFormat),
    GeoJson,
}

impl InputFormat {
    /// `geojson` in addition to every reader format label.
    pub fn from_label(label: &str) -> Result<Self> {
        if label.trim().eq_ignore_ascii_case("geojson") {
            return Ok(InputFormat::GeoJson);
        }
        DataFormat::select(Some(label)).map(InputFormat::Records)
    }
}

/// Load `filename` from the context's backend as a geometry layer.
///
/// `geometry_column` and `delimiter` only apply to reader formats.
pub fn load_layer(
    context: &StorageContext,
    filename: &str,
    format: InputFormat,
    geometry_column: &str,
    delimiter: Option<u8>,
    crs: Crs,
) -> Result<GeometryLayer> {
    match format {
        InputFormat::GeoJson => {
            let handle = context.resolve()?.open(filename, OpenMode::Text)?;
            GeometryLayer::from_geojson_reader(handle, crs)
        }
        InputFormat::Records(format) => {
            let reader = DataReader::new(context, format)?;
            GeometryLayer::from_records(reader.iterate(filename, delimiter), geometry_column, crs)
        }
    }
}
