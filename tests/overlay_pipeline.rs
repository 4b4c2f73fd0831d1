use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, BinaryArray, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use eligibility_overlay::storage::{BlobCache, ObjectStoreClient, RemoteStorage};
use eligibility_overlay::{
    load_layer, overlay, overlay_many, Crs, DataFormat, DataReader, Error, GeometryLayer,
    InputFormat, OverlayConfig, Settings, StorageBackend, StorageContext,
};
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use parquet::arrow::ArrowWriter;
use serde_json::json;
use tempfile::tempdir;

fn square_wkb(min: f64, max: f64) -> Vec<u8> {
    let ring = [(min, min), (max, min), (max, max), (min, max), (min, min)];
    let mut bytes = vec![1u8];
    bytes.extend_from_slice(&3u32.to_le_bytes());
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&(ring.len() as u32).to_le_bytes());
    for (x, y) in ring {
        bytes.extend_from_slice(&x.to_le_bytes());
        bytes.extend_from_slice(&y.to_le_bytes());
    }
    bytes
}

/// GeoParquet-style file: `NAME`, `area` and a WKB `geometry` column.
fn write_squares(path: &Path, squares: &[(&str, f64, f64)]) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("NAME", DataType::Utf8, false),
        Field::new("area", DataType::Float64, false),
        Field::new("geometry", DataType::Binary, false),
    ]));
    let names: Vec<&str> = squares.iter().map(|(name, _, _)| *name).collect();
    let areas: Vec<f64> = squares.iter().map(|(_, min, max)| (max - min) * (max - min)).collect();
    let geoms: Vec<Vec<u8>> = squares.iter().map(|(_, min, max)| square_wkb(*min, *max)).collect();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(names)) as ArrayRef,
            Arc::new(Float64Array::from(areas)) as ArrayRef,
            Arc::new(BinaryArray::from_iter_values(geoms)) as ArrayRef,
        ],
    )
    .unwrap();

    let file = File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

fn load(context: &StorageContext, filename: &str) -> GeometryLayer {
    load_layer(
        context,
        filename,
        InputFormat::Records(DataFormat::Parquet),
        "geometry",
        None,
        Crs::epsg(3857),
    )
    .unwrap()
}

#[test]
fn test_geoparquet_overlay_end_to_end() {
    let dir = tempdir().unwrap();
    write_squares(
        &dir.path().join("coops.geoparquet"),
        &[("North Co-op", 0.0, 10.0), ("South Co-op", 100.0, 110.0)],
    );
    write_squares(&dir.path().join("justice40.geoparquet"), &[("Tract 1", 5.0, 15.0)]);

    let context = StorageContext::new(Settings::local(dir.path()).with_read_chunk_size(1));
    let reader = DataReader::new(&context, DataFormat::Parquet).unwrap();
    assert_eq!(
        reader.col_names("coops.geoparquet", None).unwrap(),
        vec!["NAME", "area", "geometry"]
    );

    let base = load(&context, "coops.geoparquet");
    let community = load(&context, "justice40.geoparquet");
    assert_eq!(base.len(), 2);

    let result = overlay("justice40", &base, &community, &OverlayConfig::default()).unwrap();
    assert_eq!(result.len(), 1);
    let properties = &result.features()[0].properties;
    assert_eq!(properties["NAME_1"], json!("North Co-op"));
    assert_eq!(properties["NAME_2"], json!("Tract 1"));
    assert_eq!(properties["area_1"], json!(100.0));
    assert_eq!(properties["perc_cover"], json!(25.0));

    let mut out = Vec::new();
    result.write_geojson(&mut out).unwrap();
    let written: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(written["type"], "FeatureCollection");
    assert_eq!(written["features"].as_array().unwrap().len(), 1);
}

#[test]
fn test_overlay_reference_area_comes_from_base() {
    let dir = tempdir().unwrap();
    // `area` exists on both sides; the base copy is the reference.
    write_squares(&dir.path().join("coops.geoparquet"), &[("Co-op", 0.0, 20.0)]);
    write_squares(&dir.path().join("coal.geoparquet"), &[("Closure", 0.0, 10.0)]);
    let context = StorageContext::new(Settings::local(dir.path()));

    let result = overlay(
        "coal_closure",
        &load(&context, "coops.geoparquet"),
        &load(&context, "coal.geoparquet"),
        &OverlayConfig::default(),
    )
    .unwrap();
    assert_eq!(result.features()[0].properties["perc_cover"], json!(25.0));
}

#[test]
fn test_batch_overlay_skips_failing_pairs() {
    let dir = tempdir().unwrap();
    write_squares(&dir.path().join("coops.geoparquet"), &[("Co-op", 0.0, 10.0)]);
    write_squares(&dir.path().join("ffe.geoparquet"), &[("County", 2.0, 4.0)]);
    let context = StorageContext::new(Settings::local(dir.path()));

    let base = load(&context, "coops.geoparquet");
    let ffe = load(&context, "ffe.geoparquet");
    let outcomes = overlay_many(
        &base,
        &[("fossil_fuel", &ffe), ("not_a_real_community", &ffe)],
        &OverlayConfig::default(),
    );

    assert_eq!(outcomes[0].result.as_ref().unwrap().len(), 1);
    assert!(matches!(outcomes[1].result, Err(Error::Validation(_))));
}

#[test]
fn test_remote_backend_reads_through_cache() {
    let cache_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    write_squares(&scratch.path().join("dci.geoparquet"), &[("ZCTA 60601", 0.0, 1.0)]);
    let bytes = std::fs::read(scratch.path().join("dci.geoparquet")).unwrap();

    let store = Arc::new(InMemory::new());
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(store.put(&ObjectPath::from("dci.geoparquet"), bytes.into()))
        .unwrap();

    let client = ObjectStoreClient::new(store).unwrap();
    let cache = BlobCache::new(cache_dir.path()).unwrap();
    let remote = RemoteStorage::new("eligibility-data", Box::new(client), cache);
    let context = StorageContext::with_backend(
        Settings::local(scratch.path()),
        StorageBackend::Remote(remote),
    );

    let reader = DataReader::for_label(&context, Some("GeoParquet")).unwrap();
    assert_eq!(reader.list_contents().unwrap(), vec!["dci.geoparquet"]);

    let first: Vec<_> = reader.iterate("dci.geoparquet", None).collect();
    let second: Vec<_> = reader.iterate("dci.geoparquet", None).collect();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert!(cache_dir.path().join("dci.geoparquet").exists());

    let missing = reader.iterate("absent.geoparquet", None).next();
    assert!(matches!(missing, Some(Err(Error::NotFound(_)))));
}
