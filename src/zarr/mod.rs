pub mod writer;

use anyhow::Result;
use ndarray::{Array1, Array2, Ix1, Ix2};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use zarrs::array::codec::{BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::filesystem::FilesystemStore;
use zarrs::group::{Group, GroupBuilder};
use zarrs::storage::{ReadableStorageTraits, StoreKey};

/// Samples per chunk along the time axis
const SAMPLES_PER_CHUNK: u64 = 10_000;

/// Create a fresh store at `store_path`, replacing any previous conversion
pub fn create_session_store(store_path: &Path) -> Result<Arc<FilesystemStore>> {
    if store_path.exists() {
        tracing::info!("Overwriting existing store {:?}", store_path);
        std::fs::remove_dir_all(store_path)?;
    }
    std::fs::create_dir_all(store_path)?;

    let store = Arc::new(FilesystemStore::new(store_path)?);
    GroupBuilder::new().build(store.clone(), "/")?.store_metadata()?;
    Ok(store)
}

pub fn open_session_store(store_path: &Path) -> Result<Arc<FilesystemStore>> {
    if !store_path.is_dir() {
        return Err(anyhow::anyhow!("Store not found: {:?}", store_path));
    }
    Ok(Arc::new(FilesystemStore::new(store_path)?))
}

fn metadata_key(path: &str) -> Result<StoreKey> {
    let trimmed = path.trim_end_matches('/').trim_start_matches('/');
    let metadata_path = if trimmed.is_empty() {
        "zarr.json".to_string()
    } else {
        format!("{}/zarr.json", trimmed)
    };
    Ok(StoreKey::new(&metadata_path)?)
}

/// Node type recorded in a node's zarr.json ("group" or "array")
pub fn node_type(store: &Arc<FilesystemStore>, path: &str) -> Result<Option<String>> {
    match store.get(&metadata_key(path)?)? {
        Some(data) => {
            let json: serde_json::Value = serde_json::from_slice(&data)?;
            Ok(json
                .get("node_type")
                .and_then(|v| v.as_str())
                .map(str::to_string))
        }
        None => Ok(None),
    }
}

/// Create a group, and any missing parents
pub fn create_group(store: &Arc<FilesystemStore>, path: &str) -> Result<()> {
    let mut current = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        if node_type(store, &current)?.as_deref() != Some("group") {
            GroupBuilder::new().build(store.clone(), &current)?.store_metadata()?;
        }
    }
    Ok(())
}

/// Merge `attrs` into a group's attributes
pub fn write_group_attributes(
    store: &Arc<FilesystemStore>,
    path: &str,
    attrs: serde_json::Map<String, serde_json::Value>,
) -> Result<()> {
    let mut group = Group::open(store.clone(), path)?;
    group.attributes_mut().extend(attrs);
    group.store_metadata()?;
    Ok(())
}

/// Read attributes from a node's zarr.json file (Zarr v3 format)
pub fn read_group_attributes(store: &Arc<FilesystemStore>, path: &str) -> Result<serde_json::Value> {
    let key = metadata_key(path)?;
    let bytes = store
        .get(&key)?
        .ok_or_else(|| anyhow::anyhow!("Metadata not found at {}", key.as_str()))?;
    let metadata: serde_json::Value = serde_json::from_slice(&bytes)?;

    Ok(metadata
        .get("attributes")
        .cloned()
        .unwrap_or_else(|| json!({})))
}

fn float_codec() -> Result<Arc<BloscCodec>> {
    let compression_level = BloscCompressionLevel::try_from(5u8)
        .map_err(|e| anyhow::anyhow!("Invalid compression level: {}", e))?;
    Ok(Arc::new(BloscCodec::new(
        BloscCompressor::LZ4,
        compression_level,
        None,
        BloscShuffleMode::BitShuffle,
        Some(8),
    )?))
}

fn chunk_len(len: usize) -> u64 {
    (len as u64).clamp(1, SAMPLES_PER_CHUNK)
}

/// Write a float64 vector as a `[samples]` array
pub fn write_f64_1d(store: &Arc<FilesystemStore>, path: &str, values: &[f64]) -> Result<()> {
    let array = ArrayBuilder::new(
        vec![values.len() as u64],
        vec![chunk_len(values.len())],
        DataType::Float64,
        FillValue::from(f64::NAN),
    )
    .dimension_names(Some(vec![Some("samples".to_string())]))
    .bytes_to_bytes_codecs(vec![float_codec()?])
    .build(store.clone(), path)?;
    array.store_metadata()?;

    if !values.is_empty() {
        array.store_array_subset_ndarray::<f64, Ix1>(&[0], Array1::from(values.to_vec()))?;
    }
    Ok(())
}

/// Write a float64 matrix, rows first (e.g. `[channels, samples]`)
pub fn write_f64_2d(
    store: &Arc<FilesystemStore>,
    path: &str,
    values: &Array2<f64>,
    dimension_names: [&str; 2],
) -> Result<()> {
    let (rows, cols) = values.dim();
    let array = ArrayBuilder::new(
        vec![rows as u64, cols as u64],
        vec![(rows as u64).max(1), chunk_len(cols)],
        DataType::Float64,
        FillValue::from(f64::NAN),
    )
    .dimension_names(Some(vec![
        Some(dimension_names[0].to_string()),
        Some(dimension_names[1].to_string()),
    ]))
    .bytes_to_bytes_codecs(vec![float_codec()?])
    .build(store.clone(), path)?;
    array.store_metadata()?;

    if rows > 0 && cols > 0 {
        array.store_array_subset_ndarray::<f64, Ix2>(&[0, 0], values.to_owned())?;
    }
    Ok(())
}

pub fn write_bool_1d(store: &Arc<FilesystemStore>, path: &str, values: &[bool]) -> Result<()> {
    let array = ArrayBuilder::new(
        vec![values.len() as u64],
        vec![chunk_len(values.len())],
        DataType::Bool,
        FillValue::from(false),
    )
    .dimension_names(Some(vec![Some("trials".to_string())]))
    .build(store.clone(), path)?;
    array.store_metadata()?;

    if !values.is_empty() {
        array.store_array_subset_ndarray::<bool, Ix1>(&[0], Array1::from(values.to_vec()))?;
    }
    Ok(())
}

pub fn array_shape(store: &Arc<FilesystemStore>, path: &str) -> Result<Vec<u64>> {
    let array = Array::<FilesystemStore>::open(store.clone(), path)?;
    Ok(array.shape().to_vec())
}

/// Read a whole float64 array, flattened in row-major order
pub fn read_f64(store: &Arc<FilesystemStore>, path: &str) -> Result<Vec<f64>> {
    let array = Array::<FilesystemStore>::open(store.clone(), path)?;
    let shape = array.shape().to_vec();
    if shape.iter().any(|&d| d == 0) {
        return Ok(Vec::new());
    }
    let subset = ArraySubset::new_with_start_shape(vec![0; shape.len()], shape)?;
    let values = array.retrieve_array_subset_ndarray::<f64>(&subset)?;
    Ok(values.iter().copied().collect())
}

pub fn read_bool(store: &Arc<FilesystemStore>, path: &str) -> Result<Vec<bool>> {
    let array = Array::<FilesystemStore>::open(store.clone(), path)?;
    let shape = array.shape().to_vec();
    if shape.iter().any(|&d| d == 0) {
        return Ok(Vec::new());
    }
    let subset = ArraySubset::new_with_start_shape(vec![0; shape.len()], shape)?;
    let values = array.retrieve_array_subset_ndarray::<bool>(&subset)?;
    Ok(values.iter().copied().collect())
}

/// Walk the store directory and list every node path with its type
pub fn list_nodes(store_path: &Path) -> Result<Vec<(String, String)>> {
    let store = open_session_store(store_path)?;
    let mut nodes = Vec::new();
    let mut pending = vec![String::new()];
    while let Some(relative) = pending.pop() {
        let dir = store_path.join(&relative);
        let mut children: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        children.sort();
        for child in children.into_iter().rev() {
            let path = if relative.is_empty() {
                child
            } else {
                format!("{}/{}", relative, child)
            };
            if let Some(kind) = node_type(&store, &path)? {
                if kind == "group" {
                    pending.push(path.clone());
                }
                nodes.push((format!("/{}", path), kind));
            }
        }
    }
    nodes.sort();
    Ok(nodes)
}
