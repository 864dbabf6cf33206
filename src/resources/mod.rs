use std::path::Path;

use crate::data_structures::{geometry::GeometryRecord, scene::SceneSnapshot};

/**
 * Loading from external files: OBJ/MTL meshes into geometry records, images
 * into texture pixels and scene snapshots. Everything here reads through
 * tokio and reports failures with `anyhow`.
 */
pub mod mesh;
pub mod texture;

pub async fn load_string(path: &Path) -> anyhow::Result<String> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(text)
}

pub async fn load_binary(path: &Path) -> anyhow::Result<Vec<u8>> {
    let data = tokio::fs::read(path).await?;
    Ok(data)
}

/// Loads every OBJ file concurrently. Files that fail are logged and left out.
pub async fn load_all(paths: &[impl AsRef<Path>]) -> Vec<GeometryRecord> {
    let loads = paths.iter().map(|p| mesh::load_obj(p.as_ref()));
    futures::future::join_all(loads)
        .await
        .into_iter()
        .zip(paths)
        .filter_map(|(result, path)| match result {
            Ok(record) => Some(record),
            Err(e) => {
                log::error!("could not load {}: {e:#}", path.as_ref().display());
                None
            }
        })
        .collect()
}

pub async fn load_snapshot(path: &Path) -> anyhow::Result<SceneSnapshot> {
    let text = load_string(path).await?;
    Ok(SceneSnapshot::from_json(&text)?)
}

pub async fn save_snapshot(path: &Path, snapshot: &SceneSnapshot) -> anyhow::Result<()> {
    tokio::fs::write(path, snapshot.to_json()?).await?;
    Ok(())
}
