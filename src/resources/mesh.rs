use std::{
    io::{BufReader, Cursor},
    path::{Path, PathBuf},
};

use crate::data_structures::geometry::{GeometryGroup, GeometryRecord, Material, SourceId};

use super::load_string;

/**
 * Parses OBJ text into a geometry record. `base` is where `mtllib` references
 * are resolved. A missing or broken MTL file only loses the materials.
 */
pub async fn parse_obj(source: SourceId, obj_text: &str, base: &Path) -> anyhow::Result<GeometryRecord> {
    let mut obj_reader = BufReader::new(Cursor::new(obj_text));
    let base: PathBuf = base.to_path_buf();

    let (models, obj_materials) = tobj::load_obj_buf_async(
        &mut obj_reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        move |p| {
            let path = base.join(p);
            async move {
                match load_string(&path).await {
                    Ok(text) => tobj::load_mtl_buf(&mut BufReader::new(Cursor::new(text))),
                    Err(e) => {
                        log::warn!("material library {} not loaded: {e:#}", path.display());
                        Err(tobj::LoadError::OpenFileFailed)
                    }
                }
            }
        },
    )
    .await?;

    let materials = obj_materials.unwrap_or_else(|e| {
        log::warn!("{source}: materials unavailable ({e})");
        Vec::new()
    });
    Ok(to_record(source, &models, &materials))
}

/// Flattens indexed tobj meshes into unindexed groups.
///
/// With `single_index` every attribute shares the position index. V texture
/// coordinates are flipped to wgpu's top-left origin.
pub fn to_record(source: SourceId, models: &[tobj::Model], materials: &[tobj::Material]) -> GeometryRecord {
    let mut record = GeometryRecord::new(source);

    for m in materials {
        record.materials.insert(
            m.name.clone(),
            Material {
                name: m.name.clone(),
                ambient: m.ambient.unwrap_or([0.2; 3]),
                diffuse: m.diffuse.unwrap_or([0.8; 3]),
                specular: m.specular.unwrap_or([0.0; 3]),
                shininess: m.shininess.unwrap_or(0.0),
                opacity: m.dissolve.unwrap_or(1.0),
            },
        );
    }

    for model in models {
        let mesh = &model.mesh;
        let vertex_count = mesh.positions.len() / 3;
        if let Some(bad) = mesh.indices.iter().find(|&&i| i as usize >= vertex_count) {
            log::warn!(
                "{}: group {} indexes vertex {bad} of {vertex_count}, skipping it",
                record.source,
                model.name
            );
            continue;
        }

        let gather = |data: &[f32], width: usize| -> Option<Vec<f32>> {
            if data.len() < vertex_count * width {
                return None;
            }
            Some(
                mesh.indices
                    .iter()
                    .flat_map(|&i| {
                        let i = i as usize * width;
                        data[i..i + width].iter().copied()
                    })
                    .collect(),
            )
        };

        let positions = gather(&mesh.positions, 3).unwrap_or_default();
        let uvs = gather(&mesh.texcoords, 2).map(|mut uvs| {
            for v in uvs.iter_mut().skip(1).step_by(2) {
                *v = 1.0 - *v;
            }
            uvs
        });

        record.groups.push(GeometryGroup {
            name: model.name.clone(),
            positions,
            uvs,
            normals: gather(&mesh.normals, 3),
            colors: gather(&mesh.vertex_color, 3),
            material: mesh
                .material_id
                .and_then(|id| materials.get(id))
                .map(|m| m.name.clone()),
        });
    }
    record
}

/// Loads and parses an OBJ file; its path becomes the source id.
pub async fn load_obj(path: &Path) -> anyhow::Result<GeometryRecord> {
    let text = load_string(path).await?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let record = parse_obj(SourceId::new(path.to_string_lossy()), &text, base).await?;
    log::info!("loaded {} with {} groups", path.display(), record.groups.len());
    Ok(record)
}
