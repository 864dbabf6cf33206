//! Mesh data: what the loader hands us, and what we keep once it's uploaded.
//!
//! A [`GeometryRecord`] is the loader's output for one source (an OBJ file,
//! say): several groups of flat, unindexed attribute arrays plus the materials
//! they refer to. Each group becomes one immutable [`GeometryBuffer`]. The
//! [`GeometryPool`] owns every buffer and caches them per source so a source
//! is uploaded once no matter how many instances draw it.

use std::{collections::HashMap, fmt};

use cgmath::Vector3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    backend::{BufferHandle, RenderBackend},
    error::{Error, Result},
    math,
};

/// Identifies where a mesh came from, usually its path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    pub ambient: [f32; 3],
    pub diffuse: [f32; 3],
    pub specular: [f32; 3],
    pub shininess: f32,
    pub opacity: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            ambient: [0.2; 3],
            diffuse: [0.8; 3],
            specular: [0.0; 3],
            shininess: 0.0,
            opacity: 1.0,
        }
    }
}

/// One drawable group of a loaded mesh. Arrays are flat and unindexed:
/// every three positions form a triangle.
///
/// `colors` may hold three (RGB) or four (RGBA) floats per vertex.
#[derive(Clone, Debug, Default)]
pub struct GeometryGroup {
    pub name: String,
    pub positions: Vec<f32>,
    pub uvs: Option<Vec<f32>>,
    pub normals: Option<Vec<f32>>,
    pub colors: Option<Vec<f32>>,
    pub material: Option<String>,
}

/// Everything the loader produced for one source.
#[derive(Clone, Debug)]
pub struct GeometryRecord {
    pub source: SourceId,
    pub groups: Vec<GeometryGroup>,
    pub materials: HashMap<String, Material>,
}

impl GeometryRecord {
    pub fn new(source: impl Into<SourceId>) -> Self {
        Self {
            source: source.into(),
            groups: Vec::new(),
            materials: HashMap::new(),
        }
    }
}

/// How vertex normals are obtained when building a buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalMode {
    /// Use source normals, zero-fill when absent.
    Keep,
    /// Use source normals, smooth-generate when absent.
    #[default]
    FillMissing,
    /// Always smooth-generate from positions.
    Smooth,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub normal: [f32; 3],
    pub color: [f32; 4],
}

impl ModelVertex {
    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<ModelVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 5]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        }
    }
}

/// Builds the interleaved vertex stream for a group, filling gaps.
///
/// Missing UVs are zero, missing normals are zero or generated depending on
/// `normals`, missing colours are random per vertex so individual triangles
/// stay distinguishable while debugging. RGB colours get alpha 1.
pub fn build_vertices(
    source: &SourceId,
    group: &GeometryGroup,
    normals: NormalMode,
) -> Result<Vec<ModelVertex>> {
    if group.positions.is_empty() {
        return Err(Error::MissingPositions {
            source_id: source.to_string(),
            group: group.name.clone(),
        });
    }
    if group.positions.len() % 3 != 0 {
        return Err(Error::MalformedGeometry {
            source_id: source.to_string(),
            group: group.name.clone(),
            reason: format!("{} position floats is not a multiple of 3", group.positions.len()),
        });
    }
    let count = group.positions.len() / 3;

    let uvs = match &group.uvs {
        Some(uvs) if uvs.len() == count * 2 => Some(uvs),
        Some(uvs) => {
            log::warn!(
                "{source}/{}: {} uv floats for {count} vertices, zero-filling",
                group.name,
                uvs.len()
            );
            None
        }
        None => None,
    };

    let generated;
    let normal_data = match (&group.normals, normals) {
        (Some(n), NormalMode::Keep | NormalMode::FillMissing) if n.len() == count * 3 => Some(n),
        (_, NormalMode::Smooth | NormalMode::FillMissing) => {
            generated = smooth_normals(&group.positions);
            Some(&generated)
        }
        _ => None,
    };

    let colors = group.colors.as_ref().and_then(|c| {
        if c.len() == count * 4 {
            Some((c, 4))
        } else if c.len() == count * 3 {
            Some((c, 3))
        } else {
            log::warn!(
                "{source}/{}: {} colour floats for {count} vertices, using random colours",
                group.name,
                c.len()
            );
            None
        }
    });
    let mut rng = rand::rng();

    let vertices = (0..count)
        .map(|i| ModelVertex {
            position: [
                group.positions[i * 3],
                group.positions[i * 3 + 1],
                group.positions[i * 3 + 2],
            ],
            tex_coords: uvs.map_or([0.0; 2], |uv| [uv[i * 2], uv[i * 2 + 1]]),
            normal: normal_data.map_or([0.0; 3], |n| [n[i * 3], n[i * 3 + 1], n[i * 3 + 2]]),
            color: match colors {
                Some((c, 4)) => [c[i * 4], c[i * 4 + 1], c[i * 4 + 2], c[i * 4 + 3]],
                Some((c, _)) => [c[i * 3], c[i * 3 + 1], c[i * 3 + 2], 1.0],
                None => [rng.random(), rng.random(), rng.random(), 1.0],
            },
        })
        .collect();
    Ok(vertices)
}

/// Exact-position key. `+ 0.0` folds `-0.0` into `0.0` so both match.
fn position_key(p: &[f32]) -> [u32; 3] {
    [
        (p[0] + 0.0).to_bits(),
        (p[1] + 0.0).to_bits(),
        (p[2] + 0.0).to_bits(),
    ]
}

/// Smooth vertex normals for an unindexed triangle stream.
///
/// Every face normal is normalized before it is added to the vertices sharing
/// the exact same position, whichever triangle they belong to, so each face
/// counts equally whatever its area. Each sum is then normalized. Degenerate
/// triangles contribute nothing, and a trailing partial triangle only picks
/// up what its positions collected from complete ones.
pub fn smooth_normals(positions: &[f32]) -> Vec<f32> {
    let mut accumulated: HashMap<[u32; 3], Vector3<f32>> = HashMap::new();

    for triangle in positions.chunks_exact(9) {
        let p0 = Vector3::new(triangle[0], triangle[1], triangle[2]);
        let p1 = Vector3::new(triangle[3], triangle[4], triangle[5]);
        let p2 = Vector3::new(triangle[6], triangle[7], triangle[8]);
        let face = math::normalize(math::cross(p1 - p0, p2 - p0));
        for corner in triangle.chunks_exact(3) {
            *accumulated
                .entry(position_key(corner))
                .or_insert(Vector3::new(0.0, 0.0, 0.0)) += face;
        }
    }

    let mut normals = Vec::with_capacity(positions.len());
    for corner in positions.chunks_exact(3) {
        let n = accumulated
            .get(&position_key(corner))
            .map_or(Vector3::new(0.0, 0.0, 0.0), |sum| math::normalize(*sum));
        normals.extend_from_slice(&[n.x, n.y, n.z]);
    }
    normals
}

/// Index of a buffer inside a [`GeometryPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(u64);

/// One uploaded, immutable mesh group.
#[derive(Debug)]
pub struct GeometryBuffer {
    label: String,
    source: SourceId,
    vertices: Vec<ModelVertex>,
    material: Option<Material>,
    handle: Option<BufferHandle>,
}

impl GeometryBuffer {
    pub fn upload(
        backend: &mut dyn RenderBackend,
        source: SourceId,
        label: String,
        vertices: Vec<ModelVertex>,
        material: Option<Material>,
    ) -> Result<Self> {
        let handle = backend.upload_geometry(&label, &vertices)?;
        log::debug!("uploaded {label} ({} vertices)", vertices.len());
        Ok(Self {
            label,
            source,
            vertices,
            material,
            handle: Some(handle),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn vertices(&self) -> &[ModelVertex] {
        &self.vertices
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn material(&self) -> Option<&Material> {
        self.material.as_ref()
    }

    /// The backend handle, `None` once disposed.
    pub fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_none()
    }

    /// Releases the backend buffer. Returns `false` (and releases nothing)
    /// when the buffer was already disposed.
    pub fn dispose(&mut self, backend: &mut dyn RenderBackend) -> bool {
        match self.handle.take() {
            Some(handle) => {
                backend.release_geometry(handle);
                log::debug!("disposed {}", self.label);
                true
            }
            None => {
                log::warn!("{} disposed twice", self.label);
                false
            }
        }
    }
}

/// Owns every live [`GeometryBuffer`], keyed by [`GeometryId`], and remembers
/// which ids belong to which source.
#[derive(Debug, Default)]
pub struct GeometryPool {
    next_id: u64,
    buffers: HashMap<GeometryId, GeometryBuffer>,
    by_source: HashMap<SourceId, Vec<GeometryId>>,
}

impl GeometryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers already uploaded for `source`.
    pub fn cached(&self, source: &SourceId) -> Option<&[GeometryId]> {
        self.by_source.get(source).map(Vec::as_slice)
    }

    /// Uploads every usable group of `record`, or returns the cached ids when
    /// the source is already resident.
    ///
    /// Groups without positions or with a broken position array are skipped
    /// with a warning. A backend failure rolls back the groups uploaded so
    /// far and is returned.
    pub fn upload_record(
        &mut self,
        record: &GeometryRecord,
        normals: NormalMode,
        backend: &mut dyn RenderBackend,
    ) -> Result<Vec<GeometryId>> {
        if let Some(ids) = self.by_source.get(&record.source) {
            return Ok(ids.clone());
        }

        let mut ids = Vec::with_capacity(record.groups.len());
        for (idx, group) in record.groups.iter().enumerate() {
            let vertices = match build_vertices(&record.source, group, normals) {
                Ok(vertices) => vertices,
                Err(e) => {
                    log::warn!("skipping group {idx} of {}: {e}", record.source);
                    continue;
                }
            };
            let material = match &group.material {
                Some(name) => {
                    let material = record.materials.get(name).cloned();
                    if material.is_none() {
                        log::warn!("{}: material `{name}` is not defined", record.source);
                    }
                    material
                }
                None => None,
            };
            let label = if group.name.is_empty() {
                format!("{}#{idx}", record.source)
            } else {
                format!("{}#{}", record.source, group.name)
            };
            match GeometryBuffer::upload(backend, record.source.clone(), label, vertices, material)
            {
                Ok(buffer) => ids.push(self.insert(buffer)),
                Err(e) => {
                    for id in ids {
                        if let Some(mut buffer) = self.buffers.remove(&id) {
                            buffer.dispose(backend);
                        }
                    }
                    return Err(e);
                }
            }
        }

        if ids.is_empty() {
            log::warn!("{} has no drawable geometry", record.source);
        }
        self.by_source.insert(record.source.clone(), ids.clone());
        Ok(ids)
    }

    pub fn get(&self, id: GeometryId) -> Option<&GeometryBuffer> {
        self.buffers.get(&id)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Disposes the given buffers of `source` and forgets the source. Ids
    /// that are already gone are ignored.
    pub fn release_source(
        &mut self,
        source: &SourceId,
        ids: &[GeometryId],
        backend: &mut dyn RenderBackend,
    ) {
        for id in ids {
            if let Some(mut buffer) = self.buffers.remove(id) {
                buffer.dispose(backend);
            }
        }
        if let Some(remaining) = self.by_source.remove(source) {
            let leaked: Vec<_> = remaining.iter().filter(|id| !ids.contains(id)).collect();
            if !leaked.is_empty() {
                log::warn!("{source}: releasing {} buffers no instance referenced", leaked.len());
                for id in leaked {
                    if let Some(mut buffer) = self.buffers.remove(id) {
                        buffer.dispose(backend);
                    }
                }
            }
        }
    }

    fn insert(&mut self, buffer: GeometryBuffer) -> GeometryId {
        self.next_id += 1;
        let id = GeometryId(self.next_id);
        self.buffers.insert(id, buffer);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    const EPS: f32 = 1e-6;

    fn triangle() -> Vec<f32> {
        vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
    }

    fn group(positions: Vec<f32>) -> GeometryGroup {
        GeometryGroup {
            name: "g".to_string(),
            positions,
            ..Default::default()
        }
    }

    #[test]
    fn single_triangle_normals_point_up_z() {
        let normals = smooth_normals(&triangle());
        assert_eq!(normals.len(), 9);
        for n in normals.chunks(3) {
            assert!((n[0]).abs() < EPS);
            assert!((n[1]).abs() < EPS);
            assert!((n[2] - 1.0).abs() < EPS);
        }
    }

    #[test]
    fn shared_positions_are_smoothed_across_faces() {
        // two triangles folded 90 degrees along the x axis, sharing an edge
        // but duplicating the vertices
        let positions = vec![
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, -1.0,
        ];
        let normals = smooth_normals(&positions);
        let s = std::f32::consts::FRAC_1_SQRT_2;
        // shared edge vertices see both faces
        assert!((normals[1] - s).abs() < EPS && (normals[2] - s).abs() < EPS);
        assert!((normals[10] - s).abs() < EPS && (normals[11] - s).abs() < EPS);
        // the lone vertex of each face keeps its face normal
        assert!((normals[8] - 1.0).abs() < EPS);
        assert!((normals[16] - 1.0).abs() < EPS);
    }

    #[test]
    fn faces_weigh_the_same_whatever_their_area() {
        let positions = vec![
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 10.0, 0.0, 0.0, 0.0, 0.0, -10.0,
        ];
        let normals = smooth_normals(&positions);
        let s = std::f32::consts::FRAC_1_SQRT_2;
        assert!(normals[0].abs() < EPS);
        assert!((normals[1] - s).abs() < EPS);
        assert!((normals[2] - s).abs() < EPS);
        assert_eq!(normals[0..3], normals[9..12]);
    }

    #[test]
    fn negative_zero_matches_zero() {
        let mut positions = triangle();
        positions.extend_from_slice(&[-0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
        let normals = smooth_normals(&positions);
        // vertex 0 and vertex 3 share a position and so share a normal
        assert_eq!(normals[0..3], normals[9..12]);
    }

    #[test]
    fn degenerate_triangle_yields_zero_normals() {
        let normals = smooth_normals(&[0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        assert!(normals.iter().all(|n| *n == 0.0));
    }

    #[test]
    fn missing_attributes_are_filled() {
        let vertices = build_vertices(&"tri".into(), &group(triangle()), NormalMode::Keep).unwrap();
        assert_eq!(vertices.len(), 3);
        for v in &vertices {
            assert_eq!(v.tex_coords, [0.0, 0.0]);
            assert_eq!(v.normal, [0.0, 0.0, 0.0]);
            assert_eq!(v.color[3], 1.0);
            assert!(v.color[..3].iter().all(|c| (0.0..1.0).contains(c)));
        }
    }

    #[test]
    fn rgb_colours_get_opaque_alpha() {
        let mut g = group(triangle());
        g.colors = Some(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        let vertices = build_vertices(&"tri".into(), &g, NormalMode::Keep).unwrap();
        assert_eq!(vertices[1].color, [0.4, 0.5, 0.6, 1.0]);
    }

    #[test]
    fn source_normals_win_unless_smoothing_is_forced() {
        let mut g = group(triangle());
        g.normals = Some(vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        let kept = build_vertices(&"tri".into(), &g, NormalMode::FillMissing).unwrap();
        assert_eq!(kept[0].normal, [1.0, 0.0, 0.0]);
        let smoothed = build_vertices(&"tri".into(), &g, NormalMode::Smooth).unwrap();
        assert_eq!(smoothed[0].normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn missing_positions_are_rejected() {
        let err = build_vertices(&"empty".into(), &group(Vec::new()), NormalMode::Keep);
        assert!(matches!(err, Err(Error::MissingPositions { .. })));
        let err = build_vertices(&"odd".into(), &group(vec![0.0, 1.0]), NormalMode::Keep);
        assert!(matches!(err, Err(Error::MalformedGeometry { .. })));
    }

    #[test]
    fn buffer_dispose_is_guarded() {
        let mut backend = HeadlessBackend::new();
        let vertices = build_vertices(&"tri".into(), &group(triangle()), NormalMode::Keep).unwrap();
        let mut buffer =
            GeometryBuffer::upload(&mut backend, "tri".into(), "tri".into(), vertices, None).unwrap();
        assert_eq!(buffer.vertex_count(), 3);
        assert!(buffer.dispose(&mut backend));
        assert!(!buffer.dispose(&mut backend));
        assert!(buffer.is_disposed());
        assert_eq!(backend.released_buffers().len(), 1);
        assert_eq!(backend.invalid_releases(), 0);
    }

    #[test]
    fn pool_uploads_a_source_once() {
        let mut backend = HeadlessBackend::new();
        let mut pool = GeometryPool::new();
        let mut record = GeometryRecord::new("cube.obj");
        record.groups.push(group(triangle()));
        record.groups.push(group(Vec::new()));

        let first = pool.upload_record(&record, NormalMode::FillMissing, &mut backend).unwrap();
        let second = pool.upload_record(&record, NormalMode::FillMissing, &mut backend).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert_eq!(backend.live_buffer_count(), 1);

        pool.release_source(&record.source, &first, &mut backend);
        assert!(pool.is_empty());
        assert!(pool.cached(&record.source).is_none());
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn failed_upload_rolls_back() {
        let mut backend = HeadlessBackend::new();
        backend.fail_uploads(true);
        let mut pool = GeometryPool::new();
        let mut record = GeometryRecord::new("a.obj");
        record.groups.push(group(triangle()));
        assert!(matches!(
            pool.upload_record(&record, NormalMode::Keep, &mut backend),
            Err(Error::Backend(_))
        ));
        assert!(pool.cached(&record.source).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn material_is_attached_by_name() {
        let mut backend = HeadlessBackend::new();
        let mut pool = GeometryPool::new();
        let mut record = GeometryRecord::new("m.obj");
        let mut g = group(triangle());
        g.material = Some("red".to_string());
        record.groups.push(g);
        record.materials.insert(
            "red".to_string(),
            Material {
                name: "red".to_string(),
                diffuse: [1.0, 0.0, 0.0],
                ..Default::default()
            },
        );
        let ids = pool.upload_record(&record, NormalMode::Keep, &mut backend).unwrap();
        let buffer = pool.get(ids[0]).unwrap();
        assert_eq!(buffer.material().map(|m| m.diffuse), Some([1.0, 0.0, 0.0]));
    }
}
