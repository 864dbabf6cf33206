//! Named, transformable scene objects.
//!
//! A [`ModelInstance`] references geometry in the pool by id and owns only its
//! own state: the [`Transform`] record and its cached matrix, an optional
//! texture override and a tint. Whether the referenced buffers may be freed
//! when the instance goes away is decided by the [`ResourceLedger`].

use cgmath::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    backend::{DrawCall, RenderBackend, ShadingMode, TextureHandle},
    data_structures::{
        geometry::{GeometryId, GeometryPool, SourceId},
        ledger::{Release, ResourceLedger},
    },
    error::{Error, Result},
    math,
};

/// Translation, per-axis Euler rotation in radians, and scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vector3<f32>,
    pub rotation: Vector3<f32>,
    pub scale: Vector3<f32>,
}

impl Transform {
    /// Identity transform (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            translation: Vector3::new(0.0, 0.0, 0.0),
            rotation: Vector3::new(0.0, 0.0, 0.0),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    /// `T * Rx * Ry * Rz * S`: scale first, then Z, Y, X rotation, then
    /// translation.
    pub fn to_matrix(&self) -> Matrix4<f32> {
        math::multiply(
            math::translation(self.translation),
            math::multiply(
                math::euler_rotation(self.rotation),
                math::scale(self.scale),
            ),
        )
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vector3<f32>> for Transform {
    fn from(translation: Vector3<f32>) -> Self {
        Transform {
            translation,
            ..Default::default()
        }
    }
}

/// Transparent black: no tint.
pub const NO_TINT: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

#[derive(Debug)]
pub struct ModelInstance {
    name: String,
    source: SourceId,
    geometry: Vec<GeometryId>,
    transform: Transform,
    matrix: Matrix4<f32>,
    texture: Option<TextureHandle>,
    tint: [f32; 4],
    disposed: bool,
}

impl ModelInstance {
    pub fn new(name: impl Into<String>, source: SourceId, geometry: Vec<GeometryId>) -> Self {
        let transform = Transform::new();
        Self {
            name: name.into(),
            source,
            geometry,
            matrix: transform.to_matrix(),
            transform,
            texture: None,
            tint: NO_TINT,
            disposed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn geometry(&self) -> &[GeometryId] {
        &self.geometry
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// The matrix computed by the last [`set_transform`](Self::set_transform).
    pub fn transform_matrix(&self) -> Matrix4<f32> {
        self.matrix
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
        self.matrix = transform.to_matrix();
    }

    pub fn tint(&self) -> [f32; 4] {
        self.tint
    }

    pub fn set_tint(&mut self, tint: [f32; 4]) {
        self.tint = tint;
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    /// Installs a texture override, releasing the one it replaces.
    pub fn set_texture(&mut self, texture: TextureHandle, backend: &mut dyn RenderBackend) {
        if let Some(old) = self.texture.replace(texture) {
            backend.release_texture(old);
        }
    }

    pub fn clear_texture(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(old) = self.texture.take() {
            backend.release_texture(old);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// A new instance named `name` drawing the same buffers, with a copy of
    /// the current transform and tint. Both names are registered for the
    /// source. The texture override is not carried over.
    ///
    /// An instance without geometry duplicates into another instance without
    /// geometry.
    pub fn duplicate(&self, name: impl Into<String>, ledger: &mut ResourceLedger) -> Result<Self> {
        if self.disposed {
            return Err(Error::AlreadyDisposed(self.name.clone()));
        }
        let name = name.into();
        ledger.register_duplicate(&self.source, &self.name, &name);
        Ok(Self {
            name,
            source: self.source.clone(),
            geometry: self.geometry.clone(),
            transform: self.transform,
            matrix: self.matrix,
            texture: None,
            tint: self.tint,
            disposed: false,
        })
    }

    /// Renames the instance, carrying its ledger registration along.
    pub fn rename(&mut self, name: impl Into<String>, ledger: &mut ResourceLedger) {
        let name = name.into();
        if ledger.rename(&self.source, &self.name, &name) {
            log::debug!("ledger entry for {} moved to {name}", self.name);
        }
        self.name = name;
    }

    /// Releases the instance. Shared buffers stay alive while other holders
    /// remain; otherwise every referenced buffer is disposed once. The
    /// texture override is always released.
    ///
    /// Disposing twice returns [`Error::AlreadyDisposed`] and touches nothing.
    pub fn dispose(
        &mut self,
        ledger: &mut ResourceLedger,
        pool: &mut GeometryPool,
        backend: &mut dyn RenderBackend,
    ) -> Result<Release> {
        if self.disposed {
            return Err(Error::AlreadyDisposed(self.name.clone()));
        }
        self.disposed = true;
        self.clear_texture(backend);

        let release = ledger.release(&self.source, &self.name);
        if release.frees_buffers() {
            pool.release_source(&self.source, &self.geometry, backend);
        }
        log::debug!("disposed {} ({release:?})", self.name);
        Ok(release)
    }

    /// One draw per live buffer, with the shading input chosen per buffer:
    /// the texture override, else the buffer's material, else vertex colours.
    pub fn draw_calls(&self, pool: &GeometryPool) -> Vec<DrawCall> {
        if self.disposed {
            return Vec::new();
        }
        self.geometry
            .iter()
            .filter_map(|id| {
                let buffer = pool.get(*id);
                let handle = buffer.and_then(|b| b.handle());
                if handle.is_none() {
                    log::warn!("{} references freed geometry {id:?}", self.name);
                }
                Some((buffer?, handle?))
            })
            .filter(|(buffer, _)| buffer.vertex_count() > 0)
            .map(|(buffer, handle)| {
                let shading = match (self.texture, buffer.material()) {
                    (Some(_), _) => ShadingMode::Texture,
                    (None, Some(_)) => ShadingMode::Material,
                    (None, None) => ShadingMode::VertexColor,
                };
                DrawCall {
                    buffer: handle,
                    vertex_count: buffer.vertex_count(),
                    model: self.matrix,
                    shading,
                    texture: self.texture,
                    material: buffer.material().cloned(),
                    tint: self.tint,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use cgmath::{InnerSpace, Vector4};
    use std::f32::consts::FRAC_PI_2;

    use super::*;
    use crate::{
        backend::{TextureSource, headless::HeadlessBackend},
        data_structures::geometry::{GeometryGroup, GeometryRecord, Material, NormalMode},
    };

    const EPS: f32 = 1e-5;

    fn near(a: Vector4<f32>, b: Vector4<f32>) -> bool {
        (a - b).magnitude() < EPS
    }

    fn apply(m: Matrix4<f32>, p: [f32; 3]) -> Vector4<f32> {
        math::transform(m, math::point(p.into()))
    }

    fn upload(pool: &mut GeometryPool, backend: &mut HeadlessBackend, source: &str) -> Vec<GeometryId> {
        let mut record = GeometryRecord::new(source);
        for name in ["a", "b"] {
            record.groups.push(GeometryGroup {
                name: name.to_string(),
                positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                ..Default::default()
            });
        }
        pool.upload_record(&record, NormalMode::Keep, backend).unwrap()
    }

    #[test]
    fn identity_transform_is_identity_matrix() {
        let m = Transform::new().to_matrix();
        assert!(near(apply(m, [1.0, 2.0, 3.0]), Vector4::new(1.0, 2.0, 3.0, 1.0)));
    }

    #[test]
    fn transform_composes_t_r_s() {
        let mut instance = ModelInstance::new("box", "box.obj".into(), Vec::new());
        instance.set_transform(Transform {
            translation: Vector3::new(10.0, 0.0, 0.0),
            rotation: Vector3::new(0.0, 0.0, FRAC_PI_2),
            scale: Vector3::new(2.0, 3.0, 4.0),
        });
        let m = instance.transform_matrix();

        // origin only sees the translation
        assert!(near(apply(m, [0.0, 0.0, 0.0]), Vector4::new(10.0, 0.0, 0.0, 1.0)));
        // x: scaled to 2, rotated onto +y, translated
        assert!(near(apply(m, [1.0, 0.0, 0.0]), Vector4::new(10.0, 2.0, 0.0, 1.0)));
        // y: scaled to 3, rotated onto -x
        assert!(near(apply(m, [0.0, 1.0, 0.0]), Vector4::new(7.0, 0.0, 0.0, 1.0)));
        // z: scaled to 4, untouched by a z rotation
        assert!(near(apply(m, [0.0, 0.0, 1.0]), Vector4::new(10.0, 0.0, 4.0, 1.0)));
    }

    #[test]
    fn euler_rotations_apply_z_before_x() {
        let t = Transform {
            rotation: Vector3::new(FRAC_PI_2, 0.0, FRAC_PI_2),
            ..Default::default()
        };
        // Rz takes x to y, then Rx takes y to z
        assert!(near(apply(t.to_matrix(), [1.0, 0.0, 0.0]), Vector4::new(0.0, 0.0, 1.0, 1.0)));
    }

    #[test]
    fn matrix_is_cached_until_set() {
        let mut instance = ModelInstance::new("box", "box.obj".into(), Vec::new());
        let before = instance.transform_matrix();
        let mut t = *instance.transform();
        t.translation.x = 5.0;
        assert_eq!(instance.transform_matrix(), before);
        instance.set_transform(t);
        assert_ne!(instance.transform_matrix(), before);
    }

    #[test]
    fn duplicate_shares_buffers_and_copies_transform() {
        let mut backend = HeadlessBackend::new();
        let mut pool = GeometryPool::new();
        let mut ledger = ResourceLedger::new();
        let ids = upload(&mut pool, &mut backend, "chair.obj");

        let mut original = ModelInstance::new("chair", "chair.obj".into(), ids.clone());
        original.set_transform(Vector3::new(1.0, 0.0, 0.0).into());
        let copy = original.duplicate("chair (1)", &mut ledger).unwrap();
        assert_eq!(copy.geometry(), ids.as_slice());
        assert_eq!(copy.transform(), original.transform());
        assert_eq!(backend.live_buffer_count(), 2);

        original.set_transform(Vector3::new(9.0, 0.0, 0.0).into());
        assert_eq!(copy.transform().translation.x, 1.0);

        let holders = ledger.holders(&"chair.obj".into()).unwrap();
        assert!(holders.contains("chair") && holders.contains("chair (1)"));
    }

    #[test]
    fn buffers_survive_until_last_holder() {
        let mut backend = HeadlessBackend::new();
        let mut pool = GeometryPool::new();
        let mut ledger = ResourceLedger::new();
        let ids = upload(&mut pool, &mut backend, "chair.obj");
        let mut original = ModelInstance::new("chair", "chair.obj".into(), ids);
        let mut copy = original.duplicate("chair (1)", &mut ledger).unwrap();

        assert_eq!(
            original.dispose(&mut ledger, &mut pool, &mut backend).unwrap(),
            Release::Retained
        );
        assert_eq!(backend.live_buffer_count(), 2);
        assert_eq!(copy.draw_calls(&pool).len(), 2);

        assert_eq!(
            copy.dispose(&mut ledger, &mut pool, &mut backend).unwrap(),
            Release::LastReference
        );
        assert_eq!(backend.live_buffer_count(), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn double_dispose_is_reported_and_harmless() {
        let mut backend = HeadlessBackend::new();
        let mut pool = GeometryPool::new();
        let mut ledger = ResourceLedger::new();
        let ids = upload(&mut pool, &mut backend, "lamp.obj");
        let mut lamp = ModelInstance::new("lamp", "lamp.obj".into(), ids);

        assert_eq!(
            lamp.dispose(&mut ledger, &mut pool, &mut backend).unwrap(),
            Release::Untracked
        );
        assert!(matches!(
            lamp.dispose(&mut ledger, &mut pool, &mut backend),
            Err(Error::AlreadyDisposed(_))
        ));
        assert_eq!(backend.released_buffers().len(), 2);
        assert_eq!(backend.invalid_releases(), 0);
        assert!(lamp.draw_calls(&pool).is_empty());
    }

    #[test]
    fn rename_moves_ledger_entry() {
        let mut ledger = ResourceLedger::new();
        let mut a = ModelInstance::new("a", "s".into(), Vec::new());
        let _b = a.duplicate("b", &mut ledger).unwrap();
        a.rename("c", &mut ledger);
        let holders = ledger.holders(&"s".into()).unwrap();
        assert!(holders.contains("c") && !holders.contains("a"));
    }

    #[test]
    fn placeholder_duplicates_to_empty_instance() {
        let mut ledger = ResourceLedger::new();
        let pool = GeometryPool::new();
        let empty = ModelInstance::new("empty", "none".into(), Vec::new());
        let copy = empty.duplicate("empty (1)", &mut ledger).unwrap();
        assert!(copy.geometry().is_empty());
        assert!(copy.draw_calls(&pool).is_empty());
    }

    #[test]
    fn shading_mode_follows_texture_then_material() {
        let mut backend = HeadlessBackend::new();
        let mut pool = GeometryPool::new();
        let mut record = GeometryRecord::new("m.obj");
        record.groups.push(GeometryGroup {
            name: "plain".to_string(),
            positions: vec![0.0; 9],
            ..Default::default()
        });
        record.groups.push(GeometryGroup {
            name: "painted".to_string(),
            positions: vec![0.0; 9],
            material: Some("paint".to_string()),
            ..Default::default()
        });
        record.materials.insert("paint".to_string(), Material::default());
        let ids = pool.upload_record(&record, NormalMode::Keep, &mut backend).unwrap();

        let mut instance = ModelInstance::new("m", "m.obj".into(), ids);
        let modes: Vec<_> = instance.draw_calls(&pool).iter().map(|d| d.shading).collect();
        assert_eq!(modes, vec![ShadingMode::VertexColor, ShadingMode::Material]);

        let texture = backend
            .upload_texture(&TextureSource {
                label: "t".to_string(),
                width: 1,
                height: 1,
                rgba: vec![255; 4],
            })
            .unwrap();
        instance.set_texture(texture, &mut backend);
        assert!(instance.draw_calls(&pool).iter().all(|d| d.shading == ShadingMode::Texture));

        let mut ledger = ResourceLedger::new();
        instance.dispose(&mut ledger, &mut pool, &mut backend).unwrap();
        assert_eq!(backend.live_texture_count(), 0);
    }
}
