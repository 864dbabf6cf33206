#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering},
};

use mesh_stage::{
    GeometryRecord,
    backend::TextureSource,
    data_structures::geometry::{GeometryGroup, Material},
};

pub const QUAD_OBJ: &str = "\
mtllib quad.mtl
o quad
v -1 -1 0
v 1 -1 0
v 1 1 0
v -1 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
usemtl red
f 1/1 2/2 3/3 4/4
";

pub const QUAD_MTL: &str = "\
newmtl red
Ka 0.1 0.0 0.0
Kd 0.9 0.0 0.0
Ks 0.5 0.5 0.5
Ns 32
d 1
";

pub const TRIANGLE_OBJ: &str = "\
o tri
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
";

/// A throwaway directory under the system temp dir, removed on drop.
pub struct Fixtures {
    dir: PathBuf,
}

impl Fixtures {
    pub fn new(tag: &str) -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("mesh-stage-{tag}-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        Self { dir }
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for Fixtures {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// One triangle group per entry of `groups`; a `Some` material name gets a
/// matching material in the record.
pub fn record(source: &str, groups: &[Option<&str>]) -> GeometryRecord {
    let mut record = GeometryRecord::new(source);
    for (i, material) in groups.iter().enumerate() {
        record.groups.push(GeometryGroup {
            name: format!("g{i}"),
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            material: material.map(str::to_string),
            ..Default::default()
        });
        if let Some(name) = material {
            record.materials.insert(
                name.to_string(),
                Material {
                    name: name.to_string(),
                    ..Default::default()
                },
            );
        }
    }
    record
}

pub fn white_pixel() -> TextureSource {
    TextureSource {
        label: "white".to_string(),
        width: 1,
        height: 1,
        rgba: vec![255; 4],
    }
}
