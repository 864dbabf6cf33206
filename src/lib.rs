//! mesh-stage
//!
//! A small scene viewer core. Meshes loaded from OBJ files are uploaded once
//! and shared by any number of named instances; each instance carries its own
//! transform, tint and optional texture. A fly-through camera and a paced
//! render loop draw the result through wgpu, or through a recording backend
//! when no window is wanted.
//!
//! High-level modules
//! - `backend`: the render backend seam, draw calls and the headless recorder
//! - `camera`: fly camera, input controller and projection
//! - `config`: engine settings read from JSON
//! - `context`: wgpu device, surface and the backend built on them
//! - `data_structures`: geometry buffers, instances, the resource ledger and the scene
//! - `flow`: the winit event loop and headless runner
//! - `math`: vector and matrix helpers on top of cgmath
//! - `pipelines`: the mesh render pipeline and its shader
//! - `resources`: loading OBJ/MTL files, images and scene snapshots
//! - `scheduler`: frame pacing and the per-tick render pass
//!

pub mod backend;
pub mod camera;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod flow;
pub mod math;
pub mod pipelines;
pub mod resources;
pub mod scheduler;

// Re-exports commonly used types for convenience in downstream code.
pub use backend::{RenderBackend, headless::HeadlessBackend};
pub use config::EngineConfig;
pub use data_structures::{
    geometry::{GeometryRecord, NormalMode, SourceId},
    instance::{ModelInstance, Transform},
    scene::{Scene, SceneSnapshot},
};
pub use error::{Error, Result};
pub use scheduler::RenderScheduler;
