//! Scene data: geometry, instances, the sharing ledger and the scene itself.
//!
//! - `geometry` holds loader records, vertex building and the buffer pool
//! - `ledger` tracks which instances share a source's buffers
//! - `instance` holds per-instance transform, tint and texture state
//! - `scene` owns all of the above for one session
//! - `texture` contains the GPU texture wrapper used by the wgpu backend

pub mod geometry;
pub mod instance;
pub mod ledger;
pub mod scene;
pub mod texture;
