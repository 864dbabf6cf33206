//! Render pipelines. There is one: [`basic`] draws meshes with a per-draw
//! shading mode (vertex colour, material or texture) and tint.

pub mod basic;
