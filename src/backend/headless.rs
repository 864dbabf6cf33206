//! In-memory backend that records what the core asks for.
//!
//! Nothing is rendered. Uploads hand out fresh handles, releases are checked
//! against the live set and every finished frame is kept for inspection,
//! which makes it the backend of choice for tests and `--headless` runs.

use std::collections::{HashMap, HashSet};

use crate::{
    backend::{BufferHandle, DrawCall, FrameUniforms, RenderBackend, TextureHandle, TextureSource},
    data_structures::geometry::ModelVertex,
    error::{Error, Result},
};

#[derive(Clone, Debug)]
pub struct RecordedFrame {
    pub uniforms: FrameUniforms,
    pub draws: Vec<DrawCall>,
}

/// Frames and released handles accumulate for the backend's whole life.
/// Long runs call [`HeadlessBackend::take_history`] to drain them.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u64,
    live_buffers: HashMap<BufferHandle, u32>,
    live_textures: HashSet<TextureHandle>,
    released_buffers: Vec<BufferHandle>,
    invalid_releases: usize,
    current: Option<RecordedFrame>,
    frames: Vec<RecordedFrame>,
    fail_uploads: bool,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following upload fail, to exercise error paths.
    pub fn fail_uploads(&mut self, fail: bool) {
        self.fail_uploads = fail;
    }

    pub fn live_buffer_count(&self) -> usize {
        self.live_buffers.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.live_textures.len()
    }

    pub fn is_live(&self, handle: BufferHandle) -> bool {
        self.live_buffers.contains_key(&handle)
    }

    /// Every buffer released so far, in release order.
    pub fn released_buffers(&self) -> &[BufferHandle] {
        &self.released_buffers
    }

    /// Releases of handles that were unknown or already freed.
    pub fn invalid_releases(&self) -> usize {
        self.invalid_releases
    }

    pub fn frames(&self) -> &[RecordedFrame] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&RecordedFrame> {
        self.frames.last()
    }

    /// Hands over the recorded frames and released buffers, leaving both empty.
    pub fn take_history(&mut self) -> (Vec<RecordedFrame>, Vec<BufferHandle>) {
        (
            std::mem::take(&mut self.frames),
            std::mem::take(&mut self.released_buffers),
        )
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl RenderBackend for HeadlessBackend {
    fn upload_geometry(&mut self, label: &str, vertices: &[ModelVertex]) -> Result<BufferHandle> {
        if self.fail_uploads {
            return Err(Error::Backend(format!("upload of {label} rejected")));
        }
        let handle = BufferHandle(self.next_id());
        self.live_buffers.insert(handle, vertices.len() as u32);
        log::debug!("headless: uploaded {label} as {handle:?} ({} vertices)", vertices.len());
        Ok(handle)
    }

    fn release_geometry(&mut self, handle: BufferHandle) {
        if self.live_buffers.remove(&handle).is_some() {
            self.released_buffers.push(handle);
        } else {
            log::warn!("headless: release of unknown buffer {handle:?}");
            self.invalid_releases += 1;
        }
    }

    fn upload_texture(&mut self, source: &TextureSource) -> Result<TextureHandle> {
        if self.fail_uploads {
            return Err(Error::Backend(format!("texture {} rejected", source.label)));
        }
        let expected = source.width as usize * source.height as usize * 4;
        if source.rgba.len() != expected {
            return Err(Error::Backend(format!(
                "texture {} has {} bytes, expected {expected}",
                source.label,
                source.rgba.len()
            )));
        }
        let handle = TextureHandle(self.next_id());
        self.live_textures.insert(handle);
        Ok(handle)
    }

    fn release_texture(&mut self, handle: TextureHandle) {
        if !self.live_textures.remove(&handle) {
            log::warn!("headless: release of unknown texture {handle:?}");
            self.invalid_releases += 1;
        }
    }

    fn begin_frame(&mut self, uniforms: &FrameUniforms) -> Result<()> {
        if self.current.is_some() {
            return Err(Error::Backend("frame already in progress".to_string()));
        }
        self.current = Some(RecordedFrame {
            uniforms: *uniforms,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw(&mut self, call: DrawCall) -> Result<()> {
        match self.live_buffers.get(&call.buffer) {
            None => {
                return Err(Error::Backend(format!(
                    "draw references released buffer {:?}",
                    call.buffer
                )));
            }
            Some(&count) if count != call.vertex_count => {
                return Err(Error::Backend(format!(
                    "draw of {:?} asks for {} vertices, buffer holds {count}",
                    call.buffer, call.vertex_count
                )));
            }
            Some(_) => (),
        }
        if let Some(texture) = call.texture {
            if !self.live_textures.contains(&texture) {
                return Err(Error::Backend(format!("draw references released texture {texture:?}")));
            }
        }
        let frame = self
            .current
            .as_mut()
            .ok_or_else(|| Error::Backend("draw outside of a frame".to_string()))?;
        frame.draws.push(call);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        let frame = self
            .current
            .take()
            .ok_or_else(|| Error::Backend("end_frame without begin_frame".to_string()))?;
        self.frames.push(frame);
        Ok(())
    }

    fn abort_frame(&mut self) {
        self.current = None;
    }
}
