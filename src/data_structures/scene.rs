//! The session context that owns everything a scene is made of.
//!
//! A [`Scene`] holds the active instances in insertion order, the geometry
//! pool they draw from and the ledger arbitrating shared buffers. It keeps
//! display names unique, tracks the instance currently under edit, and defers
//! disposal of removed instances until [`Scene::flush_removals`] runs between
//! ticks.

use serde::{Deserialize, Serialize};

use crate::{
    backend::{DrawCall, RenderBackend, TextureSource},
    data_structures::{
        geometry::{GeometryPool, GeometryRecord, NormalMode, SourceId},
        instance::{ModelInstance, NO_TINT, Transform},
        ledger::ResourceLedger,
    },
    error::{Error, Result},
};

/// Live editor state for the instance being edited.
#[derive(Clone, Debug)]
struct EditSession {
    name: String,
    live: Transform,
}

#[derive(Debug)]
pub struct Scene {
    instances: Vec<ModelInstance>,
    pool: GeometryPool,
    ledger: ResourceLedger,
    normals: NormalMode,
    edit: Option<EditSession>,
    // removed but not yet disposed
    graveyard: Vec<ModelInstance>,
}

impl Scene {
    pub fn new(normals: NormalMode) -> Self {
        Self {
            instances: Vec::new(),
            pool: GeometryPool::new(),
            ledger: ResourceLedger::new(),
            normals,
            edit: None,
            graveyard: Vec::new(),
        }
    }

    pub fn pool(&self) -> &GeometryPool {
        &self.pool
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instances(&self) -> impl Iterator<Item = &ModelInstance> {
        self.instances.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ModelInstance> {
        self.instances.iter().find(|i| i.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ModelInstance> {
        self.instances.iter_mut().find(|i| i.name() == name)
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.instances
            .iter()
            .position(|i| i.name() == name)
            .ok_or_else(|| Error::UnknownInstance(name.to_string()))
    }

    fn is_taken(&self, name: &str, owner: Option<&str>) -> bool {
        owner != Some(name)
            && self
                .instances
                .iter()
                .chain(self.graveyard.iter())
                .any(|i| i.name() == name)
    }

    /// `wanted` if it is free, otherwise `"<stem> (<n>)"` with the smallest
    /// free `n`, where the stem drops any existing ` (<n>)` suffix.
    pub fn unique_name(&self, wanted: &str) -> String {
        self.unique_name_for(wanted, None)
    }

    // `owner` may keep its own name
    fn unique_name_for(&self, wanted: &str, owner: Option<&str>) -> String {
        if !self.is_taken(wanted, owner) {
            return wanted.to_string();
        }
        let stem = strip_counter(wanted);
        (1..)
            .map(|n| format!("{stem} ({n})"))
            .find(|candidate| !self.is_taken(candidate, owner))
            .unwrap_or_else(|| wanted.to_string())
    }

    /// Adds an instance of `record`, uploading its geometry unless the source
    /// is already resident. Reusing resident geometry registers the new
    /// instance in the ledger alongside an existing holder, the same way
    /// [`duplicate`](Self::duplicate) does.
    ///
    /// Returns the (possibly disambiguated) name of the new instance.
    pub fn spawn(
        &mut self,
        record: &GeometryRecord,
        name: Option<&str>,
        backend: &mut dyn RenderBackend,
    ) -> Result<String> {
        let resident = self.pool.cached(&record.source).is_some();
        let geometry = self.pool.upload_record(record, self.normals, backend)?;
        let name = self.unique_name(name.unwrap_or_else(|| default_name(&record.source)));

        if resident {
            let holder = self
                .instances
                .iter()
                .chain(self.graveyard.iter())
                .find(|i| i.source() == &record.source)
                .map(|i| i.name().to_string());
            match holder {
                Some(holder) => self.ledger.register_duplicate(&record.source, &holder, &name),
                None => log::warn!("{} is resident without any holder", record.source),
            }
        }

        log::info!("spawned {name} from {}", record.source);
        self.instances
            .push(ModelInstance::new(name.clone(), record.source.clone(), geometry));
        Ok(name)
    }

    /// Duplicates `name` next to it, sharing its buffers. Returns the new name.
    pub fn duplicate(&mut self, name: &str) -> Result<String> {
        let idx = self.index_of(name)?;
        let new_name = self.unique_name(name);
        let copy = self.instances[idx].duplicate(new_name.clone(), &mut self.ledger)?;
        self.instances.insert(idx + 1, copy);
        log::info!("duplicated {name} as {new_name}");
        Ok(new_name)
    }

    /// Renames `old`, disambiguating `new` if it is taken. Returns the name
    /// actually given.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<String> {
        let idx = self.index_of(old)?;
        if old == new {
            return Ok(old.to_string());
        }
        let new_name = self.unique_name_for(new, Some(old));
        if new_name == old {
            return Ok(new_name);
        }
        self.instances[idx].rename(new_name.clone(), &mut self.ledger);
        if let Some(edit) = self.edit.as_mut().filter(|e| e.name == old) {
            edit.name = new_name.clone();
        }
        Ok(new_name)
    }

    /// Takes `name` out of the scene. Its resources are released by the next
    /// [`flush_removals`](Self::flush_removals).
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let idx = self.index_of(name)?;
        if self.edit.as_ref().is_some_and(|e| e.name == name) {
            self.edit = None;
        }
        let instance = self.instances.remove(idx);
        self.graveyard.push(instance);
        Ok(())
    }

    /// Disposes every removed instance. Returns how many were disposed.
    pub fn flush_removals(&mut self, backend: &mut dyn RenderBackend) -> usize {
        let removed = std::mem::take(&mut self.graveyard);
        let count = removed.len();
        for mut instance in removed {
            if let Err(e) = instance.dispose(&mut self.ledger, &mut self.pool, backend) {
                log::warn!("{e}");
            }
        }
        count
    }

    /// Removes and disposes everything at once. Only call between ticks.
    pub fn clear(&mut self, backend: &mut dyn RenderBackend) {
        self.edit = None;
        self.graveyard.append(&mut self.instances);
        self.flush_removals(backend);
    }

    /// Starts editing `name`; its live transform starts from the current one.
    pub fn begin_edit(&mut self, name: &str) -> Result<()> {
        let idx = self.index_of(name)?;
        self.edit = Some(EditSession {
            name: name.to_string(),
            live: *self.instances[idx].transform(),
        });
        Ok(())
    }

    /// Feeds the property editor's current values for the edited instance.
    pub fn update_edit(&mut self, live: Transform) {
        match self.edit.as_mut() {
            Some(edit) => edit.live = live,
            None => log::warn!("transform update without an edit session"),
        }
    }

    /// Commits the live transform and stops editing.
    pub fn end_edit(&mut self) {
        self.apply_live_edit();
        self.edit = None;
    }

    pub fn editing(&self) -> Option<&str> {
        self.edit.as_ref().map(|e| e.name.as_str())
    }

    /// Copies the editor's live transform into the edited instance.
    pub fn apply_live_edit(&mut self) {
        let Some(edit) = self.edit.clone() else {
            return;
        };
        match self.get_mut(&edit.name) {
            Some(instance) => instance.set_transform(edit.live),
            None => {
                log::warn!("edited instance {} disappeared", edit.name);
                self.edit = None;
            }
        }
    }

    pub fn set_transform(&mut self, name: &str, transform: Transform) -> Result<()> {
        let idx = self.index_of(name)?;
        self.instances[idx].set_transform(transform);
        if let Some(edit) = self.edit.as_mut().filter(|e| e.name == name) {
            edit.live = transform;
        }
        Ok(())
    }

    pub fn set_tint(&mut self, name: &str, tint: [f32; 4]) -> Result<()> {
        let idx = self.index_of(name)?;
        self.instances[idx].set_tint(tint);
        Ok(())
    }

    /// Uploads `texture` and installs it as the override of `name`.
    pub fn set_texture(
        &mut self,
        name: &str,
        texture: &TextureSource,
        backend: &mut dyn RenderBackend,
    ) -> Result<()> {
        let idx = self.index_of(name)?;
        let handle = backend.upload_texture(texture)?;
        self.instances[idx].set_texture(handle, backend);
        Ok(())
    }

    pub fn clear_texture(&mut self, name: &str, backend: &mut dyn RenderBackend) -> Result<()> {
        let idx = self.index_of(name)?;
        self.instances[idx].clear_texture(backend);
        Ok(())
    }

    /// Every draw of the current scene, in instance order.
    pub fn draw_calls(&self) -> Vec<DrawCall> {
        self.instances
            .iter()
            .flat_map(|i| i.draw_calls(&self.pool))
            .collect()
    }

    /// What the persistence layer needs to rebuild the scene.
    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            instances: self
                .instances
                .iter()
                .map(|i| InstanceSnapshot {
                    source: i.source().clone(),
                    name: i.name().to_string(),
                    transform: *i.transform(),
                    tint: i.tint(),
                })
                .collect(),
        }
    }

    /// Rebuilds instances from `snapshot`, loading each source through
    /// `load`. Entries whose source fails to load are logged and skipped.
    /// Returns how many instances were restored.
    pub fn restore<F>(
        &mut self,
        snapshot: &SceneSnapshot,
        mut load: F,
        backend: &mut dyn RenderBackend,
    ) -> Result<usize>
    where
        F: FnMut(&SourceId) -> anyhow::Result<GeometryRecord>,
    {
        let mut restored = 0;
        for entry in &snapshot.instances {
            let record = if self.pool.cached(&entry.source).is_some() {
                GeometryRecord::new(entry.source.clone())
            } else {
                match load(&entry.source) {
                    Ok(record) => record,
                    Err(e) => {
                        log::error!("could not reload {}: {e:#}", entry.source);
                        continue;
                    }
                }
            };
            let name = self.spawn(&record, Some(&entry.name), backend)?;
            self.set_transform(&name, entry.transform)?;
            self.set_tint(&name, entry.tint)?;
            restored += 1;
        }
        Ok(restored)
    }
}

fn default_name(source: &SourceId) -> &str {
    let path = std::path::Path::new(source.as_str());
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(source.as_str())
}

fn strip_counter(name: &str) -> &str {
    if let Some(open) = name.rfind(" (") {
        let digits = &name[open + 2..];
        if let Some(digits) = digits.strip_suffix(')') {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                return &name[..open];
            }
        }
    }
    name
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub source: SourceId,
    pub name: String,
    pub transform: Transform,
    #[serde(default = "no_tint")]
    pub tint: [f32; 4],
}

fn no_tint() -> [f32; 4] {
    NO_TINT
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub instances: Vec<InstanceSnapshot>,
}

impl SceneSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use cgmath::Vector3;

    use super::*;
    use crate::{backend::headless::HeadlessBackend, data_structures::geometry::GeometryGroup};

    fn record(source: &str) -> GeometryRecord {
        let mut record = GeometryRecord::new(source);
        record.groups.push(GeometryGroup {
            name: "body".to_string(),
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            ..Default::default()
        });
        record
    }

    #[test]
    fn counter_suffix_is_stripped() {
        assert_eq!(strip_counter("chair (12)"), "chair");
        assert_eq!(strip_counter("chair (x)"), "chair (x)");
        assert_eq!(strip_counter("chair ()"), "chair ()");
        assert_eq!(strip_counter("chair"), "chair");
    }

    #[test]
    fn names_stay_unique() {
        let mut backend = HeadlessBackend::new();
        let mut scene = Scene::new(NormalMode::Keep);
        let a = scene.spawn(&record("models/chair.obj"), None, &mut backend).unwrap();
        let b = scene.duplicate(&a).unwrap();
        let c = scene.duplicate(&b).unwrap();
        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("chair", "chair (1)", "chair (2)"));

        let renamed = scene.rename("chair (2)", "chair").unwrap();
        assert_eq!(renamed, "chair (2)");
        assert!(matches!(scene.rename("nope", "x"), Err(Error::UnknownInstance(_))));
    }

    #[test]
    fn duplicate_is_inserted_after_original() {
        let mut backend = HeadlessBackend::new();
        let mut scene = Scene::new(NormalMode::Keep);
        scene.spawn(&record("a.obj"), None, &mut backend).unwrap();
        scene.spawn(&record("b.obj"), None, &mut backend).unwrap();
        scene.duplicate("a").unwrap();
        let order: Vec<_> = scene.instances().map(|i| i.name().to_string()).collect();
        assert_eq!(order, vec!["a", "a (1)", "b"]);
    }

    #[test]
    fn respawning_a_resident_source_shares_buffers() {
        let mut backend = HeadlessBackend::new();
        let mut scene = Scene::new(NormalMode::Keep);
        scene.spawn(&record("tree.obj"), None, &mut backend).unwrap();
        scene.spawn(&record("tree.obj"), None, &mut backend).unwrap();
        assert_eq!(backend.live_buffer_count(), 1);
        assert!(scene.ledger().is_tracked(&"tree.obj".into()));

        scene.remove("tree").unwrap();
        scene.flush_removals(&mut backend);
        assert_eq!(backend.live_buffer_count(), 1);
        scene.remove("tree (1)").unwrap();
        scene.flush_removals(&mut backend);
        assert_eq!(backend.live_buffer_count(), 0);
        assert!(scene.ledger().is_empty());
    }

    #[test]
    fn removal_is_deferred_until_flush() {
        let mut backend = HeadlessBackend::new();
        let mut scene = Scene::new(NormalMode::Keep);
        scene.spawn(&record("rock.obj"), None, &mut backend).unwrap();
        scene.remove("rock").unwrap();
        assert!(scene.get("rock").is_none());
        assert!(scene.draw_calls().is_empty());
        assert_eq!(backend.live_buffer_count(), 1);
        // the pending name is still reserved
        assert_eq!(scene.unique_name("rock"), "rock (1)");

        assert_eq!(scene.flush_removals(&mut backend), 1);
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(scene.unique_name("rock"), "rock");
    }

    #[test]
    fn live_edit_is_applied_only_when_asked() {
        let mut backend = HeadlessBackend::new();
        let mut scene = Scene::new(NormalMode::Keep);
        scene.spawn(&record("box.obj"), None, &mut backend).unwrap();
        scene.begin_edit("box").unwrap();
        scene.update_edit(Vector3::new(3.0, 0.0, 0.0).into());
        assert_eq!(scene.get("box").unwrap().transform().translation.x, 0.0);

        scene.apply_live_edit();
        assert_eq!(scene.get("box").unwrap().transform().translation.x, 3.0);

        scene.rename("box", "crate").unwrap();
        assert_eq!(scene.editing(), Some("crate"));
        scene.update_edit(Vector3::new(4.0, 0.0, 0.0).into());
        scene.end_edit();
        assert_eq!(scene.editing(), None);
        assert_eq!(scene.get("crate").unwrap().transform().translation.x, 4.0);
    }

    #[test]
    fn snapshot_restores_names_transforms_and_tints() {
        let mut backend = HeadlessBackend::new();
        let mut scene = Scene::new(NormalMode::Keep);
        scene.spawn(&record("cup.obj"), Some("mug"), &mut backend).unwrap();
        scene.set_transform("mug", Vector3::new(1.0, 2.0, 3.0).into()).unwrap();
        scene.set_tint("mug", [1.0, 0.0, 0.0, 0.5]).unwrap();
        scene.duplicate("mug").unwrap();

        let json = scene.snapshot().to_json().unwrap();
        let snapshot = SceneSnapshot::from_json(&json).unwrap();

        let mut other_backend = HeadlessBackend::new();
        let mut restored = Scene::new(NormalMode::Keep);
        let mut loads = 0;
        let count = restored
            .restore(
                &snapshot,
                |source| {
                    loads += 1;
                    Ok(record(source.as_str()))
                },
                &mut other_backend,
            )
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(loads, 1);
        assert_eq!(restored.snapshot(), scene.snapshot());
        assert_eq!(other_backend.live_buffer_count(), 1);
    }

    #[test]
    fn restore_skips_unloadable_sources() {
        let mut backend = HeadlessBackend::new();
        let snapshot = SceneSnapshot {
            instances: vec![InstanceSnapshot {
                source: "gone.obj".into(),
                name: "gone".to_string(),
                transform: Transform::new(),
                tint: NO_TINT,
            }],
        };
        let mut scene = Scene::new(NormalMode::Keep);
        let count = scene
            .restore(&snapshot, |_| Err(anyhow::anyhow!("missing")), &mut backend)
            .unwrap();
        assert_eq!(count, 0);
        assert!(scene.is_empty());
    }

    #[test]
    fn clear_releases_everything() {
        let mut backend = HeadlessBackend::new();
        let mut scene = Scene::new(NormalMode::Keep);
        scene.spawn(&record("a.obj"), None, &mut backend).unwrap();
        scene.duplicate("a").unwrap();
        scene.spawn(&record("b.obj"), None, &mut backend).unwrap();
        scene.clear(&mut backend);
        assert!(scene.is_empty());
        assert!(scene.pool().is_empty());
        assert!(scene.ledger().is_empty());
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.invalid_releases(), 0);
    }
}
