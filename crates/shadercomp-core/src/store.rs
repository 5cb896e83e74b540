use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use shadercomp_combos::EntryInfo;
use shadercomp_vcs::PackedStaticCombo;

/// One compiled dynamic variant, owned by its static combo until packaging.
#[derive(Debug, Clone)]
pub struct BytecodeBlock {
    pub dynamic_id: u64,
    pub bytes: Vec<u8>,
    pub crc32: u32,
}

/// Accumulates a static combo's dynamic blocks, then its packed region.
#[derive(Debug, Default)]
struct StaticCombo {
    blocks: Vec<BytecodeBlock>,
    packed: Option<Vec<u8>>,
}

/// Header-relevant facts about a shader entry, cached before its range runs.
#[derive(Debug, Clone)]
pub struct ShaderInfo {
    pub name: String,
    pub source_file: String,
    pub total_combos: u64,
    pub dynamic_combos: u64,
    pub centroid_mask: u32,
}

impl ShaderInfo {
    pub fn from_entry(entry: &EntryInfo) -> Self {
        ShaderInfo {
            name: entry.name.clone(),
            source_file: entry.source_file.clone(),
            total_combos: entry.num_combos,
            dynamic_combos: entry.num_dynamic_combos,
            centroid_mask: entry.centroid_mask,
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    combos: HashMap<String, HashMap<u64, StaticCombo>>,
    info: HashMap<String, ShaderInfo>,
    had_error: HashSet<String>,
    written_to_disk: HashSet<String>,
}

/// All compile results, behind the global data lock.
///
/// Every method takes the lock for a short critical section; none performs
/// I/O or calls back out.
#[derive(Debug, Default)]
pub struct ResultStore {
    inner: Mutex<StoreInner>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposit one successful dynamic compile.
    pub fn add_dynamic(&self, shader: &str, static_id: u64, dynamic_id: u64, bytes: Vec<u8>) {
        let crc32 = crc32fast::hash(&bytes);
        let mut inner = self.lock();
        inner
            .combos
            .entry(shader.to_string())
            .or_default()
            .entry(static_id)
            .or_default()
            .blocks
            .push(BytecodeBlock {
                dynamic_id,
                bytes,
                crc32,
            });
    }

    /// Remove a static combo's accumulated blocks, sorted ascending by
    /// dynamic id, ready for the packer. `None` when the combo never
    /// produced a block (all variants skipped or failed).
    pub fn take_blocks(&self, shader: &str, static_id: u64) -> Option<Vec<BytecodeBlock>> {
        let mut inner = self.lock();
        let combo = inner.combos.get_mut(shader)?.remove(&static_id)?;
        let mut blocks = combo.blocks;
        blocks.sort_by_key(|block| block.dynamic_id);
        Some(blocks)
    }

    /// Attach the packed region produced from a combo's blocks.
    pub fn store_packed(&self, shader: &str, static_id: u64, packed: Vec<u8>) {
        let mut inner = self.lock();
        inner
            .combos
            .entry(shader.to_string())
            .or_default()
            .entry(static_id)
            .or_default()
            .packed = Some(packed);
    }

    /// Atomically detach everything accumulated for `shader`, in packed
    /// form. Blocks that were never packaged are dropped.
    pub fn take_shader(&self, shader: &str) -> Vec<PackedStaticCombo> {
        let mut inner = self.lock();
        let Some(combos) = inner.combos.remove(shader) else {
            return Vec::new();
        };
        combos
            .into_iter()
            .filter_map(|(static_id, combo)| {
                combo.packed.map(|packed| PackedStaticCombo { static_id, packed })
            })
            .collect()
    }

    pub fn set_shader_info(&self, info: ShaderInfo) {
        let mut inner = self.lock();
        inner.info.insert(info.name.clone(), info);
    }

    pub fn shader_info(&self, shader: &str) -> Option<ShaderInfo> {
        self.lock().info.get(shader).cloned()
    }

    pub fn mark_failed(&self, shader: &str) {
        self.lock().had_error.insert(shader.to_string());
    }

    pub fn has_failed(&self, shader: &str) -> bool {
        self.lock().had_error.contains(shader)
    }

    pub fn failed_shaders(&self) -> Vec<String> {
        let mut failed: Vec<String> = self.lock().had_error.iter().cloned().collect();
        failed.sort();
        failed
    }

    /// Record that `shader`'s archive write ran. Returns false when a write
    /// was already recorded, so the flush happens exactly once.
    pub fn mark_written(&self, shader: &str) -> bool {
        self.lock().written_to_disk.insert(shader.to_string())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("result store lock poisoned")
    }
}
