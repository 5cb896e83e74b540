use std::fmt::Write as _;
use std::sync::Arc;

use crate::desc::{CmpOp, ComboAxis, ShaderDescription, SkipExpr};
use crate::error::ComboError;
use crate::Result;

/// Derived counts and the command-number range for one shader entry.
///
/// The command space is dense: `command_end - command_start` equals
/// `num_static_combos * num_dynamic_combos`. Combos matching a skip
/// expression own a command number but are never yielded, which keeps
/// `static_id = combo_index / num_dynamic_combos` exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub source_file: String,
    pub shader_version: String,
    pub num_static_combos: u64,
    pub num_dynamic_combos: u64,
    pub num_combos: u64,
    pub centroid_mask: u32,
    pub command_start: u64,
    pub command_end: u64,
}

/// Skip expression with axis names resolved to value slots.
#[derive(Debug, Clone)]
enum BoundSkip {
    Not(Box<BoundSkip>),
    And(Box<BoundSkip>, Box<BoundSkip>),
    Or(Box<BoundSkip>, Box<BoundSkip>),
    Cmp { slot: usize, op: CmpOp, value: i32 },
}

impl BoundSkip {
    fn bind(expr: &SkipExpr, axes: &[ComboAxis], shader: &str) -> Result<BoundSkip> {
        Ok(match expr {
            SkipExpr::Not(inner) => BoundSkip::Not(Box::new(Self::bind(inner, axes, shader)?)),
            SkipExpr::And(a, b) => BoundSkip::And(
                Box::new(Self::bind(a, axes, shader)?),
                Box::new(Self::bind(b, axes, shader)?),
            ),
            SkipExpr::Or(a, b) => BoundSkip::Or(
                Box::new(Self::bind(a, axes, shader)?),
                Box::new(Self::bind(b, axes, shader)?),
            ),
            SkipExpr::Cmp { axis, op, value } => {
                let slot = axes.iter().position(|a| a.name == *axis).ok_or_else(|| {
                    ComboError::UnknownSkipAxis {
                        shader: shader.to_string(),
                        axis: axis.clone(),
                    }
                })?;
                BoundSkip::Cmp {
                    slot,
                    op: *op,
                    value: *value,
                }
            }
        })
    }

    fn eval(&self, values: &[i32]) -> bool {
        match self {
            BoundSkip::Not(inner) => !inner.eval(values),
            BoundSkip::And(a, b) => a.eval(values) && b.eval(values),
            BoundSkip::Or(a, b) => a.eval(values) || b.eval(values),
            BoundSkip::Cmp { slot, op, value } => op.eval(values[*slot], *value),
        }
    }
}

#[derive(Debug)]
struct EntryData {
    info: EntryInfo,
    /// Static axes followed by dynamic axes; value slots use the same order.
    axes: Vec<ComboAxis>,
    num_static_axes: usize,
    skips: Vec<BoundSkip>,
}

impl EntryData {
    /// Decode `combo_index` into per-axis values. The first axis of each
    /// group varies fastest.
    fn decode_values(&self, combo_index: u64, out: &mut Vec<i32>) {
        out.clear();
        let dyn_size = self.info.num_dynamic_combos;
        let static_id = combo_index / dyn_size;
        let dynamic_id = combo_index % dyn_size;
        decode_axis_group(&self.axes[..self.num_static_axes], static_id, out);
        decode_axis_group(&self.axes[self.num_static_axes..], dynamic_id, out);
    }

    fn is_skipped(&self, values: &[i32]) -> bool {
        self.skips.iter().any(|skip| skip.eval(values))
    }
}

fn decode_axis_group(axes: &[ComboAxis], mut id: u64, out: &mut Vec<i32>) {
    for axis in axes {
        let n = axis.len();
        out.push(axis.min + (id % n) as i32);
        id /= n;
    }
}

/// A resolved compile command: the entry it belongs to, its absolute command
/// number, and the per-axis values.
///
/// Handles share the entry behind an `Arc`, so cloning one per worker thread
/// is cheap; the dispatcher reuses a handle's value allocation across
/// [`ComboSchedule::next_combo`] calls.
#[derive(Debug, Clone)]
pub struct ComboHandle {
    entry: Arc<EntryData>,
    command: u64,
    values: Vec<i32>,
}

impl ComboHandle {
    pub fn entry(&self) -> &EntryInfo {
        &self.entry.info
    }

    /// Absolute command number across all entries.
    pub fn command_num(&self) -> u64 {
        self.command
    }

    /// Command number relative to the owning entry.
    pub fn combo_index(&self) -> u64 {
        self.command - self.entry.info.command_start
    }

    pub fn static_id(&self) -> u64 {
        self.combo_index() / self.entry.info.num_dynamic_combos
    }

    pub fn dynamic_id(&self) -> u64 {
        self.combo_index() % self.entry.info.num_dynamic_combos
    }

    /// Axis names and resolved values, statics first.
    pub fn axis_values(&self) -> impl Iterator<Item = (&str, i32)> {
        self.entry
            .axes
            .iter()
            .zip(&self.values)
            .map(|(axis, value)| (axis.name.as_str(), *value))
    }

    /// Deterministic compile-tool command line for the external executor.
    pub fn format_command(&self) -> String {
        let info = &self.entry.info;
        let mut cmd = format!("-T {}", info.shader_version);
        for (name, value) in self.axis_values() {
            let _ = write!(cmd, " -D {name}={value}");
        }
        let _ = write!(cmd, " {}", info.source_file);
        cmd
    }

    /// Human-readable form of the same command, used in diagnostics.
    pub fn format_command_human(&self) -> String {
        let info = &self.entry.info;
        let mut cmd = format!("{} [{}]", info.name, info.shader_version);
        for (name, value) in self.axis_values() {
            let _ = write!(cmd, " {name}={value}");
        }
        cmd
    }

    fn assign(&mut self, entry: &Arc<EntryData>, command: u64) {
        if !Arc::ptr_eq(&self.entry, entry) {
            self.entry = Arc::clone(entry);
        }
        self.command = command;
        let combo_index = command - self.entry.info.command_start;
        // Borrow dance: decode wants &entry and &mut values.
        let mut values = std::mem::take(&mut self.values);
        self.entry.decode_values(combo_index, &mut values);
        self.values = values;
    }
}

/// The full compile schedule over every shader entry.
#[derive(Debug)]
pub struct ComboSchedule {
    entries: Vec<Arc<EntryData>>,
    total_commands: u64,
}

impl ComboSchedule {
    /// Validate the descriptions and lay their combos out over a dense
    /// command-number space, one contiguous range per entry in order.
    pub fn build(descriptions: &[ShaderDescription]) -> Result<ComboSchedule> {
        let mut entries = Vec::with_capacity(descriptions.len());
        let mut next_command = 0u64;

        for desc in descriptions {
            let mut axes = Vec::with_capacity(desc.static_axes.len() + desc.dynamic_axes.len());
            axes.extend(desc.static_axes.iter().cloned());
            axes.extend(desc.dynamic_axes.iter().cloned());

            for (i, axis) in axes.iter().enumerate() {
                if axis.is_empty() {
                    return Err(ComboError::EmptyAxisRange {
                        shader: desc.name.clone(),
                        axis: axis.name.clone(),
                        min: axis.min,
                        max: axis.max,
                    });
                }
                if axes[..i].iter().any(|prev| prev.name == axis.name) {
                    return Err(ComboError::DuplicateAxis {
                        shader: desc.name.clone(),
                        axis: axis.name.clone(),
                    });
                }
            }

            let static_size = axis_product(&desc.static_axes)
                .ok_or_else(|| ComboError::ComboCountOverflow {
                    shader: desc.name.clone(),
                })?;
            let dyn_size = axis_product(&desc.dynamic_axes)
                .ok_or_else(|| ComboError::ComboCountOverflow {
                    shader: desc.name.clone(),
                })?;
            let num_combos = static_size.checked_mul(dyn_size).ok_or_else(|| {
                ComboError::ComboCountOverflow {
                    shader: desc.name.clone(),
                }
            })?;

            let skips = desc
                .skips
                .iter()
                .map(|skip| BoundSkip::bind(skip, &axes, &desc.name))
                .collect::<Result<Vec<_>>>()?;

            let command_start = next_command;
            let command_end = command_start
                .checked_add(num_combos)
                .ok_or(ComboError::CommandSpaceOverflow)?;
            next_command = command_end;

            entries.push(Arc::new(EntryData {
                info: EntryInfo {
                    name: desc.name.clone(),
                    source_file: desc.source_file.clone(),
                    shader_version: desc.shader_version.clone(),
                    num_static_combos: static_size,
                    num_dynamic_combos: dyn_size,
                    num_combos,
                    centroid_mask: desc.centroid_mask,
                    command_start,
                    command_end,
                },
                num_static_axes: desc.static_axes.len(),
                axes,
                skips,
            }));
        }

        Ok(ComboSchedule {
            entries,
            total_commands: next_command,
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = &EntryInfo> {
        self.entries.iter().map(|entry| &entry.info)
    }

    pub fn entry(&self, name: &str) -> Option<&EntryInfo> {
        self.entries
            .iter()
            .map(|entry| &entry.info)
            .find(|info| info.name == name)
    }

    /// One past the last command number of the last entry.
    pub fn total_commands(&self) -> u64 {
        self.total_commands
    }

    /// Resolve an absolute command number. Returns `None` when out of range
    /// or when the combo matches a skip expression.
    pub fn combo(&self, command: u64) -> Option<ComboHandle> {
        let entry = self.entry_for_command(command)?;
        let mut handle = ComboHandle {
            entry: Arc::clone(entry),
            command,
            values: Vec::new(),
        };
        handle.assign(entry, command);
        if handle.entry.is_skipped(&handle.values) {
            return None;
        }
        Some(handle)
    }

    /// Advance `cursor` to the next non-skipped command `< end` and assign it
    /// into `handle`, reusing its allocation. Sets `handle` to `None` when
    /// the range is exhausted.
    pub fn next_combo(&self, cursor: &mut u64, handle: &mut Option<ComboHandle>, end: u64) {
        let end = end.min(self.total_commands);
        while *cursor < end {
            let command = *cursor;
            *cursor += 1;

            // Unwrap is fine: `command < total_commands` always has an entry.
            let entry = self.entry_for_command(command).unwrap();
            match handle {
                Some(h) => h.assign(entry, command),
                None => {
                    *handle = Some(ComboHandle {
                        entry: Arc::clone(entry),
                        command,
                        values: Vec::new(),
                    });
                    handle.as_mut().unwrap().assign(entry, command);
                }
            }

            let h = handle.as_ref().unwrap();
            if !h.entry.is_skipped(&h.values) {
                return;
            }
        }
        *handle = None;
    }

    fn entry_for_command(&self, command: u64) -> Option<&Arc<EntryData>> {
        if command >= self.total_commands {
            return None;
        }
        let idx = self
            .entries
            .partition_point(|entry| entry.info.command_end <= command);
        self.entries.get(idx)
    }
}

fn axis_product(axes: &[ComboAxis]) -> Option<u64> {
    axes.iter()
        .try_fold(1u64, |acc, axis| acc.checked_mul(axis.len()))
}
