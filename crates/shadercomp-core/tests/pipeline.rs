use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use shadercomp_combos::{CmpOp, ComboAxis, ComboSchedule, ShaderDescription, SkipExpr};
use shadercomp_core::{
    archive_path, write_shader_archive, CompileExecutor, CompileResponse, Diagnostics,
    DispatchOptions, Dispatcher, ResultStore, ShaderInfo, WriteOutcome,
};
use shadercomp_vcs::{read_archive, read_index, StaticComboPayload, END_MARKER};

fn axis(name: &str, min: i32, max: i32) -> ComboAxis {
    ComboAxis {
        name: name.to_string(),
        min,
        max,
    }
}

fn description(
    name: &str,
    statics: Vec<ComboAxis>,
    dynamics: Vec<ComboAxis>,
    skips: Vec<SkipExpr>,
) -> ShaderDescription {
    ShaderDescription {
        name: name.to_string(),
        source_file: format!("{name}.fxc"),
        shader_version: "ps_3_0".to_string(),
        static_axes: statics,
        dynamic_axes: dynamics,
        skips,
        centroid_mask: 0,
    }
}

/// Test double for the external compiler: every call is recorded, and the
/// response is computed from the command line so results are independent of
/// scheduling order.
struct ScriptedExecutor {
    calls: Mutex<Vec<String>>,
    respond: Box<dyn Fn(&str) -> CompileResponse + Send + Sync>,
}

impl ScriptedExecutor {
    fn new(respond: impl Fn(&str) -> CompileResponse + Send + Sync + 'static) -> Self {
        ScriptedExecutor {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        }
    }

    fn echo() -> Self {
        Self::new(|command| CompileResponse::success(command.as_bytes().to_vec(), None))
    }

    fn constant(bytes: &'static [u8]) -> Self {
        Self::new(move |_| CompileResponse::success(bytes.to_vec(), None))
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn single_threaded() -> DispatchOptions {
    DispatchOptions {
        threads: 1,
        ..DispatchOptions::default()
    }
}

impl CompileExecutor for ScriptedExecutor {
    fn execute(&self, command_line: &str, _flags: u32) -> CompileResponse {
        self.calls.lock().unwrap().push(command_line.to_string());
        (self.respond)(command_line)
    }
}

struct Pipeline {
    schedule: ComboSchedule,
    store: ResultStore,
    diagnostics: Diagnostics,
}

impl Pipeline {
    fn new(descriptions: &[ShaderDescription]) -> Self {
        Pipeline {
            schedule: ComboSchedule::build(descriptions).unwrap(),
            store: ResultStore::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Compile every entry and flush each archive, the way the CLI drives a
    /// run. Returns the per-shader outcomes.
    fn run(
        &self,
        executor: &dyn CompileExecutor,
        options: DispatchOptions,
        out_dir: &Path,
    ) -> Vec<WriteOutcome> {
        let stop = Arc::new(AtomicBool::new(false));
        let dispatcher = Dispatcher::new(
            &self.schedule,
            executor,
            &self.store,
            &self.diagnostics,
            options,
            stop,
        );

        let mut outcomes = Vec::new();
        for entry in self.schedule.entries() {
            self.store.set_shader_info(ShaderInfo::from_entry(entry));
            dispatcher.process_range(entry.command_start, entry.command_end);
            if dispatcher.stopped() {
                break;
            }
            outcomes.push(write_shader_archive(&self.store, entry, out_dir, 0).unwrap());
        }
        outcomes
    }
}

fn read_payloads(path: &Path) -> Vec<StaticComboPayload> {
    let bytes = fs::read(path).unwrap();
    read_archive(&mut Cursor::new(bytes.as_slice())).unwrap()
}

#[test]
fn trivial_single_combo_archive() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(&[description(
        "trivial",
        vec![axis("S", 0, 0)],
        vec![axis("D", 0, 0)],
        Vec::new(),
    )]);
    let executor = ScriptedExecutor::constant(&[0xAA, 0xBB]);

    let outcomes = pipeline.run(&executor, single_threaded(), dir.path());
    assert!(matches!(outcomes[0], WriteOutcome::Written { .. }));

    let path = archive_path(dir.path(), "trivial");
    let bytes = fs::read(&path).unwrap();
    let index = read_index(&mut Cursor::new(bytes.as_slice())).unwrap();
    assert_eq!(index.header.num_static_combos, 2); // one combo + sentinel
    assert_eq!(index.header.total_combos, 1);
    assert_eq!(index.header.dynamic_combos, 1);
    assert!(index.aliases.is_empty());

    let payloads = read_payloads(&path);
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].static_id, 0);
    assert_eq!(payloads[0].dynamic_combos, vec![(0, vec![0xAA, 0xBB])]);
}

#[test]
fn identical_static_combos_alias() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(&[description(
        "dedup",
        vec![axis("S", 0, 1)],
        vec![axis("D", 0, 0)],
        Vec::new(),
    )]);
    // Same bytes for both static combos.
    let executor = ScriptedExecutor::constant(b"same bytecode");

    pipeline.run(&executor, single_threaded(), dir.path());

    let bytes = fs::read(archive_path(dir.path(), "dedup")).unwrap();
    let index = read_index(&mut Cursor::new(bytes.as_slice())).unwrap();
    let ids: Vec<u32> = index.records.iter().map(|r| r.static_id).collect();
    assert_eq!(ids, [0, END_MARKER]);
    assert_eq!(index.aliases.len(), 1);
    assert_eq!((index.aliases[0].static_id, index.aliases[0].alias_of), (1, 0));
}

#[test]
fn skipped_combo_is_never_compiled_or_stored() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(&[description(
        "skippy",
        vec![axis("S", 0, 1)],
        vec![axis("D", 0, 1)],
        vec![SkipExpr::And(
            Box::new(SkipExpr::Cmp {
                axis: "S".to_string(),
                op: CmpOp::Eq,
                value: 1,
            }),
            Box::new(SkipExpr::Cmp {
                axis: "D".to_string(),
                op: CmpOp::Eq,
                value: 1,
            }),
        )],
    )]);
    let executor = ScriptedExecutor::echo();

    pipeline.run(&executor, single_threaded(), dir.path());
    assert_eq!(executor.call_count(), 3, "the skipped combo is not executed");

    let payloads = read_payloads(&archive_path(dir.path(), "skippy"));
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[0].static_id, 0);
    assert_eq!(payloads[0].dynamic_combos.len(), 2);
    assert_eq!(payloads[1].static_id, 1);
    assert_eq!(payloads[1].dynamic_combos.len(), 1);
    assert_eq!(payloads[1].dynamic_combos[0].0, 0);
}

#[test]
fn failed_shader_leaves_no_archive() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(&[description(
        "broken",
        vec![axis("S", 0, 1)],
        vec![axis("D", 0, 1)],
        Vec::new(),
    )]);
    // Command number 3 of 4 fails.
    let executor = ScriptedExecutor::new(|command| {
        if command.contains("-D S=1 -D D=1") {
            CompileResponse::failure(Some("broken.fxc(1,1): error X1000: exploded".to_string()))
        } else {
            CompileResponse::success(command.as_bytes().to_vec(), None)
        }
    });

    // Pre-seed a stale archive to prove the failure deletes it.
    let path = archive_path(dir.path(), "broken");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"stale").unwrap();

    let outcomes = pipeline.run(&executor, single_threaded(), dir.path());
    assert_eq!(executor.call_count(), 4, "without fast-fail, every command runs");
    assert_eq!(outcomes[0], WriteOutcome::RemovedFailed { path: path.clone() });
    assert!(!path.exists());
    assert_eq!(pipeline.store.failed_shaders(), ["broken"]);
    assert_eq!(pipeline.diagnostics.totals(), (0, 1));
}

#[test]
fn fast_fail_stops_remaining_commands() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(&[description(
        "broken",
        vec![axis("S", 0, 1)],
        vec![axis("D", 0, 1)],
        Vec::new(),
    )]);
    // Command number 1 of 4 fails; fast-fail stops the rest.
    let executor = ScriptedExecutor::new(|command| {
        if command.contains("-D S=0 -D D=1") {
            CompileResponse::failure(Some("error X1000: exploded".to_string()))
        } else {
            CompileResponse::success(command.as_bytes().to_vec(), None)
        }
    });

    let options = DispatchOptions {
        fast_fail: true,
        ..DispatchOptions::default()
    };
    pipeline.run(&executor, options, dir.path());

    assert_eq!(executor.call_count(), 2);
    assert_eq!(pipeline.store.failed_shaders(), ["broken"]);
    assert!(!archive_path(dir.path(), "broken").exists());
}

#[test]
fn missing_listing_is_fabricated() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(&[description(
        "silent",
        Vec::new(),
        vec![axis("D", 0, 0)],
        Vec::new(),
    )]);
    let executor = ScriptedExecutor::new(|_| CompileResponse::failure(None));

    pipeline.run(&executor, single_threaded(), dir.path());

    let summary = pipeline.diagnostics.render_summary("");
    assert!(summary.contains("compiler failed without error description"));
    assert!(summary.contains("Command number 0"));
}

#[test]
fn oversized_static_combo_splits_into_blocks() {
    fn noise(len: usize, mut seed: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            out.push((seed >> 24) as u8);
        }
        out
    }

    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(&[description(
        "big",
        Vec::new(),
        vec![axis("D", 0, 2)],
        Vec::new(),
    )]);
    let executor = ScriptedExecutor::new(|command| {
        let seed = (0..3u32)
            .find(|v| command.contains(&format!("-D D={v} ")))
            .expect("dynamic axis value in command");
        CompileResponse::success(noise(200_000, seed + 1), None)
    });

    pipeline.run(&executor, single_threaded(), dir.path());

    let path = archive_path(dir.path(), "big");
    let bytes = fs::read(&path).unwrap();
    let index = read_index(&mut Cursor::new(bytes.as_slice())).unwrap();
    let region_start = index.records[0].file_offset as usize;
    let region_end = index.records[1].file_offset as usize - 4; // end marker

    // Walk the tag words: cumulative bytecode exceeds the block size cap, so
    // the region must hold at least two blocks, each LZMA or uncompressed.
    let mut blocks = 0;
    let mut at = region_start;
    while at < region_end {
        let tag = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        let kind = tag >> 30;
        assert!(kind == 1 || kind == 2, "unexpected block kind {kind}");
        at += 4 + (tag & 0x3FFF_FFFF) as usize;
        blocks += 1;
    }
    assert_eq!(at, region_end);
    assert!(blocks >= 2, "expected a mid-stream flush, got {blocks} block(s)");

    // And the payload still round-trips intact.
    let payloads = read_payloads(&path);
    assert_eq!(payloads[0].dynamic_combos.len(), 3);
    for (dynamic_id, code) in &payloads[0].dynamic_combos {
        assert_eq!(*code, noise(200_000, dynamic_id + 1));
    }
}

#[test]
fn threaded_run_matches_single_threaded() {
    let descriptions = [description(
        "parallel",
        vec![axis("S", 0, 2)],
        vec![axis("D", 0, 3)],
        vec![SkipExpr::Cmp {
            axis: "D".to_string(),
            op: CmpOp::Eq,
            value: 3,
        }],
    )];

    let run_with = |threads: usize| -> Vec<StaticComboPayload> {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(&descriptions);
        let executor = ScriptedExecutor::echo();
        let options = DispatchOptions {
            threads,
            ..DispatchOptions::default()
        };
        pipeline.run(&executor, options, dir.path());
        read_payloads(&archive_path(dir.path(), "parallel"))
    };

    let single = run_with(1);
    let threaded = run_with(4);
    assert_eq!(single, threaded);

    // Completeness: every non-skipped command appears exactly once.
    let combos: Vec<(u32, u32)> = single
        .iter()
        .flat_map(|payload| {
            payload
                .dynamic_combos
                .iter()
                .map(|(dynamic_id, _)| (payload.static_id, *dynamic_id))
        })
        .collect();
    assert_eq!(combos.len(), 9); // 3 static * 4 dynamic - 3 skipped
    let mut unique = combos.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), combos.len());
}
