mod include;
mod process;

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use shadercomp_combos::{ComboSchedule, ShaderDescription};
use shadercomp_core::{
    archive_path, flags, write_shader_archive, Diagnostics, DispatchOptions, Dispatcher,
    ResultStore, ShaderInfo, WriteOutcome,
};
use shadercomp_vcs::read_header;

use crate::process::ProcessExecutor;

/// Shader model tags the tool accepts for `--ver`.
const SHADER_VERSIONS: &[&str] = &["20b", "30", "40", "41", "50", "51"];

#[derive(Debug, Parser)]
#[command(
    name = "shadercomp",
    version,
    about = "Compile every combo of a shader description into a .vcs archive"
)]
struct Args {
    /// Shader description file (JSON emitted by the shader parser),
    /// relative to --shader-path.
    description: PathBuf,

    /// Shader version tag.
    #[arg(long = "ver")]
    ver: String,

    /// Base directory for inputs and outputs.
    #[arg(long = "shader-path")]
    shader_path: PathBuf,

    /// Compile tool to invoke for each combo.
    #[arg(long, default_value = "fxc")]
    compiler: PathBuf,

    /// Recompile even when the existing archive matches the source CRC.
    #[arg(long)]
    force: bool,

    /// Print the source CRC32 and exit.
    #[arg(long)]
    crc: bool,

    /// Write only the companion include file and exit.
    #[arg(long)]
    dynamic: bool,

    /// Stop on the first compile error.
    #[arg(long)]
    fastfail: bool,

    /// Worker threads (0 = all cores).
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Verbose shader info.
    #[arg(long)]
    verbose: bool,

    /// Log every compile command.
    #[arg(long)]
    verbose2: bool,

    /// Compile with partial precision.
    #[arg(long = "partial-precision")]
    partial_precision: bool,

    /// Skip shader validation.
    #[arg(long = "no-validation")]
    no_validation: bool,

    /// Disable preshader generation.
    #[arg(long = "disable-preshader")]
    disable_preshader: bool,

    /// Avoid flow-control constructs.
    #[arg(long = "no-flow-control", conflicts_with = "prefer_flow_control")]
    no_flow_control: bool,

    /// Prefer flow-control constructs.
    #[arg(long = "prefer-flow-control")]
    prefer_flow_control: bool,

    /// Disable optimization.
    #[arg(long = "disable-optimization")]
    disable_optimization: bool,

    /// Enable debugging information.
    #[arg(long = "debug-info")]
    debug_info: bool,

    /// Optimization level (0-3).
    #[arg(long, default_value_t = 1)]
    optimize: u32,
}

fn main() {
    let args = Args::parse();
    match run(args) {
        Ok(failed_shaders) => std::process::exit(failed_shaders),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(2);
        }
    }
}

fn run(args: Args) -> Result<i32> {
    init_tracing(&args);
    let started = Instant::now();

    if !SHADER_VERSIONS.contains(&args.ver.as_str()) {
        bail!(
            "unknown shader version `{}` (expected one of: {})",
            args.ver,
            SHADER_VERSIONS.join(", ")
        );
    }

    let description_path = args.shader_path.join(&args.description);
    let raw = fs::read(&description_path)
        .with_context(|| format!("read {}", description_path.display()))?;
    let source_crc32 = crc32fast::hash(&raw);

    if args.crc {
        println!("{source_crc32}");
        return Ok(0);
    }

    let descriptions = parse_descriptions(&raw)
        .with_context(|| format!("parse {}", description_path.display()))?;

    if args.dynamic {
        for desc in &descriptions {
            include::write_include(&args.shader_path, desc)?;
        }
        return Ok(0);
    }

    let schedule = ComboSchedule::build(&descriptions).context("invalid shader description")?;

    if !args.force && archives_up_to_date(&schedule, &args, source_crc32) {
        println!("archives match source crc {source_crc32}, skipping (use --force to recompile)");
        return Ok(0);
    }

    for desc in &descriptions {
        include::write_include(&args.shader_path, desc)?;
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("install ctrl-c handler")?;
    }

    let store = ResultStore::new();
    let diagnostics = Diagnostics::new();
    let executor = ProcessExecutor::new(args.compiler.clone(), args.shader_path.clone());
    let options = DispatchOptions {
        threads: args.threads,
        flags: compile_flags(&args),
        fast_fail: args.fastfail,
    };

    let progress = ProgressBar::new(schedule.total_commands());
    progress.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} combos {msg} ({eta})",
        )?
        .progress_chars("##-"),
    );

    let mut dispatcher = Dispatcher::new(
        &schedule,
        &executor,
        &store,
        &diagnostics,
        options,
        Arc::clone(&stop),
    );
    {
        let progress = progress.clone();
        dispatcher.set_command_done_hook(move || progress.inc(1));
    }

    for entry in schedule.entries() {
        if args.verbose {
            progress.println(format!(
                "{}: {} combos, {} dynamic, centroid mask {:#x}",
                entry.name, entry.num_combos, entry.num_dynamic_combos, entry.centroid_mask
            ));
        }
        progress.set_message(entry.name.clone());
        store.set_shader_info(ShaderInfo::from_entry(entry));

        dispatcher.process_range(entry.command_start, entry.command_end);
        if dispatcher.stopped() {
            break;
        }
        // Skipped combos never tick the bar; snap to the range end.
        progress.set_position(entry.command_end);

        match write_shader_archive(&store, entry, &args.shader_path, source_crc32) {
            Ok(WriteOutcome::Written { path, static_combos }) => {
                progress.println(format!(
                    "{}: wrote {} ({static_combos} static combos)",
                    entry.name,
                    path.display()
                ));
            }
            Ok(WriteOutcome::RemovedFailed { .. }) => {
                progress.println(format!("{}: failed, archive removed", entry.name));
            }
            Ok(WriteOutcome::NothingToWrite | WriteOutcome::AlreadyWritten) => {}
            Err(err) => {
                // Archive I/O trouble fails this shader; keep compiling the rest.
                progress.println(format!("{}: archive write failed: {err}", entry.name));
                store.mark_failed(&entry.name);
            }
        }
    }
    progress.finish_and_clear();

    let interrupted = stop.load(Ordering::SeqCst);
    if !interrupted {
        print_summary(&store, &diagnostics);
        eprintln!("{:.1?} elapsed", started.elapsed());
    }

    Ok(i32::try_from(store.failed_shaders().len()).unwrap_or(i32::MAX))
}

fn init_tracing(args: &Args) {
    let default_filter = if args.verbose2 {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// The description file is either a single entry or a list of them.
fn parse_descriptions(raw: &[u8]) -> Result<Vec<ShaderDescription>> {
    if let Ok(list) = serde_json::from_slice::<Vec<ShaderDescription>>(raw) {
        return Ok(list);
    }
    let single: ShaderDescription =
        serde_json::from_slice(raw).context("expected a shader description object or array")?;
    Ok(vec![single])
}

/// True when every entry's archive exists and already carries this source
/// CRC.
fn archives_up_to_date(schedule: &ComboSchedule, args: &Args, source_crc32: u32) -> bool {
    schedule.entries().all(|entry| {
        let path = archive_path(&args.shader_path, &entry.name);
        let Ok(mut file) = fs::File::open(path) else {
            return false;
        };
        match read_header(&mut file) {
            Ok(header) => header.source_crc32 == source_crc32,
            Err(_) => false,
        }
    })
}

fn compile_flags(args: &Args) -> u32 {
    let mut out = 0;
    if args.partial_precision {
        out |= flags::PARTIAL_PRECISION;
    }
    if args.no_validation {
        out |= flags::SKIP_VALIDATION;
    }
    if args.disable_preshader {
        out |= flags::NO_PRESHADER;
    }
    if args.no_flow_control {
        out |= flags::AVOID_FLOW_CONTROL;
    }
    if args.prefer_flow_control {
        out |= flags::PREFER_FLOW_CONTROL;
    }
    if args.disable_optimization {
        out |= flags::SKIP_OPTIMIZATION;
    }
    if args.debug_info {
        out |= flags::DEBUG_INFO;
    }
    out |= match args.optimize {
        0 => flags::OPTIMIZATION_LEVEL0,
        1 => flags::OPTIMIZATION_LEVEL1,
        2 => flags::OPTIMIZATION_LEVEL2,
        3 => flags::OPTIMIZATION_LEVEL3,
        other => {
            eprintln!("unknown optimization level {other}, using default");
            flags::OPTIMIZATION_LEVEL1
        }
    };
    out
}

fn print_summary(store: &ResultStore, diagnostics: &Diagnostics) {
    if !diagnostics.is_empty() {
        let working_dir = std::env::current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        print!("{}", diagnostics.render_summary(&working_dir));
    }
    for failed in store.failed_shaders() {
        println!("FAILED: {failed}");
    }
}
