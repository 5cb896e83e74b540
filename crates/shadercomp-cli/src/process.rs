use std::path::PathBuf;
use std::process::Command;

use shadercomp_core::{flags, CompileExecutor, CompileResponse};

/// Executor that shells out to an external compile tool.
///
/// The enumerator's command line is split on whitespace and handed to the
/// tool verbatim, followed by the switches derived from the opaque flags
/// word. Bytecode is taken from stdout, the listing from stderr.
pub struct ProcessExecutor {
    compiler: PathBuf,
    working_dir: PathBuf,
}

impl ProcessExecutor {
    pub fn new(compiler: PathBuf, working_dir: PathBuf) -> Self {
        ProcessExecutor {
            compiler,
            working_dir,
        }
    }
}

impl CompileExecutor for ProcessExecutor {
    fn execute(&self, command_line: &str, flags: u32) -> CompileResponse {
        let mut command = Command::new(&self.compiler);
        command.current_dir(&self.working_dir);
        command.args(command_line.split_whitespace());
        command.args(flag_switches(flags));

        let output = match command.output() {
            Ok(output) => output,
            Err(err) => {
                return CompileResponse::failure(Some(format!(
                    "failed to launch {}: {err}",
                    self.compiler.display()
                )));
            }
        };

        let listing = if output.stderr.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&output.stderr).into_owned())
        };

        if !output.status.success() {
            return CompileResponse::failure(listing);
        }
        if output.stdout.is_empty() {
            return CompileResponse::failure(Some(
                listing.unwrap_or_else(|| "compiler produced no bytecode".to_string()),
            ));
        }
        CompileResponse::success(output.stdout, listing)
    }
}

/// Map flag bits onto the compile tool's switch surface.
fn flag_switches(flags: u32) -> Vec<&'static str> {
    let mut switches = Vec::new();
    if flags & flags::PARTIAL_PRECISION != 0 {
        switches.push("/Gpp");
    }
    if flags & flags::SKIP_VALIDATION != 0 {
        switches.push("/Vd");
    }
    if flags & flags::NO_PRESHADER != 0 {
        switches.push("/Op");
    }
    if flags & flags::AVOID_FLOW_CONTROL != 0 {
        switches.push("/Gfa");
    }
    if flags & flags::PREFER_FLOW_CONTROL != 0 {
        switches.push("/Gfp");
    }
    if flags & flags::SKIP_OPTIMIZATION != 0 {
        switches.push("/Od");
    }
    if flags & flags::DEBUG_INFO != 0 {
        switches.push("/Zi");
    }
    if flags & flags::OPTIMIZATION_LEVEL0 != 0 {
        switches.push("/O0");
    }
    if flags & flags::OPTIMIZATION_LEVEL1 != 0 {
        switches.push("/O1");
    }
    if flags & flags::OPTIMIZATION_LEVEL2 != 0 {
        switches.push("/O2");
    }
    if flags & flags::OPTIMIZATION_LEVEL3 != 0 {
        switches.push("/O3");
    }
    switches
}
