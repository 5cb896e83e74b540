use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;

/// Fixed pattern separating compiler warnings from errors in a listing.
const WARNING_PATTERN: &str = "warning X";

/// One distinct compiler message: the first command that produced it and how
/// often it was seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    pub first_command: String,
    pub times_reported: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ShaderMessages {
    pub warnings: BTreeMap<String, MessageInfo>,
    pub errors: BTreeMap<String, MessageInfo>,
}

/// Collects compiler output across workers, keyed by shader then message
/// text, behind its own lock.
#[derive(Debug, Default)]
pub struct Diagnostics {
    shaders: Mutex<BTreeMap<String, ShaderMessages>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a listing into lines and file each non-empty one under the
    /// shader, remembering `command` for the first report of each message.
    pub fn report_listing(&self, shader: &str, command: &str, listing: &str) {
        let mut shaders = self.lock();
        let messages = shaders.entry(shader.to_string()).or_default();

        for line in listing.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let bucket = if line.contains(WARNING_PATTERN) {
                &mut messages.warnings
            } else {
                &mut messages.errors
            };
            bucket
                .entry(line.to_string())
                .and_modify(|info| info.times_reported += 1)
                .or_insert_with(|| MessageInfo {
                    first_command: command.to_string(),
                    times_reported: 1,
                });
        }
    }

    /// Total distinct (warning, error) message counts across all shaders.
    pub fn totals(&self) -> (usize, usize) {
        let shaders = self.lock();
        shaders.values().fold((0, 0), |(w, e), messages| {
            (w + messages.warnings.len(), e + messages.errors.len())
        })
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Render the end-of-run summary. `working_dir` is stripped from message
    /// paths where it prefixes a `file(line,col)` location.
    pub fn render_summary(&self, working_dir: &str) -> String {
        let shaders = self.lock();
        if shaders.is_empty() {
            return String::new();
        }

        let (total_warnings, total_errors) = shaders.values().fold((0, 0), |(w, e), m| {
            (w + m.warnings.len(), e + m.errors.len())
        });

        let mut out = String::new();
        let _ = writeln!(out, "WARNINGS/ERRORS {total_warnings}/{total_errors}");

        for (shader, messages) in shaders.iter() {
            if !messages.warnings.is_empty() {
                let _ = writeln!(out, "{shader} {} WARNING(S):", messages.warnings.len());
                for (text, info) in &messages.warnings {
                    let _ = writeln!(
                        out,
                        "{}\nReported {} time(s)",
                        strip_working_dir(text, working_dir),
                        info.times_reported
                    );
                }
            }
            if !messages.errors.is_empty() {
                let _ = writeln!(out, "{shader} {} ERROR(S):", messages.errors.len());
                for (text, info) in &messages.errors {
                    let _ = writeln!(
                        out,
                        "{}\nReported {} time(s), example command:\n    {}",
                        strip_working_dir(text, working_dir),
                        info.times_reported,
                        info.first_command
                    );
                }
            }
        }
        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, ShaderMessages>> {
        self.shaders.lock().expect("diagnostics lock poisoned")
    }
}

/// Remove the working-directory prefix from the path ahead of a
/// `file(line,col)` location, if present.
fn strip_working_dir(message: &str, working_dir: &str) -> String {
    if working_dir.is_empty() {
        return message.to_string();
    }
    let Some(paren) = message.find('(') else {
        return message.to_string();
    };
    let path = &message[..paren];
    for sep in ['/', '\\'] {
        let prefix = format!("{working_dir}{sep}");
        if path.starts_with(&prefix) {
            return message[prefix.len()..].to_string();
        }
    }
    message.to_string()
}
