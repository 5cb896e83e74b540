use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use shadercomp_combos::EntryInfo;
use shadercomp_vcs::{write_archive, ArchiveInfo, VcsError};
use thiserror::Error;
use tracing::info;

use crate::store::{ResultStore, ShaderInfo};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive encoding failed: {0}")]
    Vcs(#[from] VcsError),
}

/// What the per-shader flush did.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Archive written.
    Written { path: PathBuf, static_combos: usize },
    /// The shader failed; any stale archive was deleted.
    RemovedFailed { path: PathBuf },
    /// Nothing accumulated (range stopped before any combo finished).
    NothingToWrite,
    /// A write for this shader already ran.
    AlreadyWritten,
}

/// Destination archive path for a shader: `<shader_path>/shaders/fxc/<name>.vcs`.
pub fn archive_path(shader_path: &Path, shader: &str) -> PathBuf {
    shader_path
        .join("shaders")
        .join("fxc")
        .join(format!("{shader}.vcs"))
}

/// Flush one shader once its command range has fully executed.
///
/// Detaches the shader's packed combos from the store under the global lock,
/// then writes (or, for a failed shader, deletes) the archive with no lock
/// held. Runs at most once per shader.
pub fn write_shader_archive(
    store: &ResultStore,
    entry: &EntryInfo,
    shader_path: &Path,
    source_crc32: u32,
) -> Result<WriteOutcome, OutputError> {
    let shader = entry.name.as_str();
    if !store.mark_written(shader) {
        return Ok(WriteOutcome::AlreadyWritten);
    }

    let failed = store.has_failed(shader);
    let combos = store.take_shader(shader);
    let info = store
        .shader_info(shader)
        .unwrap_or_else(|| ShaderInfo::from_entry(entry));

    let path = archive_path(shader_path, shader);

    if failed {
        if path.exists() {
            fs::remove_file(&path).map_err(|source| OutputError::Io {
                path: path.clone(),
                source,
            })?;
        }
        return Ok(WriteOutcome::RemovedFailed { path });
    }

    if combos.is_empty() {
        return Ok(WriteOutcome::NothingToWrite);
    }

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| OutputError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let archive_info = ArchiveInfo {
        total_combos: info.total_combos,
        dynamic_combos: info.dynamic_combos,
        flags: 0,
        centroid_mask: info.centroid_mask,
        source_crc32,
    };

    let file = fs::File::create(&path).map_err(|source| OutputError::Io {
        path: path.clone(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    write_archive(&mut writer, &archive_info, &combos)?;
    writer.into_inner().map_err(|err| OutputError::Io {
        path: path.clone(),
        source: err.into_error(),
    })?;

    info!(shader, path = %path.display(), combos = combos.len(), "archive written");
    Ok(WriteOutcome::Written {
        path,
        static_combos: combos.len(),
    })
}
