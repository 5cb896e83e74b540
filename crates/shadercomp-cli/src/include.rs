use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use shadercomp_combos::{ComboAxis, ShaderDescription};

/// Emit the companion include file next to the archives:
/// `<shader_path>/include/<name>.inc`.
///
/// The file records each axis with the multiplier needed to assemble a
/// combo id from axis values, so engine code can index the archive without
/// re-deriving the layout.
pub fn write_include(shader_path: &Path, desc: &ShaderDescription) -> Result<PathBuf> {
    let dir = shader_path.join("include");
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(format!("{}.inc", desc.name));

    let mut out = String::new();
    let _ = writeln!(
        out,
        "// {} ({}, {}); auto-generated combo table, do not edit",
        desc.name, desc.source_file, desc.shader_version
    );
    let _ = writeln!(out, "// skips: {}", desc.skips.len());

    write_axis_group(&mut out, "static_combo", &desc.static_axes);
    write_axis_group(&mut out, "dynamic_combo", &desc.dynamic_axes);

    fs::write(&path, out).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

fn write_axis_group(out: &mut String, kind: &str, axes: &[ComboAxis]) {
    let mut scale: u64 = 1;
    for axis in axes {
        let _ = writeln!(
            out,
            "{kind} {} {}..{} scale {scale}",
            axis.name, axis.min, axis.max
        );
        scale *= axis.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_lists_axes_with_scales() {
        let dir = tempfile::tempdir().unwrap();
        let desc = ShaderDescription {
            name: "water_ps30".to_string(),
            source_file: "water.fxc".to_string(),
            shader_version: "ps_3_0".to_string(),
            static_axes: vec![
                ComboAxis {
                    name: "FANCY".to_string(),
                    min: 0,
                    max: 1,
                },
                ComboAxis {
                    name: "REFLECT".to_string(),
                    min: 0,
                    max: 2,
                },
            ],
            dynamic_axes: vec![ComboAxis {
                name: "FOG".to_string(),
                min: 0,
                max: 1,
            }],
            skips: Vec::new(),
            centroid_mask: 0,
        };

        let path = write_include(dir.path(), &desc).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("static_combo FANCY 0..1 scale 1"));
        assert!(text.contains("static_combo REFLECT 0..2 scale 2"));
        assert!(text.contains("dynamic_combo FOG 0..1 scale 1"));
    }
}
