//! Output file naming.
//!
//! Recording outputs are built from a template carrying a `%DATE%`
//! placeholder, expanded at process-spawn time so every relaunch gets a
//! fresh name. Timestamps use U+A789 in place of `:` so the result stays a
//! valid Windows file name.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Placeholder replaced with the spawn timestamp.
pub const DATE_PLACEHOLDER: &str = "%DATE%";

/// Timestamp layout used inside file names. The `꞉` is U+A789, not a colon.
const DATE_FORMAT: &str = "%d-%m-%Y %H\u{a789}%M\u{a789}%S";

/// Format a timestamp the way it appears in file names and console logs.
pub fn timestamp(now: DateTime<Local>) -> String {
    now.format(DATE_FORMAT).to_string()
}

/// Characters invalid in Windows file names.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Sanitize a name component for cross-platform use.
pub fn sanitize_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_control() || INVALID_CHARS.contains(&c) {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    let trimmed = out.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Reduce a quality selector to the label embedded in file names.
///
/// Multi-quality selectors like `"720p,best"` are cut at the first comma,
/// dropping the character before it as well. That off-by-one is long-standing
/// observed behavior and existing file names depend on it, so it is kept.
pub fn quality_label(quality: &str) -> String {
    let quality = quality.trim();
    let chars: Vec<char> = quality.chars().collect();
    match chars.iter().position(|&c| c == ',') {
        Some(idx) if idx > 0 => chars[..idx - 1].iter().collect(),
        _ => quality.to_string(),
    }
}

/// Build the output template for an identifier.
///
/// Relative names are rooted under `default_root` when one is configured.
/// Any extension on `name` is discarded; recordings are always `.ts`.
pub fn build_output_template(name: &str, default_root: Option<&Path>, quality: &str) -> PathBuf {
    let name = name.trim();
    let mut base = PathBuf::from(name);
    if base.is_relative()
        && let Some(root) = default_root
    {
        base = root.join(name);
    }

    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .map(sanitize_component)
        .unwrap_or_else(|| "unnamed".to_string());
    let label = quality_label(quality);

    let file_name = format!("{} [{}][{}].ts", stem, DATE_PLACEHOLDER, label);
    match base.parent() {
        Some(parent) if parent != Path::new("") => parent.join(file_name),
        _ => PathBuf::from(file_name),
    }
}

/// Expand `%DATE%` in a template with the given timestamp.
pub fn expand_template(template: &Path, now: DateTime<Local>) -> PathBuf {
    let expanded = template
        .to_string_lossy()
        .replace(DATE_PLACEHOLDER, &now.format(DATE_FORMAT).to_string());
    PathBuf::from(expanded)
}

/// Return `path` or, if something already exists there, the first
/// `name (N).ext` variant that does not.
pub fn non_existing_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    for n in 1u32.. {
        let candidate_name = match &ext {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        let candidate = match path.parent() {
            Some(parent) => parent.join(candidate_name),
            None => PathBuf::from(candidate_name),
        };
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

/// Expand the template and pick a collision-free final path.
pub fn resolve_output_path(template: &Path, now: DateTime<Local>) -> PathBuf {
    non_existing_path(&expand_template(template, now))
}
