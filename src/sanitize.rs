use std::path::{Component, Path, PathBuf};

use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::error::{
    ERR_FILENAME_INVALID, ERR_INVALID_EXTENSION, ERR_NAME_TOO_LONG, ERR_PATH_TRAVERSAL,
};
use crate::AppError;

// Metadata stores enforce uniqueness and references. This layer owns filesystem
// hygiene: name shape, normalization, traversal prevention, and byte-length limits.
pub const MAX_COMPONENT_BYTES: usize = 255;
pub const MAX_STEM_BYTES: usize = 120;
pub const PLACEHOLDER_NAME: &str = "unnamed";
pub const ALLOWED_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "svg", "ico", "webp"];

const ILLEGAL_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

fn is_illegal(c: char) -> bool {
    c.is_control() || ILLEGAL_CHARS.contains(&c)
}

/// Turn an arbitrary user-supplied name into a single safe path component.
///
/// Illegal characters become `_`, the result is NFC normalized, trailing dots
/// and spaces are dropped and the stem is capped at [`MAX_STEM_BYTES`]. Input
/// with no usable character maps to [`PLACEHOLDER_NAME`].
pub fn sanitize_filename(raw: &str) -> String {
    let normalized = raw.nfc().collect::<String>();
    let trimmed = normalized.trim();

    let has_usable = trimmed
        .chars()
        .any(|c| !is_illegal(c) && !c.is_whitespace() && c != '.');
    if !has_usable {
        return PLACEHOLDER_NAME.to_string();
    }

    let mut cleaned: String = trimmed
        .chars()
        .map(|c| if is_illegal(c) { '_' } else { c })
        .collect();
    let kept = cleaned.trim_end_matches([' ', '.']).len();
    cleaned.truncate(kept);

    let (stem, ext) = split_name(&cleaned);
    let mut stem = truncate_bytes(stem, MAX_STEM_BYTES).to_string();
    if is_reserved_windows_name(&stem) {
        stem.insert(0, '_');
    }
    match ext {
        Some(ext) => format!("{stem}.{}", truncate_bytes(ext, 16)),
        None => stem,
    }
}

/// Sanitize a storage-relative path (`category/file`), keeping `/` between
/// segments. Absolute paths and traversal segments are rejected outright.
pub fn sanitize_relative_path(raw: &str) -> Result<String, AppError> {
    let unified = raw.replace('\\', "/");
    if unified.is_empty() {
        return Err(AppError::new(
            ERR_FILENAME_INVALID,
            "Icon path cannot be empty.",
        ));
    }
    if is_windows_drive(&unified) || unified.starts_with('/') {
        return Err(AppError::new(
            ERR_PATH_TRAVERSAL,
            "Absolute paths are not allowed for icons.",
        ));
    }

    let mut segments = Vec::new();
    for raw_segment in unified.split('/') {
        if raw_segment.is_empty() {
            continue;
        }
        if raw_segment == "." || raw_segment == ".." {
            return Err(AppError::new(
                ERR_PATH_TRAVERSAL,
                "Icon paths may not include traversal segments.",
            ));
        }
        segments.push(sanitize_filename(raw_segment));
    }

    if segments.is_empty() {
        return Err(AppError::new(
            ERR_FILENAME_INVALID,
            "Icon path cannot be empty.",
        ));
    }
    Ok(segments.join("/"))
}

/// Category names are used verbatim as directory names, so they are checked
/// rather than rewritten.
pub fn validate_component(segment: &str) -> Result<(), AppError> {
    if segment.trim().is_empty() {
        return Err(AppError::new(
            ERR_FILENAME_INVALID,
            "Names cannot be empty.",
        ));
    }
    if segment == "." || segment == ".." || segment.contains(['/', '\\']) {
        return Err(AppError::new(
            ERR_PATH_TRAVERSAL,
            "Names may not contain path separators or traversal segments.",
        ));
    }
    if segment.as_bytes().len() > MAX_COMPONENT_BYTES {
        return Err(AppError::new(ERR_NAME_TOO_LONG, "Name is too long."));
    }
    if segment.trim_end_matches([' ', '.']).len() != segment.len() {
        return Err(AppError::new(
            ERR_FILENAME_INVALID,
            "Names may not end with spaces or dots.",
        ));
    }
    if segment.chars().any(is_illegal) {
        return Err(AppError::new(
            ERR_FILENAME_INVALID,
            "Names contain unsupported characters.",
        ));
    }
    if is_reserved_windows_name(segment) {
        return Err(AppError::new(
            ERR_FILENAME_INVALID,
            "Names may not use reserved Windows names.",
        ));
    }
    Ok(())
}

/// Split `name` into stem and extension at the last dot. A leading dot is
/// part of the stem.
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// Lower-cased extension of an uploaded filename, if it is on the allow-list.
pub fn allowed_extension(original_filename: &str) -> Result<String, AppError> {
    let ext = original_filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty());
    match ext {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(ext),
        Some(ext) => Err(AppError::new(
            ERR_INVALID_EXTENSION,
            "File type is not supported.",
        )
        .with_context("extension", ext)),
        None => Err(AppError::new(
            ERR_INVALID_EXTENSION,
            "File has no extension.",
        )),
    }
}

/// Stored name for a fresh upload: never derived from the uploaded name.
pub fn generated_icon_name(ext: &str) -> String {
    let token = Uuid::now_v7().simple().to_string();
    let tail = &token[token.len() - 8..];
    format!("icon_{}_{tail}.{ext}", crate::time::stamp())
}

/// Walk each existing component below `base` and deny symlinks.
pub fn reject_symlinks(base: &Path, path: &Path) -> Result<(), &'static str> {
    // Best-effort: a concurrent actor could still swap in a symlink after this
    // check. The vault re-runs the guard on every resolve.
    let mut cur = base.to_path_buf();
    for comp in path
        .strip_prefix(base)
        .unwrap_or(path)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
    {
        cur.push(comp.as_os_str());
        match std::fs::symlink_metadata(&cur) {
            Ok(meta) if meta.file_type().is_symlink() => return Err("symlink encountered"),
            Ok(_) => {}
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Join `relative` under `base`, refusing anything that does not stay inside.
pub fn join_within(base: &Path, relative: &str) -> Result<PathBuf, AppError> {
    let mut full = base.to_path_buf();
    for comp in Path::new(relative).components() {
        match comp {
            Component::Normal(part) => full.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::new(
                    ERR_PATH_TRAVERSAL,
                    "Icon path must stay inside the storage root.",
                ));
            }
        }
    }
    if !full.starts_with(base) || full == base {
        return Err(AppError::new(
            ERR_PATH_TRAVERSAL,
            "Icon path must stay inside the storage root.",
        ));
    }
    Ok(full)
}

fn truncate_bytes(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

fn is_windows_drive(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    if bytes.len() < 2 {
        return false;
    }
    let drive = bytes[0] as char;
    bytes[1] == b':' && drive.is_ascii_alphabetic()
}

fn is_reserved_windows_name(segment: &str) -> bool {
    const RESERVED: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let stem = segment.split('.').next().unwrap_or(segment);
    RESERVED.iter().any(|name| stem.eq_ignore_ascii_case(name))
}
