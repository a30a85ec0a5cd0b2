use std::ffi::OsStr;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::fs::{self, File};
use uuid::Uuid;

use crate::backend::MetadataBackend;
use crate::error::ERR_FILE_MISSING;
use crate::model::Icon;
use crate::security::hash_path;
use crate::vault::Vault;
use crate::{AppError, AppResult};

#[cfg(test)]
static FORCE_COPY_FALLBACK: AtomicBool = AtomicBool::new(false);

const MAX_CONFLICT_ATTEMPTS: u32 = 9999;

/// Outcome of [`relocate`]. Callers persist `filename`, and call
/// [`Relocation::undo`] if that persist fails.
#[derive(Debug, Clone)]
pub struct Relocation {
    pub source: PathBuf,
    pub target: PathBuf,
    pub filename: String,
    /// The desired name was occupied and a suffixed name was used instead.
    pub renamed: bool,
    /// False when source and target were already the same path.
    pub moved: bool,
}

impl Relocation {
    pub fn unchanged(&self) -> bool {
        !self.moved
    }

    /// Move the file back where it came from.
    pub async fn undo(&self) -> AppResult<()> {
        if !self.moved {
            return Ok(());
        }
        if let Some(parent) = self.source.parent() {
            fs::create_dir_all(parent).await.map_err(|err| {
                AppError::from(err).with_context("operation", "relocate_undo_parent")
            })?;
        }
        move_file(&self.target, &self.source)
            .await
            .map_err(|err| err.with_context("operation", "relocate_undo"))?;
        tracing::info!(
            target: "iconvault",
            event = "icon_relocate_undone",
            from_hash = %hash_path(&self.target),
            to_hash = %hash_path(&self.source),
        );
        Ok(())
    }
}

/// Move `source` into `dest_dir` under `desired`, or under a timestamp-suffixed
/// variant if a different file already holds that name. The file is either at
/// the returned target or never left `source`.
pub async fn relocate(source: &Path, dest_dir: &Path, desired: &str) -> AppResult<Relocation> {
    if !fs::try_exists(source).await.unwrap_or(false) {
        return Err(AppError::new(
            ERR_FILE_MISSING,
            "Icon file could not be found in storage.",
        )
        .with_context("path_hash", hash_path(source)));
    }

    let mut target = dest_dir.join(desired);
    if target == source {
        return Ok(Relocation {
            source: source.to_path_buf(),
            target,
            filename: desired.to_string(),
            renamed: false,
            moved: false,
        });
    }

    let mut renamed = false;
    if fs::try_exists(&target).await.unwrap_or(false) && !same_file(source, &target).await {
        target = resolve_conflict_name(&target)?;
        renamed = true;
        tracing::info!(
            target: "iconvault",
            event = "icon_relocate_conflict",
            desired_hash = %hash_path(&dest_dir.join(desired)),
            resolved_hash = %hash_path(&target),
        );
    }

    fs::create_dir_all(dest_dir)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "create_target_dir"))?;

    let strategy = move_file(source, &target).await?;
    let filename = target
        .file_name()
        .and_then(OsStr::to_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| desired.to_string());

    tracing::info!(
        target: "iconvault",
        event = "icon_relocated",
        from_hash = %hash_path(source),
        to_hash = %hash_path(&target),
        renamed,
        strategy,
    );

    Ok(Relocation {
        source: source.to_path_buf(),
        target,
        filename,
        renamed,
        moved: true,
    })
}

/// Where an icon should end up: a category (id and directory name) and the
/// filename the caller would like it to have there.
#[derive(Debug, Clone, Copy)]
pub struct Destination<'a> {
    pub category_id: Option<i64>,
    pub category_name: &'a str,
    pub filename: &'a str,
}

/// Move an icon's file, then persist its new location. If persisting fails
/// the file is moved back, so the stored record always names a real file.
pub async fn move_icon(
    backend: &dyn MetadataBackend,
    vault: &Vault,
    icon: &Icon,
    dest: Destination<'_>,
) -> AppResult<Icon> {
    let source = vault.icon_path(&icon.category_name, &icon.filename)?;
    let dest_dir = vault.category_dir(dest.category_name)?;
    let relocation = relocate(&source, &dest_dir, dest.filename)
        .await
        .map_err(|err| err.with_context("icon_id", icon.id.to_string()))?;

    let mut updated = icon.clone();
    updated.category_id = dest.category_id;
    updated.category_name = dest.category_name.to_string();
    updated.filename = relocation.filename.clone();

    let outcome = match backend.update_icon(&updated).await {
        Ok(Some(stored)) => return Ok(stored),
        Ok(None) => AppError::not_found("icon", icon.id),
        Err(err) => err,
    };

    if let Err(undo_err) = relocation.undo().await {
        tracing::error!(
            target: "iconvault",
            event = "icon_relocate_undo_failed",
            icon_id = icon.id,
            error = %undo_err,
        );
        return Err(outcome.with_context("undo_error", undo_err.to_string()));
    }
    Err(outcome.with_context("icon_id", icon.id.to_string()))
}

/// Derive `{stem}_{timestamp}.{ext}` next to `target`, falling back to a
/// numbered variant when the timestamped name is taken too.
pub fn resolve_conflict_name(target: &Path) -> AppResult<PathBuf> {
    let parent = target.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = target
        .file_stem()
        .and_then(OsStr::to_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("icon");
    let extension = target.extension().and_then(OsStr::to_str);
    let stamp = crate::time::stamp();

    for attempt in 0..=MAX_CONFLICT_ATTEMPTS {
        let suffix = if attempt == 0 {
            stamp.clone()
        } else {
            format!("{stamp}_{attempt}")
        };
        let candidate = match extension {
            Some(ext) => parent.join(format!("{stem}_{suffix}.{ext}")),
            None => parent.join(format!("{stem}_{suffix}")),
        };
        match std::fs::symlink_metadata(&candidate) {
            Ok(_) => continue,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(candidate),
            Err(err) => {
                return Err(AppError::from(err).with_context("operation", "resolve_conflict_name"))
            }
        }
    }

    Err(AppError::new(
        "CONFLICT_RESOLUTION_FAILED",
        "Unable to resolve a unique filename for the destination.",
    ))
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Rename, or copy into a staging file and swap it in when rename is refused
/// (for example across volumes).
async fn move_file(source: &Path, target: &Path) -> AppResult<&'static str> {
    #[cfg(test)]
    if FORCE_COPY_FALLBACK.load(Ordering::SeqCst) {
        copy_move(source, target, None).await?;
        return Ok("copy");
    }

    match fs::rename(source, target).await {
        Ok(()) => Ok("rename"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(AppError::new(
            ERR_FILE_MISSING,
            "Icon file disappeared before it could be moved.",
        )
        .with_context("path_hash", hash_path(source))),
        Err(rename_err) => {
            copy_move(source, target, Some(rename_err)).await?;
            Ok("copy")
        }
    }
}

async fn copy_move(
    source: &Path,
    target: &Path,
    rename_err: Option<std::io::Error>,
) -> AppResult<()> {
    let staging = staging_path_for(target);
    if let Err(copy_err) = fs::copy(source, &staging).await {
        let _ = fs::remove_file(&staging).await;
        let err = match rename_err {
            Some(rename_err) => AppError::from(rename_err)
                .with_context("operation", "move_icon")
                .with_context("fallback_copy_error", copy_err.to_string()),
            None => AppError::from(copy_err).with_context("operation", "move_icon"),
        };
        return Err(err);
    }

    let staged = async {
        verify_same_size(source, &staging).await?;
        let handle = File::open(&staging)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "open_stage_file"))?;
        handle
            .sync_all()
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "sync_stage_file"))?;
        fs::rename(&staging, target)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "finalize_stage_file"))
    }
    .await;
    if let Err(err) = staged {
        let _ = fs::remove_file(&staging).await;
        return Err(err);
    }

    if let Err(err) = fs::remove_file(source).await {
        // Both copies exist now; keep the source and drop the new one.
        let _ = fs::remove_file(target).await;
        return Err(AppError::from(err).with_context("operation", "remove_moved_source"));
    }
    Ok(())
}

async fn verify_same_size(source: &Path, staged: &Path) -> AppResult<()> {
    let source_meta = fs::metadata(source)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "metadata_source"))?;
    let staged_meta = fs::metadata(staged)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "metadata_stage"))?;
    if source_meta.len() != staged_meta.len() {
        return Err(AppError::new(
            "COPY_VERIFICATION_FAILED",
            "Copy verification failed due to size mismatch.",
        ));
    }
    Ok(())
}

fn staging_path_for(target: &Path) -> PathBuf {
    let parent = target
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    parent.join(format!(".iconmove-{}", Uuid::now_v7()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    fn write(path: &Path, bytes: &[u8]) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
        std::fs::write(path, bytes).expect("write file");
    }

    #[tokio::test]
    async fn moves_into_new_directory() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("default/icon.png");
        write(&source, b"icon");

        let moved = relocate(&source, &dir.path().join("Arrows"), "icon.png")
            .await
            .expect("relocate");

        assert!(moved.moved);
        assert!(!moved.renamed);
        assert_eq!(moved.filename, "icon.png");
        assert!(!source.exists());
        assert_eq!(
            std::fs::read(dir.path().join("Arrows/icon.png")).expect("read"),
            b"icon"
        );
    }

    #[tokio::test]
    async fn collision_gets_timestamp_suffix() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("a/icon.png");
        let occupied = dir.path().join("b/icon.png");
        write(&source, b"mine");
        write(&occupied, b"theirs");

        let moved = relocate(&source, &dir.path().join("b"), "icon.png")
            .await
            .expect("relocate");

        assert!(moved.renamed);
        assert_ne!(moved.filename, "icon.png");
        assert!(moved.filename.starts_with("icon_"));
        assert!(moved.filename.ends_with(".png"));
        assert_eq!(std::fs::read(&occupied).expect("read"), b"theirs");
        assert_eq!(std::fs::read(&moved.target).expect("read"), b"mine");
    }

    #[tokio::test]
    async fn same_path_is_a_no_op() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("a/icon.png");
        write(&source, b"x");

        let outcome = relocate(&source, &dir.path().join("a"), "icon.png")
            .await
            .expect("relocate");
        assert!(outcome.unchanged());
        assert!(source.exists());
    }

    #[tokio::test]
    async fn missing_source_fails_without_side_effects() {
        let dir = tempdir().expect("tempdir");
        let err = relocate(
            &dir.path().join("a/gone.png"),
            &dir.path().join("b"),
            "gone.png",
        )
        .await
        .expect_err("missing");
        assert_eq!(err.code(), ERR_FILE_MISSING);
        assert!(!dir.path().join("b").exists());
    }

    #[tokio::test]
    async fn undo_restores_source() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("a/icon.png");
        write(&source, b"x");

        let moved = relocate(&source, &dir.path().join("b"), "renamed.png")
            .await
            .expect("relocate");
        moved.undo().await.expect("undo");
        assert!(source.exists());
        assert!(!moved.target.exists());
    }

    #[tokio::test]
    async fn copy_fallback_moves_content() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("a/icon.png");
        write(&source, b"payload");

        FORCE_COPY_FALLBACK.store(true, Ordering::SeqCst);
        let outcome = relocate(&source, &dir.path().join("b"), "icon.png").await;
        FORCE_COPY_FALLBACK.store(false, Ordering::SeqCst);
        let moved = outcome.expect("relocate via copy");

        assert!(!source.exists());
        assert_eq!(std::fs::read(&moved.target).expect("read"), b"payload");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("b"))
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".iconmove-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn conflict_names_skip_taken_candidates() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("icon.png");
        let first = resolve_conflict_name(&target).expect("first");
        std::fs::write(&first, b"x").expect("occupy");
        let second = resolve_conflict_name(&target).expect("second");
        assert_ne!(first, second);
    }
}
