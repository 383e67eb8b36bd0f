//! Filesystem utilities.
//!
//! Copy and publish primitives used by the Stage and Finalize tasks.
//!
//! A published file never appears truncated at its public name: bytes go to a
//! hidden sibling `.partial` file first, are synced, checked to be non-empty,
//! and only then renamed into place.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::core::{CoreError, CoreResult};

/// Copies `src` to `dst`, returning the number of bytes copied.
pub async fn copy_file(src: &Path, dst: &Path) -> CoreResult<u64> {
    let bytes = tokio::fs::copy(src, dst).await?;
    Ok(bytes)
}

/// Publishes a copy of `src` at `dest`.
///
/// Implementation notes:
/// - Copy into a hidden sibling `.partial` file in the destination directory.
/// - Flush and sync it, and refuse to publish an empty result.
/// - Swap into place by renaming; an existing `dest` is replaced.
///
/// On failure the partial file is removed and an existing `dest` is left as
/// it was.
pub async fn publish_atomic(src: &Path, dest: &Path) -> CoreResult<u64> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = partial_path_for(dest);
    let result = write_partial(src, &partial).await;
    let bytes = match result {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
    };

    if let Err(e) = atomic_replace(dest, &partial).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }

    Ok(bytes)
}

async fn write_partial(src: &Path, partial: &Path) -> CoreResult<u64> {
    let mut reader = tokio::fs::File::open(src).await?;
    let mut writer = tokio::fs::File::create(partial).await?;

    let bytes = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;
    writer.sync_all().await?;

    if bytes == 0 {
        return Err(CoreError::InvalidInput(format!(
            "refusing to publish empty file {}",
            src.display()
        )));
    }
    Ok(bytes)
}

/// `<dir>/.<name>.<uuid>.partial`
pub fn partial_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{file_name}.{}.partial", uuid::Uuid::new_v4()))
}

fn bak_path_for(path: &Path) -> PathBuf {
    let mut bak = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "bak".to_string());
    bak.set_file_name(format!("{file_name}.bak"));
    bak
}

async fn atomic_replace(dest: &Path, src_tmp: &Path) -> CoreResult<()> {
    // Rename over an existing file works on Unix and most Windows volumes.
    let first = match tokio::fs::rename(src_tmp, dest).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    let dest_is_file = tokio::fs::symlink_metadata(dest)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !dest_is_file {
        return Err(CoreError::IoError(first));
    }

    // Fall back to moving the old file aside.
    let bak = bak_path_for(dest);
    let _ = tokio::fs::remove_file(&bak).await;

    tokio::fs::rename(dest, &bak).await?;
    match tokio::fs::rename(src_tmp, dest).await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(&bak).await;
            Ok(())
        }
        Err(e) => {
            // Try to restore the old file.
            let _ = tokio::fs::rename(&bak, dest).await;
            Err(CoreError::IoError(e))
        }
    }
}
