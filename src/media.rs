//! Media organization: transfer resolved files into `<dumpster>/media/`.

use serde::Serialize;
use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::config::MediaTransfer;

/// One file that could not be transferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaOutcome {
    /// Files now present under the destination, relative to it.
    pub transferred: Vec<PathBuf>,
    pub bytes: u64,
    pub failures: Vec<MediaFailure>,
}

/// Transfer each distinct relative path in `relative_paths` from
/// `media_root` into `dest`, keeping the relative layout.
///
/// Paths that are absolute or step outside their root are recorded as
/// failures and never touched.
pub async fn organize_media<'a, I>(
    relative_paths: I,
    media_root: &Path,
    dest: &Path,
    transfer: MediaTransfer,
) -> io::Result<MediaOutcome>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    tokio::fs::create_dir_all(dest).await?;

    let unique: BTreeSet<&PathBuf> = relative_paths.into_iter().collect();
    let mut outcome = MediaOutcome::default();

    for rel in unique {
        if !is_contained(rel) {
            warn!("refusing media path outside the media root: {}", rel.display());
            outcome.failures.push(MediaFailure {
                path: rel.clone(),
                reason: "path escapes the media root".to_string(),
            });
            continue;
        }
        let from = media_root.join(rel);
        let to = dest.join(rel);
        match transfer_one(&from, &to, transfer).await {
            Ok(bytes) => {
                debug!("media {} ({} bytes)", rel.display(), bytes);
                outcome.bytes += bytes;
                outcome.transferred.push(rel.clone());
            }
            Err(e) => {
                warn!("failed to transfer media {}: {}", rel.display(), e);
                outcome.failures.push(MediaFailure {
                    path: rel.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(outcome)
}

fn is_contained(rel: &Path) -> bool {
    rel.components().next().is_some()
        && rel.components().all(|c| matches!(c, Component::Normal(_)))
}

async fn transfer_one(from: &Path, to: &Path, transfer: MediaTransfer) -> io::Result<u64> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match transfer {
        MediaTransfer::Copy => tokio::fs::copy(from, to).await,
        MediaTransfer::Move => {
            let len = tokio::fs::metadata(from).await?.len();
            match tokio::fs::rename(from, to).await {
                Ok(()) => Ok(len),
                Err(e) => {
                    debug!(
                        "rename {} failed ({}), falling back to copy",
                        from.display(),
                        e
                    );
                    let copied = tokio::fs::copy(from, to).await?;
                    if let Err(e) = tokio::fs::remove_file(from).await {
                        warn!("copied but could not remove {}: {}", from.display(), e);
                    }
                    Ok(copied)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str, body: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn copies_preserving_relative_layout() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        touch(src.path(), "a.png", b"aaaa");
        touch(src.path(), "sub/b.wav", b"bb");

        let paths = vec![PathBuf::from("a.png"), PathBuf::from("sub/b.wav")];
        let outcome = organize_media(&paths, src.path(), &dst.path().join("media"), MediaTransfer::Copy)
            .await
            .unwrap();

        assert_eq!(outcome.transferred.len(), 2);
        assert_eq!(outcome.bytes, 6);
        assert!(outcome.failures.is_empty());
        assert!(dst.path().join("media/sub/b.wav").is_file());
        assert!(src.path().join("sub/b.wav").is_file());
    }

    #[tokio::test]
    async fn each_path_transferred_once() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        touch(src.path(), "a.png", b"a");

        let paths = vec![PathBuf::from("a.png"), PathBuf::from("a.png")];
        let outcome = organize_media(&paths, src.path(), dst.path(), MediaTransfer::Move)
            .await
            .unwrap();

        assert_eq!(outcome.transferred, vec![PathBuf::from("a.png")]);
        assert!(outcome.failures.is_empty());
        assert!(!src.path().join("a.png").exists());
        assert!(dst.path().join("a.png").is_file());
    }

    #[tokio::test]
    async fn missing_source_is_a_failure_not_an_error() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        touch(src.path(), "ok.png", b"1");

        let paths = vec![PathBuf::from("gone.png"), PathBuf::from("ok.png")];
        let outcome = organize_media(&paths, src.path(), dst.path(), MediaTransfer::Copy)
            .await
            .unwrap();

        assert_eq!(outcome.transferred, vec![PathBuf::from("ok.png")]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].path, PathBuf::from("gone.png"));
    }

    #[tokio::test]
    async fn paths_outside_the_root_are_refused() {
        let outside = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        touch(outside.path(), "victim.txt", b"keep me");
        touch(src.path(), "ok.png", b"1");

        let absolute = outside.path().join("victim.txt");
        let parent = PathBuf::from("../victim.txt");
        let paths = vec![absolute.clone(), parent.clone(), PathBuf::from("ok.png")];
        let outcome = organize_media(&paths, src.path(), dst.path(), MediaTransfer::Copy)
            .await
            .unwrap();

        assert_eq!(outcome.transferred, vec![PathBuf::from("ok.png")]);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures.iter().any(|f| f.path == absolute));
        assert!(outcome.failures.iter().any(|f| f.path == parent));
        assert_eq!(fs::read(&absolute).unwrap(), b"keep me");
        assert!(!dst.path().parent().unwrap().join("victim.txt").exists());
    }
}
