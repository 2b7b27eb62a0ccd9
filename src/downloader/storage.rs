// Scratch and durable storage
//
// ScratchSpace: one private directory per pipeline run, removed when the run
// ends no matter how it ends.
// OutputStore: flat durable directory. Files are only ever added, under names
// reserved with create-new semantics, so concurrent runs never clobber each
// other's output.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs::OpenOptions;
use uuid::Uuid;

use super::errors::StorageError;
use super::models::OutputFile;

/// Used when sanitizing leaves nothing
pub const FALLBACK_NAME: &str = "video";

const MAX_NAME_CHARS: usize = 180;
const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Make a title safe to use as a file name
///
/// Strips path separators, characters reserved on common filesystems and
/// control characters, trims surrounding whitespace and trailing dots, and caps
/// the length. Never returns an empty string. Idempotent.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .collect();

    let trimmed = trim_name(&cleaned);
    let capped: String = trimmed.chars().take(MAX_NAME_CHARS).collect();
    let capped = trim_name(&capped);

    if capped.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        capped.to_string()
    }
}

/// `<sanitized title> [<tag>]`; the cap applies to the title only, so the tag always survives
pub fn tagged_filename(title: &str, tag: &str) -> String {
    format!("{} [{}]", sanitize_filename(title), sanitize_filename(tag))
}

fn trim_name(name: &str) -> &str {
    name.trim().trim_end_matches(|c: char| c == '.' || c.is_whitespace())
}

/// Run-scoped scratch directory
pub struct ScratchSpace {
    run_id: Uuid,
    dir: TempDir,
}

impl ScratchSpace {
    /// Create a fresh directory under `root`
    pub fn create(root: &Path, run_id: Uuid) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root).map_err(|source| StorageError::Prepare {
            path: root.to_path_buf(),
            source,
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("ytmux-{}-", run_id.simple()))
            .tempdir_in(root)
            .map_err(|source| StorageError::Prepare {
                path: root.to_path_buf(),
                source,
            })?;

        tracing::debug!(run = %run_id, path = %dir.path().display(), "scratch directory created");
        Ok(Self { run_id, dir })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory, reporting (but not failing on) cleanup errors
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            tracing::warn!(run = %self.run_id, path = %path.display(), "failed to remove scratch directory: {}", e);
        } else {
            tracing::debug!(run = %self.run_id, "scratch directory removed");
        }
    }
}

/// Flat, append-only durable directory
#[derive(Debug, Clone)]
pub struct OutputStore {
    dir: PathBuf,
}

impl OutputStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Move a finished file into durable storage under `<base_name>.<extension>`
    ///
    /// If that name is taken, ` (1)`, ` (2)`, ... is appended. The source file
    /// is consumed. The bytes are first brought into the output directory under
    /// a hidden staging name (rename, or copy across filesystems), so the final
    /// name is only claimed once the content is already in place.
    pub async fn persist(
        &self,
        source: &Path,
        base_name: &str,
        extension: &str,
    ) -> Result<OutputFile, StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StorageError::Prepare {
                path: self.dir.clone(),
                source,
            })?;

        let staging = self.stage(source).await?;

        let (target, final_base) = match self.reserve(base_name, extension).await {
            Ok(reserved) => reserved,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(e);
            }
        };

        // Replaces the empty placeholder in one step.
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            let _ = tokio::fs::remove_file(&target).await;
            return Err(StorageError::Persist {
                from: source.to_path_buf(),
                to: target,
                source: e,
            });
        }

        tracing::info!(path = %target.display(), "output stored");
        Ok(OutputFile {
            path: target,
            extension: extension.to_string(),
            base_name: final_base,
        })
    }

    // Hidden `.<uuid>.part` next to the final location, holding the complete bytes.
    async fn stage(&self, source: &Path) -> Result<PathBuf, StorageError> {
        let staging = self.dir.join(format!(".{}.part", Uuid::new_v4().simple()));

        if tokio::fs::rename(source, &staging).await.is_ok() {
            return Ok(staging);
        }

        if let Err(e) = tokio::fs::copy(source, &staging).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(StorageError::Persist {
                from: source.to_path_buf(),
                to: staging,
                source: e,
            });
        }
        let _ = tokio::fs::remove_file(source).await;
        Ok(staging)
    }

    // Claim a unique name by creating an empty placeholder file.
    async fn reserve(&self, base_name: &str, extension: &str) -> Result<(PathBuf, String), StorageError> {
        for n in 0..MAX_COLLISION_SUFFIX {
            let candidate_base = if n == 0 {
                base_name.to_string()
            } else {
                format!("{} ({})", base_name, n)
            };
            let candidate = self.dir.join(format!("{}.{}", candidate_base, extension));

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(_) => return Ok((candidate, candidate_base)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(source) => {
                    return Err(StorageError::Prepare {
                        path: candidate,
                        source,
                    })
                }
            }
        }
        Err(StorageError::NameExhausted(format!("{}.{}", base_name, extension)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_hostile_characters() {
        assert_eq!(sanitize_filename("AC/DC: Live? <1991> | \"Best\"*"), "ACDC Live 1991  Best");
        assert_eq!(sanitize_filename("  spaced out  "), "spaced out");
        assert_eq!(sanitize_filename("tabs\there\n"), "tabshere");
        assert_eq!(sanitize_filename("ends with dots..."), "ends with dots");
    }

    #[test]
    fn never_empty() {
        assert_eq!(sanitize_filename(""), FALLBACK_NAME);
        assert_eq!(sanitize_filename("???///"), FALLBACK_NAME);
        assert_eq!(sanitize_filename(" . . "), FALLBACK_NAME);
    }

    #[test]
    fn caps_length_on_char_boundaries() {
        let long = "é".repeat(500);
        let name = sanitize_filename(&long);
        assert_eq!(name.chars().count(), MAX_NAME_CHARS);
    }

    #[test]
    fn tag_survives_long_titles() {
        let title = "x".repeat(178);
        let name = tagged_filename(&title, "1440p");
        assert!(name.ends_with(" [1440p]"));
        assert_eq!(name, format!("{} [1440p]", "x".repeat(178)));

        let longer = tagged_filename(&"y".repeat(400), "2160p");
        assert_eq!(longer, format!("{} [2160p]", "y".repeat(MAX_NAME_CHARS)));
    }

    #[test]
    fn tag_is_sanitized_with_the_title() {
        assert_eq!(tagged_filename("What? Now: live", "720p"), "What Now live [720p]");
        assert_eq!(tagged_filename("", "720p"), "video [720p]");
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent(name in any::<String>()) {
            let once = sanitize_filename(&name);
            prop_assert_eq!(sanitize_filename(&once), once.clone());
            prop_assert!(!once.is_empty());
        }
    }

    #[test]
    fn scratch_is_removed_on_release_and_drop() {
        let root = tempfile::tempdir().unwrap();

        let scratch = ScratchSpace::create(root.path(), Uuid::new_v4()).unwrap();
        std::fs::write(scratch.path().join("v.mp4"), b"data").unwrap();
        scratch.release();
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);

        {
            let scratch = ScratchSpace::create(root.path(), Uuid::new_v4()).unwrap();
            std::fs::write(scratch.path().join("a.m4a"), b"data").unwrap();
        }
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn concurrent_runs_get_distinct_scratch() {
        let root = tempfile::tempdir().unwrap();
        let a = ScratchSpace::create(root.path(), Uuid::new_v4()).unwrap();
        let b = ScratchSpace::create(root.path(), Uuid::new_v4()).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn persist_moves_and_never_overwrites() {
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let store = OutputStore::new(out.path());

        let first_src = scratch.path().join("one.mp4");
        std::fs::write(&first_src, b"first").unwrap();
        let first = store.persist(&first_src, "Song", "mp4").await.unwrap();
        assert_eq!(first.path, out.path().join("Song.mp4"));
        assert_eq!(first.base_name, "Song");
        assert!(!first_src.exists());

        let second_src = scratch.path().join("two.mp4");
        std::fs::write(&second_src, b"second").unwrap();
        let second = store.persist(&second_src, "Song", "mp4").await.unwrap();
        assert_eq!(second.path, out.path().join("Song (1).mp4"));

        assert_eq!(std::fs::read(&first.path).unwrap(), b"first");
        assert_eq!(std::fs::read(&second.path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn failed_persist_leaves_no_placeholder() {
        let out = tempfile::tempdir().unwrap();
        let store = OutputStore::new(out.path());
        let missing = out.path().join("does-not-exist.mp4");

        assert!(store.persist(&missing, "Ghost", "mp4").await.is_err());
        assert!(!out.path().join("Ghost.mp4").exists());
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn persist_leaves_no_staging_files() {
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let store = OutputStore::new(out.path());

        for (i, body) in [b"a".as_slice(), b"bb", b"ccc"].into_iter().enumerate() {
            let src = scratch.path().join(format!("{}.m4a", i));
            std::fs::write(&src, body).unwrap();
            store.persist(&src, "Track", "m4a").await.unwrap();
        }

        let mut names: Vec<String> = std::fs::read_dir(out.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["Track (1).m4a", "Track (2).m4a", "Track.m4a"]);
        assert_eq!(std::fs::read(out.path().join("Track (2).m4a")).unwrap(), b"ccc");
    }

    #[tokio::test]
    async fn concurrent_persists_claim_distinct_names() {
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let store = OutputStore::new(out.path());

        let sources: Vec<PathBuf> = (0..4)
            .map(|i| {
                let src = scratch.path().join(format!("{}.mp4", i));
                std::fs::write(&src, format!("body {}", i)).unwrap();
                src
            })
            .collect();

        let results = futures::future::join_all(
            sources.iter().map(|src| store.persist(src, "Same", "mp4")),
        )
        .await;

        let mut paths: Vec<PathBuf> = results.into_iter().map(|r| r.unwrap().path).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 4);
        for path in &paths {
            assert!(std::fs::metadata(path).unwrap().len() > 0);
        }
    }
}
