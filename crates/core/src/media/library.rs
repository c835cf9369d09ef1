use std::path::{Path, PathBuf};

use crate::error::{Result, RtspError};

/// Resource namespace that SETUP targets are resolved against.
///
/// Lookup takes the last `/`-separated segment of the target as the clip
/// name and tries, in order:
///
/// 1. `<media_dir>/<name>`
/// 2. `<fallback_dir>/<name>`, only for names whose extension is listed
///    in `fallback_extensions`
///
/// Names that are empty, `.`/`..`, or contain a backslash never resolve,
/// so a target cannot escape either directory.
#[derive(Debug, Clone)]
pub struct MediaLibrary {
    media_dir: PathBuf,
    fallback_dir: PathBuf,
    fallback_extensions: Vec<String>,
}

impl MediaLibrary {
    pub fn new(
        media_dir: impl Into<PathBuf>,
        fallback_dir: impl Into<PathBuf>,
        fallback_extensions: &[String],
    ) -> Self {
        Self {
            media_dir: media_dir.into(),
            fallback_dir: fallback_dir.into(),
            fallback_extensions: fallback_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Resolve a request target to a playable file.
    pub fn resolve(&self, target: &str) -> Result<PathBuf> {
        let name = resource_name(target)
            .ok_or_else(|| RtspError::ResourceNotFound(target.to_string()))?;

        let primary = self.media_dir.join(name);
        if primary.is_file() {
            return Ok(primary);
        }

        if self.is_fallback_eligible(name) {
            let fallback = self.fallback_dir.join(name);
            if fallback.is_file() {
                tracing::debug!(path = %fallback.display(), "resolved clip in fallback directory");
                return Ok(fallback);
            }
        }

        Err(RtspError::ResourceNotFound(target.to_string()))
    }

    /// Every clip name SETUP would currently accept, sorted.
    pub fn catalog(&self) -> Vec<String> {
        let mut names: Vec<String> = list_files(&self.media_dir)
            .into_iter()
            .chain(
                list_files(&self.fallback_dir)
                    .into_iter()
                    .filter(|name| self.is_fallback_eligible(name)),
            )
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn is_fallback_eligible(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.fallback_extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }
}

/// Extract the clip name from a request target.
///
/// `rtsp://host:8554/videos/clip.bin` → `clip.bin`
/// `clip.bin`                         → `clip.bin`
/// `rtsp://host:8554/`                → none
pub fn resource_name(target: &str) -> Option<&str> {
    let name = target.rsplit('/').next()?.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        return None;
    }
    Some(name)
}

fn list_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

    /// Creates `<tmp>/media` and `<tmp>/root` and returns the tmp root.
    fn layout() -> PathBuf {
        let n = DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
        let root =
            std::env::temp_dir().join(format!("clipcast-library-{}-{}", std::process::id(), n));
        std::fs::create_dir_all(root.join("media")).unwrap();
        std::fs::create_dir_all(root.join("root")).unwrap();
        root
    }

    fn library(root: &Path) -> MediaLibrary {
        MediaLibrary::new(
            root.join("media"),
            root.join("root"),
            &["mjpeg".to_string(), ".BIN".to_string()],
        )
    }

    #[test]
    fn name_from_full_uri() {
        assert_eq!(
            resource_name("rtsp://localhost:8554/clip.bin"),
            Some("clip.bin")
        );
        assert_eq!(resource_name("rtsp://h/a/b/clip.bin"), Some("clip.bin"));
        assert_eq!(resource_name("clip.bin"), Some("clip.bin"));
    }

    #[test]
    fn unusable_names() {
        assert_eq!(resource_name("rtsp://localhost:8554/"), None);
        assert_eq!(resource_name("rtsp://h/.."), None);
        assert_eq!(resource_name("..\\secret"), None);
    }

    #[test]
    fn resolves_media_dir_first() {
        let root = layout();
        std::fs::write(root.join("media/clip.bin"), b"a").unwrap();
        std::fs::write(root.join("root/clip.bin"), b"b").unwrap();
        let path = library(&root).resolve("rtsp://h/clip.bin").unwrap();
        assert_eq!(path, root.join("media/clip.bin"));
    }

    #[test]
    fn falls_back_for_listed_extensions() {
        let root = layout();
        std::fs::write(root.join("root/movie.MJPEG"), b"a").unwrap();
        let path = library(&root).resolve("movie.MJPEG").unwrap();
        assert_eq!(path, root.join("root/movie.MJPEG"));
    }

    #[test]
    fn fallback_ignores_other_extensions() {
        let root = layout();
        std::fs::write(root.join("root/notes.txt"), b"a").unwrap();
        assert!(matches!(
            library(&root).resolve("notes.txt"),
            Err(RtspError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn missing_clip_is_not_found() {
        let root = layout();
        assert!(matches!(
            library(&root).resolve("rtsp://h/nothing.bin"),
            Err(RtspError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn directories_do_not_resolve() {
        let root = layout();
        std::fs::create_dir_all(root.join("media/sub.bin")).unwrap();
        assert!(library(&root).resolve("sub.bin").is_err());
    }

    #[test]
    fn catalog_lists_playable_clips() {
        let root = layout();
        std::fs::write(root.join("media/b.bin"), b"a").unwrap();
        std::fs::write(root.join("media/a.txt"), b"a").unwrap();
        std::fs::write(root.join("root/c.mjpeg"), b"a").unwrap();
        std::fs::write(root.join("root/d.txt"), b"a").unwrap();
        assert_eq!(
            library(&root).catalog(),
            vec!["a.txt".to_string(), "b.bin".to_string(), "c.mjpeg".to_string()]
        );
    }
}
