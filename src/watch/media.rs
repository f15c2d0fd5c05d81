//! Path rules: which files are importable and how folder paths are normalized.

use std::path::{Component, Path, PathBuf};

use super::FolderWatchError;

/// Audio and video extensions picked up by the watcher (lowercase)
pub const SUPPORTED_MEDIA_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "m4a", "aac", "ogg", "wma", "aiff", "mp4", "mov", "mkv", "webm", "avi",
];

/// Check if a path has a supported media extension (case-insensitive)
pub fn is_watchable_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_MEDIA_EXTENSIONS
                .iter()
                .any(|supported| supported.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Lowercased extension including the leading dot, or empty
pub fn normalized_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Turn user input into an absolute, lexically clean path to an existing directory
pub fn normalize_folder_path(input: &str) -> Result<PathBuf, FolderWatchError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(FolderWatchError::InvalidPath("empty path".to_string()));
    }

    let input_path = Path::new(trimmed);
    let absolute = if input_path.is_absolute() {
        input_path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| FolderWatchError::InvalidPath(e.to_string()))?
            .join(input_path)
    };
    let normalized = clean(&absolute);

    let metadata = std::fs::metadata(&normalized).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            FolderWatchError::InvalidPath("path does not exist".to_string())
        }
        _ => FolderWatchError::InvalidPath(e.to_string()),
    })?;

    if !metadata.is_dir() {
        return Err(FolderWatchError::InvalidPath(
            "path is not a directory".to_string(),
        ));
    }

    std::fs::read_dir(&normalized)
        .map_err(|e| FolderWatchError::InvalidPath(format!("directory is not readable: {}", e)))?;

    Ok(normalized)
}

/// Resolve `.` and `..` lexically without touching the filesystem
fn clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_supported_extensions() {
        assert!(is_watchable_media_file(Path::new("/x/memo.mp3")));
        assert!(is_watchable_media_file(Path::new("/x/MEETING.M4A")));
        assert!(is_watchable_media_file(Path::new("clip.WebM")));
        assert!(!is_watchable_media_file(Path::new("/x/notes.txt")));
        assert!(!is_watchable_media_file(Path::new("/x/mp3")));
        assert!(!is_watchable_media_file(Path::new("/x/.partial")));
    }

    #[test]
    fn test_normalized_extension() {
        assert_eq!(normalized_extension(Path::new("a/Take 1.WAV")), ".wav");
        assert_eq!(normalized_extension(Path::new("a/noext")), "");
    }

    #[test]
    fn test_normalize_existing_directory() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("inbox");
        std::fs::create_dir(&nested).unwrap();

        let input = format!("  {}/inbox/../inbox/./  ", temp.path().display());
        let normalized = normalize_folder_path(&input).unwrap();

        assert_eq!(normalized, nested);
        assert!(normalized.is_absolute());
    }

    #[test]
    fn test_normalize_rejects_bad_input() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("song.mp3");
        std::fs::write(&file, b"x").unwrap();

        for input in [
            "   ".to_string(),
            temp.path().join("missing").display().to_string(),
            file.display().to_string(),
        ] {
            let result = normalize_folder_path(&input);
            assert!(
                matches!(result, Err(FolderWatchError::InvalidPath(_))),
                "expected InvalidPath for {:?}",
                input
            );
        }
    }
}
