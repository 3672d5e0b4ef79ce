//! Audio file discovery

use crate::ingest::extension;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions picked up when scanning directories
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a"];

/// Whether `path` has a supported audio extension (case-insensitive)
pub fn is_supported(path: &Path) -> bool {
    extension(path)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Recursively collect supported audio files below `dir`, sorted by path
pub fn scan_audio_files<P: AsRef<Path>>(dir: P) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir.as_ref())
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_supported(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    log::debug!("Found {} audio files in {}", files.len(), dir.as_ref().display());
    files
}

/// Expand a mix of files and directories into a sorted, de-duplicated file list
///
/// Explicit files are kept even when their extension is not in the scan list.
pub fn collect_inputs<P: AsRef<Path>>(inputs: &[P]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        let input = input.as_ref();
        if input.is_dir() {
            files.extend(scan_audio_files(input));
        } else {
            files.push(input.to_path_buf());
        }
    }
    files.sort();
    files.dedup();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("disc2");
        fs::create_dir(&nested).unwrap();

        for name in ["b.mp3", "a.WAV", "notes.txt", "cover.jpg"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::write(nested.join("c.flac"), b"x").unwrap();
        fs::write(nested.join("d.m4a"), b"x").unwrap();

        let names: Vec<String> = scan_audio_files(dir.path())
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();

        assert_eq!(
            names,
            vec![
                "a.WAV".to_string(),
                "b.mp3".to_string(),
                format!("disc2{}c.flac", std::path::MAIN_SEPARATOR),
                format!("disc2{}d.m4a", std::path::MAIN_SEPARATOR),
            ]
        );
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        assert!(scan_audio_files("/nonexistent/audio/dir").is_empty());
    }

    #[test]
    fn test_collect_inputs_mixes_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ogg"), b"x").unwrap();
        let loose = dir.path().join("loose.aiff");
        fs::write(&loose, b"x").unwrap();

        let files = collect_inputs(&[dir.path().to_path_buf(), loose.clone(), loose.clone()]);
        assert_eq!(files.len(), 2);
        assert!(files.contains(&loose));
    }
}
