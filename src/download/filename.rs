//! Filename derivation and destination paths for downloaded images.

use std::path::{Component, Path, PathBuf};

use rand::Rng;
use rand::distributions::Alphanumeric;
use url::Url;

/// Length of the random suffix appended on a name collision.
pub const COLLISION_SUFFIX_LEN: usize = 6;

/// Sanitizes a filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Filename from the last URL path segment (percent-decoded, sanitized),
/// or `image_<timestamp>.bin` when the path has none.
#[must_use]
pub fn filename_from_url(url: &str) -> String {
    let last = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .filter(|segment| !segment.is_empty())
    });

    if let Some(last) = last {
        let decoded = urlencoding::decode(&last)
            .map(std::borrow::Cow::into_owned)
            .unwrap_or(last);
        return sanitize_filename(&decoded);
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("image_{timestamp}.bin")
}

/// Directory a candidate is written to: `root[/owner][/title]`.
///
/// Empty components are skipped; each component is sanitized so it cannot
/// escape `root`.
#[must_use]
pub fn destination_dir(root: &Path, owner: Option<&str>, title: Option<&str>) -> PathBuf {
    let mut dir = root.to_path_buf();
    for component in [owner, title].into_iter().flatten() {
        let component = component.trim();
        if !component.is_empty() {
            dir.push(sanitize_filename(component));
        }
    }
    dir
}

/// Claims a free path for `filename` inside `dir` by creating it empty.
///
/// Tries `dir/filename` first, then `dir/<stem>_<random><ext>` until a
/// name is free. Creation uses `create_new`, so concurrent workers never
/// claim the same path.
///
/// # Errors
///
/// Returns any IO error other than the name already existing.
pub(crate) async fn reserve_unique_path(dir: &Path, filename: &str) -> std::io::Result<PathBuf> {
    reserve_path(dir, filename, true).await
}

/// Like [`reserve_unique_path`] but never claims the bare `filename`.
///
/// # Errors
///
/// Returns any IO error other than the name already existing.
pub(crate) async fn reserve_suffixed_path(dir: &Path, filename: &str) -> std::io::Result<PathBuf> {
    reserve_path(dir, filename, false).await
}

async fn reserve_path(dir: &Path, filename: &str, bare_first: bool) -> std::io::Result<PathBuf> {
    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename, ""),
    };
    let suffixed = || dir.join(format!("{stem}_{}{ext}", random_suffix()));

    let mut candidate = if bare_first {
        dir.join(filename)
    } else {
        suffixed()
    };
    loop {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                candidate = suffixed();
            }
            Err(e) => return Err(e),
        }
    }
}

/// Random alphanumeric tag of [`COLLISION_SUFFIX_LEN`] characters.
pub(crate) fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(COLLISION_SUFFIX_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file/name.webp"), "file_name.webp");
        assert_eq!(sanitize_filename("file:name.webp"), "file_name.webp");
        assert_eq!(sanitize_filename("file<name>.gif"), "file_name_.gif");
        assert_eq!(sanitize_filename("file|name.gif"), "file_name.gif");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
    }

    #[test]
    fn test_filename_from_url_uses_last_segment() {
        assert_eq!(
            filename_from_url("https://b1.imgsrc.ru/x/y/12345.webp?r=1"),
            "12345.webp"
        );
    }

    #[test]
    fn test_filename_from_url_decodes_percent_escapes() {
        assert_eq!(
            filename_from_url("https://imgsrc.ru/x/my%20pic.gif"),
            "my pic.gif"
        );
    }

    #[test]
    fn test_filename_from_url_empty_path_falls_back() {
        let name = filename_from_url("https://imgsrc.ru/");
        assert!(name.starts_with("image_"), "got {name}");
    }

    #[test]
    fn test_destination_dir_layout() {
        let root = Path::new("/data");
        assert_eq!(destination_dir(root, None, None), PathBuf::from("/data"));
        assert_eq!(
            destination_dir(root, Some("jdoe"), None),
            PathBuf::from("/data/jdoe")
        );
        assert_eq!(
            destination_dir(root, Some("jdoe"), Some("Summer_2024")),
            PathBuf::from("/data/jdoe/Summer_2024")
        );
        assert_eq!(
            destination_dir(root, None, Some("Summer_2024")),
            PathBuf::from("/data/Summer_2024")
        );
    }

    #[test]
    fn test_destination_dir_cannot_escape_root() {
        let dir = destination_dir(Path::new("/data"), Some(".."), Some("a/b"));
        assert_eq!(dir, PathBuf::from("/data/__/a_b"));
    }

    #[tokio::test]
    async fn test_reserve_unique_path_no_conflict() {
        let dir = TempDir::new().unwrap();
        let path = reserve_unique_path(dir.path(), "a.webp").await.unwrap();
        assert_eq!(path, dir.path().join("a.webp"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_reserve_unique_path_conflict_gets_random_suffix() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.webp"), b"x").unwrap();

        let path = reserve_unique_path(dir.path(), "a.webp").await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert_ne!(name, "a.webp");
        assert!(name.starts_with("a_"), "got {name}");
        assert!(
            Path::new(&name)
                .extension()
                .is_some_and(|ext| ext == "webp")
        );
        assert_eq!(name.len(), "a_".len() + COLLISION_SUFFIX_LEN + ".webp".len());
        assert_eq!(std::fs::read(dir.path().join("a.webp")).unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_reserve_suffixed_path_skips_free_bare_name() {
        let dir = TempDir::new().unwrap();
        let path = reserve_suffixed_path(dir.path(), "a.webp").await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("a_") && name.ends_with(".webp"), "{name}");
        assert!(!dir.path().join("a.webp").exists());
    }

    #[tokio::test]
    async fn test_reserve_unique_path_concurrent_claims_are_distinct() {
        let dir = TempDir::new().unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let dir = dir.path().to_path_buf();
            handles.push(tokio::spawn(async move {
                reserve_unique_path(&dir, "same.gif").await.unwrap()
            }));
        }
        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap());
        }
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 8);
    }
}
