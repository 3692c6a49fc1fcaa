use std::path::{Path, PathBuf};

use crate::Error;

/// One document source: a concrete file, or standard input.
#[derive(Debug, Clone)]
pub enum Source {
    File(PathBuf),
    Stdin,
}

/// Resolves the `-f <paths...>` / `-R` CLI inputs (`spec.md` §4.1) into a
/// flat, ordered list of concrete sources. Directories are walked
/// recursively only when `recursive` is set; otherwise a bare directory is
/// an error, matching the common "did you mean -R" CLI footgun.
pub fn collect_sources(paths: &[String], recursive: bool) -> Result<Vec<Source>, Error> {
    let mut sources = Vec::new();
    for raw in paths {
        if raw == "-" {
            sources.push(Source::Stdin);
            continue;
        }
        let path = Path::new(raw);
        if !path.exists() {
            return Err(Error::PathNotFound(path.to_path_buf()));
        }
        if path.is_dir() {
            if !recursive {
                return Err(Error::DirectoryRequiresRecursive(path.to_path_buf()));
            }
            let walker = walkdir::WalkDir::new(path).sort_by_file_name();
            for entry in walker {
                let entry = entry.map_err(|e| Error::Walk(path.to_path_buf(), e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if is_document(entry.path()) {
                    sources.push(Source::File(entry.path().to_path_buf()));
                }
            }
        } else {
            sources.push(Source::File(path.to_path_buf()));
        }
    }
    Ok(sources)
}

fn is_document(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml") | Some("json")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn stdin_marker_is_recognized() {
        let sources = collect_sources(&["-".to_string()], false).unwrap();
        assert!(matches!(sources.as_slice(), [Source::Stdin]));
    }

    #[test]
    fn directory_without_recursive_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_sources(&[dir.path().to_string_lossy().to_string()], false);
        assert!(matches!(err, Err(Error::DirectoryRequiresRecursive(_))));
    }

    #[test]
    fn directory_recursive_walks_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), "portals: []").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.json"), "{}").unwrap();
        fs::write(dir.path().join("README.md"), "ignored").unwrap();
        let sources = collect_sources(&[dir.path().to_string_lossy().to_string()], true).unwrap();
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn missing_path_errors() {
        let err = collect_sources(&["/no/such/path".to_string()], false);
        assert!(matches!(err, Err(Error::PathNotFound(_))));
    }
}
