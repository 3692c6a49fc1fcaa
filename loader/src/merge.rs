//! Multi-document ingestion: reads each [`Source`], parses it, and merges
//! top-level resource arrays by concatenation (`spec.md` §4.1: "Multiple
//! documents are merged by concatenating their top-level resource
//! arrays.").

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use kongctl_model::Kind;
use serde_json::Value as Json;

use crate::{source::Source, tags, Error};

pub type Merged = BTreeMap<Kind, Vec<Json>>;

pub fn read_and_merge(sources: &[Source]) -> Result<Merged, Error> {
    let mut merged: Merged = BTreeMap::new();
    for source in sources {
        let (text, base_dir) = read_source(source)?;
        let doc = tags::parse_document(&text, &base_dir)?;
        let Json::Object(top) = doc else {
            return Err(Error::Parse("top-level document must be a mapping".into()));
        };
        for (key, value) in top {
            let kind = Kind::from_doc_key(&key).ok_or_else(|| Error::UnknownKind(key.clone()))?;
            let Json::Array(items) = value else {
                return Err(Error::Parse(format!("{key:?} must be a list of resources")));
            };
            merged.entry(kind).or_default().extend(items);
        }
    }
    Ok(merged)
}

fn read_source(source: &Source) -> Result<(String, std::path::PathBuf), Error> {
    match source {
        Source::File(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| Error::Read(path.clone(), e))?;
            let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
            Ok((text, base_dir))
        }
        Source::Stdin => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|e| Error::Read("<stdin>".into(), e))?;
            Ok((text, std::env::current_dir().unwrap_or_default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_files_concatenate_same_kind() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "portals:\n  - ref: p1\n    name: P1\n").unwrap();
        std::fs::write(dir.path().join("b.yaml"), "portals:\n  - ref: p2\n    name: P2\n").unwrap();
        let sources = vec![
            Source::File(dir.path().join("a.yaml")),
            Source::File(dir.path().join("b.yaml")),
        ];
        let merged = read_and_merge(&sources).unwrap();
        assert_eq!(merged.get(&Kind::Portal).map(Vec::len), Some(2));
    }

    #[test]
    fn unknown_top_level_key_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "widgets: []\n").unwrap();
        let sources = vec![Source::File(dir.path().join("a.yaml"))];
        let err = read_and_merge(&sources);
        assert!(matches!(err, Err(Error::UnknownKind(_))));
    }
}
