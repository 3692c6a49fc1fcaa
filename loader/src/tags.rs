//! Parsing of one document's text into JSON, resolving the `!file` and
//! `!ref` custom tags along the way (`spec.md` §4.1).

use std::path::Path;

use kongctl_model::RefToken;
use serde_json::Value as Json;
use serde_yaml::Value as Yaml;

use crate::Error;

/// Parses `text` (YAML, which is a superset of JSON) as a document,
/// resolving `!file` and `!ref` tags relative to `base_dir`.
pub fn parse_document(text: &str, base_dir: &Path) -> Result<Json, Error> {
    let yaml: Yaml = serde_yaml::from_str(text).map_err(|e| Error::Parse(e.to_string()))?;
    resolve(&yaml, base_dir)
}

fn resolve(value: &Yaml, base_dir: &Path) -> Result<Json, Error> {
    match value {
        Yaml::Tagged(tagged) => {
            let tag = tagged.tag.to_string();
            match tag.as_str() {
                "!file" => {
                    let rel = tagged
                        .value
                        .as_str()
                        .ok_or_else(|| Error::Parse("!file tag requires a string path".into()))?;
                    let path = base_dir.join(rel);
                    let contents = std::fs::read_to_string(&path).map_err(|e| Error::FileTag(path, e))?;
                    Ok(Json::String(contents))
                }
                "!ref" => {
                    let raw = tagged
                        .value
                        .as_str()
                        .ok_or_else(|| Error::Parse("!ref tag requires a string".into()))?;
                    Ok(parse_ref_token(raw)?.to_json())
                }
                other => Err(Error::UnknownTag(other.to_string())),
            }
        }
        Yaml::Null => Ok(Json::Null),
        Yaml::Bool(b) => Ok(Json::Bool(*b)),
        Yaml::Number(n) => {
            serde_json::to_value(n).map_err(|e| Error::Parse(e.to_string()))
        }
        Yaml::String(s) => Ok(Json::String(s.clone())),
        Yaml::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve(item, base_dir)?);
            }
            Ok(Json::Array(out))
        }
        Yaml::Mapping(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                let key = k
                    .as_str()
                    .ok_or_else(|| Error::Parse("mapping keys must be strings".into()))?
                    .to_string();
                out.insert(key, resolve(v, base_dir)?);
            }
            Ok(Json::Object(out))
        }
    }
}

/// Parses the scalar content of a `!ref` tag: either `<kind>:<ref>` or a
/// bare `<ref>` (kind left for the builder to infer from field position).
fn parse_ref_token(raw: &str) -> Result<RefToken, Error> {
    match raw.split_once(':') {
        Some((kind_str, ref_str)) => {
            let kind = kongctl_model::Kind::from_doc_key(kind_str)
                .or_else(|| kongctl_model::Kind::from_doc_key(&singularize_to_plural(kind_str)))
                .ok_or_else(|| Error::UnknownRefKind(kind_str.to_string()))?;
            Ok(RefToken { kind: Some(kind), r#ref: ref_str.to_string() })
        }
        None => Ok(RefToken { kind: None, r#ref: raw.to_string() }),
    }
}

/// `!ref` kind prefixes are conventionally singular (`portal:p1`) while
/// [`kongctl_model::Kind::doc_key`] returns the plural document key
/// (`portals`). This is a tiny best-effort pluralizer covering the kinds in
/// this engine's fixed kind list; it is not a general English pluralizer.
fn singularize_to_plural(word: &str) -> String {
    if word.ends_with('s') {
        word.to_string()
    } else if word.ends_with('y') {
        format!("{}ies", &word[..word.len() - 1])
    } else {
        format!("{word}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_yaml_parses_as_json() {
        let v = parse_document("a: 1\nb: [1, 2]\n", Path::new(".")).unwrap();
        assert_eq!(v, serde_json::json!({"a": 1, "b": [1, 2]}));
    }

    #[test]
    fn ref_tag_with_kind_resolves() {
        let v = parse_document("portal: !ref portal:p1\n", Path::new(".")).unwrap();
        let portal = &v["portal"];
        let tok = RefToken::from_json(portal).unwrap();
        assert_eq!(tok.kind, Some(kongctl_model::Kind::Portal));
        assert_eq!(tok.r#ref, "p1");
    }

    #[test]
    fn bare_ref_tag_resolves_without_kind() {
        let v = parse_document("portal: !ref p1\n", Path::new(".")).unwrap();
        let tok = RefToken::from_json(&v["portal"]).unwrap();
        assert_eq!(tok.kind, None);
        assert_eq!(tok.r#ref, "p1");
    }

    #[test]
    fn file_tag_reads_relative_to_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("desc.md"), "hello world").unwrap();
        let v = parse_document("description: !file desc.md\n", dir.path()).unwrap();
        assert_eq!(v["description"], serde_json::json!("hello world"));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = parse_document("a: !bogus x\n", Path::new("."));
        assert!(matches!(err, Err(Error::UnknownTag(_))));
    }
}
