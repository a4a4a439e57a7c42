//! Mapping an image URL onto values.yaml paths
//!
//! A chart declares where its image lives in values.yaml with up to three
//! dotted paths, one per image component. Resolving fills those paths from
//! a concrete image URL and merges the result into a values document.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::ResolveError;

pub const REPO_COMPONENT: &str = "repo";
pub const IMAGE_COMPONENT: &str = "image";
pub const TAG_COMPONENT: &str = "tag";

static IMAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<repo>.+/)?(?P<image>[^:]+){1}(:)?(?P<tag>.+)?").expect("valid regex")
});

/// Paths of the image components inside a chart's values.yaml
///
/// Empty fields are not part of the image reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePathSpec {
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub tag: String,
}

impl ImagePathSpec {
    /// Component name to path, for the components that are set
    pub fn match_data(&self) -> BTreeMap<&'static str, &str> {
        [
            (REPO_COMPONENT, self.repo.as_str()),
            (IMAGE_COMPONENT, self.image.as_str()),
            (TAG_COMPONENT, self.tag.as_str()),
        ]
        .into_iter()
        .filter(|(_, path)| !path.is_empty())
        .collect()
    }
}

/// Splits an image URL into `repo`, `image` and `tag`
///
/// Components absent from the URL are absent from the map; `repo` keeps
/// its trailing `/`.
pub fn resolve_image_url(url: &str) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    let Some(caps) = IMAGE_PATTERN.captures(url) else {
        return result;
    };
    for name in [REPO_COMPONENT, IMAGE_COMPONENT, TAG_COMPONENT] {
        if let Some(m) = caps.name(name) {
            let value = m.as_str();
            if !value.is_empty() && value != ":" {
                result.insert(name.to_string(), value.to_string());
            }
        }
    }
    result
}

/// Values to write at each path so the chart pulls `url`
pub fn assign_image_data(
    url: &str,
    spec: &ImagePathSpec,
) -> Result<BTreeMap<String, String>, ResolveError> {
    let paths = spec.match_data();
    let mut ret = BTreeMap::new();

    if paths.len() == 1 {
        for path in paths.values() {
            ret.insert(path.to_string(), url.to_string());
        }
        return Ok(ret);
    }

    let resolved = resolve_image_url(url);
    let part = |name: &str| resolved.get(name).cloned().unwrap_or_default();
    let path = |name: &str| paths.get(name).map(|p| p.to_string()).unwrap_or_default();

    match paths.len() {
        3 => {
            ret.insert(path(REPO_COMPONENT), part(REPO_COMPONENT).trim_end_matches('/').to_string());
            ret.insert(path(IMAGE_COMPONENT), part(IMAGE_COMPONENT));
            ret.insert(path(TAG_COMPONENT), part(TAG_COMPONENT));
        }
        2 if paths.contains_key(TAG_COMPONENT) => {
            ret.insert(path(TAG_COMPONENT), part(TAG_COMPONENT));
            if let Some(other) = paths
                .iter()
                .find(|(name, _)| **name != TAG_COMPONENT)
                .map(|(_, p)| p.to_string())
            {
                ret.insert(other, format!("{}{}", part(REPO_COMPONENT), part(IMAGE_COMPONENT)));
            }
        }
        2 => {
            ret.insert(path(REPO_COMPONENT), part(REPO_COMPONENT).trim_end_matches('/').to_string());
            ret.insert(
                path(IMAGE_COMPONENT),
                format!("{}:{}", part(IMAGE_COMPONENT), part(TAG_COMPONENT)),
            );
        }
        n => return Err(ResolveError::PathCount(n)),
    }
    Ok(ret)
}

/// Expands dotted keys into a nested document
///
/// `{"image.repository": "x"}` becomes `image: {repository: x}`.
pub fn expand(flat: &BTreeMap<String, String>) -> Value {
    let mut root = Mapping::new();
    for (key, value) in flat {
        let segments: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &segments, value);
    }
    Value::Mapping(root)
}

fn insert_path(node: &mut Mapping, segments: &[&str], value: &str) {
    match segments {
        [] => {}
        [last] => {
            node.insert(Value::String(last.to_string()), Value::String(value.to_string()));
        }
        [head, rest @ ..] => {
            let entry = node
                .entry(Value::String(head.to_string()))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            if !entry.is_mapping() {
                *entry = Value::Mapping(Mapping::new());
            }
            if let Value::Mapping(next) = entry {
                insert_path(next, rest, value);
            }
        }
    }
}

/// Deep-merges `overlay` into `base`; mappings merge, anything else is replaced
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Parses a values document, treating empty input as an empty mapping
pub fn parse_values(source: &str) -> Result<Value, ResolveError> {
    if source.trim().is_empty() {
        return Ok(Value::Mapping(Mapping::new()));
    }
    let value: Value =
        serde_yaml::from_str(source).map_err(|e| ResolveError::Values(e.to_string()))?;
    match value {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        Value::Mapping(_) => Ok(value),
        _ => Err(ResolveError::Values("top level is not a mapping".to_string())),
    }
}

/// Writes the flat `values` into `source_yaml`
pub fn replace_image(
    source_yaml: &str,
    values: &BTreeMap<String, String>,
) -> Result<String, ResolveError> {
    let mut doc = parse_values(source_yaml)?;
    merge_values(&mut doc, expand(values));
    serde_yaml::to_string(&doc).map_err(|e| ResolveError::Values(e.to_string()))
}

/// Merges several values documents in order, later ones winning
pub fn merge_documents(sources: &[&str]) -> Result<String, ResolveError> {
    let mut doc = Value::Mapping(Mapping::new());
    for source in sources {
        merge_values(&mut doc, parse_values(source)?);
    }
    serde_yaml::to_string(&doc).map_err(|e| ResolveError::Values(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "registry.io/ns/app:v1.2.3";

    fn spec(repo: &str, image: &str, tag: &str) -> ImagePathSpec {
        ImagePathSpec {
            repo: repo.to_string(),
            image: image.to_string(),
            tag: tag.to_string(),
        }
    }

    #[test]
    fn test_resolve_image_url() {
        let parts = resolve_image_url(URL);
        assert_eq!(parts["repo"], "registry.io/ns/");
        assert_eq!(parts["image"], "app");
        assert_eq!(parts["tag"], "v1.2.3");

        let bare = resolve_image_url("app");
        assert_eq!(bare.get("image").map(String::as_str), Some("app"));
        assert!(!bare.contains_key("repo"));
        assert!(!bare.contains_key("tag"));
    }

    #[test]
    fn test_three_paths() {
        let values = assign_image_data(URL, &spec("image.repo", "image.name", "image.tag")).unwrap();
        assert_eq!(values["image.repo"], "registry.io/ns");
        assert_eq!(values["image.name"], "app");
        assert_eq!(values["image.tag"], "v1.2.3");
    }

    #[test]
    fn test_one_path_gets_whole_url() {
        let values = assign_image_data(URL, &spec("", "image", "")).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values["image"], URL);
    }

    #[test]
    fn test_two_paths_with_tag() {
        let values = assign_image_data(URL, &spec("", "image.repository", "image.tag")).unwrap();
        assert_eq!(values["image.repository"], "registry.io/ns/app");
        assert_eq!(values["image.tag"], "v1.2.3");
    }

    #[test]
    fn test_two_paths_without_tag() {
        let values = assign_image_data(URL, &spec("global.hub", "image", "")).unwrap();
        assert_eq!(values["global.hub"], "registry.io/ns");
        assert_eq!(values["image"], "app:v1.2.3");
    }

    #[test]
    fn test_no_paths_is_rejected() {
        let err = assign_image_data(URL, &ImagePathSpec::default()).unwrap_err();
        assert_eq!(err, ResolveError::PathCount(0));
    }

    #[test]
    fn test_replace_image_keeps_siblings() {
        let source = "image:\n  repository: old/app\n  tag: v1\n  pullPolicy: Always\nreplicas: 2\n";
        let values = assign_image_data(URL, &spec("", "image.repository", "image.tag")).unwrap();
        let out = replace_image(source, &values).unwrap();

        let doc: Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(doc["image"]["repository"].as_str(), Some("registry.io/ns/app"));
        assert_eq!(doc["image"]["tag"].as_str(), Some("v1.2.3"));
        assert_eq!(doc["image"]["pullPolicy"].as_str(), Some("Always"));
        assert_eq!(doc["replicas"].as_u64(), Some(2));
    }

    #[test]
    fn test_replace_image_into_empty_values() {
        let values = BTreeMap::from([("a.b.c".to_string(), "x".to_string())]);
        let out = replace_image("", &values).unwrap();
        let doc: Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(doc["a"]["b"]["c"].as_str(), Some("x"));
    }

    #[test]
    fn test_merge_documents_later_wins() {
        let out = merge_documents(&["a: 1\nb: {c: 2, d: 3}\n", "b: {c: 4}\n"]).unwrap();
        let doc: Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(doc["a"].as_u64(), Some(1));
        assert_eq!(doc["b"]["c"].as_u64(), Some(4));
        assert_eq!(doc["b"]["d"].as_u64(), Some(3));
    }

    #[test]
    fn test_non_mapping_values_rejected() {
        assert!(matches!(parse_values("- a\n- b\n"), Err(ResolveError::Values(_))));
    }
}
