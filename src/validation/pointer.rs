//! RFC 6901 JSON pointers and index-qualified element paths.

use serde_json::Value as JsonValue;

/// One step of an element path such as `identifier[1].system`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Escapes a single reference token (`~` -> `~0`, `/` -> `~1`).
pub fn escape_token(token: &str) -> String {
    if !token.contains(['~', '/']) {
        return token.to_string();
    }
    token.replace('~', "~0").replace('/', "~1")
}

/// `pointer` extended by the field `name`.
pub fn push_field(pointer: &str, name: &str) -> String {
    format!("{pointer}/{}", escape_token(name))
}

/// `pointer` extended by the array index `index`.
pub fn push_index(pointer: &str, index: usize) -> String {
    format!("{pointer}/{index}")
}

/// Pointer to the resource the finding concerns: the entry resource for
/// bundle entries, the document root otherwise.
pub fn resource_base(entry_index: Option<usize>) -> String {
    match entry_index {
        Some(index) => format!("/entry/{index}/resource"),
        None => String::new(),
    }
}

pub fn resolves(input: &JsonValue, pointer: &str) -> bool {
    input.pointer(pointer).is_some()
}

/// Splits `identifier[1].system` into fields and indices. Malformed index
/// brackets are kept as part of the field name.
pub fn parse_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    for part in path.split('.').filter(|p| !p.is_empty()) {
        let (name, mut rest) = match part.find('[') {
            Some(open) => (&part[..open], &part[open..]),
            None => (part, ""),
        };
        let mut indices = Vec::new();
        while let Some(inner) = rest.strip_prefix('[') {
            let Some(close) = inner.find(']') else {
                break;
            };
            match inner[..close].parse::<usize>() {
                Ok(index) => indices.push(index),
                Err(_) => break,
            }
            rest = &inner[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(PathSegment::Field(part.to_string()));
            continue;
        }
        if !name.is_empty() {
            segments.push(PathSegment::Field(name.to_string()));
        }
        segments.extend(indices.into_iter().map(PathSegment::Index));
    }
    segments
}

/// Resolves a resource-relative path below `base` against the literal input.
///
/// Returns the exact node's pointer when it exists, otherwise the pointer of
/// the nearest existing ancestor. `None` when `base` itself does not resolve.
pub fn locate(input: &JsonValue, base: &str, relative_path: &str) -> Option<String> {
    let mut node = input.pointer(base)?;
    let mut pointer = base.to_string();

    for segment in parse_path(relative_path) {
        let next = match &segment {
            PathSegment::Field(name) => node.get(name.as_str()),
            PathSegment::Index(index) => node.get(*index),
        };
        let Some(next) = next else {
            break;
        };
        pointer = match &segment {
            PathSegment::Field(name) => push_field(&pointer, name),
            PathSegment::Index(index) => push_index(&pointer, *index),
        };
        node = next;
    }
    Some(pointer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape_token() {
        assert_eq!(escape_token("a/b~c"), "a~1b~0c");
        assert_eq!(escape_token("plain"), "plain");
        let input = json!({"a/b~c": 1});
        assert!(resolves(&input, &push_field("", "a/b~c")));
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("identifier[1].system"),
            vec![
                PathSegment::Field("identifier".into()),
                PathSegment::Index(1),
                PathSegment::Field("system".into()),
            ]
        );
        assert_eq!(
            parse_path("line[0][2]"),
            vec![
                PathSegment::Field("line".into()),
                PathSegment::Index(0),
                PathSegment::Index(2),
            ]
        );
        assert_eq!(parse_path("value[x]"), vec![PathSegment::Field("value[x]".into())]);
        assert!(parse_path("").is_empty());
    }

    #[test]
    fn test_locate_exact_and_ancestor() {
        let input = json!({
            "resourceType": "Bundle",
            "entry": [{"resource": {
                "resourceType": "Observation",
                "performer": [{"reference": "Practitioner/1"}]
            }}]
        });
        let base = resource_base(Some(0));

        assert_eq!(
            locate(&input, &base, "performer[0].reference").as_deref(),
            Some("/entry/0/resource/performer/0/reference")
        );
        // Missing leaf: nearest existing ancestor.
        assert_eq!(
            locate(&input, &base, "performer[0].display").as_deref(),
            Some("/entry/0/resource/performer/0")
        );
        // Unindexed path into an array stops at the array.
        assert_eq!(
            locate(&input, &base, "performer.display").as_deref(),
            Some("/entry/0/resource/performer")
        );
        assert_eq!(locate(&input, &base, "").as_deref(), Some("/entry/0/resource"));
        assert_eq!(locate(&input, &resource_base(Some(4)), "performer"), None);
    }
}
