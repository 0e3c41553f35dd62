//! Cache keys and query text helpers.
//!
//! A [`CacheKey`] identifies one resolved request: the endpoint, the query text
//! and a canonical serialization of the variables. It doubles as the URI the
//! transport fetches for queries.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{Map, Value};

/// Variables sent alongside a query or mutation.
pub type Variables = Map<String, Value>;

/// A string uniquely identifying a resolved request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Builds the key for `query` with `variables` against `endpoint`.
    ///
    /// Variables are serialized with object keys sorted at every level, so two
    /// maps that differ only in insertion order resolve to the same key.
    pub fn resolve(endpoint: &str, query: &str, variables: Option<&Variables>) -> Self {
        let mut uri = format!("{endpoint}?query={}", urlencoding::encode(query));
        if let Some(variables) = variables {
            let canonical = canonical_json(&Value::Object(variables.clone()));
            uri.push_str("&variables=");
            uri.push_str(&urlencoding::encode(&canonical.to_string()));
        }
        Self(Arc::from(uri))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Rebuilds `value` with every object's keys in sorted order.
pub fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical_json(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static PUNCTUATION_SPACING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" ?([,:{}()]) ?").expect("valid regex"));

/// Collapses insignificant whitespace in query text.
///
/// Runs of whitespace become a single space and spaces next to `, : { } ( )`
/// are dropped, so a query written across several indented lines produces the
/// same cache key as its one-line form.
///
/// ```
/// use booklist_query::client::compress;
///
/// let query = compress(
///     "query Books($page: Int) {
///         allBooks(page: $page) { Books { title } }
///     }",
/// );
/// assert_eq!(query, "query Books($page:Int){allBooks(page:$page){Books{title}}}");
/// ```
pub fn compress(query: &str) -> String {
    let collapsed = WHITESPACE.replace_all(query, " ");
    PUNCTUATION_SPACING
        .replace_all(&collapsed, "$1")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        match value {
            Value::Object(map) => map,
            _ => panic!("variables must be an object"),
        }
    }

    #[test]
    fn test_key_without_variables() {
        let key = CacheKey::resolve("/graphql", "{books{title}}", None);
        assert_eq!(key.as_str(), "/graphql?query=%7Bbooks%7Btitle%7D%7D");
    }

    #[test]
    fn test_key_is_independent_of_variable_order() {
        let mut a = Variables::new();
        a.insert("page".into(), json!(1));
        a.insert("title".into(), json!("dune"));

        let mut b = Variables::new();
        b.insert("title".into(), json!("dune"));
        b.insert("page".into(), json!(1));

        assert_eq!(
            CacheKey::resolve("/graphql", "q", Some(&a)),
            CacheKey::resolve("/graphql", "q", Some(&b))
        );
    }

    #[test]
    fn test_key_differs_by_variables() {
        let a = vars(json!({ "page": 1 }));
        let b = vars(json!({ "page": 2 }));
        assert_ne!(
            CacheKey::resolve("/graphql", "q", Some(&a)),
            CacheKey::resolve("/graphql", "q", Some(&b))
        );
        assert_ne!(
            CacheKey::resolve("/graphql", "q", Some(&a)),
            CacheKey::resolve("/graphql", "q", None)
        );
    }

    #[test]
    fn test_canonical_json_sorts_nested_objects() {
        let value = json!({ "b": { "y": 1, "x": [ { "d": 1, "c": 2 } ] }, "a": null });
        assert_eq!(
            canonical_json(&value).to_string(),
            r#"{"a":null,"b":{"x":[{"c":2,"d":1}],"y":1}}"#
        );
    }

    #[test]
    fn test_compress() {
        assert_eq!(compress("  query { a , b }  "), "query{a,b}");
        assert_eq!(compress("mutation m($id: ID) {\n  x(id: $id)\n}"), "mutation m($id:ID){x(id:$id)}");
    }
}
