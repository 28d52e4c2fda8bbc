//! JSON helpers used to build and stitch federated responses.
//!
//! Responses are plain [`serde_json::Value`] trees. A [`Path`] addresses a position in such a
//! tree; the [`PathElement::Flatten`] element (`@`) stands for "every element of this list" and
//! is how plan nodes describe where their entities live.

use std::fmt;

use displaydoc::Display;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use thiserror::Error;

pub use serde_json::Map;
pub use serde_json::Value;

/// A JSON object.
pub type Object = Map<String, Value>;

const FLATTEN_CHARACTER: &str = "@";

/// An error while processing JSON data.
#[derive(Debug, Error, Display, Clone, Eq, PartialEq)]
pub enum JsonExtError {
    /// Could not find path {0} in JSON.
    PathNotFound(Path),

    /// Attempt to flatten on non-array node at {0}.
    InvalidFlatten(Path),

    /// Conflicting values for '{field}' at {path}.
    Conflict {
        /// The object holding the conflicting field.
        path: Path,
        /// The field both sides disagree on.
        field: String,
    },
}

/// A GraphQL path element that is composed of strings, numbers or the flatten marker.
/// e.g `/book/3/name` or `/topProducts/@/reviews`
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PathElement {
    /// Given an array, applies the rest of the path to every element.
    Flatten,

    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

impl Serialize for PathElement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            PathElement::Flatten => serializer.serialize_str(FLATTEN_CHARACTER),
            PathElement::Index(index) => serializer.serialize_u64(*index as u64),
            PathElement::Key(key) => serializer.serialize_str(key),
        }
    }
}

impl<'de> Deserialize<'de> for PathElement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawElement {
            Index(usize),
            Key(String),
        }

        Ok(match RawElement::deserialize(deserializer)? {
            RawElement::Index(index) => PathElement::Index(index),
            RawElement::Key(key) if key == FLATTEN_CHARACTER => PathElement::Flatten,
            RawElement::Key(key) => PathElement::Key(key),
        })
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Flatten => f.write_str(FLATTEN_CHARACTER),
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => f.write_str(key),
        }
    }
}

/// A path into the result document.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element)
    }

    pub fn join(&self, other: impl AsRef<Path>) -> Path {
        let other = other.as_ref();
        let mut elements = Vec::with_capacity(self.len() + other.len());
        elements.extend(self.0.iter().cloned());
        elements.extend(other.0.iter().cloned());
        Path(elements)
    }

    /// Returns a new path with `key` appended.
    pub fn key(&self, key: impl Into<String>) -> Path {
        let mut path = self.clone();
        path.push(PathElement::Key(key.into()));
        path
    }

    /// Returns a new path with the flatten marker appended.
    pub fn flatten(&self) -> Path {
        let mut path = self.clone();
        path.push(PathElement::Flatten);
        path
    }

    pub fn parent(&self) -> Option<Path> {
        if self.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.len() - 1].to_vec()))
        }
    }

    /// Whether `self` is a prefix of `other`.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl AsRef<Path> for Path {
    fn as_ref(&self) -> &Path {
        self
    }
}

impl FromIterator<PathElement> for Path {
    fn from_iter<T: IntoIterator<Item = PathElement>>(iter: T) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl<T> From<T> for Path
where
    T: AsRef<str>,
{
    fn from(s: T) -> Self {
        s.as_ref()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                if segment == FLATTEN_CHARACTER {
                    PathElement::Flatten
                } else if let Ok(index) = segment.parse::<usize>() {
                    PathElement::Index(index)
                } else {
                    PathElement::Key(segment.to_string())
                }
            })
            .collect()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("/");
        }
        for element in self.iter() {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}

/// Extension methods on [`Value`] for path addressing and merging.
pub trait ValueExt {
    /// Merge `other` into `self`. Objects are merged field by field and lists element by
    /// element; two different scalars at the same position are a [`JsonExtError::Conflict`].
    fn strict_merge(&mut self, other: Value, path: &Path) -> Result<(), JsonExtError>;

    /// Get a mutable reference to the value at `path`. The path must not contain flatten elements.
    fn get_path_mut<'a>(&'a mut self, path: &Path) -> Result<&'a mut Value, JsonExtError>;

    /// Call `f` with every value matched by `path`, expanding flatten elements into indexes.
    /// Positions that do not exist are skipped.
    fn select_values_and_paths<'a, F>(&'a self, path: &Path, f: F)
    where
        F: FnMut(&Path, &'a Value);
}

impl ValueExt for Value {
    fn strict_merge(&mut self, other: Value, path: &Path) -> Result<(), JsonExtError> {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b.into_iter() {
                    match a.get_mut(&key) {
                        Some(existing)
                            if (existing.is_object() && value.is_object())
                                || (existing.is_array() && value.is_array()) =>
                        {
                            existing.strict_merge(value, &path.key(key.as_str()))?;
                        }
                        Some(existing) => {
                            if *existing != value {
                                return Err(JsonExtError::Conflict {
                                    path: path.clone(),
                                    field: key,
                                });
                            }
                        }
                        None => {
                            a.insert(key, value);
                        }
                    }
                }
                Ok(())
            }
            (Value::Array(a), Value::Array(b)) => {
                if a.len() != b.len() {
                    return Err(JsonExtError::Conflict {
                        path: path.clone(),
                        field: "length".to_string(),
                    });
                }
                for (index, (existing, value)) in a.iter_mut().zip(b.into_iter()).enumerate() {
                    let mut element_path = path.clone();
                    element_path.push(PathElement::Index(index));
                    existing.strict_merge(value, &element_path)?;
                }
                Ok(())
            }
            (a, b) if *a == b => Ok(()),
            (_, _) => Err(JsonExtError::Conflict {
                path: path.parent().unwrap_or_default(),
                field: path.last().map(ToString::to_string).unwrap_or_default(),
            }),
        }
    }

    fn get_path_mut<'a>(&'a mut self, path: &Path) -> Result<&'a mut Value, JsonExtError> {
        let mut current = self;
        for element in path.iter() {
            current = match element {
                PathElement::Key(key) => current.as_object_mut().and_then(|o| o.get_mut(key)),
                PathElement::Index(index) => {
                    current.as_array_mut().and_then(|a| a.get_mut(*index))
                }
                PathElement::Flatten => return Err(JsonExtError::InvalidFlatten(path.clone())),
            }
            .ok_or_else(|| JsonExtError::PathNotFound(path.clone()))?;
        }
        Ok(current)
    }

    fn select_values_and_paths<'a, F>(&'a self, path: &Path, mut f: F)
    where
        F: FnMut(&Path, &'a Value),
    {
        iterate_path(&mut Path::empty(), &path.0, self, &mut f)
    }
}

fn iterate_path<'a, F>(parent: &mut Path, path: &[PathElement], data: &'a Value, f: &mut F)
where
    F: FnMut(&Path, &'a Value),
{
    match path.first() {
        None => f(parent, data),
        Some(PathElement::Flatten) => {
            if let Some(array) = data.as_array() {
                for (index, value) in array.iter().enumerate() {
                    parent.push(PathElement::Index(index));
                    iterate_path(parent, &path[1..], value, f);
                    parent.0.pop();
                }
            }
        }
        Some(PathElement::Index(index)) => {
            if let Some(value) = data.as_array().and_then(|a| a.get(*index)) {
                parent.push(PathElement::Index(*index));
                iterate_path(parent, &path[1..], value, f);
                parent.0.pop();
            }
        }
        Some(PathElement::Key(key)) => {
            if let Some(value) = data.as_object().and_then(|o| o.get(key)) {
                parent.push(PathElement::Key(key.clone()));
                iterate_path(parent, &path[1..], value, f);
                parent.0.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn path_parse_and_display() {
        let path = Path::from("topProducts/@/reviews/1/author");
        assert_eq!(
            path,
            Path(vec![
                PathElement::Key("topProducts".to_string()),
                PathElement::Flatten,
                PathElement::Key("reviews".to_string()),
                PathElement::Index(1),
                PathElement::Key("author".to_string()),
            ])
        );
        assert_eq!(path.to_string(), "/topProducts/@/reviews/1/author");
        assert_eq!(Path::empty().to_string(), "/");
    }

    #[test]
    fn path_serde() {
        let path = Path::from("user/reviews/@");
        let value = serde_json::to_value(&path).unwrap();
        assert_eq!(value, json!(["user", "reviews", "@"]));
        assert_eq!(serde_json::from_value::<Path>(json!(["a", 2, "@"])).unwrap(), Path::from("a/2/@"));
    }

    #[test]
    fn select_values_expands_flatten() {
        let data = json!({
            "topProducts": [
                {"productId": "1", "reviews": [{"reviewId": "1"}]},
                {"productId": "2", "reviews": []},
                {"productId": "3", "reviews": [{"reviewId": "3"}, {"reviewId": "4"}]},
            ]
        });
        let mut paths = Vec::new();
        data.select_values_and_paths(&Path::from("topProducts/@/reviews/@"), |path, value| {
            paths.push((path.to_string(), value["reviewId"].clone()))
        });
        assert_eq!(
            paths,
            vec![
                ("/topProducts/0/reviews/0".to_string(), json!("1")),
                ("/topProducts/2/reviews/0".to_string(), json!("3")),
                ("/topProducts/2/reviews/1".to_string(), json!("4")),
            ]
        );
    }

    #[test]
    fn select_values_skips_missing_positions() {
        let data = json!({"user": null});
        let mut count = 0;
        data.select_values_and_paths(&Path::from("user/reviews/@"), |_, _| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn get_path_mut_rejects_flatten() {
        let mut data = json!({"a": [1, 2]});
        assert_eq!(
            data.get_path_mut(&Path::from("a/@")).unwrap_err(),
            JsonExtError::InvalidFlatten(Path::from("a/@"))
        );
        *data.get_path_mut(&Path::from("a/1")).unwrap() = json!(3);
        assert_eq!(data, json!({"a": [1, 3]}));
    }

    #[test]
    fn strict_merge_unions_disjoint_fields() {
        let mut a = json!({"id": "1", "name": "Ada"});
        let b = json!({"id": "1", "reviews": [{"reviewId": "1"}]});
        a.strict_merge(b.clone(), &Path::empty()).unwrap();
        assert_eq!(a, json!({"id": "1", "name": "Ada", "reviews": [{"reviewId": "1"}]}));

        let mut reversed = b;
        reversed
            .strict_merge(json!({"id": "1", "name": "Ada"}), &Path::empty())
            .unwrap();
        assert_eq!(a, reversed);
    }

    #[test]
    fn strict_merge_reports_conflicts() {
        let mut a = json!({"user": {"id": "1", "name": "Ada"}});
        let err = a
            .strict_merge(json!({"user": {"name": "Alan"}}), &Path::empty())
            .unwrap_err();
        assert_eq!(
            err,
            JsonExtError::Conflict {
                path: Path::from("user"),
                field: "name".to_string()
            }
        );
    }
}
