use std::str::FromStr;

use convert_case::{Case, Casing};
use strum::EnumString;

/// A projected node position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OsmNode {
    pub lon: f64,
    pub lat: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberType {
    Node,
    Way,
    Relation,
}

/// One entry of a relation's member list as handed over by the importer.
#[derive(Clone, Debug)]
pub struct Member {
    pub kind: MemberType,
    pub id: i64,
    pub role: String,
}

/// A member way resolved through the middle layer, with its role recovered
/// from the relation's member list.
#[derive(Clone, Debug)]
pub struct MemberWay {
    pub id: i64,
    pub role: String,
    pub tags: Tags,
    pub nodes: Vec<OsmNode>,
}

/// The relation `type` values the output stage materializes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString)]
pub enum RelFlavor {
    Route,
    Multipolygon,
    Boundary,
}

impl RelFlavor {
    pub fn parse(value: &str) -> Option<Self> {
        RelFlavor::from_str(value.to_case(Case::Pascal).as_str()).ok()
    }
}

/// An ordered tag set. Order is the insertion order, which keeps row output
/// stable; lookups are linear, tag sets are small.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tags(Vec<(String, String)>);

impl Tags {
    pub fn new() -> Self {
        Tags(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.0.push((key.to_string(), value.to_string())),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    pub fn retain<F: FnMut(&str, &str) -> bool>(&mut self, mut keep: F) {
        self.0.retain(|(k, v)| keep(k, v));
    }

    /// Copy over entries whose key is not present yet.
    pub fn merge_missing(&mut self, other: &Tags) {
        for (k, v) in other.iter() {
            if !self.contains_key(k) {
                self.0.push((k.to_string(), v.to_string()));
            }
        }
    }

    /// Set equality, ignoring order.
    pub fn same_set(&self, other: &Tags) -> bool {
        self.0.len() == other.0.len() && self.0.iter().all(|(k, v)| other.get(k) == Some(v.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Tags(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rel_flavor_parses_lowercase_type_values() {
        assert_eq!(RelFlavor::parse("multipolygon"), Some(RelFlavor::Multipolygon));
        assert_eq!(RelFlavor::parse("route"), Some(RelFlavor::Route));
        assert_eq!(RelFlavor::parse("boundary"), Some(RelFlavor::Boundary));
        assert_eq!(RelFlavor::parse("site"), None);
    }

    #[test]
    fn tags_preserve_insertion_order() {
        let mut tags = Tags::new();
        tags.set("highway", "residential");
        tags.set("name", "High Street");
        tags.set("highway", "primary");
        let keys: Vec<&str> = tags.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["highway", "name"]);
        assert_eq!(tags.get("highway"), Some("primary"));
    }

    #[test]
    fn same_set_ignores_order() {
        let a: Tags = [("a", "1"), ("b", "2")].into_iter().collect();
        let b: Tags = [("b", "2"), ("a", "1")].into_iter().collect();
        assert!(a.same_set(&b));
        let c: Tags = [("a", "1")].into_iter().collect();
        assert!(!a.same_set(&c));
    }
}
