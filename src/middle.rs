use std::collections::HashMap;

use crate::osm::{Member, MemberType, MemberWay, OsmNode, Tags};

/// Random-access lookups into the middle layer holding the decoded OSM
/// primitives. The middle proper (its storage, caching and diff handling) is
/// outside this crate.
pub trait MiddleQuery {
    /// Resolve node IDs to positions, skipping unknown IDs.
    fn nodes_get_list(&self, ids: &[i64]) -> Vec<OsmNode>;

    fn ways_get(&self, id: i64) -> Option<(Tags, Vec<OsmNode>)>;

    fn relations_get(&self, id: i64) -> Option<(Vec<Member>, Tags)>;

    /// IDs of the relations having the way as a member.
    fn relations_using_way(&self, id: i64) -> Vec<i64>;

    /// Resolve way IDs in order, skipping unknown IDs. Roles are left empty;
    /// the caller recovers them from its member list.
    fn ways_get_list(&self, ids: &[i64]) -> Vec<MemberWay>;
}

/// A hash-map-backed middle layer, enough for tests and for embedding the
/// output stage without a database-backed middle.
#[derive(Debug, Default)]
pub struct RamMiddle {
    nodes: HashMap<i64, OsmNode>,
    ways: HashMap<i64, (Tags, Vec<i64>)>,
    rels: HashMap<i64, (Vec<Member>, Tags)>,
    way_rels: HashMap<i64, Vec<i64>>,
}

impl RamMiddle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: i64, lon: f64, lat: f64) {
        self.nodes.insert(id, OsmNode { lon, lat });
    }

    pub fn add_way(&mut self, id: i64, node_ids: &[i64], tags: Tags) {
        self.ways.insert(id, (tags, node_ids.to_vec()));
    }

    pub fn add_relation(&mut self, id: i64, members: Vec<Member>, tags: Tags) {
        for member in &members {
            if member.kind == MemberType::Way {
                self.way_rels.entry(member.id).or_default().push(id);
            }
        }
        self.rels.insert(id, (members, tags));
    }
}

impl MiddleQuery for RamMiddle {
    fn nodes_get_list(&self, ids: &[i64]) -> Vec<OsmNode> {
        ids.iter().filter_map(|id| self.nodes.get(id).copied()).collect()
    }

    fn ways_get(&self, id: i64) -> Option<(Tags, Vec<OsmNode>)> {
        let (tags, node_ids) = self.ways.get(&id)?;
        Some((tags.clone(), self.nodes_get_list(node_ids)))
    }

    fn relations_get(&self, id: i64) -> Option<(Vec<Member>, Tags)> {
        self.rels.get(&id).cloned()
    }

    fn relations_using_way(&self, id: i64) -> Vec<i64> {
        self.way_rels.get(&id).cloned().unwrap_or_default()
    }

    fn ways_get_list(&self, ids: &[i64]) -> Vec<MemberWay> {
        ids.iter()
            .filter_map(|&id| {
                let (tags, nodes) = self.ways_get(id)?;
                Some(MemberWay {
                    id,
                    role: String::new(),
                    tags,
                    nodes,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ids_are_skipped() {
        let mut mid = RamMiddle::new();
        mid.add_node(1, 10.0, 56.0);
        mid.add_node(3, 11.0, 57.0);
        let nodes = mid.nodes_get_list(&[1, 2, 3]);
        assert_eq!(nodes.len(), 2);
        assert!(mid.ways_get(9).is_none());
    }

    #[test]
    fn relations_using_way_follows_membership() {
        let mut mid = RamMiddle::new();
        mid.add_relation(
            42,
            vec![
                Member { kind: MemberType::Way, id: 7, role: "outer".to_string() },
                Member { kind: MemberType::Node, id: 7, role: String::new() },
            ],
            Tags::new(),
        );
        assert_eq!(mid.relations_using_way(7), vec![42]);
        assert!(mid.relations_using_way(8).is_empty());
    }
}
