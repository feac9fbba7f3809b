use crate::osm::{MemberWay, RelFlavor, Tags};
use crate::style::{ExportList, OsmKind, StyleFlag, TagInfo};

/// Classification of an exportable way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WayClass {
    pub polygon: bool,
    pub roads: bool,
}

/// Classification of an exportable relation, with the per-member-way
/// supersedence vector (parallel to the member list handed in).
#[derive(Clone, Debug, Default)]
pub struct RelOutcome {
    pub make_polygon: bool,
    pub make_boundary: bool,
    pub roads: bool,
    pub superseded: Vec<bool>,
}

/// The tag transformer applied before any row is emitted. Implementations
/// mutate the tag sets in place; a `None`/`true` result drops the object.
pub trait TagTransform {
    /// Returns true when the node is not exportable.
    fn filter_node_tags(&self, tags: &mut Tags, export: &ExportList) -> bool;

    /// Classify a way, or `None` when it is not exportable.
    fn filter_way_tags(&self, tags: &mut Tags, export: &ExportList) -> Option<WayClass>;

    /// Returns true when the relation is not exportable.
    fn filter_rel_tags(&self, tags: &mut Tags, export: &ExportList) -> bool;

    /// Classify a relation against its resolved member ways, or `None` when
    /// it produces no output.
    fn filter_rel_member_tags(
        &self,
        rel_tags: &mut Tags,
        members: &[MemberWay],
        export: &ExportList,
    ) -> Option<RelOutcome>;
}

/// Shell-style wildcard match supporting `*` and `?`.
pub fn wild_match(pattern: &str, value: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let val: Vec<char> = value.chars().collect();
    wild_match_at(&pat, &val)
}

fn wild_match_at(pat: &[char], val: &[char]) -> bool {
    match pat.first() {
        None => val.is_empty(),
        Some('*') => {
            (0..=val.len()).any(|skip| wild_match_at(&pat[1..], &val[skip..]))
        }
        Some('?') => !val.is_empty() && wild_match_at(&pat[1..], &val[1..]),
        Some(c) => val.first() == Some(c) && wild_match_at(&pat[1..], &val[1..]),
    }
}

/// Highway classes that are mirrored into the roads table.
const ROADS_HIGHWAY: &[&str] = &[
    "motorway",
    "motorway_link",
    "trunk",
    "trunk_link",
    "primary",
    "primary_link",
    "secondary",
    "secondary_link",
    "tertiary",
    "tertiary_link",
];

/// The default columnar-projection transformer: delete entries strip tags,
/// any remaining match against the export list makes the object exportable,
/// and the `polygon`/`phstore` flags (or an `area` tag) decide polygon
/// candidacy.
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicTagTransform;

impl BasicTagTransform {
    /// Strip tags matched by delete entries; report whether any remaining tag
    /// matches an export entry and whether one of those flags it as a polygon.
    fn project(&self, tags: &mut Tags, entries: &[TagInfo]) -> (bool, bool) {
        let mut exportable = false;
        let mut polygon = false;
        tags.retain(|key, _| {
            if let Some(entry) = lookup(entries, key) {
                if entry.flags.contains(StyleFlag::Delete) {
                    return false;
                }
                exportable = true;
                if entry.flags.contains(StyleFlag::Polygon) || entry.flags.contains(StyleFlag::Phstore) {
                    polygon = true;
                }
            }
            true
        });
        (exportable, polygon)
    }

    fn is_road(&self, tags: &Tags) -> bool {
        if let Some(highway) = tags.get("highway") {
            if ROADS_HIGHWAY.contains(&highway) {
                return true;
            }
        }
        if tags.get("railway").map_or(false, |v| !v.is_empty()) {
            return true;
        }
        tags.get("boundary") == Some("administrative")
    }
}

fn lookup<'a>(entries: &'a [TagInfo], key: &str) -> Option<&'a TagInfo> {
    entries.iter().find(|entry| {
        if entry.flags.contains(StyleFlag::Delete) {
            wild_match(&entry.name, key)
        } else {
            entry.name == key
        }
    })
}

impl TagTransform for BasicTagTransform {
    fn filter_node_tags(&self, tags: &mut Tags, export: &ExportList) -> bool {
        let (exportable, _) = self.project(tags, export.get(OsmKind::Node));
        !exportable
    }

    fn filter_way_tags(&self, tags: &mut Tags, export: &ExportList) -> Option<WayClass> {
        let (exportable, mut polygon) = self.project(tags, export.get(OsmKind::Way));
        if !exportable {
            return None;
        }
        match tags.get("area") {
            Some("yes") | Some("true") | Some("1") => polygon = true,
            Some("no") | Some("false") | Some("0") => polygon = false,
            _ => {}
        }
        Some(WayClass {
            polygon,
            roads: self.is_road(tags),
        })
    }

    fn filter_rel_tags(&self, tags: &mut Tags, export: &ExportList) -> bool {
        for entry in export.get(OsmKind::Way) {
            if entry.flags.contains(StyleFlag::Delete) {
                tags.retain(|key, _| !wild_match(&entry.name, key));
            }
        }
        // Exportability is settled after member tags are merged in; here only
        // relations without a type tag are rejected outright.
        !tags.contains_key("type")
    }

    fn filter_rel_member_tags(
        &self,
        rel_tags: &mut Tags,
        members: &[MemberWay],
        export: &ExportList,
    ) -> Option<RelOutcome> {
        let flavor = rel_tags.get("type").and_then(RelFlavor::parse)?;
        rel_tags.remove("type");

        let mut out = RelOutcome {
            superseded: vec![false; members.len()],
            ..RelOutcome::default()
        };
        match flavor {
            RelFlavor::Route => {}
            RelFlavor::Boundary => out.make_boundary = true,
            RelFlavor::Multipolygon => {
                out.make_polygon = true;
                if rel_tags.is_empty() {
                    // An untagged multipolygon takes its tags from the member
                    // ways, which are then fully represented by the relation.
                    for (i, member) in members.iter().enumerate() {
                        rel_tags.merge_missing(&member.tags);
                        out.superseded[i] = true;
                    }
                } else {
                    for (i, member) in members.iter().enumerate() {
                        out.superseded[i] = member.tags.same_set(rel_tags);
                    }
                }
            }
        }

        let (exportable, _) = self.project(rel_tags, export.get(OsmKind::Way));
        if !exportable {
            return None;
        }
        out.roads = self.is_road(rel_tags);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::OsmNode;
    use crate::style::parse_style;

    fn export() -> ExportList {
        parse_style(
            "node,way  name      text  linear\n\
             way       highway   text  linear\n\
             way       railway   text  linear\n\
             way       building  text  polygon\n\
             way       landuse   text  phstore\n\
             node,way  note      text  delete\n\
             node,way  source:*  text  delete\n",
        )
        .unwrap()
        .0
    }

    fn member(id: i64, tags: Tags) -> MemberWay {
        MemberWay {
            id,
            role: "outer".to_string(),
            tags,
            nodes: vec![OsmNode { lon: 0.0, lat: 0.0 }],
        }
    }

    #[test]
    fn wildcards_match_like_the_shell() {
        assert!(wild_match("source:*", "source:date"));
        assert!(wild_match("source:*", "source:"));
        assert!(!wild_match("source:*", "source"));
        assert!(wild_match("na?e", "name"));
        assert!(!wild_match("na?e", "nae"));
        assert!(wild_match("*", ""));
    }

    #[test]
    fn node_without_exportable_tags_is_dropped() {
        let t = BasicTagTransform;
        let mut tags: Tags = [("note", "fixme"), ("foo", "bar")].into_iter().collect();
        assert!(t.filter_node_tags(&mut tags, &export()));
        // The delete entry stripped its tag; the unknown one survives.
        assert!(!tags.contains_key("note"));
        assert!(tags.contains_key("foo"));
    }

    #[test]
    fn delete_entries_strip_by_wildcard() {
        let t = BasicTagTransform;
        let mut tags: Tags = [("name", "A"), ("source:date", "2010")].into_iter().collect();
        assert!(!t.filter_node_tags(&mut tags, &export()));
        assert!(!tags.contains_key("source:date"));
    }

    #[test]
    fn way_classification_from_flags_and_area_tag() {
        let t = BasicTagTransform;
        let e = export();

        let mut line: Tags = [("highway", "residential")].into_iter().collect();
        assert_eq!(t.filter_way_tags(&mut line, &e), Some(WayClass { polygon: false, roads: false }));

        let mut road: Tags = [("highway", "primary")].into_iter().collect();
        assert_eq!(t.filter_way_tags(&mut road, &e), Some(WayClass { polygon: false, roads: true }));

        let mut poly: Tags = [("building", "yes")].into_iter().collect();
        assert_eq!(t.filter_way_tags(&mut poly, &e), Some(WayClass { polygon: true, roads: false }));

        let mut forced: Tags = [("highway", "pedestrian"), ("area", "yes")].into_iter().collect();
        assert_eq!(t.filter_way_tags(&mut forced, &e), Some(WayClass { polygon: true, roads: false }));

        let mut phstore: Tags = [("landuse", "forest")].into_iter().collect();
        assert_eq!(t.filter_way_tags(&mut phstore, &e), Some(WayClass { polygon: true, roads: false }));

        let mut rejected: Tags = [("unknown", "1")].into_iter().collect();
        assert_eq!(t.filter_way_tags(&mut rejected, &e), None);
    }

    #[test]
    fn tagged_multipolygon_supersedes_identical_members() {
        let t = BasicTagTransform;
        let mut rel_tags: Tags = [("type", "multipolygon"), ("building", "yes")].into_iter().collect();
        let members = vec![
            member(7, [("building", "yes")].into_iter().collect()),
            member(8, [("highway", "residential")].into_iter().collect()),
        ];
        let out = t.filter_rel_member_tags(&mut rel_tags, &members, &export()).unwrap();
        assert!(out.make_polygon);
        assert_eq!(out.superseded, vec![true, false]);
        assert!(!rel_tags.contains_key("type"));
    }

    #[test]
    fn untagged_multipolygon_absorbs_member_tags() {
        let t = BasicTagTransform;
        let mut rel_tags: Tags = [("type", "multipolygon")].into_iter().collect();
        let members = vec![member(7, [("building", "yes")].into_iter().collect())];
        let out = t.filter_rel_member_tags(&mut rel_tags, &members, &export()).unwrap();
        assert_eq!(out.superseded, vec![true]);
        assert_eq!(rel_tags.get("building"), Some("yes"));
    }

    #[test]
    fn unknown_relation_type_is_dropped() {
        let t = BasicTagTransform;
        let mut rel_tags: Tags = [("type", "site"), ("name", "x")].into_iter().collect();
        assert!(t.filter_rel_member_tags(&mut rel_tags, &[], &export()).is_none());
    }

    #[test]
    fn boundary_relation_sets_make_boundary() {
        let t = BasicTagTransform;
        let mut rel_tags: Tags =
            [("type", "boundary"), ("boundary", "administrative"), ("name", "x")].into_iter().collect();
        let out = t.filter_rel_member_tags(&mut rel_tags, &[], &export()).unwrap();
        assert!(out.make_boundary);
        assert!(!out.make_polygon);
        assert!(out.roads);
    }
}
