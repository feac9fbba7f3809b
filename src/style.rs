use std::fs;
use std::str::FromStr;

use log::warn;
use strum::EnumString;

use crate::error::{OutputError, Result};

/// Per-tag behavior flags from the style file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum StyleFlag {
    Polygon,
    Linear,
    Nocache,
    Delete,
    Phstore,
}

impl StyleFlag {
    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// A small set of [`StyleFlag`]s.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlagSet(u32);

impl FlagSet {
    pub fn insert(&mut self, flag: StyleFlag) {
        self.0 |= flag.bit();
    }

    pub fn contains(&self, flag: StyleFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// True when the set holds exactly this one flag.
    pub fn is_only(&self, flag: StyleFlag) -> bool {
        self.0 == flag.bit()
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// One style entry: a tag name, its destination column type and its flags.
/// Wildcards in the name are only allowed on delete-only entries.
#[derive(Clone, Debug, PartialEq)]
pub struct TagInfo {
    pub name: String,
    pub column_type: String,
    pub flags: FlagSet,
}

impl TagInfo {
    /// Whether this entry materializes as a destination column. Delete
    /// entries only feed the tag transformer; phstore entries are collected
    /// into a side hstore.
    pub fn is_column(&self) -> bool {
        !self.flags.contains(StyleFlag::Delete) && !self.flags.contains(StyleFlag::Phstore)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OsmKind {
    Node,
    Way,
}

/// The schema derived from the style file: one ordered entry sequence per
/// applicable OSM type. File order determines column order.
#[derive(Clone, Debug, Default)]
pub struct ExportList {
    node: Vec<TagInfo>,
    way: Vec<TagInfo>,
}

impl ExportList {
    pub fn get(&self, kind: OsmKind) -> &[TagInfo] {
        match kind {
            OsmKind::Node => &self.node,
            OsmKind::Way => &self.way,
        }
    }

    /// The entries that become typed columns, in file order.
    pub fn columns(&self, kind: OsmKind) -> impl Iterator<Item = &TagInfo> {
        self.get(kind).iter().filter(|info| info.is_column())
    }

    fn add(&mut self, kind: OsmKind, info: TagInfo, line: usize) -> Result<()> {
        let seq = match kind {
            OsmKind::Node => &mut self.node,
            OsmKind::Way => &mut self.way,
        };
        if seq.iter().any(|existing| existing.name == info.name) {
            return Err(OutputError::Style {
                line,
                message: format!("duplicate entry '{}'", info.name),
            });
        }
        seq.push(info);
        Ok(())
    }
}

const OSMTYPE_MAX: usize = 23;
const TAG_MAX: usize = 63;
const DATATYPE_MAX: usize = 23;
const FLAGS_MAX: usize = 127;

fn truncate(token: &str, max: usize) -> &str {
    match token.char_indices().nth(max) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}

/// Read and parse a style file into the export list plus the `way_area`
/// auto-column switch (off when the style carries a delete-only `way_area`
/// entry).
pub fn read_style_file(path: &str) -> Result<(ExportList, bool)> {
    let text = fs::read_to_string(path).map_err(|source| OutputError::StyleFile {
        path: path.to_string(),
        source,
    })?;
    parse_style(&text)
}

pub fn parse_style(text: &str) -> Result<(ExportList, bool)> {
    let mut export = ExportList::default();
    let mut enable_way_area = true;
    let mut num_read = 0;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let mut fields = content.split_whitespace();
        let osmtype = match fields.next() {
            Some(t) => truncate(t, OSMTYPE_MAX),
            None => continue,
        };
        let (tag, datatype) = match (fields.next(), fields.next()) {
            (Some(tag), Some(datatype)) => (truncate(tag, TAG_MAX), truncate(datatype, DATATYPE_MAX)),
            (tag, _) => {
                let got = 1 + tag.iter().count();
                return Err(OutputError::Style {
                    line,
                    message: format!("expected osmtype, tag, datatype and flags (got {} fields)", got),
                });
            }
        };
        // A fifth token and beyond is ignored, as is anything past the flags.
        let flags_field = fields.next().map(|t| truncate(t, FLAGS_MAX)).unwrap_or("");

        let mut flags = FlagSet::default();
        for name in flags_field.split(',').filter(|s| !s.is_empty()) {
            match StyleFlag::from_str(name) {
                Ok(flag) => flags.insert(flag),
                Err(_) => warn!("Unknown flag '{}' line {}, ignored", name, line),
            }
        }

        if !flags.is_only(StyleFlag::Delete) && (tag.contains('?') || tag.contains('*')) {
            return Err(OutputError::Style {
                line,
                message: format!("wildcard '{}' in non-delete style entry", tag),
            });
        }

        if tag == "way_area" && flags.is_only(StyleFlag::Delete) {
            enable_way_area = false;
        }

        let info = TagInfo {
            name: tag.to_string(),
            column_type: datatype.to_string(),
            flags,
        };

        let mut kept = false;
        if osmtype.contains("node") {
            export.add(OsmKind::Node, info.clone(), line)?;
            kept = true;
        }
        if osmtype.contains("way") {
            export.add(OsmKind::Way, info, line)?;
            kept = true;
        }
        if !kept {
            return Err(OutputError::Style {
                line,
                message: format!("'{}' applies to neither nodes nor ways", osmtype),
            });
        }
        num_read += 1;
    }

    if num_read == 0 {
        return Err(OutputError::Style {
            line: 0,
            message: "unable to parse any valid columns from the style file".to_string(),
        });
    }
    Ok((export, enable_way_area))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_into_both_sequences() {
        let (export, way_area) = parse_style(
            "# a comment\n\
             node,way  name     text  linear\n\
             way       highway  text  linear\n\
             node      place    text  polygon\n",
        )
        .unwrap();
        assert!(way_area);
        let node: Vec<&str> = export.get(OsmKind::Node).iter().map(|i| i.name.as_str()).collect();
        assert_eq!(node, vec!["name", "place"]);
        let way: Vec<&str> = export.get(OsmKind::Way).iter().map(|i| i.name.as_str()).collect();
        assert_eq!(way, vec!["name", "highway"]);
    }

    #[test]
    fn blank_and_comment_only_lines_are_skipped() {
        let (export, _) = parse_style("\n   \n# only a comment\nway highway text linear # trailing\n").unwrap();
        assert_eq!(export.get(OsmKind::Way).len(), 1);
    }

    #[test]
    fn zero_flags_is_valid() {
        let (export, _) = parse_style("way highway text\n").unwrap();
        assert!(export.get(OsmKind::Way)[0].flags.is_empty());
    }

    #[test]
    fn unknown_flags_are_ignored() {
        let (export, _) = parse_style("way highway text linear,bogus\n").unwrap();
        let flags = export.get(OsmKind::Way)[0].flags;
        assert!(flags.contains(StyleFlag::Linear));
    }

    #[test]
    fn too_few_fields_is_fatal() {
        let err = parse_style("way highway\n").unwrap_err();
        assert!(matches!(err, OutputError::Style { line: 1, .. }));
    }

    #[test]
    fn line_applying_to_neither_type_is_fatal() {
        let err = parse_style("relation highway text linear\n").unwrap_err();
        assert!(matches!(err, OutputError::Style { line: 1, .. }));
    }

    #[test]
    fn wildcard_requires_delete_only_flags() {
        assert!(parse_style("way name:* text linear\n").is_err());
        assert!(parse_style("way name:* text delete,polygon\n").is_err());
        let (export, _) = parse_style("way name:* text delete\nway highway text linear\n").unwrap();
        assert_eq!(export.get(OsmKind::Way).len(), 2);
    }

    #[test]
    fn way_area_delete_disables_auto_column() {
        let (_, way_area) = parse_style("way way_area real delete\nway highway text linear\n").unwrap();
        assert!(!way_area);
        // Deleting way_area alongside other flags keeps the auto column.
        let (_, way_area) = parse_style("way way_area real delete,linear\nway highway text linear\n").unwrap();
        assert!(way_area);
    }

    #[test]
    fn empty_style_is_fatal() {
        assert!(parse_style("# nothing here\n").is_err());
    }

    #[test]
    fn duplicate_name_in_sequence_is_fatal() {
        let err = parse_style("way highway text linear\nway highway text polygon\n").unwrap_err();
        assert!(matches!(err, OutputError::Style { line: 2, .. }));
    }

    #[test]
    fn delete_and_phstore_entries_are_not_columns() {
        let (export, _) = parse_style(
            "way building text polygon\n\
             way source text delete\n\
             way addr:* text delete\n\
             way amenity text phstore\n",
        )
        .unwrap();
        let cols: Vec<&str> = export.columns(OsmKind::Way).map(|i| i.name.as_str()).collect();
        assert_eq!(cols, vec!["building"]);
    }
}
