use crate::osm::OsmNode;

/// One geometry produced by the builder. The area is only meaningful for
/// polygon outputs.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltGeom {
    pub wkt: String,
    pub area: f64,
}

/// The geometry builder turning node lists into well-known-text strings.
/// Implementations live outside this crate; tests supply their own.
pub trait GeomBuilder {
    /// Reject broken polygon rings instead of repairing them.
    fn set_exclude_broken(&mut self, exclude: bool);

    /// Build the geometry of a single way, splitting linear output into
    /// segments no longer than `split_at`.
    fn wkt_split(&mut self, nodes: &[OsmNode], polygon: bool, split_at: f64) -> Vec<BuiltGeom>;

    /// Assemble relation geometry from the member ways' node lists.
    fn build(
        &mut self,
        id: i64,
        ways: &[&[OsmNode]],
        make_polygon: bool,
        enable_multi: bool,
        split_at: f64,
    ) -> Vec<BuiltGeom>;
}
