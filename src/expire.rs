use crate::osm::OsmNode;

/// Records the regions whose tiles must be re-rendered after a change. The
/// actual tile bookkeeping lives outside this crate; the output stage only
/// feeds it geometry extents.
pub trait ExpireTiles {
    /// When disabled, stored-geometry probes are skipped and row deletes run
    /// unconditionally.
    fn enabled(&self) -> bool;

    fn from_bbox(&mut self, min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64);

    fn from_nodes_line(&mut self, nodes: &[OsmNode]);

    fn from_nodes_poly(&mut self, nodes: &[OsmNode], id: i64);

    fn from_wkt(&mut self, wkt: &str, id: i64);
}

/// Expiry turned off.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullExpire;

impl ExpireTiles for NullExpire {
    fn enabled(&self) -> bool {
        false
    }

    fn from_bbox(&mut self, _min_lon: f64, _min_lat: f64, _max_lon: f64, _max_lat: f64) {}

    fn from_nodes_line(&mut self, _nodes: &[OsmNode]) {}

    fn from_nodes_poly(&mut self, _nodes: &[OsmNode], _id: i64) {}

    fn from_wkt(&mut self, _wkt: &str, _id: i64) {}
}
