use std::thread;

use crate::error::{OutputError, Result};
use crate::expire::ExpireTiles;
use crate::geom::GeomBuilder;
use crate::middle::MiddleQuery;
use crate::options::Options;
use crate::osm::{Member, MemberType, MemberWay, OsmNode, RelFlavor, Tags};
use crate::style::{read_style_file, ExportList};
use crate::table::{OutputTable, Table, TableKind};
use crate::tracker::{IdTracker, PgIdTracker, RamIdTracker};
use crate::transform::TagTransform;

/// The three deferred-work queues driving pass two.
pub struct Trackers {
    pub ways_pending: Box<dyn IdTracker>,
    pub ways_done: Box<dyn IdTracker>,
    pub rels_pending: Box<dyn IdTracker>,
}

impl Trackers {
    pub fn in_memory() -> Self {
        Self {
            ways_pending: Box::new(RamIdTracker::new()),
            ways_done: Box::new(RamIdTracker::new()),
            rels_pending: Box::new(RamIdTracker::new()),
        }
    }

    pub fn in_database(conninfo: &str, prefix: &str) -> Result<Self> {
        Ok(Self {
            ways_pending: Box::new(PgIdTracker::new(conninfo, prefix, "ways_pending")?),
            ways_done: Box::new(PgIdTracker::new(conninfo, prefix, "ways_done")?),
            rels_pending: Box::new(PgIdTracker::new(conninfo, prefix, "rels_pending")?),
        })
    }
}

/// The geometry-materialization output stage: turns nodes, ways and
/// relations into rows of the point/line/polygon/roads tables, defers
/// polygon-candidate ways and touched relations for pass two, and finalizes
/// the tables at the end of the import.
pub struct PgsqlOutput<'m, T: OutputTable> {
    options: Options,
    export: ExportList,
    enable_way_area: bool,
    tables: [T; 4],
    trackers: Trackers,
    expire: Box<dyn ExpireTiles>,
    transform: Box<dyn TagTransform>,
    builder: Box<dyn GeomBuilder>,
    middle: &'m dyn MiddleQuery,
}

impl<'m> PgsqlOutput<'m, Table> {
    /// Read the style file, create the destination tables and the tracker
    /// tables, and wire up the collaborators.
    pub fn start(
        options: Options,
        middle: &'m dyn MiddleQuery,
        transform: Box<dyn TagTransform>,
        mut builder: Box<dyn GeomBuilder>,
        expire: Box<dyn ExpireTiles>,
    ) -> Result<Self> {
        builder.set_exclude_broken(options.excludepoly);
        let (export, enable_way_area) = read_style_file(&options.style)?;
        let tables = [
            Table::setup(TableKind::Point, &options, &export)?,
            Table::setup(TableKind::Line, &options, &export)?,
            Table::setup(TableKind::Poly, &options, &export)?,
            Table::setup(TableKind::Roads, &options, &export)?,
        ];
        let trackers = Trackers::in_database(&options.conninfo, &options.prefix)?;
        Ok(Self::new(
            options,
            export,
            enable_way_area,
            tables,
            trackers,
            expire,
            transform,
            middle,
            builder,
        ))
    }
}

impl<'m, T: OutputTable> PgsqlOutput<'m, T> {
    /// Assemble an output stage from already-constructed parts. `tables` is
    /// indexed point, line, polygon, roads.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        options: Options,
        export: ExportList,
        enable_way_area: bool,
        tables: [T; 4],
        trackers: Trackers,
        expire: Box<dyn ExpireTiles>,
        transform: Box<dyn TagTransform>,
        middle: &'m dyn MiddleQuery,
        builder: Box<dyn GeomBuilder>,
    ) -> Self {
        Self {
            options,
            export,
            enable_way_area,
            tables,
            trackers,
            expire,
            transform,
            builder,
            middle,
        }
    }

    pub fn node_add(&mut self, id: i64, lat: f64, lon: f64, tags: &mut Tags) -> Result<()> {
        self.out_node(id, tags, lat, lon)
    }

    /// A way whose tags make it a polygon candidate may end up absorbed by a
    /// multipolygon relation, so its emission is deferred to pass two; all
    /// other exportable ways are emitted immediately.
    pub fn way_add(&mut self, id: i64, node_ids: &[i64], tags: &mut Tags) -> Result<()> {
        match self.transform.filter_way_tags(tags, &self.export) {
            Some(class) if class.polygon => self.trackers.ways_pending.mark(id),
            Some(_) => {
                let nodes = self.middle.nodes_get_list(node_ids);
                self.out_way(id, tags, &nodes, false)
            }
            None => Ok(()),
        }
    }

    /// Relations without a supported `type` tag are ignored.
    pub fn relation_add(&mut self, id: i64, members: &[Member], tags: &mut Tags) -> Result<()> {
        match tags.get("type").and_then(RelFlavor::parse) {
            Some(_) => self.process_relation(id, members, tags, false),
            None => Ok(()),
        }
    }

    pub fn node_modify(&mut self, id: i64, lat: f64, lon: f64, tags: &mut Tags) -> Result<()> {
        if !self.options.slim {
            return Err(OutputError::NotSlim);
        }
        self.node_delete(id)?;
        self.node_add(id, lat, lon, tags)
    }

    pub fn way_modify(&mut self, id: i64, node_ids: &[i64], tags: &mut Tags) -> Result<()> {
        if !self.options.slim {
            return Err(OutputError::NotSlim);
        }
        self.way_delete(id)?;
        self.way_add(id, node_ids, tags)
    }

    pub fn relation_modify(&mut self, id: i64, members: &[Member], tags: &mut Tags) -> Result<()> {
        if !self.options.slim {
            return Err(OutputError::NotSlim);
        }
        self.relation_delete(id)?;
        self.relation_add(id, members, tags)
    }

    pub fn node_delete(&mut self, id: i64) -> Result<()> {
        if !self.options.slim {
            return Err(OutputError::NotSlim);
        }
        let point = &mut self.tables[TableKind::Point as usize];
        point.pause_copy()?;
        if point.expire_row(self.expire.as_mut(), id)? {
            point.delete_row(id)?;
        }
        Ok(())
    }

    pub fn way_delete(&mut self, id: i64) -> Result<()> {
        if !self.options.slim {
            return Err(OutputError::NotSlim);
        }
        self.delete_way_rows(id)
    }

    pub fn relation_delete(&mut self, id: i64) -> Result<()> {
        if !self.options.slim {
            return Err(OutputError::NotSlim);
        }
        self.delete_relation_rows(id)
    }

    /// Commit the outer transactions on all tables and the trackers.
    pub fn commit(&mut self) -> Result<()> {
        for table in &mut self.tables {
            table.commit()?;
        }
        self.trackers.ways_pending.commit()?;
        self.trackers.ways_done.commit()?;
        self.trackers.rels_pending.commit()
    }

    /// Start pass two over ways. Output tables are only written during this
    /// stage, so each runs in its own transaction; the middle layer has to
    /// stay outside one to not deadlock the finalizer later.
    pub fn way_callback(&mut self) -> Result<WayCursor<'_, 'm, T>> {
        for table in &mut self.tables {
            table.begin()?;
        }
        let next = self.trackers.ways_pending.pop_mark()?;
        Ok(WayCursor { output: self, next })
    }

    /// Start pass two over relations.
    pub fn relation_callback(&mut self) -> Result<RelCursor<'_, 'm, T>> {
        let next = self.trackers.rels_pending.pop_mark()?;
        Ok(RelCursor { output: self, next })
    }

    /// Finalize all four tables, one worker per table when parallel indexing
    /// is enabled. Consumes the output stage; the trackers are torn down once
    /// the workers are done.
    pub fn stop(self) -> Result<()> {
        let PgsqlOutput {
            options,
            tables,
            trackers,
            ..
        } = self;
        if options.parallel_indexing {
            thread::scope(|scope| -> Result<()> {
                let mut workers = Vec::new();
                for table in tables {
                    let opts = &options;
                    workers.push(scope.spawn(move || table.finish(opts)));
                }
                for worker in workers {
                    match worker.join() {
                        Ok(result) => result?,
                        Err(_) => {
                            return Err(OutputError::Worker("finalizer thread panicked".to_string()))
                        }
                    }
                }
                Ok(())
            })?;
        } else {
            for table in tables {
                table.finish(&options)?;
            }
        }
        drop(trackers);
        Ok(())
    }

    fn out_node(&mut self, id: i64, tags: &mut Tags, lat: f64, lon: f64) -> Result<()> {
        if self.transform.filter_node_tags(tags, &self.export) {
            return Ok(());
        }
        self.expire.from_bbox(lon, lat, lon, lat);
        let wkt = format!("POINT({} {})", lon, lat);
        self.tables[TableKind::Point as usize].write_row(id, tags, &wkt)
    }

    fn out_way(&mut self, id: i64, tags: &mut Tags, nodes: &[OsmNode], exists: bool) -> Result<()> {
        // A re-added way replaces its old rows, and every relation using it
        // has to be rebuilt in pass two.
        if exists {
            self.delete_way_rows(id)?;
            for rel in self.middle.relations_using_way(id) {
                self.trackers.rels_pending.mark(rel)?;
            }
        }
        let class = match self.transform.filter_way_tags(tags, &self.export) {
            Some(class) => class,
            None => return Ok(()),
        };
        let split_at = self.options.projection.split_at();
        let parts = self.builder.wkt_split(nodes, class.polygon, split_at);
        for part in &parts {
            if part.wkt.is_empty() {
                continue;
            }
            if is_polygon_wkt(&part.wkt) {
                self.expire.from_nodes_poly(nodes, id);
                if part.area > 0.0 && self.enable_way_area {
                    tags.set("way_area", &format_area(part.area));
                }
                self.tables[TableKind::Poly as usize].write_row(id, tags, &part.wkt)?;
            } else {
                self.expire.from_nodes_line(nodes);
                self.tables[TableKind::Line as usize].write_row(id, tags, &part.wkt)?;
                if class.roads {
                    self.tables[TableKind::Roads as usize].write_row(id, tags, &part.wkt)?;
                }
            }
        }
        Ok(())
    }

    fn process_relation(
        &mut self,
        id: i64,
        members: &[Member],
        tags: &mut Tags,
        exists: bool,
    ) -> Result<()> {
        if exists {
            self.delete_relation_rows(id)?;
        }
        if self.transform.filter_rel_tags(tags, &self.export) {
            return Ok(());
        }
        let way_ids: Vec<i64> = members
            .iter()
            .filter(|m| m.kind == MemberType::Way)
            .map(|m| m.id)
            .collect();
        let mut ways = self.middle.ways_get_list(&way_ids);
        // Recover each way's role from the member list. The search starts at
        // the way's ordinal position and matches by ID alone; a failed match
        // leaves the role empty.
        for (i, way) in ways.iter_mut().enumerate() {
            way.role = members
                .get(i..)
                .and_then(|rest| rest.iter().find(|m| m.id == way.id))
                .map(|m| m.role.clone())
                .unwrap_or_default();
        }
        self.out_relation(id, tags, &ways)
    }

    fn out_relation(&mut self, id: i64, rel_tags: &mut Tags, ways: &[MemberWay]) -> Result<()> {
        if ways.is_empty() {
            return Ok(());
        }
        let outcome = match self.transform.filter_rel_member_tags(rel_tags, ways, &self.export) {
            Some(outcome) => outcome,
            None => return Ok(()),
        };
        let split_at = self.options.projection.split_at();
        let node_lists: Vec<&[OsmNode]> = ways.iter().map(|w| w.nodes.as_slice()).collect();
        let parts = self.builder.build(
            id,
            &node_lists,
            outcome.make_polygon,
            self.options.enable_multi,
            split_at,
        );
        if parts.is_empty() {
            return Ok(());
        }
        for part in &parts {
            if part.wkt.is_empty() {
                continue;
            }
            self.expire.from_wkt(&part.wkt, -id);
            if is_polygon_wkt(&part.wkt) {
                if part.area > 0.0 && self.enable_way_area {
                    rel_tags.set("way_area", &format_area(part.area));
                }
                self.tables[TableKind::Poly as usize].write_row(-id, rel_tags, &part.wkt)?;
            } else {
                self.tables[TableKind::Line as usize].write_row(-id, rel_tags, &part.wkt)?;
                if outcome.roads {
                    self.tables[TableKind::Roads as usize].write_row(-id, rel_tags, &part.wkt)?;
                }
            }
        }

        // Member ways fully represented by the polygonized relation must not
        // survive as linear rows: mark them done and drop their rows.
        if outcome.make_polygon {
            for (way, &superseded) in ways.iter().zip(&outcome.superseded) {
                if superseded {
                    self.trackers.ways_done.mark(way.id)?;
                    self.delete_way_rows(way.id)?;
                }
            }
        }

        // A boundary also emits any complete rings as polygons; its linear
        // parts were already written above.
        if outcome.make_boundary {
            let parts = self.builder.build(id, &node_lists, true, self.options.enable_multi, split_at);
            for part in &parts {
                if part.wkt.is_empty() {
                    continue;
                }
                self.expire.from_wkt(&part.wkt, -id);
                if is_polygon_wkt(&part.wkt) {
                    if part.area > 0.0 && self.enable_way_area {
                        rel_tags.set("way_area", &format_area(part.area));
                    }
                    self.tables[TableKind::Poly as usize].write_row(-id, rel_tags, &part.wkt)?;
                }
            }
        }
        Ok(())
    }

    fn delete_way_rows(&mut self, id: i64) -> Result<()> {
        if !self.options.slim {
            return Ok(());
        }
        // Without middle indexes a row delete would be a full scan.
        if self.options.droptemp {
            return Ok(());
        }
        for kind in [TableKind::Roads, TableKind::Line, TableKind::Poly] {
            self.tables[kind as usize].pause_copy()?;
        }
        self.tables[TableKind::Roads as usize].delete_row(id)?;
        for kind in [TableKind::Line, TableKind::Poly] {
            if self.tables[kind as usize].expire_row(self.expire.as_mut(), id)? {
                self.tables[kind as usize].delete_row(id)?;
            }
        }
        Ok(())
    }

    /// Relation rows are keyed by the negated ID.
    fn delete_relation_rows(&mut self, id: i64) -> Result<()> {
        for kind in [TableKind::Roads, TableKind::Line, TableKind::Poly] {
            self.tables[kind as usize].pause_copy()?;
        }
        self.tables[TableKind::Roads as usize].delete_row(-id)?;
        for kind in [TableKind::Line, TableKind::Poly] {
            if self.tables[kind as usize].expire_row(self.expire.as_mut(), -id)? {
                self.tables[kind as usize].delete_row(-id)?;
            }
        }
        Ok(())
    }
}

/// Pass-two cursor over ways: merges the pending tracker (ascending) with
/// the importer's own ascending ID stream, emitting every deferred way
/// exactly once unless a relation superseded it.
pub struct WayCursor<'a, 'm, T: OutputTable> {
    output: &'a mut PgsqlOutput<'m, T>,
    next: i64,
}

impl<'a, 'm, T: OutputTable> WayCursor<'a, 'm, T> {
    pub fn process(
        &mut self,
        id: i64,
        tags: &mut Tags,
        nodes: &[OsmNode],
        exists: bool,
    ) -> Result<()> {
        if self.next < id {
            self.run_pending_until(id, exists)?;
        }
        if self.next == id {
            self.next = self.output.trackers.ways_pending.pop_mark()?;
        }
        if self.output.trackers.ways_done.is_marked(id)? {
            return Ok(());
        }
        self.output.out_way(id, tags, nodes, exists)
    }

    pub fn finish(mut self, exists: bool) -> Result<()> {
        self.run_pending_until(i64::MAX, exists)
    }

    fn run_pending_until(&mut self, limit: i64, exists: bool) -> Result<()> {
        while self.next < limit {
            if let Some((mut tags, nodes)) = self.output.middle.ways_get(self.next) {
                if !self.output.trackers.ways_done.is_marked(self.next)? {
                    self.output.out_way(self.next, &mut tags, &nodes, exists)?;
                }
            }
            self.next = self.output.trackers.ways_pending.pop_mark()?;
        }
        Ok(())
    }
}

/// Pass-two cursor over relations. There is no done-tracker for relations;
/// every arriving ID is processed.
pub struct RelCursor<'a, 'm, T: OutputTable> {
    output: &'a mut PgsqlOutput<'m, T>,
    next: i64,
}

impl<'a, 'm, T: OutputTable> RelCursor<'a, 'm, T> {
    pub fn process(
        &mut self,
        id: i64,
        members: &[Member],
        tags: &mut Tags,
        exists: bool,
    ) -> Result<()> {
        if self.next < id {
            self.run_pending_until(id, exists)?;
        }
        if self.next == id {
            self.next = self.output.trackers.rels_pending.pop_mark()?;
        }
        self.output.process_relation(id, members, tags, exists)
    }

    pub fn finish(mut self, exists: bool) -> Result<()> {
        self.run_pending_until(i64::MAX, exists)
    }

    fn run_pending_until(&mut self, limit: i64, exists: bool) -> Result<()> {
        while self.next < limit {
            if let Some((members, mut tags)) = self.output.middle.relations_get(self.next) {
                self.output.process_relation(self.next, &members, &mut tags, exists)?;
            }
            self.next = self.output.trackers.rels_pending.pop_mark()?;
        }
        Ok(())
    }
}

fn is_polygon_wkt(wkt: &str) -> bool {
    wkt.starts_with("POLYGON") || wkt.starts_with("MULTIPOLYGON")
}

/// printf-style `%g` rendering of an area: 6 significant digits, scientific
/// notation outside `1e-4 <= |v| < 1e6`, no trailing zeros.
fn format_area(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let exp = value.abs().log10().floor() as i32;
    if exp < -4 || exp >= 6 {
        let mantissa = value / 10f64.powi(exp);
        let mut digits = format!("{:.5}", mantissa);
        trim_fraction(&mut digits);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", digits, sign, exp.abs())
    } else {
        let decimals = (5 - exp).max(0) as usize;
        let mut digits = format!("{:.*}", decimals, value);
        if digits.contains('.') {
            trim_fraction(&mut digits);
        }
        digits
    }
}

fn trim_fraction(digits: &mut String) {
    while digits.ends_with('0') {
        digits.pop();
    }
    if digits.ends_with('.') {
        digits.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_wkt_detection_is_prefix_based() {
        assert!(is_polygon_wkt("POLYGON((0 0,0 1,1 1,0 0))"));
        assert!(is_polygon_wkt("MULTIPOLYGON(((0 0,0 1,1 1,0 0)))"));
        assert!(!is_polygon_wkt("LINESTRING(0 0,1 1)"));
        assert!(!is_polygon_wkt("POINT(0 0)"));
    }

    #[test]
    fn area_formatting_matches_printf_g() {
        assert_eq!(format_area(0.0), "0");
        assert_eq!(format_area(1.0), "1");
        assert_eq!(format_area(0.5), "0.5");
        assert_eq!(format_area(1234.5), "1234.5");
        assert_eq!(format_area(123456.7), "123457");
        assert_eq!(format_area(1234567.0), "1.23457e+06");
        assert_eq!(format_area(0.00001), "1e-05");
    }
}
