use std::io::Write;

use log::{debug, info};
use postgres::{Client, NoTls};

use crate::error::{OutputError, Result};
use crate::expire::ExpireTiles;
use crate::options::{HstoreMode, Options};
use crate::osm::Tags;
use crate::style::{ExportList, OsmKind, StyleFlag};

/// The four destination tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableKind {
    Point,
    Line,
    Poly,
    Roads,
}

pub const TABLE_KINDS: [TableKind; 4] = [
    TableKind::Point,
    TableKind::Line,
    TableKind::Poly,
    TableKind::Roads,
];

impl TableKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            TableKind::Point => "_point",
            TableKind::Line => "_line",
            TableKind::Poly => "_polygon",
            TableKind::Roads => "_roads",
        }
    }

    /// Polygon output mixes POLYGON and MULTIPOLYGON, so its column is typed
    /// as the generic GEOMETRY.
    pub fn geometry_type(&self) -> &'static str {
        match self {
            TableKind::Point => "POINT",
            TableKind::Line | TableKind::Roads => "LINESTRING",
            TableKind::Poly => "GEOMETRY",
        }
    }

    /// Which export-list sequence feeds this table's columns.
    pub fn osm_kind(&self) -> OsmKind {
        match self {
            TableKind::Point => OsmKind::Node,
            _ => OsmKind::Way,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Column {
    pub name: String,
    pub sql_type: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CopyState {
    Idle,
    Copying,
}

/// The row sink of one destination table. The production implementation
/// streams COPY data over its own connection; tests record rows in memory.
pub trait OutputTable: Send {
    fn name(&self) -> &str;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn write_row(&mut self, id: i64, tags: &Tags, wkt: &str) -> Result<()>;

    /// Leave the connection idle so row-level statements can run. The next
    /// `write_row` re-opens the COPY stream.
    fn pause_copy(&mut self) -> Result<()>;

    /// Only legal while paused.
    fn delete_row(&mut self, id: i64) -> Result<()>;

    /// Replay the stored geometries of `id` into the expire layer and report
    /// whether any row exists. A disabled expire layer skips the probe and
    /// reports presence so deletes are never suppressed.
    fn expire_row(&mut self, expire: &mut dyn ExpireTiles, id: i64) -> Result<bool>;

    /// Post-ingest finalization: cluster by geometry and build indexes, then
    /// release the connection. Append mode only releases the connection.
    fn finish(self, options: &Options) -> Result<()>
    where
        Self: Sized;
}

/// Flush the COPY buffer once it grows past this.
const COPY_FLUSH_BYTES: usize = 256 * 1024;

pub struct Table {
    name: String,
    kind: TableKind,
    srid: i32,
    columns: Vec<Column>,
    hstore_columns: Vec<String>,
    hstore_mode: HstoreMode,
    conn: Client,
    copy_stmt: String,
    buf: String,
    state: CopyState,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("srid", &self.srid)
            .field("columns", &self.columns)
            .field("hstore_columns", &self.hstore_columns)
            .field("hstore_mode", &self.hstore_mode)
            .field("copy_stmt", &self.copy_stmt)
            .field("buf", &self.buf)
            .field("state", &self.state)
            .finish()
    }
}

impl Table {
    /// Connect and, outside append mode, create the destination table.
    pub fn setup(kind: TableKind, options: &Options, export: &ExportList) -> Result<Self> {
        // phstore entries only materialize through the generic tags hstore;
        // without it their tags would silently vanish from every row.
        if options.enable_hstore == HstoreMode::None {
            if let Some(entry) = export
                .get(kind.osm_kind())
                .iter()
                .find(|entry| entry.flags.contains(StyleFlag::Phstore))
            {
                return Err(OutputError::Config(format!(
                    "style entry '{}' is phstore-flagged but hstore is disabled",
                    entry.name
                )));
            }
        }
        let columns = export
            .columns(kind.osm_kind())
            .map(|info| Column {
                name: info.name.clone(),
                sql_type: info.column_type.clone(),
            })
            .collect();
        let name = format!("{}{}", options.prefix, kind.suffix());
        let copy_stmt = format!("COPY {} FROM STDIN", name);
        let mut table = Self {
            name,
            kind,
            srid: options.projection.srid(),
            columns,
            hstore_columns: options.hstore_columns.clone(),
            hstore_mode: options.enable_hstore,
            conn: Client::connect(&options.conninfo, NoTls)?,
            copy_stmt,
            buf: String::new(),
            state: CopyState::Idle,
        };
        if !options.append {
            table.conn.batch_execute(&table.create_sql(options))?;
        }
        Ok(table)
    }

    fn create_sql(&self, options: &Options) -> String {
        let mut cols = String::from("osm_id int8");
        for column in &self.columns {
            cols.push_str(&format!(",\"{}\" {}", column.name, column.sql_type));
        }
        for hstore in &self.hstore_columns {
            cols.push_str(&format!(",\"{}\" hstore", hstore));
        }
        cols.push_str(&format!(",way geometry({},{})", self.kind.geometry_type(), self.srid));
        if self.hstore_mode != HstoreMode::None {
            cols.push_str(",tags hstore");
        }

        let tablespace = match &options.tblsmain_data {
            Some(ts) => format!(" TABLESPACE {}", ts),
            None => String::new(),
        };
        format!(
            "SET client_min_messages = warning;\n\
             DROP TABLE IF EXISTS {name};\n\
             CREATE TABLE {name} ({cols}){tablespace}",
            name = self.name,
            cols = cols,
            tablespace = tablespace
        )
    }

    fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            let mut writer = self.conn.copy_in(self.copy_stmt.as_str())?;
            writer.write_all(self.buf.as_bytes()).map_err(|err| OutputError::Protocol {
                table: self.name.clone(),
                message: err.to_string(),
            })?;
            writer.finish()?;
            self.buf.clear();
        }
        Ok(())
    }
}

impl OutputTable for Table {
    fn name(&self) -> &str {
        &self.name
    }

    fn begin(&mut self) -> Result<()> {
        self.pause_copy()?;
        self.conn.batch_execute("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.pause_copy()?;
        self.conn.batch_execute("COMMIT")?;
        Ok(())
    }

    fn write_row(&mut self, id: i64, tags: &Tags, wkt: &str) -> Result<()> {
        if self.state == CopyState::Idle {
            debug!("{}: opening copy", self.name);
            self.state = CopyState::Copying;
        }
        append_row(
            &mut self.buf,
            id,
            tags,
            wkt,
            &self.columns,
            &self.hstore_columns,
            self.hstore_mode,
            self.srid,
        );
        if self.buf.len() >= COPY_FLUSH_BYTES {
            self.flush()?;
        }
        Ok(())
    }

    fn pause_copy(&mut self) -> Result<()> {
        if self.state == CopyState::Copying {
            debug!("{}: pausing copy", self.name);
            self.flush()?;
            self.state = CopyState::Idle;
        }
        Ok(())
    }

    fn delete_row(&mut self, id: i64) -> Result<()> {
        if self.state != CopyState::Idle {
            return Err(OutputError::Protocol {
                table: self.name.clone(),
                message: "delete while copy in progress".to_string(),
            });
        }
        let sql = format!("DELETE FROM {} WHERE osm_id = $1", self.name);
        self.conn.execute(sql.as_str(), &[&id])?;
        Ok(())
    }

    fn expire_row(&mut self, expire: &mut dyn ExpireTiles, id: i64) -> Result<bool> {
        if !expire.enabled() {
            return Ok(true);
        }
        let sql = format!("SELECT ST_AsText(way) FROM {} WHERE osm_id = $1", self.name);
        let rows = self.conn.query(sql.as_str(), &[&id])?;
        for row in &rows {
            let wkt: String = row.get(0);
            expire.from_wkt(&wkt, id);
        }
        Ok(!rows.is_empty())
    }

    fn finish(mut self, options: &Options) -> Result<()> {
        self.pause_copy()?;
        if !options.append {
            let name = &self.name;
            info!("Sorting data and creating indexes for {}", name);
            self.conn.batch_execute(&format!("ANALYZE {}", name))?;

            let data_ts = match &options.tblsmain_data {
                Some(ts) => format!(" TABLESPACE {}", ts),
                None => String::new(),
            };
            self.conn.batch_execute(&format!(
                "CREATE TABLE {name}_tmp{ts} AS SELECT * FROM {name} ORDER BY way",
                name = name,
                ts = data_ts
            ))?;
            self.conn.batch_execute(&format!("DROP TABLE {}", name))?;
            self.conn
                .batch_execute(&format!("ALTER TABLE {name}_tmp RENAME TO {name}", name = name))?;
            info!("Copying {} to cluster by geometry finished", name);

            let index_ts = match &options.tblsmain_index {
                Some(ts) => format!(" TABLESPACE {}", ts),
                None => String::new(),
            };
            // Fillfactor 100 for imports that will never be updated in place.
            let fillfactor = if options.slim && !options.droptemp {
                ""
            } else {
                " WITH (FILLFACTOR=100)"
            };
            info!("Creating geometry index on {}", name);
            self.conn.batch_execute(&format!(
                "CREATE INDEX {name}_index ON {name} USING GIST (way){ff}{ts}",
                name = name,
                ff = fillfactor,
                ts = index_ts
            ))?;

            if options.slim && !options.droptemp {
                info!("Creating osm_id index on {}", name);
                self.conn.batch_execute(&format!(
                    "CREATE INDEX {name}_pkey ON {name} USING BTREE (osm_id){ts}",
                    name = name,
                    ts = index_ts
                ))?;
            }

            if options.enable_hstore_index {
                info!("Creating hstore indexes on {}", name);
                if options.enable_hstore != HstoreMode::None {
                    self.conn.batch_execute(&format!(
                        "CREATE INDEX {name}_tags_index ON {name} USING GIN (tags){ts}",
                        name = name,
                        ts = index_ts
                    ))?;
                }
                for (i, hstore) in self.hstore_columns.iter().enumerate() {
                    self.conn.batch_execute(&format!(
                        "CREATE INDEX {name}_hstore_{i}_index ON {name} USING GIN (\"{col}\"){ts}",
                        name = name,
                        i = i,
                        col = hstore,
                        ts = index_ts
                    ))?;
                }
            }

            self.conn
                .batch_execute(&format!("GRANT SELECT ON {} TO PUBLIC", name))?;
            self.conn.batch_execute(&format!("ANALYZE {}", name))?;
            info!("All indexes on {} created", name);
        }
        Ok(())
    }
}

/// Append one COPY text row: osm_id, the typed columns, the named hstore
/// columns, the geometry as `SRID=<srid>;<WKT>`, then the generic tags
/// hstore.
#[allow(clippy::too_many_arguments)]
pub fn append_row(
    buf: &mut String,
    id: i64,
    tags: &Tags,
    wkt: &str,
    columns: &[Column],
    hstore_columns: &[String],
    hstore_mode: HstoreMode,
    srid: i32,
) {
    buf.push_str(&id.to_string());

    for column in columns {
        buf.push('\t');
        match tags.get(&column.name) {
            Some(value) => copy_escape_into(buf, value),
            None => buf.push_str("\\N"),
        }
    }

    for hstore in hstore_columns {
        buf.push('\t');
        let pairs = tags
            .iter()
            .filter(|(k, _)| k.starts_with(hstore.as_str()))
            .map(|(k, v)| (&k[hstore.len()..], v));
        append_hstore_into(buf, pairs);
    }

    buf.push_str(&format!("\tSRID={};{}", srid, wkt));

    match hstore_mode {
        HstoreMode::None => {}
        HstoreMode::Norm => {
            buf.push('\t');
            let pairs = tags
                .iter()
                .filter(|(k, _)| !columns.iter().any(|c| c.name == *k));
            append_hstore_into(buf, pairs);
        }
        HstoreMode::All => {
            buf.push('\t');
            append_hstore_into(buf, tags.iter());
        }
    }

    buf.push('\n');
}

/// COPY text escaping.
fn copy_escape_into(buf: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => buf.push_str("\\\\"),
            '\t' => buf.push_str("\\t"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            _ => buf.push(c),
        }
    }
}

/// Escaping for a string inside a quoted hstore element which is itself
/// inside a COPY text field, so both layers are applied at once.
fn hstore_escape_into(buf: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '"' => buf.push_str("\\\\\""),
            '\\' => buf.push_str("\\\\\\\\"),
            '\t' => buf.push_str("\\t"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            _ => buf.push(c),
        }
    }
}

fn append_hstore_into<'a, I: Iterator<Item = (&'a str, &'a str)>>(buf: &mut String, pairs: I) {
    let start = buf.len();
    let mut any = false;
    for (key, value) in pairs {
        if any {
            buf.push(',');
        }
        any = true;
        buf.push('"');
        hstore_escape_into(buf, key);
        buf.push_str("\"=>\"");
        hstore_escape_into(buf, value);
        buf.push('"');
    }
    if !any {
        buf.truncate(start);
        buf.push_str("\\N");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::parse_style;

    fn columns() -> Vec<Column> {
        vec![
            Column { name: "name".to_string(), sql_type: "text".to_string() },
            Column { name: "highway".to_string(), sql_type: "text".to_string() },
        ]
    }

    fn row(tags: &Tags, hstore_columns: &[String], mode: HstoreMode) -> String {
        let mut buf = String::new();
        append_row(&mut buf, 7, tags, "LINESTRING(0 0,1 0)", &columns(), hstore_columns, mode, 4326);
        buf
    }

    #[test]
    fn row_has_nulls_and_ewkt_geometry() {
        let tags: Tags = [("highway", "residential")].into_iter().collect();
        assert_eq!(
            row(&tags, &[], HstoreMode::None),
            "7\t\\N\tresidential\tSRID=4326;LINESTRING(0 0,1 0)\n"
        );
    }

    #[test]
    fn values_are_copy_escaped() {
        let tags: Tags = [("name", "a\tb\\c\nd")].into_iter().collect();
        let line = row(&tags, &[], HstoreMode::None);
        assert!(line.starts_with("7\ta\\tb\\\\c\\nd\t"));
    }

    #[test]
    fn norm_hstore_excludes_column_tags_and_follows_the_geometry() {
        let tags: Tags = [("highway", "residential"), ("surface", "asphalt")].into_iter().collect();
        let line = row(&tags, &[], HstoreMode::Norm);
        assert_eq!(
            line,
            "7\t\\N\tresidential\tSRID=4326;LINESTRING(0 0,1 0)\t\"surface\"=>\"asphalt\"\n"
        );
    }

    #[test]
    fn all_hstore_keeps_column_tags() {
        let tags: Tags = [("highway", "residential")].into_iter().collect();
        let line = row(&tags, &[], HstoreMode::All);
        assert!(line.ends_with("\t\"highway\"=>\"residential\"\n"));
    }

    #[test]
    fn empty_hstore_is_null() {
        let tags: Tags = [("highway", "residential")].into_iter().collect();
        assert_eq!(
            row(&tags, &[], HstoreMode::Norm),
            "7\t\\N\tresidential\tSRID=4326;LINESTRING(0 0,1 0)\t\\N\n"
        );
    }

    #[test]
    fn phstore_tags_reach_the_generic_hstore() {
        // A phstore entry has no typed column; its tag must survive through
        // the tags hstore.
        let tags: Tags = [("landuse", "forest"), ("highway", "x")].into_iter().collect();
        let line = row(&tags, &[], HstoreMode::Norm);
        assert!(line.ends_with("\t\"landuse\"=>\"forest\"\n"));
    }

    #[test]
    fn phstore_entry_without_hstore_is_rejected() {
        let (export, _) = parse_style("way landuse text phstore\nway highway text linear\n").unwrap();
        let err = Table::setup(TableKind::Line, &Options::default(), &export).unwrap_err();
        assert!(matches!(err, OutputError::Config(_)));
    }

    #[test]
    fn named_hstore_collects_by_prefix_and_strips_it() {
        let tags: Tags = [("name:en", "Copenhagen"), ("name:da", "K\u{f8}benhavn"), ("highway", "x")]
            .into_iter()
            .collect();
        let line = row(&tags, &["name:".to_string()], HstoreMode::None);
        assert!(line.contains("\"en\"=>\"Copenhagen\",\"da\"=>\"K\u{f8}benhavn\""));
    }

    #[test]
    fn hstore_values_escape_quotes_and_backslashes() {
        let tags: Tags = [("surface", "a\"b\\c")].into_iter().collect();
        let line = row(&tags, &[], HstoreMode::Norm);
        assert!(line.contains("\"surface\"=>\"a\\\\\"b\\\\\\\\c\""));
    }
}
