/// Map projection of the destination geometry columns. The output stage only
/// cares about the SRID and whether distances are degrees or metres.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Projection {
    LatLong,
    Mercator,
}

impl Projection {
    pub fn srid(&self) -> i32 {
        match self {
            Projection::LatLong => 4326,
            Projection::Mercator => 3857,
        }
    }

    /// Split long ways after around 1 degree or 100km.
    pub fn split_at(&self) -> f64 {
        match self {
            Projection::LatLong => 1.0,
            Projection::Mercator => 100.0 * 1000.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HstoreMode {
    /// No generic `tags` column.
    None,
    /// `tags` holds only the tags without a column of their own.
    Norm,
    /// `tags` holds every tag.
    All,
}

/// Recognized configuration of the output stage.
#[derive(Clone, Debug)]
pub struct Options {
    pub conninfo: String,
    /// Destination table name prefix.
    pub prefix: String,
    /// Path of the style file.
    pub style: String,
    /// Enables diff support (row-level modify/delete) and persistent trackers.
    pub slim: bool,
    /// Slim variant that discards middle tables post-import; row deletes on
    /// way tables would be full scans and are skipped.
    pub droptemp: bool,
    /// Attach to existing tables; skip DDL and finalization.
    pub append: bool,
    pub projection: Projection,
    /// Multi-geometry output for relations.
    pub enable_multi: bool,
    pub enable_hstore: HstoreMode,
    pub enable_hstore_index: bool,
    /// Additional named hstore columns; each collects the tags sharing its
    /// name as a key prefix.
    pub hstore_columns: Vec<String>,
    /// Run one finalizer worker per table instead of finishing serially.
    pub parallel_indexing: bool,
    pub tblsmain_data: Option<String>,
    pub tblsmain_index: Option<String>,
    /// Passed to the geometry builder to reject broken rings.
    pub excludepoly: bool,
    /// Fixed-point coordinate scale of the middle layer; carried for
    /// compatibility, unused by the output stage itself.
    pub scale: i32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            conninfo: String::new(),
            prefix: "planet_osm".to_string(),
            style: "default.style".to_string(),
            slim: false,
            droptemp: false,
            append: false,
            projection: Projection::Mercator,
            enable_multi: false,
            enable_hstore: HstoreMode::None,
            enable_hstore_index: false,
            hstore_columns: Vec::new(),
            parallel_indexing: true,
            tblsmain_data: None,
            tblsmain_index: None,
            excludepoly: false,
            scale: 100,
        }
    }
}
