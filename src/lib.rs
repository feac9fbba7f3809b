//! Geometry-materialization output stage for OSM imports into
//! PostgreSQL/PostGIS: a style file decides which tags become typed columns,
//! nodes/ways/relations become rows of four geometry tables fed over the
//! COPY protocol, polygon-candidate ways and touched relations are revisited
//! in a second pass, and the tables are clustered and indexed at the end.
//!
//! The middle layer (random-access primitive storage), the geometry builder
//! and the tag transformer are collaborators behind traits; see
//! [`middle::MiddleQuery`], [`geom::GeomBuilder`] and
//! [`transform::TagTransform`].

pub mod error;
pub mod expire;
pub mod geom;
pub mod middle;
pub mod options;
pub mod osm;
pub mod output;
pub mod style;
pub mod table;
pub mod tracker;
pub mod transform;

pub use error::{OutputError, Result};
pub use options::{HstoreMode, Options, Projection};
pub use output::{PgsqlOutput, RelCursor, Trackers, WayCursor};
