use std::io;

use thiserror::Error;

/// Errors surfaced by the output stage. All of them are fatal to the import
/// except where the caller explicitly chooses to continue; data-level
/// rejections (unexportable tags, unknown relation types) are not errors and
/// simply drop the object.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("style error at line {line}: {message}")]
    Style { line: usize, message: String },

    #[error("couldn't open style file '{path}': {source}")]
    StyleFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Db(#[from] postgres::Error),

    #[error("cannot apply diffs unless in slim mode")]
    NotSlim,

    #[error("copy protocol violation on {table}: {message}")]
    Protocol { table: String, message: String },

    #[error("table worker failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, OutputError>;
