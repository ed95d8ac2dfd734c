// Single-file index persistence.
//
// Layout: magic "RPF1" | format version (u32 LE) | bincode payload.

use atomicwrites::{AtomicFile, OverwriteBehavior};
use rpforest_core::Forest;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub const MAGIC: &[u8; 4] = b"RPF1";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not an index file (bad magic bytes)")]
    BadMagic,

    #[error("unsupported index format version {0}")]
    UnsupportedVersion(u32),

    #[error("index encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Write `forest` to `path`, replacing any existing file atomically.
pub fn save_forest<P: AsRef<Path>>(path: P, forest: &Forest) -> Result<()> {
    let path = path.as_ref();
    let file = AtomicFile::new(path, OverwriteBehavior::AllowOverwrite);
    file.write(|f| write_forest(f, forest))
        .map_err(|e| match e {
            atomicwrites::Error::Internal(e) => PersistenceError::Io(e),
            atomicwrites::Error::User(e) => e,
        })?;

    info!(
        path = %path.display(),
        items = forest.count(),
        trees = forest.n_trees(),
        "index saved"
    );
    Ok(())
}

/// Read an index written by [`save_forest`].
///
/// The payload is re-validated on decode, so dangling node references or
/// hyperplanes of the wrong dimension are rejected rather than loaded.
pub fn load_forest<P: AsRef<Path>>(path: P) -> Result<Forest> {
    let path = path.as_ref();
    let forest = read_forest(BufReader::new(File::open(path)?))?;
    info!(
        path = %path.display(),
        items = forest.count(),
        trees = forest.n_trees(),
        "index loaded"
    );
    Ok(forest)
}

pub(crate) fn write_forest<W: Write>(out: W, forest: &Forest) -> Result<()> {
    let mut out = BufWriter::new(out);
    out.write_all(MAGIC)?;
    out.write_all(&FORMAT_VERSION.to_le_bytes())?;
    bincode::serialize_into(&mut out, forest)?;
    out.flush()?;
    Ok(())
}

pub(crate) fn read_forest<R: Read>(mut input: R) -> Result<Forest> {
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(PersistenceError::BadMagic);
    }

    let mut version = [0u8; 4];
    input.read_exact(&mut version)?;
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(PersistenceError::UnsupportedVersion(version));
    }

    Ok(bincode::deserialize_from(input)?)
}
