//! Disk half of a download: verified pieces land in per-piece temporaries
//! next to the output file, and `assemble` stitches them together once every
//! piece is present.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::Result;

/// Path of the temporary holding one piece of `output`: `<output>.<index>`.
pub fn piece_path(output: &Path, index: u32) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

pub fn write_piece(output: &Path, index: u32, bytes: &[u8]) -> Result<()> {
    let path = piece_path(output, index);
    fs::write(&path, bytes)?;
    debug!("piece {index} written to {}", path.display());
    Ok(())
}

/// Concatenates the piece temporaries in index order into `output`, then
/// removes them.
pub fn assemble(output: &Path, piece_count: u32) -> Result<()> {
    let mut file = File::create(output)?;
    for index in 0..piece_count {
        let mut piece = File::open(piece_path(output, index))?;
        io::copy(&mut piece, &mut file)?;
    }
    file.sync_all()?;
    for index in 0..piece_count {
        fs::remove_file(piece_path(output, index))?;
    }
    Ok(())
}
