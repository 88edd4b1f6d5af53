use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::StageIoError;
use crate::types::Frame;

/// Pattern the encoder reads back: 0-based, 8-digit zero padded.
pub const WRITE_PATTERN: &str = "%08d.png";

pub fn frame_file_name(index: usize) -> String {
    format!("{index:08}.png")
}

/// Remove `dir` with everything in it, then recreate it empty.
pub fn reset_dir(dir: &Path) -> Result<(), StageIoError> {
    let prepare_err = |source| StageIoError::Prepare {
        path: dir.to_path_buf(),
        source,
    };
    match fs::remove_dir_all(dir) {
        Ok(()) => debug!(dir = %dir.display(), "cleared stale staging directory"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(prepare_err(e)),
    }
    fs::create_dir_all(dir).map_err(prepare_err)
}

/// Persist `frames` into a freshly cleared `dir` as `00000000.png`,
/// `00000001.png`, ... in the order given.
pub fn write_all<I>(frames: I, dir: &Path) -> Result<Vec<PathBuf>, StageIoError>
where
    I: IntoIterator<Item = Frame>,
{
    reset_dir(dir)?;

    let mut written = Vec::new();
    for (index, frame) in frames.into_iter().enumerate() {
        let path = dir.join(frame_file_name(index));
        frame
            .save_png(&path)
            .map_err(|source| StageIoError::WriteFrame {
                path: path.clone(),
                source,
            })?;
        written.push(path);
    }

    info!(count = written.len(), dir = %dir.display(), "frames written");
    Ok(written)
}
