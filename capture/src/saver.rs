use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use frame_snap_common::bridge::Frame;
use image::codecs::jpeg::JpegEncoder;
use tracing::{dispatcher, error, info, warn, Dispatch};

use crate::keys::photo_filename;

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("failed to create photo directory {0}: {1}")]
    CreateDir(String, io::Error),
    #[error("refusing to overwrite existing photo {0}")]
    Exists(String),
    #[error("failed to write photo: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode JPEG: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(PathBuf),
    /// Nothing was held yet; no file written, counter unchanged.
    NoFrame,
}

/// Writes held frames as numbered JPEG photos into one directory.
pub struct PhotoSaver {
    dir: PathBuf,
    count: u32,
    quality: u8,
    dispatch: Dispatch,
}

impl PhotoSaver {
    /// Open the photo directory, creating it if it does not exist yet.
    /// Existing photos are left alone.
    pub fn create(dir: impl Into<PathBuf>, quality: u8, dispatch: Dispatch) -> Result<Self, SaveError> {
        let dir = dir.into();
        if !dir.is_dir() {
            std::fs::create_dir_all(&dir)
                .map_err(|e| SaveError::CreateDir(dir.display().to_string(), e))?;
            dispatcher::with_default(&dispatch, || {
                info!(path = dir.display().to_string(), "created photo directory");
            });
        }
        Ok(Self {
            dir,
            count: 0,
            quality,
            dispatch,
        })
    }

    /// Save `frame` as `photo_<count>_<taken_at>.jpg`.
    ///
    /// The counter only advances once the file is completely on disk. A failed
    /// write is logged, its partial file removed, and the error returned.
    pub fn save(
        &mut self,
        frame: Option<&Frame>,
        taken_at: NaiveDateTime,
    ) -> Result<SaveOutcome, SaveError> {
        let Some(frame) = frame else {
            dispatcher::with_default(&self.dispatch, || {
                warn!("no image received yet, nothing to save");
            });
            return Ok(SaveOutcome::NoFrame);
        };

        let path = self.dir.join(photo_filename(self.count, taken_at));
        if let Err(e) = write_jpeg(&path, frame, self.quality) {
            dispatcher::with_default(&self.dispatch, || {
                error!(path = path.display().to_string(), error = %e, "failed to save photo");
            });
            return Err(e);
        }

        self.count += 1;
        dispatcher::with_default(&self.dispatch, || {
            info!(
                path = path.display().to_string(),
                seq = frame.seq,
                count = self.count,
                "saved photo"
            );
        });
        Ok(SaveOutcome::Saved(path))
    }

    /// Number of photos saved so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn write_jpeg(path: &Path, frame: &Frame, quality: u8) -> Result<(), SaveError> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => SaveError::Exists(path.display().to_string()),
            _ => SaveError::Io(e),
        })?;

    let result = encode_into(file, frame, quality);
    if result.is_err() {
        let _ = std::fs::remove_file(path);
    }
    result
}

fn encode_into(file: File, frame: &Frame, quality: u8) -> Result<(), SaveError> {
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality).encode_image(&frame.image)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}
