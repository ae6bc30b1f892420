//! Per-invocation temporary audio files.
//!
//! Every file is named after the chat and message it belongs to plus a random
//! suffix, so concurrent handlers never share a path. The file is removed when
//! the `ScopedFile` is released or dropped, whichever comes first.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::warn;

use super::message::InboundMessage;

#[derive(Debug, Clone)]
pub struct ScratchSpace {
    dir: PathBuf,
}

impl ScratchSpace {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates an empty file `{label}_{chat}_{message}_XXXXXX.{ext}` owned by
    /// the caller.
    pub fn reserve(&self, label: &str, msg: &InboundMessage, ext: &str) -> io::Result<ScopedFile> {
        std::fs::create_dir_all(&self.dir)?;
        let prefix = format!("{label}_{}_{}_", msg.chat_id, msg.message_id);
        let suffix = format!(".{ext}");
        let file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .tempfile_in(&self.dir)?;
        Ok(ScopedFile { path: file.into_temp_path() })
    }
}

/// A temporary file deleted on drop.
#[derive(Debug)]
pub struct ScopedFile {
    path: TempPath,
}

impl ScopedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the file now, logging instead of failing if that is not possible.
    pub fn release(self) {
        let shown = self.path.to_path_buf();
        if let Err(e) = self.path.close()
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!("Failed to remove {}: {e}", shown.display());
        }
    }
}
