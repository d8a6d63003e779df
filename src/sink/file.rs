//! Raw elementary-stream file sink with commit/discard semantics.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::SampleSink;
use crate::error::Result;
use crate::media::{OutputFormat, SampleInfo};

const PENDING_SUFFIX: &str = "part";

/// Sink writing payloads back to back into a pending file.
///
/// Data goes to `<path>.part` while recording. [`commit`](SampleSink::commit)
/// flushes and renames it to `path`; [`discard`](SampleSink::discard)
/// deletes it. Codec configuration bytes from the output format are written
/// ahead of the samples, so the result is a playable Annex-B stream for
/// encoders that emit one.
pub struct FileSink {
    name: String,
    path: PathBuf,
    pending_path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl FileSink {
    /// Open a pending file for `path`, creating parent directories if needed
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut pending = path.clone().into_os_string();
        pending.push(".");
        pending.push(PENDING_SUFFIX);
        let pending_path = PathBuf::from(pending);

        let file = File::create(&pending_path)?;
        debug!("Opened pending file {}", pending_path.display());

        Ok(Self {
            name: path.display().to_string(),
            path,
            pending_path,
            writer: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    /// Final location of the file once committed
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the file while recording
    pub fn pending_path(&self) -> &Path {
        &self.pending_path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }
}

impl SampleSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_format(&mut self, format: &OutputFormat) -> Result<()> {
        debug!("File sink format: {}", format);
        self.write(&format.codec_config)
    }

    fn process(&mut self, payload: &[u8], _info: &SampleInfo) -> Result<()> {
        self.write(payload)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let FileSink {
            path,
            pending_path,
            writer,
            bytes_written,
            ..
        } = *self;

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&pending_path, &path)?;
        info!("Saved {} ({} bytes)", path.display(), bytes_written);
        Ok(())
    }

    fn discard(self: Box<Self>) -> Result<()> {
        let FileSink {
            pending_path,
            writer,
            ..
        } = *self;

        drop(writer);
        fs::remove_file(&pending_path)?;
        info!("Discarded {}", pending_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{SampleFlags, VideoCodec};

    fn format() -> OutputFormat {
        OutputFormat {
            codec: VideoCodec::Avc,
            width: 4,
            height: 4,
            frame_rate: 30,
            codec_config: vec![0, 0, 0, 1, 0x67],
        }
    }

    #[test]
    fn test_commit_renames_pending_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clips").join("clip.h264");

        let mut sink = FileSink::create(&path).unwrap();
        assert!(sink.pending_path().exists());

        sink.set_format(&format()).unwrap();
        sink.process(&[0, 0, 0, 1, 0x65, 0xaa], &SampleInfo::new(0, 6, 0, SampleFlags::KEYFRAME))
            .unwrap();
        assert_eq!(sink.bytes_written(), 11);

        let pending = sink.pending_path().to_path_buf();
        Box::new(sink).commit().unwrap();

        assert!(!pending.exists());
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 1, 0x67, 0, 0, 0, 1, 0x65, 0xaa]);
    }

    #[test]
    fn test_discard_removes_pending_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.h264");

        let sink = FileSink::create(&path).unwrap();
        let pending = sink.pending_path().to_path_buf();
        Box::new(sink).discard().unwrap();

        assert!(!pending.exists());
        assert!(!path.exists());
    }
}
