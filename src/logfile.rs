// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log file ownership: append-only writes, size tracking, rotation

use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::platform::out_of_band_warning;

/// The active log file and its rotation policy. Assumes this process is the
/// only writer.
pub struct LogFile {
    filename: PathBuf,
    file: Option<File>,
    file_size: u64,
    max_file_size: u64,
    max_archives: usize,
}

impl LogFile {
    pub fn new(filename: PathBuf, max_file_size: u64, max_archives: usize) -> Self {
        Self {
            filename,
            file: None,
            file_size: 0,
            max_file_size,
            max_archives,
        }
    }

    /// Open the file (append, create if missing) and record its size.
    pub fn open(&mut self) -> bool {
        if self.file.is_none() {
            let file = match OpenOptions::new()
                .append(true)
                .create(true)
                .open(&self.filename)
            {
                Ok(f) => f,
                Err(_) => return false,
            };
            self.file_size = match file.metadata() {
                Ok(m) => m.len(),
                Err(_) => return false,
            };
            self.file = Some(file);
        }
        true
    }

    pub fn close(&mut self) {
        self.file = None;
        self.file_size = 0;
    }

    /// Append `buf`, rotating first when the write would exceed the size
    /// limit. One write syscall; a failed write gets one close-and-reopen
    /// retry before the buffer is dropped.
    pub fn write(&mut self, buf: &[u8]) -> bool {
        if !self.open() {
            return false;
        }

        if self.file_size + buf.len() as u64 > self.max_file_size {
            if !self.roll_over() {
                return false;
            }
            if !self.open() {
                return false;
            }
        }

        if buf.is_empty() {
            return true;
        }

        let mut res = self.file.as_mut().unwrap().write(buf);
        if res.is_err() {
            // Perhaps the filesystem went away and came back (network share
            // lost and restored, etc). Reopening is the best we can try.
            self.close();
            if !self.open() {
                return false;
            }
            res = self.file.as_mut().unwrap().write(buf);
        }

        match res {
            Ok(n) => {
                self.file_size += n as u64;
                // Ignore the possibility of a short append
                n == buf.len()
            }
            Err(_) => false,
        }
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    // The final extension of the active file, dot included, or empty
    fn extension(&self) -> String {
        match self.filename.extension() {
            Some(ext) => format!(".{}", ext.to_string_lossy()),
            None => String::new(),
        }
    }

    fn base_without_extension(&self) -> String {
        let full = self.filename.to_string_lossy();
        let ext = self.extension();
        full[..full.len() - ext.len()].to_string()
    }

    /// Archive name for a rollover happening now, in UTC. Hyphens instead of
    /// colons because the stamp lives inside a filename.
    fn archive_filename(&self) -> PathBuf {
        let stamp = Utc::now().format("-%Y-%m-%dT%H-%M-%S-%3f-Z");
        PathBuf::from(format!(
            "{}{}{}",
            self.base_without_extension(),
            stamp,
            self.extension()
        ))
    }

    /// All archives of this log, sorted oldest first. The stamp format sorts
    /// lexicographically in chronological order.
    fn find_archives(&self) -> Vec<PathBuf> {
        let base = self.base_without_extension();
        let prefix = match Path::new(&base).file_name() {
            Some(stem) => format!("{}-", stem.to_string_lossy()),
            None => return Vec::new(),
        };
        let dir = self
            .filename
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut archives: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .flatten()
                .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
                .map(|e| e.path())
                .collect(),
            Err(_) => Vec::new(),
        };
        archives.sort();
        archives
    }

    /// Rename the active file to a timestamped archive and prune old ones.
    /// Pruning failures are silent; a rename failure aborts the roll so that
    /// writes continue against the oversized file instead of losing data.
    fn roll_over(&mut self) -> bool {
        self.close();

        let archive = self.archive_filename();
        if let Err(err) = std::fs::rename(&self.filename, &archive) {
            out_of_band_warning(format_args!(
                "rollover failed renaming '{}' to '{}': {err}",
                self.filename.display(),
                archive.display()
            ));
            return false;
        }

        let archives = self.find_archives();
        if archives.len() > self.max_archives {
            for old in &archives[..archives.len() - self.max_archives] {
                let _ = std::fs::remove_file(old);
            }
        }
        true
    }
}

impl Drop for LogFile {
    fn drop(&mut self) {
        self.close();
    }
}
