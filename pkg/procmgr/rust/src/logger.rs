// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Sinks for a managed program's stdout/stderr.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Result of tailing a log: the data, the offset to resume from, and whether
/// more data was available than requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailLog {
    pub data: String,
    pub offset: u64,
    pub overflow: bool,
}

pub trait ProcessLogger: Send + Sync {
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Release the underlying handle. A later write reopens it.
    fn close(&self) -> io::Result<()>;

    fn set_pid(&self, pid: u32);

    /// Read `length` bytes from `offset`; a negative offset reads the last
    /// `-offset` bytes and a zero length reads to the end.
    fn read_log(&self, offset: i64, length: u64) -> io::Result<String>;

    fn read_tail_log(&self, offset: u64, length: u64) -> io::Result<TailLog>;

    fn clear(&self) -> io::Result<()>;
}

/// Build the sink for a configured log file. Empty and `/dev/null` discard.
pub fn create_logger(log_file: Option<&Path>) -> std::sync::Arc<dyn ProcessLogger> {
    match log_file {
        Some(path) if !path.as_os_str().is_empty() && path != Path::new("/dev/null") => {
            std::sync::Arc::new(FileLogger::new(path))
        }
        _ => std::sync::Arc::new(NullLogger),
    }
}

pub struct NullLogger;

impl ProcessLogger for NullLogger {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn close(&self) -> io::Result<()> {
        Ok(())
    }

    fn set_pid(&self, _pid: u32) {}

    fn read_log(&self, _offset: i64, _length: u64) -> io::Result<String> {
        Ok(String::new())
    }

    fn read_tail_log(&self, offset: u64, _length: u64) -> io::Result<TailLog> {
        Ok(TailLog {
            data: String::new(),
            offset,
            overflow: false,
        })
    }

    fn clear(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Appends to a single file. Rotation is left to external tooling.
pub struct FileLogger {
    path: PathBuf,
    file: Mutex<Option<File>>,
    pid: AtomicU32,
}

impl FileLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
            pid: AtomicU32::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Relaxed) {
            0 => None,
            pid => Some(pid),
        }
    }

    fn open_for_read(&self) -> io::Result<Option<(File, u64)>> {
        match File::open(&self.path) {
            Ok(f) => {
                let size = f.metadata()?.len();
                Ok(Some((f, size)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn read_range(file: &mut File, offset: u64, length: u64) -> io::Result<String> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::new();
    file.take(length).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

impl ProcessLogger for FileLogger {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)?;
            }
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            *guard = Some(f);
        }
        match guard.as_mut() {
            Some(f) => f.write(buf),
            None => Ok(0),
        }
    }

    fn close(&self) -> io::Result<()> {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut f) = guard.take() {
            f.flush()?;
        }
        Ok(())
    }

    fn set_pid(&self, pid: u32) {
        self.pid.store(pid, Ordering::Relaxed);
    }

    fn read_log(&self, offset: i64, length: u64) -> io::Result<String> {
        let Some((mut f, size)) = self.open_for_read()? else {
            return Ok(String::new());
        };
        let (start, len) = if offset < 0 {
            let back = offset.unsigned_abs().min(size);
            (size - back, back)
        } else {
            let start = (offset as u64).min(size);
            let avail = size - start;
            let len = if length == 0 { avail } else { length.min(avail) };
            (start, len)
        };
        read_range(&mut f, start, len)
    }

    fn read_tail_log(&self, offset: u64, length: u64) -> io::Result<TailLog> {
        let Some((mut f, size)) = self.open_for_read()? else {
            return Ok(TailLog {
                data: String::new(),
                offset: 0,
                overflow: false,
            });
        };
        let mut offset = offset;
        let mut length = length;
        let mut overflow = false;
        if size > offset.saturating_add(length) {
            overflow = true;
            offset = size.saturating_sub(1);
        }
        if offset.saturating_add(length) > size {
            if offset > size.saturating_sub(1) {
                length = 0;
            }
            offset = size.saturating_sub(length);
        }
        let data = if length == 0 {
            String::new()
        } else {
            read_range(&mut f, offset, length)?
        };
        Ok(TailLog {
            data,
            offset: size,
            overflow,
        })
    }

    fn clear(&self) -> io::Result<()> {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
        match OpenOptions::new().write(true).truncate(true).open(&self.path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
