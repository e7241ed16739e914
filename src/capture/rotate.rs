use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Deserialize;

/// Rotation policy for one captured stream. Size and age trigger rotation;
/// `max_files` bounds how many rotated files are kept (0 keeps all).
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RotationConfig {
    /// Rotate once the current file would exceed this many bytes (0 disables).
    #[serde(default)]
    pub max_size: u64,

    /// Rotated files kept as `<path>.1` .. `<path>.N` (0 keeps all).
    #[serde(default)]
    pub max_files: usize,

    /// Rotate once the current file has been open this long.
    #[serde(default, deserialize_with = "duration_str::deserialize_option_duration")]
    pub max_age: Option<Duration>,
}

/// Append-only file that renames itself away and reopens when a rotation
/// trigger fires. From the writer's perspective the path never changes.
pub struct RotatingFile {
    path: PathBuf,
    file: File,
    written: u64,
    opened_at: Instant,
    config: RotationConfig,
}

impl RotatingFile {
    pub fn open(path: impl Into<PathBuf>, config: RotationConfig) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            written,
            opened_at: Instant::now(),
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn due_for_rotation(&self, incoming: usize) -> bool {
        if self.config.max_size > 0
            && self.written > 0
            && self.written + incoming as u64 > self.config.max_size
        {
            return true;
        }
        if let Some(max_age) = self.config.max_age {
            if self.written > 0 && self.opened_at.elapsed() >= max_age {
                return true;
            }
        }
        false
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        shift_rotated(&self.path, self.config.max_files)?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        self.opened_at = Instant::now();
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.due_for_rotation(buf.len()) {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn suffixed(path: &Path, index: usize) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(format!(".{index}"));
    PathBuf::from(s)
}

/// Shifts `<path>.N` up by one, deletes anything past the retention bound and
/// renames the live file to `<path>.1`.
fn shift_rotated(path: &Path, max_files: usize) -> io::Result<()> {
    let highest = if max_files > 0 {
        let overflow = suffixed(path, max_files);
        if overflow.exists() {
            fs::remove_file(&overflow)?;
        }
        max_files
    } else {
        let mut i = 1;
        while suffixed(path, i).exists() {
            i += 1;
        }
        i
    };

    for i in (1..highest).rev() {
        let from = suffixed(path, i);
        if from.exists() {
            fs::rename(&from, suffixed(path, i + 1))?;
        }
    }
    if path.exists() {
        fs::rename(path, suffixed(path, 1))?;
    }
    Ok(())
}
