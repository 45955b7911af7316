//! Append-only file sink with date and size rotation.
//!
//! Files are named `YYYY-MM-DD_N.log` inside the configured directory. On
//! open the counter continues after the largest existing `N` for today; a
//! date change reopens at `_1` for the new date and a size overflow reopens
//! at `N + 1`. Write and sync errors are reported once per process run on
//! stderr and otherwise swallowed: the logging core must never take the
//! application down with it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Local, NaiveDate};

use crate::error::Error;

static ERROR_REPORTED: AtomicBool = AtomicBool::new(false);

fn report_error(context: &str, err: &io::Error) {
    if !ERROR_REPORTED.swap(true, Ordering::Relaxed) {
        eprintln!("deferlog: {context}: {err} (further sink errors suppressed)");
    }
}

pub struct FileSink {
    dir: PathBuf,
    max_file_size: u64,
    file: Option<File>,
    date: NaiveDate,
    counter: u32,
    written: u64,
}

impl FileSink {
    /// Opens the sink, creating `dir` if needed and picking the next unused
    /// counter for today. Failure here is surfaced: it is the one moment the
    /// caller can still react.
    pub fn open(dir: impl Into<PathBuf>, max_file_size: u64) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let date = Local::now().date_naive();
        let counter = Self::next_counter(&dir, date)?;
        let (file, written) = Self::open_file(&dir, date, counter)?;

        Ok(Self {
            dir,
            max_file_size,
            file: Some(file),
            date,
            counter,
            written,
        })
    }

    /// Largest existing counter for `date` plus one; 1 for a fresh day.
    fn next_counter(dir: &Path, date: NaiveDate) -> io::Result<u32> {
        let prefix = format!("{}", date.format("%Y-%m-%d"));
        let mut max = 0;

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(n) = Self::parse_counter(name, &prefix) {
                    max = max.max(n);
                }
            }
        }
        Ok(max + 1)
    }

    fn parse_counter(name: &str, date_prefix: &str) -> Option<u32> {
        name.strip_prefix(date_prefix)?
            .strip_prefix('_')?
            .strip_suffix(".log")?
            .parse()
            .ok()
    }

    fn file_path(dir: &Path, date: NaiveDate, counter: u32) -> PathBuf {
        dir.join(format!("{}_{}.log", date.format("%Y-%m-%d"), counter))
    }

    fn open_file(dir: &Path, date: NaiveDate, counter: u32) -> io::Result<(File, u64)> {
        let path = Self::file_path(dir, date, counter);
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let file = options.open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok((file, written))
    }

    /// Path the next write will land in.
    pub fn current_path(&self) -> PathBuf {
        Self::file_path(&self.dir, self.date, self.counter)
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Appends a batch of formatted bytes, rotating first when the date
    /// changed or the size limit would be crossed.
    ///
    /// Batches arrive one flush at a time from the output stage, so a file
    /// only overshoots the limit by at most one stage worth of data. If
    /// rotation fails the current file keeps receiving writes.
    pub fn write_all(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let today = Local::now().date_naive();
        if today != self.date {
            self.rotate(today, 1);
        } else if self.written + bytes.len() as u64 > self.max_file_size {
            self.rotate(self.date, self.counter + 1);
        }

        if let Some(file) = self.file.as_mut() {
            match file.write_all(bytes) {
                Ok(()) => self.written += bytes.len() as u64,
                Err(e) => report_error("write to log file failed", &e),
            }
        }
    }

    fn rotate(&mut self, date: NaiveDate, counter: u32) {
        match Self::open_file(&self.dir, date, counter) {
            Ok((file, written)) => {
                self.file = Some(file);
                self.date = date;
                self.counter = counter;
                self.written = written;
            }
            Err(e) => report_error("log rotation failed", &e),
        }
    }

    /// Pushes written data to disk (`fdatasync`; metadata is not synced).
    pub fn sync(&mut self) {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.sync_data() {
                report_error("log file sync failed", &e);
            }
        }
    }
}
