// This file contains functions for logging: pretty terminal output for the CLI and the per-cluster
// log file written during a cluster run.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use chrono::Local;
use colored::Colorize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{ClusterError, Result};


pub fn section_header(text: &str) {
    let date = Local::now().format("%Y-%m-%d %H:%M:%S");
    eprintln!();
    eprintln!("{}", format!("{} {}", text, format!("({})", date).dimmed()).bold().bright_yellow());
}


pub fn explanation(text: &str) {
    let width = term_size::dimensions_stderr().map(|(w, _)| w).unwrap_or(80).clamp(40, 100);
    eprintln!("{}", textwrap::fill(text, width).dimmed());
    eprintln!();
}


pub fn banner(text: &str) -> String {
    format!("{:_^79}", format!(" {} ", text))
}


#[derive(Clone)]
pub enum LogTarget {
    File,
    Stderr,
    Sink,
}


/// The log for one cluster. Clones share the same underlying file, which lets the on-cancel hook
/// close it from the signal-handling thread.
#[derive(Clone)]
pub struct ClusterLog {
    target: LogTarget,
    handle: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl ClusterLog {
    pub fn new() -> Self {
        ClusterLog { target: LogTarget::File, handle: Arc::new(Mutex::new(None)) }
    }

    pub fn stderr() -> Self {
        ClusterLog { target: LogTarget::Stderr, handle: Arc::new(Mutex::new(None)) }
    }

    pub fn sink() -> Self {
        ClusterLog { target: LogTarget::Sink, handle: Arc::new(Mutex::new(None)) }
    }

    pub fn open(&self, filename: &Path) -> Result<()> {
        if !matches!(self.target, LogTarget::File) { return Ok(()); }
        let file = File::create(filename).map_err(|e| ClusterError::io(filename, e))?;
        if let Ok(mut guard) = self.handle.lock() {
            *guard = Some(BufWriter::new(file));
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.handle.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    pub fn write(&self, text: &str) {
        let time = Local::now().format("%H:%M:%S");
        match self.target {
            LogTarget::Sink => {},
            LogTarget::Stderr => {
                for line in text.lines() { eprintln!("[{}] {}", time, line); }
            },
            LogTarget::File => {
                if let Ok(mut guard) = self.handle.lock() {
                    if let Some(writer) = guard.as_mut() {
                        for line in text.lines() {
                            let _ = writeln!(writer, "[{}] {}", time, line);
                        }
                        let _ = writer.flush();
                    }
                }
            },
        }
    }

    pub fn close(&self) {
        if let Ok(mut guard) = self.handle.lock() {
            if let Some(mut writer) = guard.take() {
                let _ = writer.flush();
            }
        }
    }
}

impl Default for ClusterLog {
    fn default() -> Self { Self::new() }
}


#[cfg(test)]
mod tests {
    use std::fs::read_to_string;
    use tempfile::tempdir;
    use super::*;

    #[test]
    fn test_banner() {
        let b = banner("LOG FILE START c1");
        assert_eq!(b.len(), 79);
        assert!(b.starts_with("___"));
        assert!(b.contains(" LOG FILE START c1 "));
    }

    #[test]
    fn test_cluster_log_file() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("log.txt");
        let log = ClusterLog::new();
        log.write("dropped because the log is not open yet");
        log.open(&log_file).unwrap();
        assert!(log.is_open());
        let shared = log.clone();
        shared.write("first\nsecond");
        log.close();
        assert!(!shared.is_open());
        log.write("dropped after close");
        let contents = read_to_string(&log_file).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] first"));
        assert!(lines[1].ends_with("] second"));
    }

    #[test]
    fn test_sink_never_opens() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("log.txt");
        let log = ClusterLog::sink();
        log.open(&log_file).unwrap();
        log.write("nothing");
        assert!(!log_file.exists());
    }
}
