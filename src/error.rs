// This file defines the error type for environment failures: things like missing files and
// external tools which crash. Expected outcomes (no reference matched, assembly failed) are not
// errors and are instead recorded in a cluster's status flags.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;


#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("I/O error with {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("file not found: {0}")]
    MissingFile(PathBuf),

    #[error("required program '{0}' not found")]
    ProgramNotFound(String),

    #[error("{program} version {found} found, but version {minimum} or later is required")]
    ProgramVersion { program: String, found: String, minimum: String },

    #[error("could not get version of {program}: {reason}")]
    ProgramVersionUnknown { program: String, reason: String },

    #[error("failed to start {program}: {source}")]
    ToolSpawn { program: String, source: io::Error },

    #[error("{program} exited with status {code}\ncommand: {command}\n{stderr}")]
    ToolFailed { program: String, code: String, command: String, stderr: String },

    #[error("error parsing {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("error subsetting reads, no mate found for read {0}")]
    NoMate(String),

    #[error("bad setting: {0}")]
    BadSettings(String),

    #[error("error running cluster {cluster} during {stage}:\n{source}")]
    Stage { cluster: String, stage: String, source: Box<ClusterError> },
}


impl ClusterError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        ClusterError::Io { path: path.to_path_buf(), source }
    }

    pub fn parse(path: &Path, reason: impl Into<String>) -> Self {
        ClusterError::Parse { path: path.to_path_buf(), reason: reason.into() }
    }

    pub fn in_stage(self, cluster: &str, stage: &str) -> Self {
        match self {
            ClusterError::Stage { .. } => self,
            other => ClusterError::Stage { cluster: cluster.to_string(), stage: stage.to_string(),
                                           source: Box::new(other) },
        }
    }
}


pub type Result<T> = std::result::Result<T, ClusterError>;
