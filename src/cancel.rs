// This file contains the hook run when a cluster worker receives a termination signal: it closes
// the cluster's log and leaves a fail marker for the parent process to find.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::log::ClusterLog;
use crate::misc::quit_with_error;


#[derive(Clone)]
pub struct CancelHook {
    pub cluster_name: String,
    pub log: ClusterLog,
    pub fail_file: Option<PathBuf>,
}

impl CancelHook {
    /// Writes the (empty) fail marker and closes the log. Does not exit.
    pub fn fire(&self) {
        eprintln!("Signal received in cluster {}... Stopping!", self.cluster_name);
        self.log.write(&format!("Signal received in cluster {}... Stopping!", self.cluster_name));
        if let Some(fail_file) = &self.fail_file {
            write_fail_marker(fail_file, &self.log);
        }
        self.log.close();
    }

    /// Registers the hook for SIGINT, SIGTERM and SIGHUP. The process exits with status 1 after
    /// the hook has fired. Only one hook can be installed per process.
    pub fn install(self) {
        let result = ctrlc::set_handler(move || {
            self.fire();
            std::process::exit(1);
        });
        if let Err(e) = result {
            quit_with_error(&format!("could not install signal handler: {}", e));
        }
    }
}


/// Creates the empty fail marker which batch mode looks for. If it can't be made, the error goes
/// to the log and to stderr, and false is returned.
pub fn write_fail_marker(fail_file: &Path, log: &ClusterLog) -> bool {
    match File::create(fail_file) {
        Ok(_) => true,
        Err(e) => {
            let message = format!("Could not write fail file {}: {}", fail_file.display(), e);
            eprintln!("{}", message);
            log.write(&message);
            false
        }
    }
}


#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use super::*;

    #[test]
    fn test_fire() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("log.txt");
        let fail_file = temp_dir.path().join("cluster_1.fail");
        let log = ClusterLog::new();
        log.open(&log_file).unwrap();
        log.write("started");
        let hook = CancelHook { cluster_name: "cluster_1".to_string(), log: log.clone(),
                                fail_file: Some(fail_file.clone()) };
        hook.fire();
        assert!(!log.is_open());
        assert!(fail_file.exists());
        assert_eq!(std::fs::metadata(&fail_file).unwrap().len(), 0);
        let text = std::fs::read_to_string(&log_file).unwrap();
        assert!(text.contains("started"));
        assert!(text.contains("Signal received in cluster cluster_1... Stopping!"));
    }

    #[test]
    fn test_fire_without_fail_file() {
        let log = ClusterLog::sink();
        let hook = CancelHook { cluster_name: "c".to_string(), log, fail_file: None };
        hook.fire();
    }

    #[test]
    fn test_unwritable_fail_marker_is_logged() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("log.txt");
        let log = ClusterLog::new();
        log.open(&log_file).unwrap();
        let fail_file = temp_dir.path().join("missing_dir").join("c.fail");
        assert!(!write_fail_marker(&fail_file, &log));
        assert!(!fail_file.exists());
        log.close();
        let text = std::fs::read_to_string(&log_file).unwrap();
        assert!(text.contains("Could not write fail file"));
        assert!(text.contains("c.fail"));

        let ok_file = temp_dir.path().join("c.fail");
        assert!(write_fail_marker(&ok_file, &ClusterLog::sink()));
        assert!(ok_file.exists());
    }
}
