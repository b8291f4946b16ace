// This file finds the external programs AmrLocus needs and checks their versions.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use colored::Colorize;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use which::which;

use crate::error::{ClusterError, Result};
use crate::log::{section_header, explanation};
use crate::misc::quit_with_error;
use crate::settings::ClusterSettings;


pub fn check_progs(settings_file: Option<PathBuf>, json: bool) {
    let overrides = match settings_file {
        Some(f) => ClusterSettings::load_yaml(&f)
            .unwrap_or_else(|e| quit_with_error(&e.to_string())).program_paths,
        None => BTreeMap::new(),
    };
    let results: Vec<_> = KNOWN_PROGRAMS.iter()
        .map(|spec| (spec.name, ExternalProgs::resolve(&[spec.name], &overrides)))
        .collect();
    if json {
        let found: BTreeMap<&str, Option<ResolvedProgram>> = results.iter()
            .map(|(name, r)| (*name, r.as_ref().ok().and_then(|p| p.programs.get(*name).cloned())))
            .collect();
        match serde_json::to_string_pretty(&found) {
            Ok(text) => println!("{}", text),
            Err(e) => quit_with_error(&e.to_string()),
        }
        return;
    }
    section_header("Checking external programs");
    explanation("AmrLocus calls these programs during a cluster run (cd-hit-est is only needed \
                 to build reference clusters). Paths can be set with program_paths in a settings \
                 file.");
    for (name, result) in &results {
        match result {
            Ok(progs) => {
                let path = progs.exe(name).map(|p| p.display().to_string()).unwrap_or_default();
                let version = progs.version(name).unwrap_or(".");
                eprintln!("{:<22}{:<10}{}", name, version.green(), path);
            },
            Err(e) => eprintln!("{:<22}{}", name, e.to_string().red()),
        }
    }
    eprintln!();
    let missing = results.iter().filter(|(name, r)| r.is_err() && CLUSTER_PROGRAMS.contains(name))
        .count();
    if missing > 0 {
        quit_with_error(&format!("{} program(s) needed for cluster runs are not usable", missing));
    }
}


pub struct ProgramSpec {
    pub name: &'static str,
    pub version_args: &'static [&'static str],
    pub version_regex: &'static str,
    pub min_version: Option<&'static str>,
}


pub const KNOWN_PROGRAMS: &[ProgramSpec] = &[
    ProgramSpec { name: "bowtie2", version_args: &["--version"],
                  version_regex: r"version (\d+\.\d+(?:\.\d+)?)", min_version: Some("2.1.0") },
    ProgramSpec { name: "bowtie2-build", version_args: &["--version"],
                  version_regex: r"version (\d+\.\d+(?:\.\d+)?)", min_version: Some("2.1.0") },
    ProgramSpec { name: "samtools", version_args: &["--version"],
                  version_regex: r"samtools (\d+\.\d+(?:\.\d+)?)", min_version: Some("1.9") },
    ProgramSpec { name: "bcftools", version_args: &["--version"],
                  version_regex: r"bcftools (\d+\.\d+(?:\.\d+)?)", min_version: Some("1.9") },
    ProgramSpec { name: "bgzip", version_args: &["--version"],
                  version_regex: r"bgzip \(htslib\) (\d+\.\d+(?:\.\d+)?)", min_version: Some("1.9") },
    ProgramSpec { name: "tabix", version_args: &["--version"],
                  version_regex: r"tabix \(htslib\) (\d+\.\d+(?:\.\d+)?)", min_version: Some("1.9") },
    ProgramSpec { name: "spades.py", version_args: &["--version"],
                  version_regex: r"v?(\d+\.\d+\.\d+)", min_version: Some("3.11.0") },
    ProgramSpec { name: "SSPACE_Basic_v2.0.pl", version_args: &[],
                  version_regex: "", min_version: None },
    ProgramSpec { name: "nucmer", version_args: &["--version"],
                  version_regex: r"(\d+\.\d+(?:\.\d+)?)", min_version: Some("3.1") },
    ProgramSpec { name: "delta-filter", version_args: &[], version_regex: "", min_version: None },
    ProgramSpec { name: "show-coords", version_args: &[], version_regex: "", min_version: None },
    ProgramSpec { name: "show-snps", version_args: &[], version_regex: "", min_version: None },
    ProgramSpec { name: "cd-hit-est", version_args: &["-h"],
                  version_regex: r"CD-HIT version (\d+\.\d+(?:\.\d+)?)", min_version: Some("4.6") },
];


// The programs a cluster run calls. cd-hit-est is only used when building reference clusters.
pub const CLUSTER_PROGRAMS: &[&str] = &["bowtie2", "bowtie2-build", "samtools", "bcftools", "bgzip",
                                        "tabix", "spades.py", "SSPACE_Basic_v2.0.pl", "nucmer",
                                        "delta-filter", "show-coords", "show-snps"];


#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ResolvedProgram {
    pub path: PathBuf,
    pub version: Option<String>,
}


/// Resolved paths (and versions, where checked) of external programs. This is plain data, so it
/// can be handed to worker processes.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ExternalProgs {
    programs: BTreeMap<String, ResolvedProgram>,
}

impl ExternalProgs {
    pub fn resolve(names: &[&str], overrides: &BTreeMap<String, PathBuf>) -> Result<Self> {
        let mut programs = BTreeMap::new();
        for name in names {
            let spec = KNOWN_PROGRAMS.iter().find(|s| s.name == *name)
                .ok_or_else(|| ClusterError::ProgramNotFound(name.to_string()))?;
            let path = find_program(name, overrides)?;
            let version = check_version(spec, &path)?;
            programs.insert(name.to_string(), ResolvedProgram { path, version });
        }
        Ok(ExternalProgs { programs })
    }

    /// Uses the given paths as-is, without looking them up or checking versions.
    pub fn from_paths(paths: &[(&str, &str)]) -> Self {
        let programs = paths.iter()
            .map(|(name, path)| (name.to_string(), ResolvedProgram { path: PathBuf::from(path),
                                                                     version: None }))
            .collect();
        ExternalProgs { programs }
    }

    pub fn exe(&self, name: &str) -> Result<&Path> {
        self.programs.get(name).map(|p| p.path.as_path())
            .ok_or_else(|| ClusterError::ProgramNotFound(name.to_string()))
    }

    pub fn version(&self, name: &str) -> Option<&str> {
        self.programs.get(name).and_then(|p| p.version.as_deref())
    }

    pub fn save_json(&self, filename: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| ClusterError::parse(filename, e.to_string()))?;
        fs::write(filename, text).map_err(|e| ClusterError::io(filename, e))
    }

    pub fn load_json(filename: &Path) -> Result<Self> {
        let text = fs::read_to_string(filename).map_err(|e| ClusterError::io(filename, e))?;
        serde_json::from_str(&text).map_err(|e| ClusterError::parse(filename, e.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResolvedProgram)> {
        self.programs.iter()
    }
}


fn find_program(name: &str, overrides: &BTreeMap<String, PathBuf>) -> Result<PathBuf> {
    if let Some(path) = overrides.get(name) {
        return which(path).map_err(|_| ClusterError::ProgramNotFound(path.display().to_string()));
    }
    which(name).map_err(|_| ClusterError::ProgramNotFound(name.to_string()))
}


fn check_version(spec: &ProgramSpec, path: &Path) -> Result<Option<String>> {
    if spec.version_args.is_empty() {
        return Ok(None);
    }
    let output = Command::new(path).args(spec.version_args).output()
        .map_err(|e| ClusterError::ToolSpawn { program: spec.name.to_string(), source: e })?;

    // Some programs print their version to stderr and some exit non-zero when asked for it.
    let text = format!("{}\n{}", String::from_utf8_lossy(&output.stdout),
                       String::from_utf8_lossy(&output.stderr));
    let version = parse_version(spec.version_regex, &text)
        .ok_or_else(|| ClusterError::ProgramVersionUnknown {
            program: spec.name.to_string(),
            reason: format!("no version found in output of {} {}", path.display(),
                            spec.version_args.join(" ")),
        })?;
    if let Some(minimum) = spec.min_version {
        if !version_at_least(&version, minimum) {
            return Err(ClusterError::ProgramVersion { program: spec.name.to_string(),
                                                      found: version,
                                                      minimum: minimum.to_string() });
        }
    }
    Ok(Some(version))
}


fn parse_version(version_regex: &str, text: &str) -> Option<String> {
    let re = Regex::new(version_regex).ok()?;
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
}


pub fn version_at_least(version: &str, minimum: &str) -> bool {
    fn parts(v: &str) -> Vec<u64> {
        v.split('.').map(|p| p.chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
         .map(|p| p.parse().unwrap_or(0)).collect()
    }
    let (mut a, mut b) = (parts(version), parts(minimum));
    let len = a.len().max(b.len());
    a.resize(len, 0);
    b.resize(len, 0);
    a >= b
}
