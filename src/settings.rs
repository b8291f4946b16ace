// This file defines the settings for a cluster run. Every tunable the pipeline uses lives here and
// is passed explicitly to the stages which need it.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ClusterError, Result};
use crate::misc::format_float;


/// How to choose between alignment hits which cover the same reference base.
#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HitTieBreak {
    #[default]
    Longest,    // longest hit on the reference wins, then highest identity
    Identity,   // highest identity wins, then longest
}


#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ClusterSettings {
    pub assembly_coverage: u32,
    pub assembly_kmer: u32,
    pub spades_other_options: Option<String>,
    pub reads_insert: u32,
    pub max_insert: u32,
    pub min_scaff_depth: u32,
    pub sspace_k: u32,
    pub sspace_sd: f64,
    pub scaffolder_retries: u32,
    pub nucmer_min_id: f64,
    pub nucmer_min_len: u32,
    pub nucmer_breaklen: u32,
    pub bcf_min_dp: u32,
    pub bcf_min_dv: u32,
    pub bcf_min_dv_over_dp: f64,
    pub bcf_min_qual: f64,
    pub assembled_threshold: f64,
    pub unique_threshold: f64,
    pub max_gene_nt_extend: usize,
    pub bowtie2_preset: String,
    pub threads: usize,
    pub clean: bool,
    pub random_seed: u64,
    pub hit_tie_break: HitTieBreak,
    pub program_paths: BTreeMap<String, PathBuf>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        ClusterSettings {
            assembly_coverage: 50,
            assembly_kmer: 21,
            spades_other_options: None,
            reads_insert: 500,
            max_insert: 1000,
            min_scaff_depth: 10,
            sspace_k: 20,
            sspace_sd: 0.4,
            scaffolder_retries: 3,
            nucmer_min_id: 90.0,
            nucmer_min_len: 20,
            nucmer_breaklen: 200,
            bcf_min_dp: 10,
            bcf_min_dv: 5,
            bcf_min_dv_over_dp: 0.3,
            bcf_min_qual: 20.0,
            assembled_threshold: 0.95,
            unique_threshold: 0.03,
            max_gene_nt_extend: 30,
            bowtie2_preset: "very-sensitive-local".to_string(),
            threads: 1,
            clean: true,
            random_seed: 42,
            hit_tie_break: HitTieBreak::Longest,
            program_paths: BTreeMap::new(),
        }
    }
}

/// Command-line values which replace those from a settings file.
#[derive(Clone, Debug, Default)]
pub struct SettingOverrides {
    pub threads: Option<usize>,
    pub random_seed: Option<u64>,
    pub assembly_coverage: Option<u32>,
    pub hit_tie_break: Option<HitTieBreak>,
    pub no_clean: bool,
}


impl ClusterSettings {
    /// Loads settings from a YAML file if one is given, otherwise uses the defaults. Overrides are
    /// applied before the settings are checked.
    pub fn from_cli(filename: Option<&Path>, overrides: &SettingOverrides) -> Result<Self> {
        let mut settings = match filename {
            Some(f) => ClusterSettings::load_yaml(f)?,
            None => ClusterSettings::default(),
        };
        settings.apply(overrides);
        settings.check()?;
        Ok(settings)
    }

    pub fn apply(&mut self, overrides: &SettingOverrides) {
        if let Some(threads) = overrides.threads { self.threads = threads; }
        if let Some(seed) = overrides.random_seed { self.random_seed = seed; }
        if let Some(coverage) = overrides.assembly_coverage { self.assembly_coverage = coverage; }
        if let Some(tie_break) = overrides.hit_tie_break { self.hit_tie_break = tie_break; }
        if overrides.no_clean { self.clean = false; }
    }

    pub fn load_yaml(filename: &Path) -> Result<Self> {
        let text = fs::read_to_string(filename).map_err(|e| ClusterError::io(filename, e))?;
        let settings: ClusterSettings = serde_yaml::from_str(&text)
            .map_err(|e| ClusterError::parse(filename, e.to_string()))?;
        settings.check()?;
        Ok(settings)
    }

    pub fn save_yaml(&self, filename: &Path) -> Result<()> {
        let text = serde_yaml::to_string(self)
            .map_err(|e| ClusterError::parse(filename, e.to_string()))?;
        fs::write(filename, text).map_err(|e| ClusterError::io(filename, e))
    }

    pub fn check(&self) -> Result<()> {
        fn fraction_ok(v: f64) -> bool { v > 0.0 && v <= 1.0 }
        if self.assembly_coverage == 0 {
            return Err(ClusterError::BadSettings("assembly_coverage must be at least 1".into()));
        }
        if self.assembly_kmer == 0 || self.assembly_kmer % 2 == 0 {
            return Err(ClusterError::BadSettings("assembly_kmer must be odd".into()));
        }
        if !fraction_ok(self.assembled_threshold) {
            return Err(ClusterError::BadSettings("assembled_threshold must be in (0, 1]".into()));
        }
        if !fraction_ok(self.unique_threshold) {
            return Err(ClusterError::BadSettings("unique_threshold must be in (0, 1]".into()));
        }
        if !fraction_ok(self.bcf_min_dv_over_dp) {
            return Err(ClusterError::BadSettings("bcf_min_dv_over_dp must be in (0, 1]".into()));
        }
        if self.nucmer_min_id <= 0.0 || self.nucmer_min_id > 100.0 {
            return Err(ClusterError::BadSettings("nucmer_min_id must be in (0, 100]".into()));
        }
        if self.sspace_k == 0 {
            return Err(ClusterError::BadSettings("sspace_k must be at least 1".into()));
        }
        if self.threads == 0 {
            return Err(ClusterError::BadSettings("threads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn describe(&self) -> Vec<String> {
        vec![
            format!("assembly_coverage {}", self.assembly_coverage),
            format!("assembly_kmer {}", self.assembly_kmer),
            format!("reads_insert {}", self.reads_insert),
            format!("nucmer_min_id {}", format_float(self.nucmer_min_id)),
            format!("nucmer_min_len {}", self.nucmer_min_len),
            format!("nucmer_breaklen {}", self.nucmer_breaklen),
            format!("assembled_threshold {}", format_float(self.assembled_threshold)),
            format!("unique_threshold {}", format_float(self.unique_threshold)),
            format!("max_gene_nt_extend {}", self.max_gene_nt_extend),
            format!("bcf_min_dp {}", self.bcf_min_dp),
            format!("bcf_min_dv {}", self.bcf_min_dv),
            format!("bcf_min_dv_over_dp {}", format_float(self.bcf_min_dv_over_dp)),
            format!("bcf_min_qual {}", format_float(self.bcf_min_qual)),
            format!("bowtie2_preset {}", self.bowtie2_preset),
            format!("random_seed {}", self.random_seed),
            format!("clean {}", self.clean),
        ]
    }
}
