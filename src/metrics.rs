// This file contains the code for reading and writing the per-cluster YAML file of metrics.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{ClusterError, Result};


#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ClusterMetrics {
    pub cluster_name: String,
    pub total_reads: u64,
    pub total_bases: u64,
    pub reads_for_assembly: u64,
    pub chosen_reference: Option<String>,
    pub assembled: bool,
    pub flag: String,
    pub contig_count: usize,
    pub total_depth_per_contig: BTreeMap<String, u64>,
}

impl ClusterMetrics {
    pub fn new(cluster_name: &str) -> Self {
        ClusterMetrics { cluster_name: cluster_name.to_string(), ..Default::default() }
    }

    pub fn save_to_yaml(&self, filename: &Path) -> Result<()> { save_yaml(filename, self) }

    pub fn load_from_yaml(filename: &Path) -> Result<Self> {
        let text = fs::read_to_string(filename).map_err(|e| ClusterError::io(filename, e))?;
        serde_yaml::from_str(&text).map_err(|e| ClusterError::parse(filename, e.to_string()))
    }
}


fn save_yaml<T: Serialize>(yaml_filename: &Path, data: T) -> Result<()> {
    let yaml_string = serde_yaml::to_string(&data)
        .map_err(|e| ClusterError::parse(yaml_filename, e.to_string()))?;
    fs::write(yaml_filename, yaml_string).map_err(|e| ClusterError::io(yaml_filename, e))
}


// This macro adds get_val_by_name and get_field_names methods to metric structs, used when
// tabulating metrics from many clusters.
macro_rules! impl_metrics_helpers {
    ($struct_name:ty) => {
        impl $struct_name {
            pub fn get_val_by_name(&self, name: &str) -> Option<String> {
                let value = serde_json::to_value(self).ok()?.get(name)?.clone();
                Some(match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => ".".to_string(),
                    other => other.to_string(),
                })
            }
            pub fn get_field_names() -> Vec<String> {
                match serde_json::to_value(Self::default()) {
                    Ok(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
                    _ => Vec::new(),
                }
            }
        }
    };
}
impl_metrics_helpers!(ClusterMetrics);
