// This file contains the code that assigns read pairs to clusters, using a SAM file of the reads
// mapped against every reference sequence.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{ClusterError, Result};
use crate::log::{section_header, explanation};
use crate::misc::{check_if_file_exists, format_float, quit_with_error};
use crate::sam::{load_primary_records, pair_records};


pub fn classify(sam: PathBuf, cluster_map: Option<PathBuf>, out_yaml: Option<PathBuf>) {
    check_if_file_exists(&sam);
    if let Some(f) = &cluster_map { check_if_file_exists(f); }
    section_header("Starting amrlocus classify");
    explanation("This command assigns read pairs to clusters using a SAM file of the reads \
                 mapped to all reference sequences. Each pair counts towards every cluster its \
                 mates map to.");
    let cluster_of = match &cluster_map {
        Some(f) => load_cluster_map(f).unwrap_or_else(|e| quit_with_error(&e.to_string())),
        None => FxHashMap::default(),
    };
    let classification = classify_reads(&sam, &cluster_of)
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));
    if let Some(yaml) = &out_yaml {
        classification.save_to_yaml(yaml).unwrap_or_else(|e| quit_with_error(&e.to_string()));
    }
    print_classification(&classification);
    section_header("Finished!");
    if let Some(yaml) = &out_yaml {
        eprintln!("Classification: {}", yaml.display());
        eprintln!();
    }
}


fn print_classification(c: &ReadClassification) {
    println!("cluster\treads\tbases");
    for (cluster, reads) in &c.cluster_read_counts {
        let bases = c.cluster_base_counts.get(cluster).copied().unwrap_or(0);
        println!("{}\t{}\t{}", cluster, reads, bases);
    }
    eprintln!("Proper pairs:   {}", c.proper_pairs);
    eprintln!("Unmapped pairs: {}", c.unmapped_pairs);
    match c.insert_size_stats() {
        Some((mean, sd)) => eprintln!("Insert size:    {} +/- {}", format_float(mean),
                                      format_float(sd)),
        None => eprintln!("Insert size:    no proper pairs"),
    }
}


#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ReadClassification {
    pub cluster_read_counts: BTreeMap<String, u64>,
    pub cluster_base_counts: BTreeMap<String, u64>,
    pub proper_pairs: u64,
    pub unmapped_pairs: u64,
    pub insert_hist: BTreeMap<u64, u64>,
}

impl ReadClassification {
    /// Mean and standard deviation of the insert sizes of proper pairs.
    pub fn insert_size_stats(&self) -> Option<(f64, f64)> {
        let count: u64 = self.insert_hist.values().sum();
        if count == 0 {
            return None;
        }
        let n = count as f64;
        let mean = self.insert_hist.iter().map(|(&size, &c)| size as f64 * c as f64).sum::<f64>() / n;
        let variance = self.insert_hist.iter()
            .map(|(&size, &c)| c as f64 * (size as f64 - mean).powi(2)).sum::<f64>() / n;
        Some((mean, variance.sqrt()))
    }

    pub fn save_to_yaml(&self, filename: &Path) -> Result<()> {
        let text = serde_yaml::to_string(self)
            .map_err(|e| ClusterError::parse(filename, e.to_string()))?;
        fs::write(filename, text).map_err(|e| ClusterError::io(filename, e))
    }
}


/// Loads a two-column TSV of reference name and cluster name.
pub fn load_cluster_map(filename: &Path) -> Result<FxHashMap<String, String>> {
    let file = File::open(filename).map_err(|e| ClusterError::io(filename, e))?;
    let mut map = FxHashMap::default();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| ClusterError::io(filename, e))?;
        if line.trim().is_empty() || line.starts_with('#') { continue; }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 2 {
            return Err(ClusterError::parse(filename, format!("expected 2 columns: {}", line)));
        }
        map.insert(parts[0].to_string(), parts[1].to_string());
    }
    Ok(map)
}


/// Assigns each read pair with at least one mapped mate to every cluster its mates hit. A
/// reference missing from the cluster map is its own cluster.
pub fn classify_reads(sam: &Path, cluster_of: &FxHashMap<String, String>)
        -> Result<ReadClassification> {
    let mut classification = ReadClassification::default();
    for (read_1, read_2) in pair_records(sam, load_primary_records(sam)?)? {
        let clusters: BTreeSet<&str> = [&read_1, &read_2].into_iter()
            .filter(|r| r.is_mapped())
            .map(|r| cluster_of.get(&r.rname).unwrap_or(&r.rname).as_str())
            .collect();
        if clusters.is_empty() {
            classification.unmapped_pairs += 1;
            continue;
        }
        let bases = (read_1.seq_len + read_2.seq_len) as u64;
        for cluster in clusters {
            *classification.cluster_read_counts.entry(cluster.to_string()).or_default() += 2;
            *classification.cluster_base_counts.entry(cluster.to_string()).or_default() += bases;
        }
        if read_1.is_mapped() && read_2.is_mapped() && read_1.is_proper_pair()
                && read_1.rname == read_2.rname {
            classification.proper_pairs += 1;
            *classification.insert_hist.entry(read_1.tlen.unsigned_abs()).or_default() += 1;
        }
    }
    Ok(classification)
}


#[cfg(test)]
mod tests {
    use maplit::btreemap;
    use tempfile::tempdir;
    use crate::tests::{assert_almost_eq, make_test_file};
    use super::*;

    // Four pairs of 60 bp reads: a proper pair on ref1, an improper pair on ref1, a pair on ref2
    // with one mate unmapped and an unmapped pair.
    fn classify_sam() -> String {
        let seq = "ACGT".repeat(15);
        let qual = "I".repeat(60);
        let lines = [
            format!("read1\t99\tref1\t1\t42\t60M\t=\t721\t780\t{seq}\t{qual}"),
            format!("read1\t147\tref1\t721\t42\t60M\t=\t1\t-780\t{seq}\t{qual}"),
            format!("read2\t97\tref1\t101\t42\t60M\t=\t201\t0\t{seq}\t{qual}"),
            format!("read2\t145\tref1\t201\t42\t60M\t=\t101\t0\t{seq}\t{qual}"),
            format!("read3\t73\tref2\t11\t42\t60M\t=\t11\t0\t{seq}\t{qual}"),
            format!("read3\t133\tref2\t11\t0\t*\t=\t11\t0\t{seq}\t{qual}"),
            format!("read4\t77\t*\t0\t0\t*\t*\t0\t0\t{seq}\t{qual}"),
            format!("read4\t141\t*\t0\t0\t*\t*\t0\t0\t{seq}\t{qual}"),
        ];
        format!("@HD\tVN:1.0\tSO:unsorted\n@SQ\tSN:ref1\tLN:1000\n@SQ\tSN:ref2\tLN:1000\n{}\n",
                lines.join("\n"))
    }

    #[test]
    fn test_classify_reads() {
        let temp_dir = tempdir().unwrap();
        let sam = temp_dir.path().join("reads.sam");
        make_test_file(&sam, &classify_sam());
        let c = classify_reads(&sam, &FxHashMap::default()).unwrap();
        assert_eq!(c.cluster_read_counts, btreemap! { "ref1".to_string() => 4,
                                                      "ref2".to_string() => 2 });
        assert_eq!(c.cluster_base_counts, btreemap! { "ref1".to_string() => 240,
                                                      "ref2".to_string() => 120 });
        assert_eq!(c.proper_pairs, 1);
        assert_eq!(c.unmapped_pairs, 1);
        assert_eq!(c.insert_hist, btreemap! { 780 => 1 });
    }

    #[test]
    fn test_classify_with_cluster_map() {
        let temp_dir = tempdir().unwrap();
        let sam = temp_dir.path().join("reads.sam");
        make_test_file(&sam, &classify_sam());
        let map_file = temp_dir.path().join("clusters.tsv");
        make_test_file(&map_file, "ref1\tbla\nref2\tbla\n");
        let c = classify_reads(&sam, &load_cluster_map(&map_file).unwrap()).unwrap();
        assert_eq!(c.cluster_read_counts, btreemap! { "bla".to_string() => 6 });
        assert_eq!(c.cluster_base_counts, btreemap! { "bla".to_string() => 360 });
    }

    #[test]
    fn test_no_reads_map() {
        let temp_dir = tempdir().unwrap();
        let sam = temp_dir.path().join("reads.sam");
        make_test_file(&sam, "@HD\tVN:1.0\n\
                              r\t77\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII\n\
                              r\t141\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII\n");
        let c = classify_reads(&sam, &FxHashMap::default()).unwrap();
        assert!(c.cluster_read_counts.is_empty() && c.insert_hist.is_empty());
        assert_eq!(c.proper_pairs, 0);
        assert!(c.insert_size_stats().is_none());
    }

    #[test]
    fn test_insert_size_stats() {
        let c = ReadClassification { insert_hist: btreemap! { 400 => 1, 500 => 2, 600 => 1 },
                                     ..Default::default() };
        let (mean, sd) = c.insert_size_stats().unwrap();
        assert_almost_eq(mean, 500.0, 1e-9);
        assert_almost_eq(sd, 5000.0_f64.sqrt(), 1e-9);
    }

    #[test]
    fn test_save_to_yaml() {
        let temp_dir = tempdir().unwrap();
        let sam = temp_dir.path().join("reads.sam");
        make_test_file(&sam, &classify_sam());
        let yaml = temp_dir.path().join("classification.yaml");
        classify_reads(&sam, &FxHashMap::default()).unwrap().save_to_yaml(&yaml).unwrap();
        let text = std::fs::read_to_string(&yaml).unwrap();
        assert!(text.contains("proper_pairs: 1"));
        assert!(text.contains("ref1: 4"));
        assert!(text.contains("780: 1"));
    }

    #[test]
    fn test_bad_cluster_map() {
        let temp_dir = tempdir().unwrap();
        let map_file = temp_dir.path().join("clusters.tsv");
        make_test_file(&map_file, "ref1\tbla\textra\n");
        assert!(load_cluster_map(&map_file).is_err());
    }
}
