// This file contains the code for choosing which of a cluster's reference sequences its reads
// match best.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::collections::HashMap;
use std::path::Path;

use crate::commands::{bowtie2_build, bowtie2_index_files, bowtie2_map, run_checked, ToolRunner};
use crate::error::Result;
use crate::external_progs::ExternalProgs;
use crate::log::ClusterLog;
use crate::misc::{delete_file_if_exists, load_fasta, write_fasta};
use crate::sam::{load_primary_records, SamRecord};


#[derive(Clone, Debug, Default, PartialEq)]
pub struct RefScore {
    pub reads: u64,
    pub score: i64,
}


/// Sums the alignment scores of mapped primary reads for each reference.
pub fn score_references(records: &[SamRecord]) -> HashMap<String, RefScore> {
    let mut scores: HashMap<String, RefScore> = HashMap::new();
    for record in records.iter().filter(|r| r.is_mapped()) {
        let entry = scores.entry(record.rname.clone()).or_default();
        entry.reads += 1;
        entry.score += record.alignment_score.unwrap_or(0);
    }
    scores
}


/// Picks the reference with the highest score from those with at least one read. Ties go to the
/// reference which comes first.
pub fn best_reference(names: &[String], scores: &HashMap<String, RefScore>) -> Option<String> {
    let mut best: Option<(&String, i64)> = None;
    for name in names {
        let Some(score) = scores.get(name) else { continue };
        if score.reads == 0 { continue; }
        match best {
            Some((_, best_score)) if best_score >= score.score => {},
            _ => best = Some((name, score.score)),
        }
    }
    best.map(|(name, _)| name.clone())
}


/// Chooses the reference the reads best represent and writes it alone to `out_fasta`. Returns
/// None when no reference has any reads, which is not an error.
#[allow(clippy::too_many_arguments)]
pub fn choose_reference(progs: &ExternalProgs, runner: &dyn ToolRunner, reads_1: &Path,
                        reads_2: &Path, references_fasta: &Path, work_dir: &Path,
                        out_fasta: &Path, preset: &str, threads: usize, log: &ClusterLog)
                        -> Result<Option<String>> {
    let references = load_fasta(references_fasta)?;
    let chosen = match references.len() {
        0 => None,
        1 => {
            log.write("Only one reference sequence, so choosing it without mapping reads");
            Some(references[0].0.clone())
        },
        _ => {
            let scores = map_and_score(progs, runner, reads_1, reads_2, references_fasta,
                                       work_dir, preset, threads, log)?;
            let names: Vec<String> = references.iter().map(|(n, _)| n.clone()).collect();
            for name in &names {
                let score = scores.get(name).cloned().unwrap_or_default();
                log.write(&format!("{}\treads: {}\tscore: {}", name, score.reads, score.score));
            }
            best_reference(&names, &scores)
        },
    };
    match &chosen {
        Some(name) => {
            log.write(&format!("Chose reference: {}", name));
            let seq = references.iter().find(|(n, _)| n == name).map(|(_, s)| s.clone())
                .unwrap_or_default();
            write_fasta(out_fasta, &[(name.clone(), seq)])?;
        },
        None => log.write("Could not choose a reference: no reads mapped to any reference"),
    }
    Ok(chosen)
}


#[allow(clippy::too_many_arguments)]
fn map_and_score(progs: &ExternalProgs, runner: &dyn ToolRunner, reads_1: &Path, reads_2: &Path,
                 references_fasta: &Path, work_dir: &Path, preset: &str, threads: usize,
                 log: &ClusterLog) -> Result<HashMap<String, RefScore>> {
    let index_prefix = work_dir.join("choose_ref.index");
    let sam = work_dir.join("choose_ref.sam");
    run_checked(runner, &bowtie2_build(progs, references_fasta, &index_prefix)?, log)?;
    run_checked(runner, &bowtie2_map(progs, &index_prefix, reads_1, reads_2, &sam, preset,
                                     threads)?, log)?;
    let scores = score_references(&load_primary_records(&sam)?);
    delete_file_if_exists(&sam)?;
    for file in bowtie2_index_files(&index_prefix) {
        delete_file_if_exists(&file)?;
    }
    Ok(scores)
}
