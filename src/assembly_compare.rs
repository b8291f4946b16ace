// This file contains the code for comparing a cluster's assembly to its chosen reference: how much
// of the reference was assembled, whether it was assembled cleanly and where the gene sits in the
// contigs.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::commands::{delta_filter, nucmer, run_checked, show_coords, show_snps, ToolRunner};
use crate::error::Result;
use crate::external_progs::ExternalProgs;
use crate::flag::{Flags, StatusFlag};
use crate::log::ClusterLog;
use crate::misc::{format_float, interval_total_length, merge_intervals, require_file,
                  reverse_complement_str, write_fasta};
use crate::nucmer::{compare_hits, load_coords, load_snps, NucmerHit, NucmerSnp};
use crate::ref_data::RefType;
use crate::sequence::{is_complete_gene, is_start_codon, is_stop_codon};
use crate::settings::{ClusterSettings, HitTieBreak};


/// Where a reference base landed in the assembly.
#[derive(Clone, Debug, PartialEq)]
pub struct ContigPos {
    pub contig: String,
    pub pos: usize,
    pub reverse: bool,
}


/// Reference position to assembly position, built from the alignment hits. Where hits overlap,
/// the preferred hit (by the tie-break policy) owns the base.
#[derive(Clone, Debug, Default)]
pub struct CoordTable {
    positions: Vec<Option<ContigPos>>,
}

impl CoordTable {
    pub fn build(hits: &[NucmerHit], snps: &[NucmerSnp], ref_length: usize,
                 tie_break: HitTieBreak) -> Self {
        let mut positions: Vec<Option<ContigPos>> = vec![None; ref_length];
        if ref_length == 0 {
            return CoordTable { positions };
        }
        let mut ordered: Vec<&NucmerHit> = hits.iter().collect();
        ordered.sort_by(|a, b| compare_hits(a, b, tie_break));
        for hit in ordered {
            let hit_snps: Vec<&NucmerSnp> = snps.iter()
                .filter(|s| s.qry_name == hit.qry_name && hit.covers_ref(s.ref_pos)).collect();
            let reverse = !hit.on_same_strand();
            for p in hit.ref_start..=hit.ref_end.min(ref_length - 1) {
                if positions[p].is_some() { continue; }
                if hit_snps.iter().any(|s| s.is_deletion() && s.ref_pos == p) { continue; }
                let inserted = hit_snps.iter().filter(|s| s.is_insertion() && s.ref_pos < p).count();
                let deleted = hit_snps.iter().filter(|s| s.is_deletion() && s.ref_pos < p).count();
                let offset = (p - hit.ref_start + inserted).checked_sub(deleted);
                let pos = match (offset, reverse) {
                    (Some(o), false) => Some(hit.qry_start + o),
                    (Some(o), true) => hit.qry_start.checked_sub(o),
                    (None, _) => None,
                };
                if let Some(pos) = pos {
                    positions[p] = Some(ContigPos { contig: hit.qry_name.clone(), pos, reverse });
                }
            }
        }
        CoordTable { positions }
    }

    pub fn get(&self, ref_pos: usize) -> Option<&ContigPos> {
        self.positions.get(ref_pos).and_then(|p| p.as_ref())
    }

    /// True if every base in the inclusive range is assembled, all in the same contig.
    pub fn covers(&self, start: usize, end: usize) -> bool {
        let first = match self.get(start) { Some(p) => p, None => return false };
        (start..=end).all(|i| self.get(i).is_some_and(|p| p.contig == first.contig))
    }
}


/// The gene as found in a contig. `start` and `end` are 0-based inclusive contig coordinates and
/// `seq` is in the gene's orientation.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneRegion {
    pub contig: String,
    pub start: usize,
    pub end: usize,
    pub reverse: bool,
    pub seq: String,
}


#[derive(Clone, Debug, Default)]
pub struct Comparison {
    pub hits: Vec<NucmerHit>,
    pub snps: Vec<NucmerSnp>,
    pub ref_length: usize,
    pub ref_bases_assembled: usize,
    pub percent_identity: f64,
    pub assembled: bool,
    pub assembled_into_one_contig: bool,
    pub region_assembled_twice: bool,
    pub unique_contig: bool,
    pub complete_gene: bool,
    pub coord_table: CoordTable,
    pub gene: Option<GeneRegion>,
}

impl Comparison {
    pub fn from_hits(ref_name: &str, ref_length: usize, ref_type: RefType,
                     contigs: &[(String, String)], hits: Vec<NucmerHit>, snps: Vec<NucmerSnp>,
                     settings: &ClusterSettings) -> Self {
        let hits: Vec<NucmerHit> = hits.into_iter().filter(|h| h.ref_name == ref_name).collect();
        let snps: Vec<NucmerSnp> = snps.into_iter().filter(|s| s.ref_name == ref_name).collect();
        let mut comparison = Comparison { ref_length, ..Default::default() };
        if hits.is_empty() || ref_length == 0 {
            comparison.hits = hits;
            return comparison;
        }

        let ref_intervals: Vec<(usize, usize)> = hits.iter().map(|h| h.ref_coords()).collect();
        comparison.ref_bases_assembled = interval_total_length(&ref_intervals);
        let fraction = |bases: usize| bases as f64 / ref_length as f64;
        comparison.assembled = fraction(comparison.ref_bases_assembled) >= settings.assembled_threshold;

        let hit_contigs: BTreeSet<&str> = hits.iter().map(|h| h.qry_name.as_str()).collect();
        comparison.assembled_into_one_contig = hit_contigs.iter().any(|contig| {
            let intervals: Vec<(usize, usize)> = hits.iter().filter(|h| h.qry_name == *contig)
                .map(|h| h.ref_coords()).collect();
            fraction(interval_total_length(&intervals)) >= settings.assembled_threshold
        });

        let mut depth = vec![0u32; ref_length];
        for h in &hits {
            for d in depth.iter_mut().take(h.ref_end.min(ref_length - 1) + 1).skip(h.ref_start) {
                *d += 1;
            }
        }
        let repeated = depth.iter().filter(|&&d| d > 1).count();
        comparison.region_assembled_twice = fraction(repeated) > settings.unique_threshold;
        comparison.unique_contig = hit_contigs.len() == 1 && !comparison.region_assembled_twice;

        let aligned: usize = hits.iter().map(|h| h.hit_length_ref).sum();
        comparison.percent_identity = if aligned == 0 { 0.0 } else {
            hits.iter().map(|h| h.percent_identity * h.hit_length_ref as f64).sum::<f64>()
                / aligned as f64
        };

        comparison.coord_table = CoordTable::build(&hits, &snps, ref_length,
                                                   settings.hit_tie_break);
        if ref_type.is_coding() {
            let best = hits.iter().min_by(|a, b| compare_hits(a, b, settings.hit_tie_break));
            if let Some(best) = best {
                if let Some((_, contig_seq)) = contigs.iter().find(|(n, _)| *n == best.qry_name) {
                    let gene = find_gene(best, ref_length, contig_seq, settings.max_gene_nt_extend);
                    comparison.complete_gene = is_complete_gene(gene.seq.as_bytes());
                    comparison.gene = Some(gene);
                }
            }
        }
        comparison.hits = hits;
        comparison.snps = snps;
        comparison
    }

    pub fn matched(&self) -> bool {
        !self.hits.is_empty()
    }

    pub fn set_flags(&self, flags: &mut Flags) {
        let pairs = [(self.assembled, StatusFlag::Assembled),
                     (self.assembled_into_one_contig, StatusFlag::AssembledIntoOneContig),
                     (self.region_assembled_twice, StatusFlag::RegionAssembledTwice),
                     (self.unique_contig, StatusFlag::UniqueContig),
                     (self.complete_gene, StatusFlag::CompleteGene)];
        for (set, flag) in pairs {
            if set { flags.add(flag); }
        }
    }

    /// The contig intervals (0-based, inclusive, merged) which align to the reference.
    pub fn contig_intervals(&self) -> BTreeMap<String, Vec<(usize, usize)>> {
        let mut intervals: BTreeMap<String, Vec<(usize, usize)>> = BTreeMap::new();
        for h in &self.hits {
            intervals.entry(h.qry_name.clone()).or_default().push(h.qry_coords());
        }
        intervals.into_iter().map(|(k, v)| (k, merge_intervals(v))).collect()
    }

    /// For each contig which hits the reference, the span of the contig covered by its hits,
    /// oriented to match the reference.
    pub fn assembled_reference_sequences(&self, ref_name: &str, contigs: &[(String, String)])
            -> Vec<(String, String)> {
        let mut seqs = Vec::new();
        for (contig, intervals) in self.contig_intervals() {
            let Some((_, contig_seq)) = contigs.iter().find(|(n, _)| *n == contig) else { continue };
            let start = intervals.first().map(|i| i.0).unwrap_or(0);
            let end = intervals.last().map(|i| i.1).unwrap_or(0)
                .min(contig_seq.len().saturating_sub(1));
            if contig_seq.is_empty() || start > end { continue; }
            let forward_bases: usize = self.hits.iter()
                .filter(|h| h.qry_name == contig && h.on_same_strand())
                .map(|h| h.hit_length_ref).sum();
            let reverse_bases: usize = self.hits.iter()
                .filter(|h| h.qry_name == contig && !h.on_same_strand())
                .map(|h| h.hit_length_ref).sum();
            let mut seq = contig_seq[start..=end].to_string();
            if reverse_bases > forward_bases {
                seq = reverse_complement_str(&seq);
            }
            seqs.push((format!("{}.{}.{}-{}", ref_name, contig, start + 1, end + 1), seq));
        }
        seqs
    }
}


/// Places the gene in the best hit's contig: the hit is extended to cover the whole reference,
/// then up to `max_extend` bases further to reach a start codon upstream and a stop codon
/// downstream. The search for a start codon gives up at an in-frame stop codon.
pub fn find_gene(hit: &NucmerHit, ref_length: usize, contig_seq: &str,
                 max_extend: usize) -> GeneRegion {
    let reverse = !hit.on_same_strand();
    let len = contig_seq.len();
    if len == 0 {
        return GeneRegion { contig: hit.qry_name.clone(), start: 0, end: 0, reverse,
                            seq: String::new() };
    }
    let oriented = if reverse { reverse_complement_str(contig_seq) } else { contig_seq.to_string() };
    let (qry_start, qry_end) = if reverse {
        (len.saturating_sub(1 + hit.qry_start), len.saturating_sub(1 + hit.qry_end))
    } else {
        (hit.qry_start, hit.qry_end)
    };

    // Extend to the reference ends, trimming back in whole codons if that runs off the contig.
    let mut start = qry_start as i64 - hit.ref_start as i64;
    let mut end = qry_end as i64 + (ref_length as i64 - 1 - hit.ref_end as i64);
    while start < 0 { start += 3; }
    while end > len as i64 - 1 { end -= 3; }
    if end < start {
        start = qry_start as i64;
        end = qry_end as i64;
    }
    let mut end = (end.max(0) as usize).min(len.saturating_sub(1));
    let mut start = (start.max(0) as usize).min(end);

    let s = oriented.as_bytes();
    if start + 3 <= len && !is_start_codon(&s[start..start + 3]) {
        let mut k = 3;
        while k <= max_extend && k <= start {
            let codon = &s[start - k..start - k + 3];
            if is_stop_codon(codon) { break; }
            if is_start_codon(codon) {
                start -= k;
                break;
            }
            k += 3;
        }
    }
    if end >= 2 && !is_stop_codon(&s[end - 2..=end]) {
        let mut k = 3;
        while k <= max_extend && end + k < len {
            if is_stop_codon(&s[end + k - 2..=end + k]) {
                end += k;
                break;
            }
            k += 3;
        }
    }

    let seq = oriented[start..=end].to_string();
    let (start, end) = if reverse { (len - 1 - end, len - 1 - start) } else { (start, end) };
    GeneRegion { contig: hit.qry_name.clone(), start, end, reverse, seq }
}


pub struct CompareFiles {
    pub delta: PathBuf,
    pub filtered_delta: PathBuf,
    pub coords: PathBuf,
    pub snps: PathBuf,
    pub assembled_seqs: PathBuf,
    pub assembled_genes: PathBuf,
}

impl CompareFiles {
    pub fn new(prefix: &Path) -> Self {
        let with = |suffix: &str| {
            let mut name = prefix.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        };
        CompareFiles { delta: with(".nucmer.delta"),
                       filtered_delta: with(".nucmer.delta.filter"),
                       coords: with(".nucmer.coords"),
                       snps: with(".nucmer.coords.snps"),
                       assembled_seqs: with(".assembled_seqs.fa"),
                       assembled_genes: with(".assembled_genes.fa") }
    }

    pub fn intermediates(&self) -> Vec<&Path> {
        vec![&self.delta, &self.filtered_delta, &self.coords, &self.snps]
    }
}


/// Aligns the assembly to the reference and compares them. No passing hits gives an unmatched
/// comparison, not an error.
#[allow(clippy::too_many_arguments)]
pub fn compare_assembly(progs: &ExternalProgs, runner: &dyn ToolRunner, settings: &ClusterSettings,
                        log: &ClusterLog, reference_fasta: &Path, assembly_fasta: &Path,
                        prefix: &Path, ref_name: &str, ref_length: usize, ref_type: RefType,
                        contigs: &[(String, String)]) -> Result<Comparison> {
    let files = CompareFiles::new(prefix);
    let mut nucmer_prefix = prefix.as_os_str().to_owned();
    nucmer_prefix.push(".nucmer");
    run_checked(runner, &nucmer(progs, reference_fasta, assembly_fasta,
                                Path::new(&nucmer_prefix), settings.nucmer_breaklen)?, log)?;
    require_file(&files.delta)?;
    run_checked(runner, &delta_filter(progs, &files.delta, &files.filtered_delta,
                                      settings.nucmer_min_id, settings.nucmer_min_len)?, log)?;
    run_checked(runner, &show_coords(progs, &files.filtered_delta, &files.coords)?, log)?;
    run_checked(runner, &show_snps(progs, &files.filtered_delta, &files.snps)?, log)?;
    let hits = load_coords(&files.coords)?;
    let snps = load_snps(&files.snps)?;

    let comparison = Comparison::from_hits(ref_name, ref_length, ref_type, contigs, hits, snps,
                                           settings);
    if !comparison.matched() {
        log.write("No nucmer hits between the assembly and the reference");
    } else {
        log.write(&format!("Reference bases assembled: {} / {} ({}% identity)",
                           comparison.ref_bases_assembled, ref_length,
                           format_float(comparison.percent_identity)));
    }
    write_fasta(&files.assembled_seqs, &comparison.assembled_reference_sequences(ref_name, contigs))?;
    let genes: Vec<(String, String)> = comparison.gene.iter()
        .map(|g| (format!("{}.{}.{}-{}", ref_name, g.contig, g.start + 1, g.end + 1), g.seq.clone()))
        .collect();
    write_fasta(&files.assembled_genes, &genes)?;
    Ok(comparison)
}
