// This file contains the code for mapping all of a cluster's reads back to its assembly and
// calling variants from the pileup. Calls inside the part of the assembly which matches the
// reference suggest that the assembly collapsed a repeat.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::commands::{bcftools_call, bcftools_mpileup, bgzip, bowtie2_build, bowtie2_map,
                      run_checked, samtools_faidx, samtools_index, samtools_sort, tabix,
                      ToolRunner};
use crate::error::{ClusterError, Result};
use crate::external_progs::ExternalProgs;
use crate::log::ClusterLog;
use crate::misc::{delete_file_if_exists, open_maybe_gzipped, require_file};
use crate::settings::ClusterSettings;


/// The files made by mapping reads to the assembly and calling variants, all named from the BAM.
pub struct MappingFiles {
    pub sam: PathBuf,
    pub bam: PathBuf,
    pub bai: PathBuf,
    pub pileup_vcf: PathBuf,
    pub unfiltered_vcf: PathBuf,
    pub vcf: PathBuf,
    pub read_depths: PathBuf,
    pub read_depths_gz: PathBuf,
    pub read_depths_tbi: PathBuf,
}

impl MappingFiles {
    pub fn new(cluster_dir: &Path) -> Self {
        let bam = cluster_dir.join("assembly.reads_mapped.bam");
        let with = |suffix: &str| {
            let mut name = bam.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        };
        MappingFiles {
            sam: cluster_dir.join("assembly.reads_mapped.sam"),
            bai: with(".bai"),
            pileup_vcf: with(".pileup.vcf"),
            unfiltered_vcf: with(".unfiltered.vcf"),
            vcf: with(".vcf"),
            read_depths: with(".read_depths"),
            read_depths_gz: with(".read_depths.gz"),
            read_depths_tbi: with(".read_depths.gz.tbi"),
            bam,
        }
    }
}


/// Depth at one assembly position: the reference base, any alternative bases and the read
/// depth of each allele (reference first).
#[derive(Clone, Debug, PartialEq)]
pub struct ReadDepth {
    pub ref_base: String,
    pub alts: Vec<String>,
    pub depths: Vec<u32>,
}

impl ReadDepth {
    pub fn total(&self) -> u32 {
        self.depths.iter().sum()
    }

    pub fn alt_depths(&self) -> &[u32] {
        self.depths.get(1..).unwrap_or(&[])
    }
}


pub type ReadDepths = HashMap<(String, usize), ReadDepth>;


/// A variant call which passed the depth and quality filters. `pos` is 0-based.
#[derive(Clone, Debug, PartialEq)]
pub struct PileupCall {
    pub contig: String,
    pub pos: usize,
    pub ref_base: String,
    pub alt: String,
    pub depth: u32,
    pub alt_depth: u32,
    pub qual: f64,
}


#[derive(Clone, Debug, Default)]
pub struct PileupResult {
    pub calls: Vec<PileupCall>,
    pub read_depths: ReadDepths,
    pub total_depth_per_contig: BTreeMap<String, u64>,
}


/// Maps all reads to the assembly, giving a sorted and indexed BAM.
#[allow(clippy::too_many_arguments)]
pub fn map_reads(progs: &ExternalProgs, runner: &dyn ToolRunner, settings: &ClusterSettings,
                 log: &ClusterLog, reads_1: &Path, reads_2: &Path, assembly_fasta: &Path,
                 files: &MappingFiles) -> Result<()> {
    run_checked(runner, &bowtie2_build(progs, assembly_fasta, assembly_fasta)?, log)?;
    run_checked(runner, &bowtie2_map(progs, assembly_fasta, reads_1, reads_2, &files.sam,
                                     &settings.bowtie2_preset, settings.threads)?, log)?;
    run_checked(runner, &samtools_sort(progs, &files.sam, &files.bam, settings.threads)?, log)?;
    require_file(&files.bam)?;
    delete_file_if_exists(&files.sam)?;
    run_checked(runner, &samtools_index(progs, &files.bam)?, log)?;
    run_checked(runner, &samtools_faidx(progs, assembly_fasta)?, log)?;
    Ok(())
}


/// Runs the pileup and variant calling on the mapped reads. Any failure here is an error, as is
/// a missing output file.
pub fn call_variants(progs: &ExternalProgs, runner: &dyn ToolRunner, settings: &ClusterSettings,
                     log: &ClusterLog, assembly_fasta: &Path, files: &MappingFiles)
                     -> Result<PileupResult> {
    run_checked(runner, &bcftools_mpileup(progs, assembly_fasta, &files.bam, &files.pileup_vcf)?,
                log)?;
    require_file(&files.pileup_vcf)?;
    let depths = load_pileup_depths(&files.pileup_vcf)?;
    write_read_depths(&files.read_depths, &depths)?;
    run_checked(runner, &bgzip(progs, &files.read_depths)?, log)?;
    require_file(&files.read_depths_gz)?;
    run_checked(runner, &tabix(progs, &files.read_depths_gz)?, log)?;
    let read_depths = load_read_depths(&files.read_depths_gz)?;

    run_checked(runner, &bcftools_call(progs, &files.pileup_vcf, &files.unfiltered_vcf)?, log)?;
    require_file(&files.unfiltered_vcf)?;
    let calls = filter_calls(&files.unfiltered_vcf, &files.vcf, settings)?;
    delete_file_if_exists(&files.unfiltered_vcf)?;
    log.write(&format!("Variant calls passing filters: {}", calls.len()));

    let total_depth_per_contig = total_depth_per_contig(&read_depths);
    for (contig, depth) in &total_depth_per_contig {
        log.write(&format!("Total read depth on {}: {}", contig, depth));
    }
    Ok(PileupResult { calls, read_depths, total_depth_per_contig })
}


pub fn total_depth_per_contig(read_depths: &ReadDepths) -> BTreeMap<String, u64> {
    let mut totals = BTreeMap::new();
    for ((contig, _), depth) in read_depths {
        *totals.entry(contig.clone()).or_insert(0) += depth.total() as u64;
    }
    totals
}


/// True if any call lies in one of the given contig intervals (0-based, inclusive).
pub fn variants_in_coords(calls: &[PileupCall],
                          intervals: &BTreeMap<String, Vec<(usize, usize)>>) -> bool {
    calls.iter().any(|call| {
        intervals.get(&call.contig)
            .is_some_and(|ivs| ivs.iter().any(|&(s, e)| s <= call.pos && call.pos <= e))
    })
}


struct VcfLine<'a> {
    contig: &'a str,
    pos: usize,
    ref_base: &'a str,
    alts: Vec<&'a str>,
    qual: f64,
    is_indel: bool,
    info_dp: Option<u32>,
    ad: Vec<u32>,
}

impl<'a> VcfLine<'a> {
    fn parse(line: &'a str) -> std::result::Result<Self, String> {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 10 {
            return Err(format!("expected at least 10 VCF columns: {}", line));
        }
        let pos = parts[1].parse::<usize>().map_err(|_| format!("bad position: {}", parts[1]))?;
        let qual = parts[5].parse::<f64>().unwrap_or(0.0);
        let info_dp = parts[7].split(';')
            .find_map(|f| f.strip_prefix("DP="))
            .and_then(|v| v.parse::<u32>().ok());
        let ad = match parts[8].split(':').position(|f| f == "AD") {
            Some(i) => parts[9].split(':').nth(i).unwrap_or("")
                .split(',').filter_map(|v| v.parse::<u32>().ok()).collect(),
            None => Vec::new(),
        };
        let is_indel = parts[7].split(';').next() == Some("INDEL");
        Ok(VcfLine { contig: parts[0], pos: pos.saturating_sub(1), ref_base: parts[3],
                     alts: parts[4].split(',').collect(), qual, is_indel, info_dp, ad })
    }
}


fn vcf_data_lines(vcf: &Path) -> Result<Vec<String>> {
    let file = File::open(vcf).map_err(|e| ClusterError::io(vcf, e))?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| ClusterError::io(vcf, e))?;
        if !line.is_empty() && !line.starts_with('#') {
            lines.push(line);
        }
    }
    Ok(lines)
}


fn load_pileup_depths(pileup_vcf: &Path) -> Result<Vec<(String, usize, ReadDepth)>> {
    let mut depths = Vec::new();
    for line in vcf_data_lines(pileup_vcf)? {
        let vcf = VcfLine::parse(&line).map_err(|e| ClusterError::parse(pileup_vcf, e))?;
        // An indel record shares its POS with that position's base record, whose depths are
        // the ones kept.
        if vcf.is_indel || vcf.ref_base.len() > 1 { continue; }
        // The <*> allele stands for all unseen alleles and is left out.
        let mut alts = Vec::new();
        let mut allele_depths = vec![vcf.ad.first().copied().unwrap_or(0)];
        for (i, alt) in vcf.alts.iter().enumerate() {
            if *alt == "<*>" || *alt == "." { continue; }
            alts.push(alt.to_string());
            allele_depths.push(vcf.ad.get(i + 1).copied().unwrap_or(0));
        }
        depths.push((vcf.contig.to_string(), vcf.pos,
                     ReadDepth { ref_base: vcf.ref_base.to_string(), alts,
                                 depths: allele_depths }));
    }
    Ok(depths)
}


fn write_read_depths(filename: &Path, depths: &[(String, usize, ReadDepth)]) -> Result<()> {
    let file = File::create(filename).map_err(|e| ClusterError::io(filename, e))?;
    let mut writer = BufWriter::new(file);
    for (contig, pos, depth) in depths {
        let alts = if depth.alts.is_empty() { ".".to_string() } else { depth.alts.join(",") };
        let counts: Vec<String> = depth.depths.iter().map(|d| d.to_string()).collect();
        writeln!(writer, "{}\t{}\t{}\t{}\t{}", contig, pos + 1, depth.ref_base, alts,
                 counts.join(",")).map_err(|e| ClusterError::io(filename, e))?;
    }
    writer.flush().map_err(|e| ClusterError::io(filename, e))
}


/// Loads a (bgzipped) read depths file: contig, 1-based position, ref base, alt bases, depths.
pub fn load_read_depths(filename: &Path) -> Result<ReadDepths> {
    let reader = BufReader::new(open_maybe_gzipped(filename)?);
    let mut depths = ReadDepths::new();
    for line in reader.lines() {
        let line = line.map_err(|e| ClusterError::io(filename, e))?;
        if line.is_empty() { continue; }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 5 {
            return Err(ClusterError::parse(filename, format!("expected 5 columns: {}", line)));
        }
        let pos = parts[1].parse::<usize>()
            .map_err(|_| ClusterError::parse(filename, format!("bad position: {}", parts[1])))?;
        if parts[2].len() > 1 { continue; }
        let alts = if parts[3] == "." { Vec::new() }
                   else { parts[3].split(',').map(String::from).collect() };
        let counts = parts[4].split(',').map(|d| d.parse::<u32>())
            .collect::<std::result::Result<Vec<u32>, _>>()
            .map_err(|_| ClusterError::parse(filename, format!("bad depths: {}", parts[4])))?;
        depths.insert((parts[0].to_string(), pos.saturating_sub(1)),
                      ReadDepth { ref_base: parts[2].to_string(), alts, depths: counts });
    }
    Ok(depths)
}


/// Keeps the calls which pass the depth, alt depth, alt fraction and quality thresholds, writing
/// them (with the header) to `filtered_vcf`.
fn filter_calls(unfiltered_vcf: &Path, filtered_vcf: &Path, settings: &ClusterSettings)
        -> Result<Vec<PileupCall>> {
    let file = File::open(unfiltered_vcf).map_err(|e| ClusterError::io(unfiltered_vcf, e))?;
    let out = File::create(filtered_vcf).map_err(|e| ClusterError::io(filtered_vcf, e))?;
    let mut writer = BufWriter::new(out);
    let mut calls = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| ClusterError::io(unfiltered_vcf, e))?;
        if line.is_empty() { continue; }
        if !line.starts_with('#') {
            let vcf = VcfLine::parse(&line).map_err(|e| ClusterError::parse(unfiltered_vcf, e))?;
            let depth = vcf.info_dp.unwrap_or_else(|| vcf.ad.iter().sum());
            let alt_depth: u32 = vcf.ad.iter().skip(1).sum();
            let passes = depth >= settings.bcf_min_dp
                && alt_depth >= settings.bcf_min_dv
                && depth > 0
                && alt_depth as f64 / depth as f64 >= settings.bcf_min_dv_over_dp
                && vcf.qual >= settings.bcf_min_qual;
            if !passes { continue; }
            calls.push(PileupCall { contig: vcf.contig.to_string(), pos: vcf.pos,
                                    ref_base: vcf.ref_base.to_string(),
                                    alt: vcf.alts.join(","), depth, alt_depth,
                                    qual: vcf.qual });
        }
        writeln!(writer, "{}", line).map_err(|e| ClusterError::io(filtered_vcf, e))?;
    }
    writer.flush().map_err(|e| ClusterError::io(filtered_vcf, e))?;
    Ok(calls)
}
