// This file contains the cluster orchestrator: it owns one cluster's directory and runs it through
// reference choice, assembly, comparison to the reference, variant calling and reporting.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::assembly::{assemble, AssemblyFiles, AssemblyResult};
use crate::assembly_compare::{compare_assembly, CompareFiles, Comparison};
use crate::assembly_variants::{get_variants, has_nonsynonymous, VariantTable};
use crate::cancel::{write_fail_marker, CancelHook};
use crate::commands::{bowtie2_index_files, SystemRunner, ToolRunner};
use crate::error::{ClusterError, Result};
use crate::external_progs::{ExternalProgs, CLUSTER_PROGRAMS};
use crate::flag::{Flags, StatusFlag};
use crate::log::{banner, section_header, explanation, ClusterLog};
use crate::metrics::ClusterMetrics;
use crate::misc::{check_if_file_exists, create_dir, delete_dir_if_exists, delete_file_if_exists,
                  fastq_stats, load_fasta, open_maybe_gzipped, quit_with_error, require_file};
use crate::pileup_variants::{call_variants, map_reads, variants_in_coords, MappingFiles,
                             PileupResult};
use crate::ref_chooser::choose_reference;
use crate::ref_data::{KnownVariant, RefData, RefType, ReferenceLookup};
use crate::report::{assembly_failure_row, cluster_rows, ref_choose_failure_row, write_report,
                    ReportRow, RowContext};
use crate::settings::{ClusterSettings, SettingOverrides};
use crate::subsample::{subsample_reads, SubsampleOutcome};


#[allow(clippy::too_many_arguments)]
pub fn cluster(name: String, reads_1: PathBuf, reads_2: PathBuf, ref_fasta: PathBuf,
               ref_metadata: PathBuf, refs: Option<String>, out_dir: PathBuf,
               settings_file: Option<PathBuf>, programs_file: Option<PathBuf>,
               fail_file: Option<PathBuf>, log_file: Option<PathBuf>,
               overrides: SettingOverrides) {
    for f in [&reads_1, &reads_2, &ref_fasta, &ref_metadata] {
        check_if_file_exists(f);
    }
    starting_message();
    let settings = ClusterSettings::from_cli(settings_file.as_deref(), &overrides)
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));
    print_settings(&name, &out_dir, &settings);
    let ref_data = RefData::load(&ref_fasta, &ref_metadata)
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));
    let ref_names = cluster_ref_names(refs.as_deref(), ref_data.names())
        .unwrap_or_else(|e| quit_with_error(&e));
    let progs = match programs_file {
        Some(f) => ExternalProgs::load_json(&f),
        None => ExternalProgs::resolve(CLUSTER_PROGRAMS, &settings.program_paths),
    }.unwrap_or_else(|e| quit_with_error(&e.to_string()));

    let mut cluster = Cluster::new(&out_dir, &name, ref_names, settings, progs, ClusterLog::new(),
                                   fail_file);
    if let Some(log_file) = &log_file {
        cluster = cluster.with_log_file(log_file);
    }
    cluster.cancel_hook().install();
    let reads = FileReadSource { reads_1, reads_2 };
    if let Err(e) = cluster.run(&SystemRunner, &reads, &ref_data) {
        quit_with_error(&e.to_string());
    }
    finished_message(&cluster);
}


fn starting_message() {
    section_header("Starting amrlocus cluster");
    explanation("This command takes the reads and candidate reference sequences of one cluster. \
                 It chooses the closest reference, assembles the reads, compares the assembly to \
                 the reference and calls variants from both the assembly and the reads.");
}


fn print_settings(name: &str, out_dir: &Path, settings: &ClusterSettings) {
    eprintln!("Settings:");
    eprintln!("  --name {}", name);
    eprintln!("  --out_dir {}", out_dir.display());
    eprintln!("  --threads {}", settings.threads);
    for line in settings.describe() {
        eprintln!("  {}", line);
    }
    eprintln!();
}


fn finished_message(cluster: &Cluster) {
    section_header("Finished!");
    match &cluster.reference {
        Some(r) => eprintln!("Chosen reference: {}", r.name),
        None    => eprintln!("Chosen reference: none"),
    }
    eprintln!("Flag:   {} ({})", cluster.flags.to_bit_string(), cluster.flags);
    eprintln!("Report: {}", cluster.files.report.display());
    eprintln!("Log:    {}", cluster.files.log.display());
    eprintln!();
}


/// The cluster's references: the comma-delimited list if given, otherwise every reference.
fn cluster_ref_names(refs: Option<&str>, known: &[String])
        -> std::result::Result<BTreeSet<String>, String> {
    let names: BTreeSet<String> = match refs {
        Some(refs) => refs.split(',').map(|r| r.trim()).filter(|r| !r.is_empty())
            .map(String::from).collect(),
        None => known.iter().cloned().collect(),
    };
    if names.is_empty() {
        return Err("no reference sequences given for cluster".to_string());
    }
    if let Some(unknown) = names.iter().find(|n| !known.contains(n)) {
        return Err(format!("unknown reference sequence: {}", unknown));
    }
    Ok(names)
}


/// Supplies the reads of one cluster.
pub trait ReadSource {
    fn get_reads(&self, cluster_name: &str, out_1: &Path, out_2: &Path) -> Result<()>;
}


/// Reads which already sit in a pair of (possibly gzipped) FASTQ files.
pub struct FileReadSource {
    pub reads_1: PathBuf,
    pub reads_2: PathBuf,
}

impl ReadSource for FileReadSource {
    fn get_reads(&self, _cluster_name: &str, out_1: &Path, out_2: &Path) -> Result<()> {
        copy_reads(&self.reads_1, out_1)?;
        copy_reads(&self.reads_2, out_2)
    }
}

fn copy_reads(source: &Path, destination: &Path) -> Result<()> {
    let mut reader = open_maybe_gzipped(source)?;
    let mut writer = File::create(destination).map_err(|e| ClusterError::io(destination, e))?;
    io::copy(&mut reader, &mut writer).map_err(|e| ClusterError::io(destination, e))?;
    Ok(())
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterState {
    Init,
    InputStaged,
    RefChosen,
    RefChooseFailed,
    Assembled,
    AssemblyFailed,
    Mapped,
    Compared,
    VariantsExtracted,
    VariantsCalled,
    Reported,
    Cleaned,
}


#[derive(Clone, Debug)]
pub struct ChosenReference {
    pub name: String,
    pub seq: String,
    pub ref_type: RefType,
    pub known_variants: Vec<KnownVariant>,
}


pub struct ClusterFiles {
    pub reads_1: PathBuf,
    pub reads_2: PathBuf,
    pub references_fa: PathBuf,
    pub references_fai: PathBuf,
    pub reference_fa: PathBuf,
    pub reads_for_assembly_1: PathBuf,
    pub reads_for_assembly_2: PathBuf,
    pub assembly_dir: PathBuf,
    pub assembly_fa: PathBuf,
    pub assembly_fai: PathBuf,
    pub compare_prefix: PathBuf,
    pub mapping: MappingFiles,
    pub log: PathBuf,
    pub report: PathBuf,
    pub metrics: PathBuf,
}

impl ClusterFiles {
    pub fn new(dir: &Path) -> Self {
        ClusterFiles {
            reads_1: dir.join("reads_1.fq"),
            reads_2: dir.join("reads_2.fq"),
            references_fa: dir.join("references.fa"),
            references_fai: dir.join("references.fa.fai"),
            reference_fa: dir.join("reference.fa"),
            reads_for_assembly_1: dir.join("reads_for_assembly_1.fq"),
            reads_for_assembly_2: dir.join("reads_for_assembly_2.fq"),
            assembly_dir: AssemblyFiles::new(dir).dir,
            assembly_fa: dir.join("assembly.fa"),
            assembly_fai: dir.join("assembly.fa.fai"),
            compare_prefix: dir.join("assembly_compare"),
            mapping: MappingFiles::new(dir),
            log: dir.join("log.txt"),
            report: dir.join("report.tsv"),
            metrics: dir.join("cluster.yaml"),
        }
    }

    /// Everything the cleaning stage may delete, apart from the Assembly directory.
    fn intermediates(&self) -> Vec<PathBuf> {
        let mut files = vec![self.assembly_fa.clone(), self.assembly_fai.clone()];
        files.extend(bowtie2_index_files(&self.assembly_fa));
        files.extend(CompareFiles::new(&self.compare_prefix).intermediates().into_iter()
                     .map(Path::to_path_buf));
        let m = &self.mapping;
        files.extend([&m.sam, &m.bam, &m.bai, &m.vcf, &m.unfiltered_vcf, &m.pileup_vcf,
                      &m.read_depths, &m.read_depths_gz, &m.read_depths_tbi]
                     .into_iter().cloned());
        files.extend([&self.reads_1, &self.reads_2, &self.reads_for_assembly_1,
                      &self.reads_for_assembly_2, &self.reference_fa, &self.references_fa,
                      &self.references_fai].into_iter().cloned());
        files
    }
}


pub struct Cluster {
    pub name: String,
    pub dir: PathBuf,
    pub files: ClusterFiles,
    ref_names: BTreeSet<String>,
    settings: ClusterSettings,
    progs: ExternalProgs,
    log: ClusterLog,
    fail_file: Option<PathBuf>,

    pub state: ClusterState,
    pub flags: Flags,
    pub total_reads: u64,
    pub total_bases: u64,
    pub reads_for_assembly: u64,
    pub reference: Option<ChosenReference>,
    pub assembled_ok: bool,
    pub assembly: AssemblyResult,
    pub comparison: Comparison,
    pub variants: VariantTable,
    pub pileup: PileupResult,
    pub report_rows: Vec<ReportRow>,
}

impl Cluster {
    /// `ref_names` are the references in this cluster. The log is only opened once the run
    /// starts, so a Cluster can be built in one process and run in another.
    pub fn new(dir: &Path, name: &str, ref_names: BTreeSet<String>, settings: ClusterSettings,
               progs: ExternalProgs, log: ClusterLog, fail_file: Option<PathBuf>) -> Self {
        Cluster {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            files: ClusterFiles::new(dir),
            ref_names, settings, progs, log, fail_file,
            state: ClusterState::Init,
            flags: Flags::new(),
            total_reads: 0,
            total_bases: 0,
            reads_for_assembly: 0,
            reference: None,
            assembled_ok: false,
            assembly: AssemblyResult::default(),
            comparison: Comparison::default(),
            variants: VariantTable::new(),
            pileup: PileupResult::default(),
            report_rows: Vec::new(),
        }
    }

    pub fn with_log_file(mut self, log_file: &Path) -> Self {
        self.files.log = log_file.to_path_buf();
        self
    }

    /// The hook the caller should install so a termination signal still closes the log and leaves
    /// the fail marker.
    pub fn cancel_hook(&self) -> CancelHook {
        CancelHook { cluster_name: self.name.clone(), log: self.log.clone(),
                     fail_file: self.fail_file.clone() }
    }

    /// Runs the whole cluster. No matching reference and a failed assembly are normal outcomes
    /// recorded in the flags and report. Errors are for environment failures: they are written to
    /// the log, the fail marker is made and the error is returned.
    pub fn run(&mut self, runner: &dyn ToolRunner, reads: &dyn ReadSource,
               refs: &dyn ReferenceLookup) -> Result<()> {
        let setup = self.set_up_input_files(reads, refs)
            .and_then(|_| self.log.open(&self.files.log));
        if let Err(e) = setup {
            return Err(self.fail(e.in_stage(&self.name, "staging input")));
        }
        self.log.write(&banner(&format!("LOG FILE START {}", self.name)));
        match self.run_stages(runner, refs) {
            Ok(()) => {
                self.log.write("Finished");
                self.log.write(&banner(&format!("LOG FILE END {}", self.name)));
                self.log.close();
                Ok(())
            },
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&self, error: ClusterError) -> ClusterError {
        self.log.write(&format!("Error running cluster {}! Error was:\n{}", self.name, error));
        if let Some(fail_file) = &self.fail_file {
            write_fail_marker(fail_file, &self.log);
        }
        self.log.close();
        error
    }

    fn set_up_input_files(&mut self, reads: &dyn ReadSource, refs: &dyn ReferenceLookup)
            -> Result<()> {
        let f = &self.files;
        if self.dir.exists() {
            for filename in [&f.reads_1, &f.reads_2, &f.references_fa] {
                require_file(filename)?;
            }
        } else {
            create_dir(&self.dir)?;
            reads.get_reads(&self.name, &f.reads_1, &f.reads_2)?;
            refs.write_seqs_to_fasta(&f.references_fa, &self.ref_names)?;
        }
        let (count_1, bases_1) = fastq_stats(&f.reads_1)?;
        let (count_2, bases_2) = fastq_stats(&f.reads_2)?;
        self.total_reads = count_1 + count_2;
        self.total_bases = bases_1 + bases_2;
        self.state = ClusterState::InputStaged;
        Ok(())
    }

    fn run_stages(&mut self, runner: &dyn ToolRunner, refs: &dyn ReferenceLookup) -> Result<()> {
        let name = self.name.clone();
        self.log.write(&format!("Total reads: {}, total bases: {}",
                                self.total_reads, self.total_bases));

        self.log.write("Choosing best reference sequence:");
        let reference = self.choose_reference(runner, refs)
            .map_err(|e| e.in_stage(&name, "choosing reference"))?;
        match &reference {
            None => {
                self.flags.add(StatusFlag::RefSeqChooseFail);
                self.assembled_ok = false;
                self.state = ClusterState::RefChooseFailed;
            },
            Some(reference) => {
                self.log.write("Assembling reads:");
                self.run_assembly(runner, reference).map_err(|e| e.in_stage(&name, "assembly"))?;
            },
        }
        self.reference = reference;

        if self.assembled_ok {
            self.analyse_assembly(runner)?;
        } else {
            self.log.write("Assembly failed");
            self.flags.add(StatusFlag::AssemblyFail);
        }

        self.log.write("Making report lines");
        self.make_report().map_err(|e| e.in_stage(&name, "reporting"))?;
        self.clean().map_err(|e| e.in_stage(&name, "cleaning"))
    }

    fn choose_reference(&mut self, runner: &dyn ToolRunner, refs: &dyn ReferenceLookup)
            -> Result<Option<ChosenReference>> {
        let f = &self.files;
        let chosen = choose_reference(&self.progs, runner, &f.reads_1, &f.reads_2, &f.references_fa,
                                      &self.dir, &f.reference_fa, &self.settings.bowtie2_preset,
                                      self.settings.threads, &self.log)?;
        self.clean_file(&f.references_fa)?;
        self.clean_file(&f.references_fai)?;
        let Some(name) = chosen else { return Ok(None) };

        let seq = load_fasta(&f.reference_fa)?.into_iter().next().map(|(_, s)| s)
            .ok_or_else(|| ClusterError::parse(&f.reference_fa, "no sequence"))?;
        let ref_type = refs.sequence_type(&name).ok_or_else(|| {
            ClusterError::parse(&f.reference_fa, format!("no reference data for {}", name))
        })?;
        let known_variants = refs.known_variants(&name).to_vec();
        self.state = ClusterState::RefChosen;
        Ok(Some(ChosenReference { name, seq, ref_type, known_variants }))
    }

    fn run_assembly(&mut self, runner: &dyn ToolRunner, reference: &ChosenReference)
            -> Result<()> {
        let f = &self.files;
        let s = &self.settings;
        let outcome = subsample_reads(&f.reads_1, &f.reads_2, &f.reads_for_assembly_1,
                                      &f.reads_for_assembly_2, self.total_reads, self.total_bases,
                                      reference.seq.len(), s.assembly_coverage, s.reads_insert,
                                      s.random_seed, &self.log)?;
        let reads_for_assembly = match outcome {
            SubsampleOutcome::Linked => self.total_reads,
            SubsampleOutcome::Sampled { pairs_kept } => pairs_kept * 2,
        };
        self.log.write(&format!("Using {} from a total of {} reads for assembly",
                                reads_for_assembly, self.total_reads));

        let result = assemble(&self.progs, runner, s, &self.log, &f.reads_for_assembly_1,
                              &f.reads_for_assembly_2, &f.reference_fa, &reference.name,
                              &self.dir, &f.assembly_fa)?;
        self.clean_file(&f.reads_for_assembly_1)?;
        self.clean_file(&f.reads_for_assembly_2)?;
        if s.clean {
            self.log.write(&format!("Deleting Assembly directory {}", f.assembly_dir.display()));
            delete_dir_if_exists(&f.assembly_dir)?;
        }

        self.reads_for_assembly = reads_for_assembly;
        self.assembled_ok = result.assembled_ok;
        self.assembly = result;
        self.state = if self.assembled_ok { ClusterState::Assembled }
                     else { ClusterState::AssemblyFailed };
        Ok(())
    }

    /// Mapping, comparison and variant calling for an assembled cluster.
    fn analyse_assembly(&mut self, runner: &dyn ToolRunner) -> Result<()> {
        let name = self.name.clone();
        let Some(reference) = self.reference.clone() else { return Ok(()) };
        let f = &self.files;
        let s = &self.settings;

        self.log.write("Assembly was successful");
        self.log.write("Mapping reads to assembly:");
        map_reads(&self.progs, runner, s, &self.log, &f.reads_1, &f.reads_2, &f.assembly_fa,
                  &f.mapping).map_err(|e| e.in_stage(&name, "mapping reads"))?;
        if self.assembly.has_contigs_on_both_strands {
            self.flags.add(StatusFlag::HitBothStrands);
        }
        if !self.assembly.scaff_graph_ok {
            self.flags.add(StatusFlag::ScaffoldGraphBad);
        }
        self.state = ClusterState::Mapped;

        self.log.write("Comparing assembly against reference sequence");
        let comparison = compare_assembly(&self.progs, runner, s, &self.log, &f.reference_fa,
                                          &f.assembly_fa, &f.compare_prefix, &reference.name,
                                          reference.seq.len(), reference.ref_type,
                                          &self.assembly.contigs)
            .map_err(|e| e.in_stage(&name, "comparing assembly"))?;
        comparison.set_flags(&mut self.flags);
        self.state = ClusterState::Compared;

        let variants = get_variants(&reference.seq, reference.ref_type,
                                    &reference.known_variants, &comparison,
                                    &self.assembly.contigs);
        if has_nonsynonymous(&variants) {
            self.flags.add(StatusFlag::HasNonsynonymousVariants);
        }
        self.state = ClusterState::VariantsExtracted;

        self.log.write("Calling variants with bcftools:");
        let pileup = call_variants(&self.progs, runner, s, &self.log, &f.assembly_fa, &f.mapping)
            .map_err(|e| e.in_stage(&name, "calling variants"))?;
        if variants_in_coords(&pileup.calls, &comparison.contig_intervals()) {
            self.flags.add(StatusFlag::VariantsSuggestCollapsedRepeat);
        }
        self.state = ClusterState::VariantsCalled;

        self.comparison = comparison;
        self.variants = variants;
        self.pileup = pileup;
        Ok(())
    }

    fn make_report(&mut self) -> Result<()> {
        let rows = match &self.reference {
            None => vec![ref_choose_failure_row(&self.name, self.total_reads, self.flags)],
            Some(reference) => {
                let context = RowContext { cluster: &self.name, reads: self.total_reads,
                                           flags: self.flags, ref_name: &reference.name,
                                           ref_type: reference.ref_type,
                                           ref_len: reference.seq.len() };
                if self.assembled_ok {
                    cluster_rows(&context, &self.comparison, &self.assembly.contigs,
                                 &self.variants, &self.pileup)
                } else {
                    vec![assembly_failure_row(&context)]
                }
            },
        };
        write_report(&self.files.report, &rows)?;
        self.report_rows = rows;
        self.metrics().save_to_yaml(&self.files.metrics)?;
        self.log.write(&format!("Flag: {} ({})", self.flags.to_bit_string(), self.flags));
        self.state = ClusterState::Reported;
        Ok(())
    }

    pub fn metrics(&self) -> ClusterMetrics {
        ClusterMetrics {
            cluster_name: self.name.clone(),
            total_reads: self.total_reads,
            total_bases: self.total_bases,
            reads_for_assembly: self.reads_for_assembly,
            chosen_reference: self.reference.as_ref().map(|r| r.name.clone()),
            assembled: self.assembled_ok,
            flag: self.flags.to_bit_string(),
            contig_count: self.assembly.contigs.len(),
            total_depth_per_contig: self.pileup.total_depth_per_contig.clone(),
        }
    }

    fn clean(&mut self) -> Result<()> {
        if !self.settings.clean {
            self.log.write("   ... not deleting anything because cleaning is turned off");
        } else {
            for filename in self.files.intermediates() {
                self.clean_file(&filename)?;
            }
            if self.files.assembly_dir.is_dir() {
                self.log.write(&format!("Deleting Assembly directory {}",
                                        self.files.assembly_dir.display()));
                delete_dir_if_exists(&self.files.assembly_dir)?;
            }
        }
        self.state = ClusterState::Cleaned;
        Ok(())
    }

    fn clean_file(&self, filename: &Path) -> Result<()> {
        if self.settings.clean && delete_file_if_exists(filename)? {
            self.log.write(&format!("Deleting file {}", filename.display()));
        }
        Ok(())
    }
}
