// This file contains the local assembler: SPAdes builds contigs from the cluster's reads, SSPACE
// scaffolds them (relaxing its link requirement when it fails for lack of links) and the scaffolds
// are renamed, oriented to match the reference and checked with a scaffold graph.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::commands::{bowtie2_build, bowtie2_map, nucmer, run_checked, run_unchecked, show_coords,
                      spades, sspace, ToolRunner};
use crate::error::{ClusterError, Result};
use crate::external_progs::ExternalProgs;
use crate::log::ClusterLog;
use crate::misc::{create_dir, load_fasta, require_file, reverse_complement_str, strand,
                  write_fasta};
use crate::nucmer::load_coords;
use crate::scaffold_graph::ScaffoldGraph;
use crate::settings::ClusterSettings;


#[derive(Clone, Debug, Default)]
pub struct AssemblyResult {
    pub assembled_ok: bool,
    pub contigs: Vec<(String, String)>,
    pub has_contigs_on_both_strands: bool,
    pub scaff_graph_ok: bool,
}

impl AssemblyResult {
    fn failed() -> Self {
        AssemblyResult { scaff_graph_ok: true, ..Default::default() }
    }
}


/// Paths inside the scratch Assembly directory.
pub struct AssemblyFiles {
    pub dir: PathBuf,
    pub spades_dir: PathBuf,
    pub spades_contigs: PathBuf,
    pub sspace_library: PathBuf,
    pub scaffolds: PathBuf,
    pub renamed: PathBuf,
    pub orient_prefix: PathBuf,
    pub orient_delta: PathBuf,
    pub orient_coords: PathBuf,
    pub index_prefix: PathBuf,
    pub sam: PathBuf,
}

const SSPACE_BASENAME: &str = "scaffolds";

impl AssemblyFiles {
    pub fn new(cluster_dir: &Path) -> Self {
        let dir = cluster_dir.join("Assembly");
        let spades_dir = dir.join("spades");
        AssemblyFiles {
            spades_contigs: spades_dir.join("contigs.fasta"),
            sspace_library: dir.join("sspace_library.txt"),
            scaffolds: dir.join(format!("{}.final.scaffolds.fasta", SSPACE_BASENAME)),
            renamed: dir.join("scaffolds.renamed.fa"),
            orient_prefix: dir.join("orient"),
            orient_delta: dir.join("orient.delta"),
            orient_coords: dir.join("orient.coords"),
            index_prefix: dir.join("assembly.index"),
            sam: dir.join("reads_for_assembly.sam"),
            spades_dir,
            dir,
        }
    }
}


/// Assembles the reads. Assembly-quality failures give `assembled_ok: false`. Errors are
/// reserved for environment failures such as a program which would not start.
#[allow(clippy::too_many_arguments)]
pub fn assemble(progs: &ExternalProgs, runner: &dyn ToolRunner, settings: &ClusterSettings,
                log: &ClusterLog, reads_1: &Path, reads_2: &Path, reference_fasta: &Path,
                ref_name: &str, cluster_dir: &Path, assembly_fasta: &Path)
                -> Result<AssemblyResult> {
    let files = AssemblyFiles::new(cluster_dir);
    create_dir(&files.dir)?;
    let reads_1 = absolute(reads_1)?;
    let reads_2 = absolute(reads_2)?;

    if !run_spades(progs, runner, settings, log, &reads_1, &reads_2, &files)? {
        return Ok(AssemblyResult::failed());
    }
    if !run_sspace(progs, runner, settings, log, &reads_1, &reads_2, &files)? {
        return Ok(AssemblyResult::failed());
    }

    let scaffolds = rename_scaffolds(load_fasta(&files.scaffolds)?, ref_name);
    write_fasta(&files.renamed, &scaffolds)?;
    let (contigs, has_contigs_on_both_strands) =
        orient_contigs(progs, runner, settings, log, reference_fasta, scaffolds, &files)?;
    write_fasta(assembly_fasta, &contigs)?;
    log.write(&format!("Assembly has {} contig{}", contigs.len(),
                       if contigs.len() == 1 { "" } else { "s" }));
    if has_contigs_on_both_strands {
        log.write("A contig hits the reference on both strands");
    }

    let scaff_graph_ok = check_scaffold_graph(progs, runner, settings, log, &reads_1, &reads_2,
                                              assembly_fasta, &contigs, &files)?;
    Ok(AssemblyResult { assembled_ok: true, contigs, has_contigs_on_both_strands,
                        scaff_graph_ok })
}


fn absolute(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|e| ClusterError::io(path, e))
}


fn run_spades(progs: &ExternalProgs, runner: &dyn ToolRunner, settings: &ClusterSettings,
              log: &ClusterLog, reads_1: &Path, reads_2: &Path, files: &AssemblyFiles)
              -> Result<bool> {
    let invocation = spades(progs, reads_1, reads_2, &files.spades_dir, settings.assembly_kmer,
                            settings.threads, settings.spades_other_options.as_deref())?;
    let output = run_unchecked(runner, &invocation, log)?;
    if !output.success {
        log.write("SPAdes failed, so the assembly failed");
        return Ok(false);
    }
    if !files.spades_contigs.is_file() || load_fasta(&files.spades_contigs)?.is_empty() {
        log.write("SPAdes made no contigs, so the assembly failed");
        return Ok(false);
    }
    Ok(true)
}


/// SSPACE messages for too few read pairs linking contigs, which a lower -k might fix.
const RECOVERABLE_SSPACE_ERRORS: [&str; 4] = ["insufficient links", "insufficient coverage",
                                              "not enough links", "no links found"];

fn is_recoverable_sspace_failure(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    RECOVERABLE_SSPACE_ERRORS.iter().any(|m| stderr.contains(m))
}


fn run_sspace(progs: &ExternalProgs, runner: &dyn ToolRunner, settings: &ClusterSettings,
              log: &ClusterLog, reads_1: &Path, reads_2: &Path, files: &AssemblyFiles)
              -> Result<bool> {
    let library = format!("lib1 bowtie {} {} {} {} FR\n", reads_1.display(), reads_2.display(),
                          settings.reads_insert, settings.sspace_sd);
    fs::write(&files.sspace_library, library)
        .map_err(|e| ClusterError::io(&files.sspace_library, e))?;
    let contigs = absolute(&files.spades_contigs)?;

    let mut min_links = settings.sspace_k;
    for attempt in 0..=settings.scaffolder_retries {
        if attempt > 0 {
            min_links = (min_links / 2).max(1);
            log.write(&format!("Retrying SSPACE with -k {}", min_links));
        }
        let invocation = sspace(progs, &files.sspace_library, &contigs, &files.dir,
                                SSPACE_BASENAME, min_links)?;
        let output = run_unchecked(runner, &invocation, log)?;
        if !output.success && !is_recoverable_sspace_failure(&output.stderr) {
            return Err(ClusterError::ToolFailed {
                program: invocation.program.clone(),
                code: output.code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()),
                command: invocation.command_line(),
                stderr: output.stderr });
        }
        if output.success && files.scaffolds.is_file() && !load_fasta(&files.scaffolds)?.is_empty() {
            return Ok(true);
        }
    }
    log.write(&format!("SSPACE failed after {} attempt{}, so the assembly failed",
                       settings.scaffolder_retries + 1,
                       if settings.scaffolder_retries == 0 { "" } else { "s" }));
    Ok(false)
}


pub fn rename_scaffolds(scaffolds: Vec<(String, String)>, ref_name: &str) -> Vec<(String, String)> {
    scaffolds.into_iter().enumerate()
        .map(|(i, (_, seq))| (format!("{}.scaffold.{}", ref_name, i + 1), seq))
        .collect()
}


/// Aligns the contigs to the reference, reverse complementing each contig whose hits are all on
/// the reverse strand. Also returns whether any contig hits both strands.
fn orient_contigs(progs: &ExternalProgs, runner: &dyn ToolRunner, settings: &ClusterSettings,
                  log: &ClusterLog, reference_fasta: &Path, contigs: Vec<(String, String)>,
                  files: &AssemblyFiles) -> Result<(Vec<(String, String)>, bool)> {
    run_checked(runner, &nucmer(progs, reference_fasta, &files.renamed, &files.orient_prefix,
                                settings.nucmer_breaklen)?, log)?;
    require_file(&files.orient_delta)?;
    run_checked(runner, &show_coords(progs, &files.orient_delta, &files.orient_coords)?, log)?;
    let hits = load_coords(&files.orient_coords)?;

    let mut strands: HashMap<&str, (bool, bool)> = HashMap::new();
    for hit in &hits {
        let entry = strands.entry(hit.qry_name.as_str()).or_default();
        if hit.on_same_strand() == strand::FORWARD { entry.0 = true; } else { entry.1 = true; }
    }
    let both_strands = strands.values().any(|&(f, r)| f && r);
    let oriented = contigs.into_iter().map(|(name, seq)| {
        match strands.get(name.as_str()) {
            Some(&(false, true)) => {
                log.write(&format!("Reverse complementing {}", name));
                let seq = reverse_complement_str(&seq);
                (name, seq)
            },
            _ => (name, seq),
        }
    }).collect();
    Ok((oriented, both_strands))
}


#[allow(clippy::too_many_arguments)]
fn check_scaffold_graph(progs: &ExternalProgs, runner: &dyn ToolRunner,
                        settings: &ClusterSettings, log: &ClusterLog, reads_1: &Path,
                        reads_2: &Path, assembly_fasta: &Path, contigs: &[(String, String)],
                        files: &AssemblyFiles) -> Result<bool> {
    run_checked(runner, &bowtie2_build(progs, assembly_fasta, &files.index_prefix)?, log)?;
    run_checked(runner, &bowtie2_map(progs, &files.index_prefix, reads_1, reads_2, &files.sam,
                                     &settings.bowtie2_preset, settings.threads)?, log)?;
    let lengths: HashMap<String, usize> = contigs.iter()
        .map(|(n, s)| (n.clone(), s.len())).collect();
    let graph = ScaffoldGraph::from_sam(&files.sam, &lengths, settings.max_insert as usize)?;
    let ok = graph.is_consistent(settings.min_scaff_depth);
    let links = graph.to_string();
    if !links.is_empty() {
        log.write(&format!("Scaffold graph links:\n{}", links.trim_end()));
    }
    log.write(if ok { "Scaffold graph is OK" } else { "Scaffold graph is bad" });
    Ok(ok)
}


#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::tempdir;
    use crate::commands::{Invocation, ToolOutput};
    use crate::tests::{fake_progs, make_test_file, write_tool_output, FakeRunner};
    use super::*;

    const CONTIGS: &str = ">NODE_1\nACGTACGTACGTACGT\n>NODE_2\nGGGGTTTTAAAACCCA\n";

    // Scaffold 1 hits forward, scaffold 2 only in reverse.
    const ORIENT_COORDS: &str = "1\t16\t1\t16\t16\t16\t100.00\t40\t16\t1\t1\tref\tref1.scaffold.1\n\
                                 17\t32\t16\t1\t16\t16\t100.00\t40\t16\t1\t-1\tref\tref1.scaffold.2\n";

    fn sspace_output(inv: &Invocation, contents: &str) {
        let dir = inv.cwd.clone().unwrap();
        make_test_file(&dir.join("scaffolds.final.scaffolds.fasta"), contents);
    }

    fn assembler_runner(sspace_failures: usize, failure_stderr: &'static str) -> (FakeRunner, Rc<Cell<usize>>) {
        let count = Rc::new(Cell::new(0));
        let sspace_count = Rc::clone(&count);
        let runner = FakeRunner::new()
            .on("spades.py", |inv| {
                let out_dir = inv.value_of("-o").unwrap();
                std::fs::create_dir_all(&out_dir).unwrap();
                make_test_file(&out_dir.join("contigs.fasta"), CONTIGS);
                ToolOutput::ok()
            })
            .on("SSPACE_Basic_v2.0.pl", move |inv| {
                sspace_count.set(sspace_count.get() + 1);
                if sspace_count.get() <= sspace_failures {
                    return ToolOutput::failed(1, failure_stderr);
                }
                sspace_output(inv, CONTIGS);
                ToolOutput::ok()
            })
            .on("nucmer", |inv| {
                let mut delta = inv.value_of("-p").unwrap().into_os_string();
                delta.push(".delta");
                make_test_file(Path::new(&delta), "delta");
                ToolOutput::ok()
            })
            .on("show-coords", |inv| { write_tool_output(inv, ">", ORIENT_COORDS); ToolOutput::ok() })
            .on("bowtie2", |inv| { write_tool_output(inv, "-S", "@HD\tVN:1.0\n"); ToolOutput::ok() });
        (runner, count)
    }

    fn setup(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
        let r1 = dir.join("reads_for_assembly_1.fq");
        let r2 = dir.join("reads_for_assembly_2.fq");
        let reference = dir.join("reference.fa");
        make_test_file(&r1, "@r/1\nACGT\n+\nIIII\n");
        make_test_file(&r2, "@r/2\nACGT\n+\nIIII\n");
        make_test_file(&reference, ">ref\nACGT\n");
        (r1, r2, reference)
    }

    #[test]
    fn test_rename_scaffolds() {
        let renamed = rename_scaffolds(vec![("x".to_string(), "A".to_string()),
                                            ("y".to_string(), "C".to_string())], "ref1");
        assert_eq!(renamed, vec![("ref1.scaffold.1".to_string(), "A".to_string()),
                                 ("ref1.scaffold.2".to_string(), "C".to_string())]);
    }

    #[test]
    fn test_recoverable_failures() {
        assert!(is_recoverable_sspace_failure("Insufficient links to scaffold"));
        assert!(is_recoverable_sspace_failure("NOT ENOUGH LINKS between contigs"));
        assert!(!is_recoverable_sspace_failure("Can't locate Getopt/Std.pm"));
        assert!(!is_recoverable_sspace_failure("Could not read library file for links"));
        assert!(!is_recoverable_sspace_failure("bowtie not found; no coverage computed"));
    }

    #[test]
    fn test_assemble() {
        let temp_dir = tempdir().unwrap();
        let (r1, r2, reference) = setup(temp_dir.path());
        let assembly = temp_dir.path().join("assembly.fa");
        let (runner, _) = assembler_runner(0, "");
        let result = assemble(&fake_progs(), &runner, &ClusterSettings::default(),
                              &ClusterLog::sink(), &r1, &r2, &reference, "ref1", temp_dir.path(),
                              &assembly).unwrap();
        assert!(result.assembled_ok);
        assert!(!result.has_contigs_on_both_strands);
        assert!(result.scaff_graph_ok);
        assert_eq!(result.contigs,
                   vec![("ref1.scaffold.1".to_string(), "ACGTACGTACGTACGT".to_string()),
                        ("ref1.scaffold.2".to_string(), "TGGGTTTTAAAACCCC".to_string())]);
        assert_eq!(load_fasta(&assembly).unwrap(), result.contigs);

        let library = std::fs::read_to_string(temp_dir.path().join("Assembly/sspace_library.txt"))
            .unwrap();
        assert!(library.starts_with("lib1 bowtie /"));
        assert!(library.ends_with(" 500 0.4 FR\n"));
    }

    #[test]
    fn test_sspace_retry_relaxes_links() {
        let temp_dir = tempdir().unwrap();
        let (r1, r2, reference) = setup(temp_dir.path());
        let (runner, count) = assembler_runner(2, "insufficient links");
        let result = assemble(&fake_progs(), &runner, &ClusterSettings::default(),
                              &ClusterLog::sink(), &r1, &r2, &reference, "ref1", temp_dir.path(),
                              &temp_dir.path().join("assembly.fa")).unwrap();
        assert!(result.assembled_ok);
        assert_eq!(count.get(), 3);
        let k_values: Vec<String> = runner.calls().iter()
            .filter(|c| c.program == "SSPACE_Basic_v2.0.pl")
            .map(|c| c.value_of("-k").unwrap().display().to_string()).collect();
        assert_eq!(k_values, vec!["20", "10", "5"]);
    }

    #[test]
    fn test_sspace_retries_exhausted() {
        let temp_dir = tempdir().unwrap();
        let (r1, r2, reference) = setup(temp_dir.path());
        let (runner, count) = assembler_runner(10, "insufficient links");
        let result = assemble(&fake_progs(), &runner, &ClusterSettings::default(),
                              &ClusterLog::sink(), &r1, &r2, &reference, "ref1", temp_dir.path(),
                              &temp_dir.path().join("assembly.fa")).unwrap();
        assert!(!result.assembled_ok);
        assert!(result.contigs.is_empty());
        assert_eq!(count.get(), 4);
        assert_eq!(runner.call_count("nucmer"), 0);
    }

    #[test]
    fn test_sspace_crash_is_an_error() {
        let temp_dir = tempdir().unwrap();
        let (r1, r2, reference) = setup(temp_dir.path());
        let (runner, _) = assembler_runner(1, "Can't locate Getopt/Std.pm");
        let result = assemble(&fake_progs(), &runner, &ClusterSettings::default(),
                              &ClusterLog::sink(), &r1, &r2, &reference, "ref1", temp_dir.path(),
                              &temp_dir.path().join("assembly.fa"));
        assert!(matches!(result, Err(ClusterError::ToolFailed { .. })));
    }

    #[test]
    fn test_sspace_library_error_is_not_retried() {
        let temp_dir = tempdir().unwrap();
        let (r1, r2, reference) = setup(temp_dir.path());
        let (runner, count) = assembler_runner(1, "ERROR: bowtie not found, can't map links");
        let result = assemble(&fake_progs(), &runner, &ClusterSettings::default(),
                              &ClusterLog::sink(), &r1, &r2, &reference, "ref1", temp_dir.path(),
                              &temp_dir.path().join("assembly.fa"));
        assert!(matches!(result, Err(ClusterError::ToolFailed { .. })));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_spades_failure() {
        let temp_dir = tempdir().unwrap();
        let (r1, r2, reference) = setup(temp_dir.path());
        let runner = FakeRunner::new().on("spades.py", |_| ToolOutput::failed(255, "out of memory"));
        let result = assemble(&fake_progs(), &runner, &ClusterSettings::default(),
                              &ClusterLog::sink(), &r1, &r2, &reference, "ref1", temp_dir.path(),
                              &temp_dir.path().join("assembly.fa")).unwrap();
        assert!(!result.assembled_ok);
        assert_eq!(runner.call_count("SSPACE_Basic_v2.0.pl"), 0);

        // Exit status 0 but no contigs is a failure too.
        let runner = FakeRunner::new();
        let result = assemble(&fake_progs(), &runner, &ClusterSettings::default(),
                              &ClusterLog::sink(), &r1, &r2, &reference, "ref1", temp_dir.path(),
                              &temp_dir.path().join("assembly.fa")).unwrap();
        assert!(!result.assembled_ok);
    }

    #[test]
    fn test_hits_on_both_strands() {
        // Scaffold 2 hits the reference on both strands, so it is left as it is.
        let temp_dir = tempdir().unwrap();
        let (r1, r2, reference) = setup(temp_dir.path());
        let coords = "1\t16\t1\t16\t16\t16\t100.00\t40\t16\t1\t1\tref\tref1.scaffold.2\n\
                      20\t35\t16\t1\t16\t16\t100.00\t40\t16\t1\t-1\tref\tref1.scaffold.2\n";
        let (runner, _) = assembler_runner(0, "");
        let runner = runner.on("show-coords", move |inv| {
            write_tool_output(inv, ">", coords);
            ToolOutput::ok()
        });
        let result = assemble(&fake_progs(), &runner, &ClusterSettings::default(),
                              &ClusterLog::sink(), &r1, &r2, &reference, "ref1", temp_dir.path(),
                              &temp_dir.path().join("assembly.fa")).unwrap();
        assert!(result.assembled_ok);
        assert!(result.has_contigs_on_both_strands);
        assert_eq!(result.contigs[1].1, "GGGGTTTTAAAACCCA");
    }
}
