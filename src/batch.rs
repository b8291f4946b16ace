// This file contains the code for the amrlocus batch subcommand, which runs many clusters as
// parallel worker processes and then gathers their reports and metrics.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use colored::Colorize;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use crate::cluster::ClusterFiles;
use crate::error::{ClusterError, Result};
use crate::external_progs::{ExternalProgs, CLUSTER_PROGRAMS};
use crate::log::{section_header, explanation};
use crate::metrics::ClusterMetrics;
use crate::misc::{check_if_file_exists, create_dir, delete_file_if_exists, format_duration,
                  progress_bar, quit_with_error};
use crate::ref_data::RefData;
use crate::report::{load_report, write_report, ReportRow};
use crate::settings::{ClusterSettings, SettingOverrides};


pub fn batch(batch_file: PathBuf, ref_fasta: PathBuf, ref_metadata: PathBuf, out_dir: PathBuf,
             settings_file: Option<PathBuf>, overrides: SettingOverrides, jobs: usize) {
    let start_time = Instant::now();
    check_settings(&batch_file, &ref_fasta, &ref_metadata, jobs);
    starting_message();
    let settings = ClusterSettings::from_cli(settings_file.as_deref(), &overrides)
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));
    print_settings(&batch_file, &out_dir, jobs, &settings);
    let entries = load_batch_file(&batch_file).unwrap_or_else(|e| quit_with_error(&e.to_string()));
    let ref_data = RefData::load(&ref_fasta, &ref_metadata)
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));
    check_ref_names(&entries, &ref_data);
    let progs = ExternalProgs::resolve(CLUSTER_PROGRAMS, &settings.program_paths)
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));
    let inputs = prepare_workers(&out_dir, &ref_fasta, &ref_metadata, &settings, &progs)
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));
    let outcomes = run_workers(&inputs, &entries, jobs);
    let names: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
    let combined_report = out_dir.join("report.tsv");
    let metrics_tsv = out_dir.join("metrics.tsv");
    combine_results(&out_dir, &names, &combined_report, &metrics_tsv)
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));
    finished_message(&outcomes, &combined_report, &metrics_tsv, start_time);
}


fn check_settings(batch_file: &Path, ref_fasta: &Path, ref_metadata: &Path, jobs: usize) {
    check_if_file_exists(batch_file);
    check_if_file_exists(ref_fasta);
    check_if_file_exists(ref_metadata);
    if jobs < 1 { quit_with_error("--jobs must be at least 1"); }
}


fn starting_message() {
    section_header("Starting amrlocus batch");
    explanation("This command runs local assembly and variant calling for each cluster in the \
                 batch file. Each cluster runs in its own worker process, and the results are \
                 then combined into one report.");
}


fn print_settings(batch_file: &Path, out_dir: &Path, jobs: usize, settings: &ClusterSettings) {
    eprintln!("Settings:");
    eprintln!("  --batch_file {}", batch_file.display());
    eprintln!("  --out_dir {}", out_dir.display());
    eprintln!("  --jobs {}", jobs);
    eprintln!("  --threads {}", settings.threads);
    for line in settings.describe() {
        eprintln!("  {}", line);
    }
    eprintln!();
}


fn finished_message(outcomes: &[(String, Option<String>)], combined_report: &Path,
                    metrics_tsv: &Path, start_time: Instant) {
    let failed: Vec<_> = outcomes.iter().filter_map(|(name, f)| f.as_ref().map(|f| (name, f)))
        .collect();
    section_header("Finished!");
    eprintln!("Clusters run: {}", outcomes.len());
    if failed.is_empty() {
        eprintln!("{}", "All clusters completed".green());
    } else {
        for (name, reason) in &failed {
            eprintln!("{}", format!("Cluster {} failed: {}", name, reason).red());
        }
    }
    eprintln!();
    eprintln!("Combined report: {}", combined_report.display());
    eprintln!("Metrics table:   {}", metrics_tsv.display());
    eprintln!("Time to run:     {}", format_duration(start_time.elapsed()));
    eprintln!();
    if !failed.is_empty() {
        quit_with_error(&format!("{} of {} clusters failed", failed.len(), outcomes.len()));
    }
}


/// One line of the batch file: cluster name, first reads, second reads and a comma-delimited
/// list of reference names.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchEntry {
    pub name: String,
    pub reads_1: PathBuf,
    pub reads_2: PathBuf,
    pub refs: Vec<String>,
}


pub fn load_batch_file(filename: &Path) -> Result<Vec<BatchEntry>> {
    let file = File::open(filename).map_err(|e| ClusterError::io(filename, e))?;
    let mut entries = Vec::new();
    let mut names = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| ClusterError::io(filename, e))?;
        if line.trim().is_empty() || line.starts_with('#') { continue; }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 4 {
            return Err(ClusterError::parse(filename, format!("expected 4 columns: {}", line)));
        }
        let refs: Vec<String> = parts[3].split(',').map(|r| r.trim()).filter(|r| !r.is_empty())
            .map(String::from).collect();
        if refs.is_empty() {
            return Err(ClusterError::parse(filename, format!("no references for {}", parts[0])));
        }
        if !names.insert(parts[0].to_string()) {
            return Err(ClusterError::parse(filename, format!("duplicate cluster {}", parts[0])));
        }
        entries.push(BatchEntry { name: parts[0].to_string(), reads_1: PathBuf::from(parts[1]),
                                  reads_2: PathBuf::from(parts[2]), refs });
    }
    Ok(entries)
}


fn check_ref_names(entries: &[BatchEntry], ref_data: &RefData) {
    let known: HashSet<&str> = ref_data.names().iter().map(|n| n.as_str()).collect();
    for entry in entries {
        for r in &entry.refs {
            if !known.contains(r.as_str()) {
                quit_with_error(&format!("cluster {} uses unknown reference {}", entry.name, r));
            }
        }
    }
}


/// Everything a worker process needs, written to disk once by the parent.
pub struct WorkerInputs {
    pub exe: PathBuf,
    pub out_dir: PathBuf,
    pub ref_fasta: PathBuf,
    pub ref_metadata: PathBuf,
    pub settings_yaml: PathBuf,
    pub programs_json: PathBuf,
}

impl WorkerInputs {
    pub fn cluster_dir(&self, name: &str) -> PathBuf { self.out_dir.join(name) }

    pub fn fail_file(&self, name: &str) -> PathBuf { self.out_dir.join(format!("{}.fail", name)) }

    pub fn stderr_file(&self, name: &str) -> PathBuf {
        self.out_dir.join(format!("{}.stderr", name))
    }

    pub fn command(&self, entry: &BatchEntry) -> Command {
        let mut command = Command::new(&self.exe);
        command.arg("cluster")
            .arg("--name").arg(&entry.name)
            .arg("--reads_1").arg(&entry.reads_1)
            .arg("--reads_2").arg(&entry.reads_2)
            .arg("--ref_fasta").arg(&self.ref_fasta)
            .arg("--ref_metadata").arg(&self.ref_metadata)
            .arg("--refs").arg(entry.refs.join(","))
            .arg("--out_dir").arg(self.cluster_dir(&entry.name))
            .arg("--settings").arg(&self.settings_yaml)
            .arg("--programs").arg(&self.programs_json)
            .arg("--fail_file").arg(self.fail_file(&entry.name));
        command
    }
}


fn prepare_workers(out_dir: &Path, ref_fasta: &Path, ref_metadata: &Path,
                   settings: &ClusterSettings, progs: &ExternalProgs) -> Result<WorkerInputs> {
    create_dir(out_dir)?;
    let settings_yaml = out_dir.join("settings.yaml");
    settings.save_yaml(&settings_yaml)?;
    let programs_json = out_dir.join("programs.json");
    progs.save_json(&programs_json)?;
    let exe = std::env::current_exe().map_err(|e| ClusterError::io(Path::new("amrlocus"), e))?;
    Ok(WorkerInputs { exe, out_dir: out_dir.to_path_buf(), ref_fasta: ref_fasta.to_path_buf(),
                      ref_metadata: ref_metadata.to_path_buf(), settings_yaml, programs_json })
}


fn run_workers(inputs: &WorkerInputs, entries: &[BatchEntry], jobs: usize)
        -> Vec<(String, Option<String>)> {
    section_header("Running clusters");
    explanation("Each cluster's log, report and metrics are saved in its own directory. A \
                 cluster's stderr output is saved next to its directory.");
    let pool = ThreadPoolBuilder::new().num_threads(jobs).build()
        .unwrap_or_else(|e| quit_with_error(&format!("could not build thread pool: {}", e)));
    let pb = progress_bar(entries.len() as u64, "clusters");
    let outcomes: Vec<(String, Option<String>)> = pool.install(|| {
        entries.par_iter().map(|entry| {  // one worker process per cluster, at most `jobs` at once
            let outcome = run_worker(inputs, entry);
            pb.inc(1);
            (entry.name.clone(), outcome)
        }).collect()
    });
    pb.finish_and_clear();
    outcomes
}


/// Runs one cluster in a child process. Returns the reason for failure, if it failed.
pub fn run_worker(inputs: &WorkerInputs, entry: &BatchEntry) -> Option<String> {
    let fail_file = inputs.fail_file(&entry.name);
    if let Err(e) = delete_file_if_exists(&fail_file) {
        return Some(e.to_string());
    }
    let stderr_file = inputs.stderr_file(&entry.name);
    let stderr = match File::create(&stderr_file) {
        Ok(f) => f,
        Err(e) => return Some(ClusterError::io(&stderr_file, e).to_string()),
    };
    let status = inputs.command(entry).stdout(Stdio::null()).stderr(stderr).status();
    match status {
        Ok(status) => worker_failure(status.success(), &fail_file),
        Err(e) => Some(format!("could not start worker: {}", e)),
    }
}


/// A worker failed if it left a fail marker or exited with a non-zero status. A worker killed by
/// a signal it cannot handle has no marker but still has a failing status.
fn worker_failure(exit_ok: bool, fail_file: &Path) -> Option<String> {
    if fail_file.exists() {
        Some(format!("fail marker {} found", fail_file.display()))
    } else if !exit_ok {
        Some("worker exited with non-zero status".to_string())
    } else {
        None
    }
}


/// Concatenates the clusters' reports into one and tabulates their metrics. Clusters without a
/// report or metrics file (i.e. failed ones) are skipped.
pub fn combine_results(out_dir: &Path, names: &[String], combined_report: &Path,
                       metrics_tsv: &Path) -> Result<()> {
    let mut rows: Vec<ReportRow> = Vec::new();
    let mut metrics = Vec::new();
    for name in names {
        let files = ClusterFiles::new(&out_dir.join(name));
        if files.report.is_file() {
            rows.extend(load_report(&files.report)?);
        }
        if files.metrics.is_file() {
            metrics.push(ClusterMetrics::load_from_yaml(&files.metrics)?);
        }
    }
    write_report(combined_report, &rows)?;
    write_metrics_table(metrics_tsv, &metrics)
}


fn write_metrics_table(filename: &Path, metrics: &[ClusterMetrics]) -> Result<()> {
    let file = File::create(filename).map_err(|e| ClusterError::io(filename, e))?;
    let mut writer = BufWriter::new(file);
    let fields = ClusterMetrics::get_field_names();
    writeln!(writer, "{}", fields.join("\t")).map_err(|e| ClusterError::io(filename, e))?;
    for m in metrics {
        let values: Vec<String> = fields.iter()
            .map(|f| m.get_val_by_name(f).unwrap_or_else(|| ".".to_string())).collect();
        writeln!(writer, "{}", values.join("\t")).map_err(|e| ClusterError::io(filename, e))?;
    }
    writer.flush().map_err(|e| ClusterError::io(filename, e))
}
