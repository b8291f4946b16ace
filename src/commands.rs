// This file contains the code for running external programs. Each tool gets one function which
// turns typed inputs into an argument vector. Parsing of the files the tools write lives elsewhere
// (sam.rs, nucmer.rs, pileup_variants.rs).

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{ClusterError, Result};
use crate::external_progs::ExternalProgs;
use crate::log::ClusterLog;
use crate::misc::format_float;


/// One external program call. `program` is the logical name (e.g. "bowtie2") and `exe` the
/// resolved executable.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub program: String,
    pub exe: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub stdout_to: Option<PathBuf>,
}

impl Invocation {
    pub fn new(progs: &ExternalProgs, program: &str) -> Result<Self> {
        Ok(Invocation { program: program.to_string(), exe: progs.exe(program)?.to_path_buf(),
                        args: Vec::new(), cwd: None, stdout_to: None })
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
            where I: IntoIterator<Item = S>, S: Into<OsString> {
        self.args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    pub fn cwd(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn stdout_to(mut self, filename: &Path) -> Self {
        self.stdout_to = Some(filename.to_path_buf());
        self
    }

    pub fn command_line(&self) -> String {
        let mut parts = vec![self.exe.display().to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        let mut line = parts.join(" ");
        if let Some(out) = &self.stdout_to {
            line.push_str(&format!(" > {}", out.display()));
        }
        line
    }

    /// The value following the given option, e.g. `value_of("-o")`.
    pub fn value_of(&self, option: &str) -> Option<PathBuf> {
        let i = self.args.iter().position(|a| a == option)?;
        self.args.get(i + 1).map(PathBuf::from)
    }
}


#[derive(Clone, Debug, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stderr: String,
}

impl ToolOutput {
    pub fn ok() -> Self {
        ToolOutput { success: true, code: Some(0), stderr: String::new() }
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        ToolOutput { success: false, code: Some(code), stderr: stderr.to_string() }
    }
}


/// Runs external programs. Calls block until the program finishes and there is no timeout.
pub trait ToolRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput>;
}


pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        let mut command = Command::new(&invocation.exe);
        command.args(&invocation.args).stdin(Stdio::null()).stderr(Stdio::piped());
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }
        match &invocation.stdout_to {
            Some(filename) => {
                let file = File::create(filename).map_err(|e| ClusterError::io(filename, e))?;
                command.stdout(Stdio::from(file));
            },
            None => { command.stdout(Stdio::null()); },
        }
        let output = command.output()
            .map_err(|e| ClusterError::ToolSpawn { program: invocation.program.clone(), source: e })?;
        Ok(ToolOutput { success: output.status.success(), code: output.status.code(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned() })
    }
}


fn run_logged(runner: &dyn ToolRunner, invocation: &Invocation, log: &ClusterLog)
        -> Result<ToolOutput> {
    log.write(&format!("Run: {}", invocation.command_line()));
    let output = runner.run(invocation)?;
    if !output.success {
        log.write(&format!("{} failed with status {}:\n{}", invocation.program,
                           exit_code_text(output.code), output.stderr));
    }
    Ok(output)
}


fn exit_code_text(code: Option<i32>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
}


/// Runs a program and turns a non-zero exit status into an error.
pub fn run_checked(runner: &dyn ToolRunner, invocation: &Invocation, log: &ClusterLog)
        -> Result<()> {
    let output = run_logged(runner, invocation, log)?;
    if output.success {
        Ok(())
    } else {
        Err(ClusterError::ToolFailed { program: invocation.program.clone(),
                                       code: exit_code_text(output.code),
                                       command: invocation.command_line(),
                                       stderr: output.stderr })
    }
}


/// Runs a program and returns its output whatever the exit status.
pub fn run_unchecked(runner: &dyn ToolRunner, invocation: &Invocation, log: &ClusterLog)
        -> Result<ToolOutput> {
    run_logged(runner, invocation, log)
}


pub fn bowtie2_build(progs: &ExternalProgs, fasta: &Path, index_prefix: &Path) -> Result<Invocation> {
    Ok(Invocation::new(progs, "bowtie2-build")?.arg(fasta).arg(index_prefix))
}


/// The files bowtie2-build writes for an index prefix.
pub fn bowtie2_index_files(index_prefix: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for suffix in ["1", "2", "3", "4", "rev.1", "rev.2"] {
        for ext in ["bt2", "bt2l"] {
            let mut name = index_prefix.as_os_str().to_owned();
            name.push(format!(".{}.{}", suffix, ext));
            files.push(PathBuf::from(name));
        }
    }
    files
}


pub fn bowtie2_map(progs: &ExternalProgs, index_prefix: &Path, reads_1: &Path, reads_2: &Path,
                   sam_out: &Path, preset: &str, threads: usize) -> Result<Invocation> {
    Ok(Invocation::new(progs, "bowtie2")?
        .arg("--reorder")
        .arg(format!("--{}", preset))
        .args(["-p", &threads.to_string()])
        .arg("-x").arg(index_prefix)
        .arg("-1").arg(reads_1)
        .arg("-2").arg(reads_2)
        .arg("-S").arg(sam_out))
}


pub fn samtools_sort(progs: &ExternalProgs, sam_in: &Path, bam_out: &Path, threads: usize)
        -> Result<Invocation> {
    Ok(Invocation::new(progs, "samtools")?
        .arg("sort")
        .args(["-@", &(threads.max(1) - 1).to_string()])
        .arg("-o").arg(bam_out)
        .arg(sam_in))
}


pub fn samtools_index(progs: &ExternalProgs, bam: &Path) -> Result<Invocation> {
    Ok(Invocation::new(progs, "samtools")?.arg("index").arg(bam))
}


pub fn samtools_faidx(progs: &ExternalProgs, fasta: &Path) -> Result<Invocation> {
    Ok(Invocation::new(progs, "samtools")?.arg("faidx").arg(fasta))
}


pub fn spades(progs: &ExternalProgs, reads_1: &Path, reads_2: &Path, out_dir: &Path, kmer: u32,
              threads: usize, other_options: Option<&str>) -> Result<Invocation> {
    let mut invocation = Invocation::new(progs, "spades.py")?
        .arg("-1").arg(reads_1)
        .arg("-2").arg(reads_2)
        .arg("-o").arg(out_dir)
        .args(["-k", &kmer.to_string()])
        .args(["-t", &threads.to_string()])
        .arg("--only-assembler");
    if let Some(options) = other_options {
        invocation = invocation.args(options.split_whitespace());
    }
    Ok(invocation)
}


/// SSPACE writes its output into the working directory, named from the `-b` basename.
pub fn sspace(progs: &ExternalProgs, library_file: &Path, contigs: &Path, work_dir: &Path,
              basename: &str, min_links: u32) -> Result<Invocation> {
    Ok(Invocation::new(progs, "SSPACE_Basic_v2.0.pl")?
        .arg("-l").arg(library_file)
        .arg("-s").arg(contigs)
        .args(["-k", &min_links.to_string()])
        .args(["-b", basename])
        .cwd(work_dir))
}


pub fn nucmer(progs: &ExternalProgs, reference: &Path, query: &Path, prefix: &Path,
              breaklen: u32) -> Result<Invocation> {
    Ok(Invocation::new(progs, "nucmer")?
        .arg("--maxmatch")
        .args(["-b", &breaklen.to_string()])
        .arg("-p").arg(prefix)
        .arg(reference)
        .arg(query))
}


pub fn delta_filter(progs: &ExternalProgs, delta: &Path, filtered: &Path, min_id: f64,
                    min_len: u32) -> Result<Invocation> {
    Ok(Invocation::new(progs, "delta-filter")?
        .args(["-i", &format_float(min_id)])
        .args(["-l", &min_len.to_string()])
        .arg(delta)
        .stdout_to(filtered))
}


pub fn show_coords(progs: &ExternalProgs, delta: &Path, coords_out: &Path) -> Result<Invocation> {
    Ok(Invocation::new(progs, "show-coords")?.arg("-dTlroH").arg(delta).stdout_to(coords_out))
}


pub fn show_snps(progs: &ExternalProgs, delta: &Path, snps_out: &Path) -> Result<Invocation> {
    Ok(Invocation::new(progs, "show-snps")?.arg("-ClrTH").arg(delta).stdout_to(snps_out))
}


pub fn bcftools_mpileup(progs: &ExternalProgs, reference: &Path, bam: &Path, vcf_out: &Path)
        -> Result<Invocation> {
    Ok(Invocation::new(progs, "bcftools")?
        .arg("mpileup")
        .args(["-a", "FORMAT/AD"])
        .args(["-d", "100000"])
        .arg("-f").arg(reference)
        .args(["-O", "v"])
        .arg("-o").arg(vcf_out)
        .arg(bam))
}


pub fn bcftools_call(progs: &ExternalProgs, pileup_vcf: &Path, vcf_out: &Path)
        -> Result<Invocation> {
    Ok(Invocation::new(progs, "bcftools")?
        .arg("call")
        .arg("-m")
        .arg("-v")
        .args(["-O", "v"])
        .arg("-o").arg(vcf_out)
        .arg(pileup_vcf))
}


pub fn bgzip(progs: &ExternalProgs, filename: &Path) -> Result<Invocation> {
    Ok(Invocation::new(progs, "bgzip")?.arg("-f").arg(filename))
}


pub fn tabix(progs: &ExternalProgs, gz_filename: &Path) -> Result<Invocation> {
    Ok(Invocation::new(progs, "tabix")?
        .arg("-f")
        .args(["-s", "1", "-b", "2", "-e", "2"])
        .arg(gz_filename))
}


#[cfg(test)]
mod tests {
    use super::*;

    fn progs() -> ExternalProgs {
        ExternalProgs::from_paths(&[("bowtie2", "bowtie2"), ("delta-filter", "delta-filter"),
                                    ("spades.py", "spades.py")])
    }

    #[test]
    fn test_bowtie2_map_args() {
        let inv = bowtie2_map(&progs(), Path::new("idx"), Path::new("r1.fq"), Path::new("r2.fq"),
                              Path::new("out.sam"), "very-sensitive-local", 2).unwrap();
        assert_eq!(inv.command_line(),
                   "bowtie2 --reorder --very-sensitive-local -p 2 -x idx -1 r1.fq -2 r2.fq -S out.sam");
        assert_eq!(inv.value_of("-S"), Some(PathBuf::from("out.sam")));
        assert_eq!(inv.value_of("-Q"), None);
    }

    #[test]
    fn test_delta_filter_stdout() {
        let inv = delta_filter(&progs(), Path::new("x.delta"), Path::new("x.filter"), 90.0, 20)
            .unwrap();
        assert_eq!(inv.command_line(), "delta-filter -i 90 -l 20 x.delta > x.filter");
    }

    #[test]
    fn test_spades_other_options() {
        let inv = spades(&progs(), Path::new("a"), Path::new("b"), Path::new("out"), 21, 1,
                         Some("--careful  --cov-cutoff auto")).unwrap();
        assert!(inv.command_line().ends_with("--only-assembler --careful --cov-cutoff auto"));
    }

    #[test]
    fn test_bowtie2_index_files() {
        let files = bowtie2_index_files(Path::new("dir/ref.fa"));
        assert_eq!(files.len(), 12);
        assert!(files.contains(&PathBuf::from("dir/ref.fa.1.bt2")));
        assert!(files.contains(&PathBuf::from("dir/ref.fa.rev.2.bt2l")));
    }

    #[test]
    fn test_missing_program() {
        assert!(samtools_index(&progs(), Path::new("x.bam")).is_err());
    }

    #[test]
    fn test_run_checked_failure() {
        struct Failing;
        impl ToolRunner for Failing {
            fn run(&self, _: &Invocation) -> Result<ToolOutput> {
                Ok(ToolOutput::failed(3, "boom"))
            }
        }
        let inv = Invocation::new(&progs(), "bowtie2").unwrap().arg("--help");
        let err = run_checked(&Failing, &inv, &ClusterLog::sink()).unwrap_err();
        assert!(matches!(&err, ClusterError::ToolFailed { code, stderr, .. }
                               if code == "3" && stderr == "boom"));
        assert!(!run_unchecked(&Failing, &inv, &ClusterLog::sink()).unwrap().success);
    }
}
