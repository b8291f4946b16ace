// This is the main file of AmrLocus and where execution starts. It mainly handles the CLI and then
// calls into other files to run whichever subcommand the user chose.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::path::PathBuf;
use clap::{Args, Parser, Subcommand, crate_version};

mod assembly;
mod assembly_compare;
mod assembly_variants;
mod batch;
mod cancel;
mod cluster;
mod commands;
mod error;
mod external_progs;
mod flag;
mod log;
mod metrics;
mod misc;
mod nucmer;
mod pileup_variants;
mod read_classifier;
mod ref_chooser;
mod ref_data;
mod report;
mod sam;
mod scaffold_graph;
mod sequence;
mod settings;
mod subsample;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod test_data;

use settings::{HitTieBreak, SettingOverrides};

#[derive(Parser)]
#[clap(name = "AmrLocus",
       version = concat!("v", crate_version!()),
       about = "local assembly and variant calling for antimicrobial resistance gene clusters")]
#[command(author, version, long_about = None, disable_help_subcommand = true,
          propagate_version = true)]
#[clap(subcommand_required = true)]
#[clap(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}


/// Options shared by the cluster and batch subcommands which override the settings file.
#[derive(Args)]
struct OverrideArgs {
    /// YAML file of cluster settings [default: built-in settings]
    #[clap(short = 's', long = "settings")]
    settings: Option<PathBuf>,

    /// Number of CPU threads used by each cluster's tools
    #[clap(short = 't', long = "threads")]
    threads: Option<usize>,

    /// Seed for random number generator used in read subsampling
    #[clap(long = "seed")]
    seed: Option<u64>,

    /// Target read depth for assembly, used to subsample reads
    #[clap(long = "assembly_coverage")]
    assembly_coverage: Option<u32>,

    /// How to choose between nucmer hits with equal scores
    #[clap(long = "hit_tie_break", value_enum)]
    hit_tie_break: Option<HitTieBreak>,

    /// Keep intermediate files
    #[clap(long = "noclean")]
    noclean: bool,
}

impl OverrideArgs {
    fn split(self) -> (Option<PathBuf>, SettingOverrides) {
        (self.settings, SettingOverrides { threads: self.threads, random_seed: self.seed,
                                           assembly_coverage: self.assembly_coverage,
                                           hit_tie_break: self.hit_tie_break,
                                           no_clean: self.noclean })
    }
}


#[derive(Subcommand)]
enum Commands {

    /// run many clusters in parallel worker processes
    Batch {
        /// TSV of cluster name, reads 1, reads 2 and comma-delimited references (required)
        #[clap(short = 'b', long = "batch_file", required = true)]
        batch_file: PathBuf,

        /// FASTA file of all reference sequences (required)
        #[clap(short = 'r', long = "ref_fasta", required = true)]
        ref_fasta: PathBuf,

        /// TSV of reference metadata (required)
        #[clap(short = 'm', long = "ref_metadata", required = true)]
        ref_metadata: PathBuf,

        /// Output directory, one subdirectory per cluster (required)
        #[clap(short = 'o', long = "out_dir", required = true)]
        out_dir: PathBuf,

        /// Number of clusters to run at once
        #[clap(short = 'j', long = "jobs", default_value = "1")]
        jobs: usize,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// print the external programs AmrLocus uses and their versions
    #[command(name = "check_progs")]
    CheckProgs {
        /// YAML file of settings, used for its program_paths
        #[clap(short = 's', long = "settings")]
        settings: Option<PathBuf>,

        /// Output JSON to stdout instead of a table
        #[clap(long = "json")]
        json: bool,
    },

    /// assign mapped read pairs to clusters
    Classify {
        /// SAM file of reads mapped to all reference sequences (required)
        #[clap(short = 'i', long = "sam", required = true)]
        sam: PathBuf,

        /// TSV of reference name and cluster name [default: each reference is its own cluster]
        #[clap(short = 'c', long = "cluster_map")]
        cluster_map: Option<PathBuf>,

        /// YAML file where the classification will be saved
        #[clap(short = 'o', long = "out_yaml")]
        out_yaml: Option<PathBuf>,
    },

    /// run local assembly and variant calling for one cluster
    Cluster {
        /// Cluster name (required)
        #[clap(short = 'n', long = "name", required = true)]
        name: String,

        /// First reads of each pair in FASTQ format (required)
        #[clap(short = '1', long = "reads_1", required = true)]
        reads_1: PathBuf,

        /// Second reads of each pair in FASTQ format (required)
        #[clap(short = '2', long = "reads_2", required = true)]
        reads_2: PathBuf,

        /// FASTA file of reference sequences (required)
        #[clap(short = 'r', long = "ref_fasta", required = true)]
        ref_fasta: PathBuf,

        /// TSV of reference metadata (required)
        #[clap(short = 'm', long = "ref_metadata", required = true)]
        ref_metadata: PathBuf,

        /// Comma-delimited references in this cluster [default: all references]
        #[clap(long = "refs")]
        refs: Option<String>,

        /// Cluster directory (required)
        #[clap(short = 'o', long = "out_dir", required = true)]
        out_dir: PathBuf,

        /// JSON file of already resolved external programs
        #[clap(long = "programs")]
        programs: Option<PathBuf>,

        /// File created if the cluster fails
        #[clap(long = "fail_file")]
        fail_file: Option<PathBuf>,

        /// Log file [default: log.txt in the cluster directory]
        #[clap(long = "log_file")]
        log_file: Option<PathBuf>,

        #[command(flatten)]
        overrides: OverrideArgs,
    },
}


fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Batch { batch_file, ref_fasta, ref_metadata, out_dir, jobs, overrides }) => {
            let (settings, overrides) = overrides.split();
            batch::batch(batch_file, ref_fasta, ref_metadata, out_dir, settings, overrides, jobs);
        },
        Some(Commands::CheckProgs { settings, json }) => {
            external_progs::check_progs(settings, json);
        },
        Some(Commands::Classify { sam, cluster_map, out_yaml }) => {
            read_classifier::classify(sam, cluster_map, out_yaml);
        },
        Some(Commands::Cluster { name, reads_1, reads_2, ref_fasta, ref_metadata, refs, out_dir,
                                 programs, fail_file, log_file, overrides }) => {
            let (settings, overrides) = overrides.split();
            cluster::cluster(name, reads_1, reads_2, ref_fasta, ref_metadata, refs, out_dir,
                             settings, programs, fail_file, log_file, overrides);
        },
        None => {}
    }
}
