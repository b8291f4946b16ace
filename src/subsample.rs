// This file contains the code for subsampling read pairs down to a target depth before assembly.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use rand::{rngs::StdRng, Rng, SeedableRng};
use seq_io::fastq::Record;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{ClusterError, Result};
use crate::log::ClusterLog;
use crate::misc::{delete_file_if_exists, fastq_reader, format_float};


/// The number of reads (both mates counted) needed to reach the target coverage over the
/// reference padded by an insert on either side. Always even, so it counts whole pairs.
pub fn reads_wanted(coverage: u32, ref_length: usize, insert_size: u32,
                    mean_read_length: f64) -> u64 {
    if mean_read_length <= 0.0 {
        return 0;
    }
    let padded_length = ref_length as f64 + 2.0 * insert_size as f64;
    let wanted = (coverage as f64 * padded_length / mean_read_length).ceil() as u64;
    wanted + wanted % 2
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubsampleOutcome {
    Linked,
    Sampled { pairs_kept: u64 },
}


/// Writes reads for assembly. With enough reads to exceed the wanted count, pairs are drawn at
/// random (seeded, so reruns give the same result). Otherwise the outputs are symlinks to the
/// inputs.
#[allow(clippy::too_many_arguments)]
pub fn subsample_reads(reads_1: &Path, reads_2: &Path, out_1: &Path, out_2: &Path,
                       total_reads: u64, total_bases: u64, ref_length: usize, coverage: u32,
                       insert_size: u32, seed: u64, log: &ClusterLog) -> Result<SubsampleOutcome> {
    let mean_read_length = if total_reads == 0 { 0.0 }
                           else { total_bases as f64 / total_reads as f64 };
    let wanted = reads_wanted(coverage, ref_length, insert_size, mean_read_length);
    log.write(&format!("Total reads: {}, mean read length: {}, reads wanted for assembly: {}",
                       total_reads, format_float(mean_read_length), wanted));
    delete_file_if_exists(out_1)?;
    delete_file_if_exists(out_2)?;

    if wanted >= total_reads {
        log.write("Using all reads for assembly");
        link_file(reads_1, out_1)?;
        link_file(reads_2, out_2)?;
        return Ok(SubsampleOutcome::Linked);
    }

    let percent_wanted = 100.0 * wanted as f64 / total_reads as f64;
    log.write(&format!("Subsampling reads: keeping about {}% of pairs",
                       format_float(percent_wanted)));
    let pairs_kept = sample_pairs(reads_1, reads_2, out_1, out_2, percent_wanted, seed)?;
    log.write(&format!("Kept {} read pairs for assembly", pairs_kept));
    Ok(SubsampleOutcome::Sampled { pairs_kept })
}


fn sample_pairs(reads_1: &Path, reads_2: &Path, out_1: &Path, out_2: &Path,
                percent_wanted: f64, seed: u64) -> Result<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut reader_1 = fastq_reader(reads_1)?;
    let mut reader_2 = fastq_reader(reads_2)?;
    let mut writer_1 = BufWriter::new(File::create(out_1).map_err(|e| ClusterError::io(out_1, e))?);
    let mut writer_2 = BufWriter::new(File::create(out_2).map_err(|e| ClusterError::io(out_2, e))?);
    let mut kept = 0;
    loop {
        match (reader_1.next(), reader_2.next()) {
            (None, None) => break,
            (Some(r), None) => {
                let r = r.map_err(|e| ClusterError::parse(reads_1, e.to_string()))?;
                return Err(ClusterError::NoMate(String::from_utf8_lossy(r.head()).into_owned()));
            },
            (None, Some(r)) => {
                let r = r.map_err(|e| ClusterError::parse(reads_2, e.to_string()))?;
                return Err(ClusterError::NoMate(String::from_utf8_lossy(r.head()).into_owned()));
            },
            (Some(r1), Some(r2)) => {
                let r1 = r1.map_err(|e| ClusterError::parse(reads_1, e.to_string()))?;
                let r2 = r2.map_err(|e| ClusterError::parse(reads_2, e.to_string()))?;
                if rng.random_range(0..=100) as f64 <= percent_wanted {
                    write_fastq_record(&mut writer_1, &r1).map_err(|e| ClusterError::io(out_1, e))?;
                    write_fastq_record(&mut writer_2, &r2).map_err(|e| ClusterError::io(out_2, e))?;
                    kept += 1;
                }
            },
        }
    }
    writer_1.flush().map_err(|e| ClusterError::io(out_1, e))?;
    writer_2.flush().map_err(|e| ClusterError::io(out_2, e))?;
    Ok(kept)
}


fn write_fastq_record<W: Write, R: Record>(writer: &mut W, record: &R) -> std::io::Result<()> {
    writer.write_all(b"@")?;
    writer.write_all(record.head())?;
    writer.write_all(b"\n")?;
    writer.write_all(record.seq())?;
    writer.write_all(b"\n+\n")?;
    writer.write_all(record.qual())?;
    writer.write_all(b"\n")
}


fn link_file(target: &Path, link: &Path) -> Result<()> {
    let target = target.canonicalize().map_err(|e| ClusterError::io(target, e))?;
    std::os::unix::fs::symlink(&target, link).map_err(|e| ClusterError::io(link, e))
}


#[cfg(test)]
mod tests {
    use std::fs::read_to_string;
    use tempfile::tempdir;
    use crate::misc::fastq_stats;
    use crate::tests::make_test_file;
    use super::*;

    fn make_pairs(dir: &Path, count: usize) -> (std::path::PathBuf, std::path::PathBuf) {
        let r1 = dir.join("reads_1.fq");
        let r2 = dir.join("reads_2.fq");
        let mut text_1 = String::new();
        let mut text_2 = String::new();
        for i in 0..count {
            text_1.push_str(&format!("@read{}/1\nACGTACGTAC\n+\nIIIIIIIIII\n", i));
            text_2.push_str(&format!("@read{}/2\nGTACGTACGT\n+\nIIIIIIIIII\n", i));
        }
        make_test_file(&r1, &text_1);
        make_test_file(&r2, &text_2);
        (r1, r2)
    }

    #[test]
    fn test_reads_wanted() {
        // 50 * (1000 + 2 * 500) / 100 = 1000
        assert_eq!(reads_wanted(50, 1000, 500, 100.0), 1000);
        // 10 * 101 / 50 = 20.2 -> 21 -> 22
        assert_eq!(reads_wanted(10, 1, 50, 50.0), 22);
        assert_eq!(reads_wanted(10, 100, 0, 0.0), 0);
    }

    #[test]
    fn test_reads_wanted_is_monotonic() {
        let mut last = 0;
        for coverage in [1, 2, 5, 10, 20, 50, 100] {
            let wanted = reads_wanted(coverage, 900, 300, 150.0);
            assert!(wanted >= last);
            assert_eq!(wanted % 2, 0);
            last = wanted;
        }
        let mut last = 0;
        for ref_length in [0, 1, 10, 100, 999, 1000, 5000] {
            let wanted = reads_wanted(30, ref_length, 300, 150.0);
            assert!(wanted >= last);
            last = wanted;
        }
    }

    #[test]
    fn test_passthrough_when_too_few_reads() {
        let temp_dir = tempdir().unwrap();
        let (r1, r2) = make_pairs(temp_dir.path(), 5);
        let out_1 = temp_dir.path().join("reads_for_assembly_1.fq");
        let out_2 = temp_dir.path().join("reads_for_assembly_2.fq");
        let outcome = subsample_reads(&r1, &r2, &out_1, &out_2, 10, 100, 1000, 50, 500, 42,
                                      &ClusterLog::sink()).unwrap();
        assert_eq!(outcome, SubsampleOutcome::Linked);
        assert!(out_1.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(read_to_string(&out_1).unwrap(), read_to_string(&r1).unwrap());
        assert_eq!(read_to_string(&out_2).unwrap(), read_to_string(&r2).unwrap());

        // Running again replaces the links.
        subsample_reads(&r1, &r2, &out_1, &out_2, 10, 100, 1000, 50, 500, 42,
                        &ClusterLog::sink()).unwrap();
        assert_eq!(read_to_string(&out_1).unwrap(), read_to_string(&r1).unwrap());
    }

    #[test]
    fn test_sampling_keeps_pairs_and_is_reproducible() {
        let temp_dir = tempdir().unwrap();
        let (r1, r2) = make_pairs(temp_dir.path(), 200);
        let out_1 = temp_dir.path().join("a_1.fq");
        let out_2 = temp_dir.path().join("a_2.fq");

        // 1 * (10 + 0) / 10 = 1 -> 2 reads wanted out of 400: about 0.5% of pairs.
        let outcome = subsample_reads(&r1, &r2, &out_1, &out_2, 400, 4000, 10, 1, 0, 7,
                                      &ClusterLog::sink()).unwrap();
        let pairs_kept = match outcome {
            SubsampleOutcome::Sampled { pairs_kept } => pairs_kept,
            SubsampleOutcome::Linked => panic!("expected sampling"),
        };
        assert!(pairs_kept < 200);
        let (count_1, _) = fastq_stats(&out_1).unwrap();
        let (count_2, _) = fastq_stats(&out_2).unwrap();
        assert_eq!(count_1, count_2);
        assert_eq!(count_1, pairs_kept);

        let first_run = read_to_string(&out_1).unwrap();
        subsample_reads(&r1, &r2, &out_1, &out_2, 400, 4000, 10, 1, 0, 7,
                        &ClusterLog::sink()).unwrap();
        assert_eq!(read_to_string(&out_1).unwrap(), first_run);
    }

    #[test]
    fn test_missing_mate() {
        let temp_dir = tempdir().unwrap();
        let (r1, _) = make_pairs(temp_dir.path(), 20);
        let r2 = temp_dir.path().join("short_2.fq");
        make_test_file(&r2, "@read0/2\nACGT\n+\nIIII\n");
        let out_1 = temp_dir.path().join("a_1.fq");
        let out_2 = temp_dir.path().join("a_2.fq");
        let result = subsample_reads(&r1, &r2, &out_1, &out_2, 21, 210, 10, 1, 0, 7,
                                     &ClusterLog::sink());
        assert!(matches!(result, Err(ClusterError::NoMate(name)) if name == "read1/1"));
    }
}
