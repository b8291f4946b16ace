// This file contains miscellaneous functions used by various parts of AmrLocus.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use flate2::read::MultiGzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use seq_io::fastq::{Reader, Record};
use std::collections::HashSet;
use std::fs::{File, create_dir_all, remove_dir_all, remove_file};
use std::io::{prelude::*, BufReader, BufWriter, Read};
use std::path::Path;
use std::time::Duration;

use crate::error::{ClusterError, Result};


pub mod strand {
    // This module lets me use strand::FORWARD for true and strand::REVERSE for false.
    pub const FORWARD: bool = true;
    pub const REVERSE: bool = false;
}


pub fn create_dir(dir_path: &Path) -> Result<()> {
    create_dir_all(dir_path).map_err(|e| ClusterError::io(dir_path, e))
}


pub fn delete_dir_if_exists(dir_path: &Path) -> Result<()> {
    if dir_path.exists() && dir_path.is_dir() {
        remove_dir_all(dir_path).map_err(|e| ClusterError::io(dir_path, e))?;
    }
    Ok(())
}


pub fn delete_file_if_exists(filename: &Path) -> Result<bool> {
    // Uses symlink_metadata so dangling symlinks are removed too.
    if filename.symlink_metadata().is_ok() {
        remove_file(filename).map_err(|e| ClusterError::io(filename, e))?;
        return Ok(true);
    }
    Ok(false)
}


pub fn require_file(filename: &Path) -> Result<()> {
    if filename.is_file() { Ok(()) } else { Err(ClusterError::MissingFile(filename.to_path_buf())) }
}


pub fn check_if_file_exists(filename: &Path) {
    // Quits with an error if the given path is not an existing file.
    if !filename.exists() {
        quit_with_error(&format!("file does not exist: {}", filename.display()));
    }
    if !filename.is_file() {
        quit_with_error(&format!("{} is not a file", filename.display()));
    }
}


#[cfg(not(test))]
pub fn quit_with_error(text: &str) -> ! {
    // For friendly error messages, this function normally just prints the error and quits.
    eprintln!();
    eprintln!("Error: {}", text);
    std::process::exit(1);
}
#[cfg(test)]
pub fn quit_with_error(text: &str) -> ! {
    // But when running unit tests, this function instead panics so I can catch it for the test.
    panic!("{}", text);
}


pub fn open_maybe_gzipped(filename: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(filename).map_err(|e| ClusterError::io(filename, e))?;
    if is_file_gzipped(filename)? {
        Ok(Box::new(MultiGzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}


fn is_file_gzipped(filename: &Path) -> Result<bool> {
    // Returns true if the file starts with the gzip magic bytes. Files shorter than two bytes
    // (including empty files) are not gzipped.
    let mut file = File::open(filename).map_err(|e| ClusterError::io(filename, e))?;
    let mut buf = [0u8; 2];
    let mut filled = 0;
    while filled < 2 {
        match file.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) => return Err(ClusterError::io(filename, e)),
        }
    }
    Ok(buf[0] == 31 && buf[1] == 139)
}


pub fn load_fasta(filename: &Path) -> Result<Vec<(String, String)>> {
    // Loads a FASTA file (gzipped or not) and returns a vector of name+sequence tuples, with
    // sequences in upper case. Names are the header up to the first whitespace.
    let reader = BufReader::new(open_maybe_gzipped(filename)?);
    let mut fasta_seqs = Vec::new();
    let mut name = String::new();
    let mut sequence = String::new();
    for line in reader.lines() {
        let text = line.map_err(|e| ClusterError::io(filename, e))?;
        if text.is_empty() { continue; }
        if let Some(header) = text.strip_prefix('>') {
            if !name.is_empty() {
                sequence.make_ascii_uppercase();
                fasta_seqs.push((name, sequence));
                sequence = String::new();
            }
            name = header.split_whitespace().next()
                .ok_or_else(|| ClusterError::parse(filename, "FASTA header has no name"))?
                .to_string();
        } else {
            if name.is_empty() {
                return Err(ClusterError::parse(filename, "sequence before first FASTA header"));
            }
            sequence.push_str(text.trim_end());
        }
    }
    if !name.is_empty() {
        sequence.make_ascii_uppercase();
        fasta_seqs.push((name, sequence));
    }
    let mut set = HashSet::new();
    for (name, _) in &fasta_seqs {
        if !set.insert(name) {
            return Err(ClusterError::parse(filename, format!("duplicate name: {}", name)));
        }
    }
    Ok(fasta_seqs)
}


pub fn write_fasta(filename: &Path, seqs: &[(String, String)]) -> Result<()> {
    let file = File::create(filename).map_err(|e| ClusterError::io(filename, e))?;
    let mut writer = BufWriter::new(file);
    for (name, seq) in seqs {
        writeln!(writer, ">{}", name).map_err(|e| ClusterError::io(filename, e))?;
        for chunk in seq.as_bytes().chunks(60) {
            writer.write_all(chunk).map_err(|e| ClusterError::io(filename, e))?;
            writer.write_all(b"\n").map_err(|e| ClusterError::io(filename, e))?;
        }
    }
    writer.flush().map_err(|e| ClusterError::io(filename, e))
}


pub fn fastq_reader(fastq_file: &Path) -> Result<Reader<BufReader<Box<dyn Read>>>> {
    // Returns a reader for a FASTQ file that works on both unzipped and gzipped files.
    Ok(Reader::new(BufReader::new(open_maybe_gzipped(fastq_file)?)))
}


pub fn fastq_stats(fastq_file: &Path) -> Result<(u64, u64)> {
    // Returns the read count and total bases of a FASTQ file.
    let mut count = 0;
    let mut bases = 0;
    let mut reader = fastq_reader(fastq_file)?;
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| ClusterError::parse(fastq_file, e.to_string()))?;
        count += 1;
        bases += record.seq().len() as u64;
    }
    Ok((count, bases))
}


fn complement_base(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'T' => b'A',
        b'G' => b'C',
        b'C' => b'G',
        b'a' => b't',
        b't' => b'a',
        b'g' => b'c',
        b'c' => b'g',
        b'.' => b'.',
        _ => b'N'
    }
}


pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    let mut rev_seq: Vec<u8> = Vec::with_capacity(seq.len());
    for &b in seq.iter().rev() {
        rev_seq.push(complement_base(b));
    }
    rev_seq
}


pub fn reverse_complement_str(seq: &str) -> String {
    String::from_utf8_lossy(&reverse_complement(seq.as_bytes())).into_owned()
}


pub fn format_float(num: f64) -> String {
    // Formats a float with up to six decimal places but then drops trailing zeros.
    let mut formatted = format!("{:.6}", num);
    if !formatted.contains('.') { return formatted }
    while formatted.ends_with('0') { formatted.pop(); }
    if formatted.ends_with('.') { formatted.pop(); }
    formatted
}


pub fn format_duration(duration: Duration) -> String {
    let microseconds = duration.as_micros() % 1000000;
    let seconds =      duration.as_micros() / 1000000 % 60;
    let minutes =      duration.as_micros() / 1000000 / 60 % 60;
    let hours =        duration.as_micros() / 1000000 / 60 / 60;
    format!("{}:{:02}:{:02}.{:06}", hours, minutes, seconds, microseconds)
}


pub fn progress_bar(length: u64, message: &str) -> ProgressBar {
    if cfg!(test) {
        ProgressBar::hidden() // don't show progress during unit tests
    } else {
        let pb = ProgressBar::new(length);
        pb.enable_steady_tick(Duration::from_millis(100));
        let style = ProgressStyle::default_bar()
            .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.set_message(message.to_string());
        pb
    }
}


pub fn merge_intervals(mut intervals: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    // Merges inclusive, 0-based intervals which overlap or touch.
    intervals.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in intervals {
        if let Some(last) = merged.last_mut() {
            if start <= last.1 + 1 {
                last.1 = last.1.max(end);
                continue;
            }
        }
        merged.push((start, end));
    }
    merged
}


pub fn interval_total_length(intervals: &[(usize, usize)]) -> usize {
    merge_intervals(intervals.to_vec()).iter().map(|(s, e)| e + 1 - s).sum()
}
