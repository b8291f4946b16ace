// This file contains a small reader for SAM text files: just the fields AmrLocus needs to score
// references, classify reads and link contigs.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{ClusterError, Result};


const PAIRED: u16 = 0x1;
const PROPER_PAIR: u16 = 0x2;
const UNMAPPED: u16 = 0x4;
const REVERSE: u16 = 0x10;
const FIRST_IN_PAIR: u16 = 0x40;
const SECONDARY: u16 = 0x100;
const SUPPLEMENTARY: u16 = 0x800;


#[derive(Clone, Debug, PartialEq)]
pub struct SamRecord {
    pub qname: String,
    pub flag: u16,
    pub rname: String,
    pub pos: usize,       // 0-based leftmost position
    pub mapq: u8,
    pub ref_span: usize,  // reference bases covered by the alignment
    pub tlen: i64,
    pub seq_len: usize,
    pub alignment_score: Option<i64>,
}

impl SamRecord {
    pub fn from_line(line: &str) -> std::result::Result<Self, String> {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 11 {
            return Err(format!("expected at least 11 columns: {}", line));
        }
        let flag = parts[1].parse::<u16>().map_err(|_| format!("bad flag: {}", parts[1]))?;
        let pos = parts[3].parse::<usize>().map_err(|_| format!("bad position: {}", parts[3]))?;
        let mapq = parts[4].parse::<u8>().unwrap_or(0);
        let tlen = parts[8].parse::<i64>().map_err(|_| format!("bad TLEN: {}", parts[8]))?;
        let seq_len = if parts[9] == "*" { 0 } else { parts[9].len() };
        let alignment_score = parts[11..].iter()
            .find_map(|tag| tag.strip_prefix("AS:i:"))
            .and_then(|v| v.parse::<i64>().ok());
        Ok(SamRecord { qname: parts[0].to_string(), flag, rname: parts[2].to_string(),
                       pos: pos.saturating_sub(1), mapq, ref_span: cigar_ref_span(parts[5]),
                       tlen, seq_len, alignment_score })
    }

    pub fn is_paired(&self) -> bool { self.flag & PAIRED != 0 }
    pub fn is_proper_pair(&self) -> bool { self.flag & PROPER_PAIR != 0 }
    pub fn is_mapped(&self) -> bool { self.flag & UNMAPPED == 0 && self.rname != "*" }
    pub fn is_reverse(&self) -> bool { self.flag & REVERSE != 0 }
    pub fn is_first(&self) -> bool { self.flag & FIRST_IN_PAIR != 0 }
    pub fn is_primary(&self) -> bool { self.flag & (SECONDARY | SUPPLEMENTARY) == 0 }

    pub fn end(&self) -> usize {
        // 0-based inclusive end of the alignment on the reference.
        self.pos + self.ref_span.max(1) - 1
    }
}


fn cigar_ref_span(cigar: &str) -> usize {
    let mut span = 0;
    let mut number = 0;
    for c in cigar.chars() {
        if let Some(d) = c.to_digit(10) {
            number = number * 10 + d as usize;
        } else {
            if matches!(c, 'M' | 'D' | 'N' | '=' | 'X') { span += number; }
            number = 0;
        }
    }
    span
}


/// Loads the primary records of a SAM file, skipping header lines.
pub fn load_primary_records(sam: &Path) -> Result<Vec<SamRecord>> {
    let file = File::open(sam).map_err(|e| ClusterError::io(sam, e))?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| ClusterError::io(sam, e))?;
        if line.is_empty() || line.starts_with('@') { continue; }
        let record = SamRecord::from_line(&line).map_err(|e| ClusterError::parse(sam, e))?;
        if record.is_primary() {
            records.push(record);
        }
    }
    Ok(records)
}


/// Groups primary records into mate pairs. Records must be in name order with mates adjacent,
/// as bowtie2 writes them with --reorder.
pub fn pair_records(sam: &Path, records: Vec<SamRecord>) -> Result<Vec<(SamRecord, SamRecord)>> {
    let mut pairs = Vec::with_capacity(records.len() / 2);
    let mut iter = records.into_iter();
    while let Some(first) = iter.next() {
        let second = iter.next().ok_or_else(|| {
            ClusterError::parse(sam, format!("no mate found for read {}", first.qname))
        })?;
        if first.qname != second.qname {
            return Err(ClusterError::parse(sam, format!("reads {} and {} are not mates",
                                                        first.qname, second.qname)));
        }
        if first.is_first() || !second.is_first() {
            pairs.push((first, second));
        } else {
            pairs.push((second, first));
        }
    }
    Ok(pairs)
}


#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use crate::tests::make_test_file;
    use super::*;

    #[test]
    fn test_cigar_ref_span() {
        assert_eq!(cigar_ref_span("50M"), 50);
        assert_eq!(cigar_ref_span("5S40M2I3M"), 43);
        assert_eq!(cigar_ref_span("10M2D10M"), 22);
        assert_eq!(cigar_ref_span("*"), 0);
    }

    #[test]
    fn test_from_line() {
        let r = SamRecord::from_line("read1\t99\tref1\t11\t42\t4M\t=\t50\t44\tACGT\tIIII\tAS:i:8\tXS:i:0")
            .unwrap();
        assert_eq!(r.qname, "read1");
        assert_eq!(r.pos, 10);
        assert_eq!(r.end(), 13);
        assert_eq!(r.tlen, 44);
        assert_eq!(r.seq_len, 4);
        assert_eq!(r.alignment_score, Some(8));
        assert!(r.is_paired() && r.is_proper_pair() && r.is_mapped() && r.is_first());
        assert!(!r.is_reverse());

        let u = SamRecord::from_line("read2\t77\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII\tYT:Z:UP").unwrap();
        assert!(!u.is_mapped());
        assert_eq!(u.alignment_score, None);

        assert!(SamRecord::from_line("too\tshort").is_err());
    }

    #[test]
    fn test_pair_records() {
        let temp_dir = tempdir().unwrap();
        let sam = temp_dir.path().join("x.sam");
        make_test_file(&sam, "@HD\tVN:1.0\n\
                              r1\t163\tref\t1\t42\t4M\t=\t9\t12\tACGT\tIIII\n\
                              r1\t83\tref\t9\t42\t4M\t=\t1\t-12\tACGT\tIIII\n\
                              r1\t339\tref\t20\t1\t4M\t=\t1\t0\tACGT\tIIII\n");
        let records = load_primary_records(&sam).unwrap();
        assert_eq!(records.len(), 2);
        let pairs = pair_records(&sam, records).unwrap();
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].0.is_first());
        assert_eq!(pairs[0].0.pos, 8);

        make_test_file(&sam, "r1\t73\tref\t1\t42\t4M\t=\t1\t0\tACGT\tIIII\n");
        let records = load_primary_records(&sam).unwrap();
        assert!(pair_records(&sam, records).is_err());
    }
}
