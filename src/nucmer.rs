// This file contains the structs for nucmer alignments and the parsers for the show-coords and
// show-snps output files.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{ClusterError, Result};
use crate::misc::strand;
use crate::settings::HitTieBreak;


/// One nucmer alignment between a reference and a query (contig). Coordinates are 0-based and
/// inclusive. The reference is always forward, so `ref_start <= ref_end`; for reverse-strand hits
/// `qry_start > qry_end`.
#[derive(Clone, Debug, PartialEq)]
pub struct NucmerHit {
    pub ref_start: usize,
    pub ref_end: usize,
    pub qry_start: usize,
    pub qry_end: usize,
    pub hit_length_ref: usize,
    pub hit_length_qry: usize,
    pub percent_identity: f64,
    pub ref_length: usize,
    pub qry_length: usize,
    pub ref_name: String,
    pub qry_name: String,
}

impl NucmerHit {
    pub fn from_coords_line(line: &str) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        if fields.len() != 13 && fields.len() != 14 {
            return Err(format!("wrong number of columns in coords line: {}", line));
        }
        let int = |i: usize| -> std::result::Result<usize, String> {
            fields[i].trim().parse::<usize>().map_err(|_| format!("bad number: {}", fields[i]))
        };
        let one_based = |i: usize| -> std::result::Result<usize, String> {
            int(i)?.checked_sub(1).ok_or_else(|| format!("zero coordinate in: {}", line))
        };
        let (ref_start, ref_end) = (one_based(0)?, one_based(1)?);
        Ok(NucmerHit {
            ref_start: ref_start.min(ref_end),
            ref_end: ref_start.max(ref_end),
            qry_start: one_based(2)?,
            qry_end: one_based(3)?,
            hit_length_ref: int(4)?,
            hit_length_qry: int(5)?,
            percent_identity: fields[6].trim().parse::<f64>()
                .map_err(|_| format!("bad identity: {}", fields[6]))?,
            ref_length: int(7)?,
            qry_length: int(8)?,
            ref_name: fields[11].to_string(),
            qry_name: fields[12].to_string(),
        })
    }

    pub fn on_same_strand(&self) -> bool {
        if self.qry_start <= self.qry_end { strand::FORWARD } else { strand::REVERSE }
    }

    pub fn qry_coords(&self) -> (usize, usize) {
        (self.qry_start.min(self.qry_end), self.qry_start.max(self.qry_end))
    }

    pub fn ref_coords(&self) -> (usize, usize) {
        (self.ref_start, self.ref_end)
    }

    pub fn covers_ref(&self, pos: usize) -> bool {
        self.ref_start <= pos && pos <= self.ref_end
    }
}


/// Ordering of hits by preference, best first. This decides which hit owns a reference base
/// when hits overlap.
pub fn compare_hits(a: &NucmerHit, b: &NucmerHit, tie_break: HitTieBreak) -> Ordering {
    let by_length = b.hit_length_ref.cmp(&a.hit_length_ref);
    let by_identity = b.percent_identity.partial_cmp(&a.percent_identity)
        .unwrap_or(Ordering::Equal);
    let primary = match tie_break {
        HitTieBreak::Longest => by_length.then(by_identity),
        HitTieBreak::Identity => by_identity.then(by_length),
    };
    primary.then_with(|| a.qry_name.cmp(&b.qry_name)).then(a.ref_start.cmp(&b.ref_start))
}


pub fn best_hit<'a, I>(hits: I, tie_break: HitTieBreak) -> Option<&'a NucmerHit>
        where I: IntoIterator<Item = &'a NucmerHit> {
    hits.into_iter().min_by(|a, b| compare_hits(a, b, tie_break))
}


/// One difference reported by show-snps. A '.' base means an indel: `ref_base == '.'` is an
/// insertion in the query and `qry_base == '.'` a deletion.
#[derive(Clone, Debug, PartialEq)]
pub struct NucmerSnp {
    pub ref_pos: usize,
    pub ref_base: char,
    pub qry_base: char,
    pub qry_pos: usize,
    pub ref_length: usize,
    pub qry_length: usize,
    pub reverse: bool,
    pub ref_name: String,
    pub qry_name: String,
}

impl NucmerSnp {
    pub fn from_snps_line(line: &str) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        if fields.len() != 12 {
            return Err(format!("wrong number of columns in snps line: {}", line));
        }
        let int = |i: usize| -> std::result::Result<usize, String> {
            fields[i].trim().parse::<usize>().map_err(|_| format!("bad number: {}", fields[i]))
        };
        let base = |i: usize| -> std::result::Result<char, String> {
            let b = fields[i].trim();
            if b.len() == 1 { Ok(b.chars().next().unwrap_or('.').to_ascii_uppercase()) }
            else { Err(format!("bad base: {}", b)) }
        };
        Ok(NucmerSnp {
            ref_pos: int(0)?.saturating_sub(1),
            ref_base: base(1)?,
            qry_base: base(2)?,
            qry_pos: int(3)?.saturating_sub(1),
            ref_length: int(6)?,
            qry_length: int(7)?,
            reverse: fields[9].trim() == "-1",
            ref_name: fields[10].to_string(),
            qry_name: fields[11].to_string(),
        })
    }

    pub fn is_insertion(&self) -> bool { self.ref_base == '.' }
    pub fn is_deletion(&self) -> bool { self.qry_base == '.' }
    pub fn is_substitution(&self) -> bool { !self.is_insertion() && !self.is_deletion() }
}


fn data_lines(filename: &Path) -> Result<Vec<String>> {
    // Returns the lines of a show-coords/show-snps file which start with a number. This skips the
    // header, whether or not the tools were asked to omit it.
    let file = File::open(filename).map_err(|e| ClusterError::io(filename, e))?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| ClusterError::io(filename, e))?;
        if line.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            lines.push(line);
        }
    }
    Ok(lines)
}


pub fn load_coords(coords_file: &Path) -> Result<Vec<NucmerHit>> {
    data_lines(coords_file)?.iter()
        .map(|l| NucmerHit::from_coords_line(l).map_err(|e| ClusterError::parse(coords_file, e)))
        .collect()
}


pub fn load_snps(snps_file: &Path) -> Result<Vec<NucmerSnp>> {
    data_lines(snps_file)?.iter()
        .map(|l| NucmerSnp::from_snps_line(l).map_err(|e| ClusterError::parse(snps_file, e)))
        .collect()
}
