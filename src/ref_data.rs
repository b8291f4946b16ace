// This file contains the reference data a cluster needs: reference sequences, their types and the
// curated variants known for each of them.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use crate::error::{ClusterError, Result};
use crate::misc::{load_fasta, write_fasta};


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefType {
    PresenceAbsence,
    VariantsOnly,
    NonCoding,
}

impl RefType {
    pub fn is_coding(&self) -> bool {
        !matches!(self, RefType::NonCoding)
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RefType::PresenceAbsence => "presence_absence",
            RefType::VariantsOnly => "variants_only",
            RefType::NonCoding => "non_coding",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for RefType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "presence_absence" => Ok(RefType::PresenceAbsence),
            "variants_only" => Ok(RefType::VariantsOnly),
            "non_coding" => Ok(RefType::NonCoding),
            _ => Err(format!("unknown reference type: {}", s)),
        }
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VariantSeqType {
    Nucleotide,
    Protein,
}

impl VariantSeqType {
    pub fn code(&self) -> &'static str {
        match self {
            VariantSeqType::Nucleotide => "n",
            VariantSeqType::Protein => "p",
        }
    }
}


/// A curated variant, e.g. protein change C2I or nucleotide change A42G. The position is stored
/// 0-based; it is 1-based when written.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KnownVariant {
    pub seq_type: VariantSeqType,
    pub wild: char,
    pub position: usize,
    pub variant: char,
    pub group: Option<String>,
    pub description: String,
}

impl KnownVariant {
    pub fn parse(seq_type: VariantSeqType, change: &str, group: Option<String>,
                 description: &str) -> std::result::Result<Self, String> {
        let chars: Vec<char> = change.chars().collect();
        if chars.len() < 3 {
            return Err(format!("bad variant: {}", change));
        }
        let wild = chars[0].to_ascii_uppercase();
        let variant = chars[chars.len() - 1].to_ascii_uppercase();
        let number: String = chars[1..chars.len() - 1].iter().collect();
        let position = number.parse::<usize>().ok().filter(|p| *p > 0)
            .ok_or_else(|| format!("bad variant position: {}", change))?;
        if wild == variant {
            return Err(format!("variant does not change anything: {}", change));
        }
        Ok(KnownVariant { seq_type, wild, position: position - 1, variant, group,
                          description: description.to_string() })
    }

    pub fn change(&self) -> String {
        format!("{}{}{}", self.wild, self.position + 1, self.variant)
    }

    /// The nucleotide positions (0-based, on the reference) this variant touches.
    pub fn nucleotide_range(&self) -> (usize, usize) {
        match self.seq_type {
            VariantSeqType::Nucleotide => (self.position, self.position),
            VariantSeqType::Protein => (self.position * 3, self.position * 3 + 2),
        }
    }
}


/// What a cluster needs to know about reference sequences.
pub trait ReferenceLookup {
    fn sequence_type(&self, name: &str) -> Option<RefType>;
    fn sequence(&self, name: &str) -> Option<&str>;
    fn known_variants(&self, name: &str) -> &[KnownVariant];
    fn write_seqs_to_fasta(&self, filename: &Path, names: &BTreeSet<String>) -> Result<()>;
}


#[derive(Clone, Debug, Default)]
pub struct RefData {
    order: Vec<String>,
    sequences: HashMap<String, String>,
    types: HashMap<String, RefType>,
    variants: HashMap<String, Vec<KnownVariant>>,
}

impl RefData {
    /// Loads references from a FASTA file and a metadata TSV with columns: name, reference type,
    /// variant type (n, p or .), variant (or .), variant group (or .), description. Every sequence
    /// needs at least one metadata line to give its type.
    pub fn load(fasta: &Path, metadata: &Path) -> Result<Self> {
        let mut ref_data = RefData::default();
        for (name, seq) in load_fasta(fasta)? {
            ref_data.order.push(name.clone());
            ref_data.sequences.insert(name, seq);
        }
        let file = File::open(metadata).map_err(|e| ClusterError::io(metadata, e))?;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| ClusterError::io(metadata, e))?;
            if line.trim().is_empty() || line.starts_with('#') { continue; }
            ref_data.add_metadata_line(&line).map_err(|e| ClusterError::parse(metadata, e))?;
        }
        for name in &ref_data.order {
            if !ref_data.types.contains_key(name) {
                return Err(ClusterError::parse(metadata, format!("no metadata for {}", name)));
            }
        }
        Ok(ref_data)
    }

    fn add_metadata_line(&mut self, line: &str) -> std::result::Result<(), String> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 6 {
            return Err(format!("expected 6 columns: {}", line));
        }
        let name = fields[0].to_string();
        let ref_type: RefType = fields[1].parse()?;
        if let Some(existing) = self.types.insert(name.clone(), ref_type) {
            if existing != ref_type {
                return Err(format!("conflicting types for {}", name));
            }
        }
        let seq_type = match fields[2] {
            "n" => VariantSeqType::Nucleotide,
            "p" => VariantSeqType::Protein,
            "." => return Ok(()),
            other => return Err(format!("bad variant type: {}", other)),
        };
        if seq_type == VariantSeqType::Protein && !ref_type.is_coding() {
            return Err(format!("protein variant given for non-coding sequence {}", name));
        }
        let group = if fields[4] == "." { None } else { Some(fields[4].to_string()) };
        let variant = KnownVariant::parse(seq_type, fields[3], group, fields[5])?;
        self.variants.entry(name).or_default().push(variant);
        Ok(())
    }

    /// Sequence names in FASTA order.
    pub fn names(&self) -> &[String] { &self.order }

    pub fn add(&mut self, name: &str, seq: &str, ref_type: RefType, variants: Vec<KnownVariant>) {
        if !self.sequences.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.sequences.insert(name.to_string(), seq.to_ascii_uppercase());
        self.types.insert(name.to_string(), ref_type);
        self.variants.insert(name.to_string(), variants);
    }
}

impl ReferenceLookup for RefData {
    fn sequence_type(&self, name: &str) -> Option<RefType> {
        self.types.get(name).copied()
    }

    fn sequence(&self, name: &str) -> Option<&str> {
        self.sequences.get(name).map(|s| s.as_str())
    }

    fn known_variants(&self, name: &str) -> &[KnownVariant] {
        self.variants.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn write_seqs_to_fasta(&self, filename: &Path, names: &BTreeSet<String>) -> Result<()> {
        let seqs: Vec<(String, String)> = self.order.iter()
            .filter(|n| names.contains(*n))
            .filter_map(|n| self.sequences.get(n).map(|s| (n.clone(), s.clone())))
            .collect();
        write_fasta(filename, &seqs)
    }
}
