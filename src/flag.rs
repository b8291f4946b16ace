// This file defines the status flag of a cluster: a fixed set of tags which are switched on as the
// cluster moves through the pipeline.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::fmt;
use std::str::FromStr;


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusFlag {
    Assembled,
    AssembledIntoOneContig,
    RegionAssembledTwice,
    CompleteGene,
    UniqueContig,
    ScaffoldGraphBad,
    AssemblyFail,
    VariantsSuggestCollapsedRepeat,
    HitBothStrands,
    HasNonsynonymousVariants,
    RefSeqChooseFail,
}

impl StatusFlag {
    // Serialisation order: the first tag is the leftmost character of the bit string.
    pub const ALL: [StatusFlag; 11] = [
        StatusFlag::Assembled,
        StatusFlag::AssembledIntoOneContig,
        StatusFlag::RegionAssembledTwice,
        StatusFlag::CompleteGene,
        StatusFlag::UniqueContig,
        StatusFlag::ScaffoldGraphBad,
        StatusFlag::AssemblyFail,
        StatusFlag::VariantsSuggestCollapsedRepeat,
        StatusFlag::HitBothStrands,
        StatusFlag::HasNonsynonymousVariants,
        StatusFlag::RefSeqChooseFail,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StatusFlag::Assembled => "assembled",
            StatusFlag::AssembledIntoOneContig => "assembled_into_one_contig",
            StatusFlag::RegionAssembledTwice => "region_assembled_twice",
            StatusFlag::CompleteGene => "complete_gene",
            StatusFlag::UniqueContig => "unique_contig",
            StatusFlag::ScaffoldGraphBad => "scaffold_graph_bad",
            StatusFlag::AssemblyFail => "assembly_fail",
            StatusFlag::VariantsSuggestCollapsedRepeat => "variants_suggest_collapsed_repeat",
            StatusFlag::HitBothStrands => "hit_both_strands",
            StatusFlag::HasNonsynonymousVariants => "has_nonsynonymous_variants",
            StatusFlag::RefSeqChooseFail => "ref_seq_choose_fail",
        }
    }

    fn bit(&self) -> u16 {
        let index = StatusFlag::ALL.iter().position(|f| f == self).unwrap_or(0);
        1 << index
    }
}

impl FromStr for StatusFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatusFlag::ALL.iter().find(|f| f.name() == s).copied()
            .ok_or_else(|| format!("unknown status flag: {}", s))
    }
}


/// A set of status flags. Flags can only be added, never removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    bits: u16,
}

impl Flags {
    pub fn new() -> Self { Self::default() }

    pub fn add(&mut self, flag: StatusFlag) {
        self.bits |= flag.bit();
    }

    pub fn has(&self, flag: StatusFlag) -> bool {
        self.bits & flag.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn set_flags(&self) -> Vec<StatusFlag> {
        StatusFlag::ALL.iter().filter(|f| self.has(**f)).copied().collect()
    }

    pub fn to_bit_string(&self) -> String {
        StatusFlag::ALL.iter().map(|f| if self.has(*f) { '1' } else { '0' }).collect()
    }

    pub fn from_bit_string(s: &str) -> Result<Self, String> {
        if s.len() != StatusFlag::ALL.len() {
            return Err(format!("flag bit string must have {} characters: {}",
                               StatusFlag::ALL.len(), s));
        }
        let mut flags = Flags::new();
        for (c, flag) in s.chars().zip(StatusFlag::ALL.iter()) {
            match c {
                '1' => flags.add(*flag),
                '0' => {},
                _ => return Err(format!("bad character in flag bit string: {}", s)),
            }
        }
        Ok(flags)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names: Vec<&str> = self.set_flags().iter().map(|f| f.name()).collect();
        if names.is_empty() { write!(f, "none") } else { write!(f, "{}", names.join(",")) }
    }
}
