// This file contains the scaffold graph: links between contig ends supported by read pairs. It is
// used to check that an assembly's contigs join together in a consistent way.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use crate::error::Result;
use crate::sam::{load_primary_records, pair_records, SamRecord};


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContigEnd {
    Start,
    End,
}


type Node = (String, ContigEnd);


#[derive(Clone, Debug, Default)]
pub struct ScaffoldGraph {
    links: BTreeMap<(Node, Node), u32>,
}

impl ScaffoldGraph {
    pub fn new() -> Self { Self::default() }

    pub fn from_sam(sam: &Path, contig_lengths: &HashMap<String, usize>,
                    max_insert: usize) -> Result<Self> {
        let mut graph = ScaffoldGraph::new();
        for (a, b) in pair_records(sam, load_primary_records(sam)?)? {
            graph.add_read_pair(&a, &b, contig_lengths, max_insert);
        }
        Ok(graph)
    }

    /// Adds a link if the mates are on different contigs and each is close enough to the contig
    /// end it points towards.
    pub fn add_read_pair(&mut self, a: &SamRecord, b: &SamRecord,
                         contig_lengths: &HashMap<String, usize>, max_insert: usize) {
        if !a.is_mapped() || !b.is_mapped() || a.rname == b.rname {
            return;
        }
        let (Some(end_a), Some(end_b)) = (pointed_end(a, contig_lengths, max_insert),
                                          pointed_end(b, contig_lengths, max_insert)) else {
            return;
        };
        let node_a = (a.rname.clone(), end_a);
        let node_b = (b.rname.clone(), end_b);
        let key = if node_a <= node_b { (node_a, node_b) } else { (node_b, node_a) };
        *self.links.entry(key).or_insert(0) += 1;
    }

    pub fn link_count(&self, a: (&str, ContigEnd), b: (&str, ContigEnd)) -> u32 {
        let node_a = (a.0.to_string(), a.1);
        let node_b = (b.0.to_string(), b.1);
        let key = if node_a <= node_b { (node_a, node_b) } else { (node_b, node_a) };
        self.links.get(&key).copied().unwrap_or(0)
    }

    /// True unless a contig end links to more than one other end, or two or more contigs link
    /// into a cycle. Only links with at least `min_depth` supporting pairs count.
    pub fn is_consistent(&self, min_depth: u32) -> bool {
        let links: Vec<&(Node, Node)> = self.links.iter()
            .filter(|(_, count)| **count >= min_depth).map(|(k, _)| k).collect();

        let mut degree: HashMap<&Node, usize> = HashMap::new();
        for (a, b) in &links {
            *degree.entry(a).or_insert(0) += 1;
            *degree.entry(b).or_insert(0) += 1;
        }
        if degree.values().any(|&d| d > 1) {
            return false;
        }

        // With every end used at most once, the contigs form simple chains. A link between two
        // contigs already in the same chain closes a cycle.
        let mut parent: HashMap<&str, &str> = HashMap::new();
        for ((contig_a, _), (contig_b, _)) in &links {
            let root_a = find_root(&mut parent, contig_a);
            let root_b = find_root(&mut parent, contig_b);
            if root_a == root_b {
                return false;
            }
            parent.insert(root_a, root_b);
        }
        true
    }
}

impl fmt::Display for ScaffoldGraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (((a, a_end), (b, b_end)), count) in &self.links {
            writeln!(f, "{} {:?} <-> {} {:?}: {}", a, a_end, b, b_end, count)?;
        }
        Ok(())
    }
}


fn find_root<'a>(parent: &mut HashMap<&'a str, &'a str>, contig: &'a str) -> &'a str {
    let mut node = contig;
    while let Some(&p) = parent.get(node) {
        if p == node { break; }
        node = p;
    }
    node
}


fn pointed_end(read: &SamRecord, contig_lengths: &HashMap<String, usize>,
               max_insert: usize) -> Option<ContigEnd> {
    // A forward read points towards the end of its contig and a reverse read towards the start.
    let contig_length = *contig_lengths.get(&read.rname)?;
    if read.is_reverse() {
        if read.end() < max_insert { Some(ContigEnd::Start) } else { None }
    } else if contig_length.saturating_sub(read.pos) <= max_insert {
        Some(ContigEnd::End)
    } else {
        None
    }
}
