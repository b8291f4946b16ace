// This file contains the code for finding variants between the assembly and the reference: the
// differences nucmer reports, classified by their effect, and the curated known variants looked
// up through the reference-to-assembly coordinates.

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

use crate::assembly_compare::Comparison;
use crate::misc::reverse_complement;
use crate::nucmer::NucmerSnp;
use crate::ref_data::{KnownVariant, RefType, VariantSeqType};
use crate::sequence::translate_codon;


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    NonCoding,
    Syn,
    NonSyn,
    Trunc,
    Ins,
    Del,
    FShift,
}

impl Effect {
    pub fn is_nonsynonymous(&self) -> bool {
        !matches!(self, Effect::NonCoding | Effect::Syn)
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let code = match self {
            Effect::NonCoding => ".",
            Effect::Syn => "SYN",
            Effect::NonSyn => "NONSYN",
            Effect::Trunc => "TRUNC",
            Effect::Ins => "INS",
            Effect::Del => "DEL",
            Effect::FShift => "FSHIFT",
        };
        write!(f, "{}", code)
    }
}


/// One variant between reference and assembly. Coordinates are 0-based and inclusive. `change`
/// and `effect` are None for a known variant position where the assembly matches the reference.
#[derive(Clone, Debug, PartialEq)]
pub struct AssemblyVariant {
    pub seq_type: VariantSeqType,
    pub ref_start: usize,
    pub ref_end: usize,
    pub ref_nt: String,
    pub contig: String,
    pub ctg_start: usize,
    pub ctg_end: usize,
    pub ctg_nt: String,
    pub change: Option<String>,
    pub effect: Option<Effect>,
    pub known: Option<KnownVariant>,
    pub has_known_var: bool,
}


pub type VariantTable = BTreeMap<usize, Vec<AssemblyVariant>>;


pub fn get_variants(ref_seq: &str, ref_type: RefType, known_variants: &[KnownVariant],
                    comparison: &Comparison, contigs: &[(String, String)]) -> VariantTable {
    let contig_seqs: HashMap<&str, &[u8]> = contigs.iter()
        .map(|(n, s)| (n.as_str(), s.as_bytes())).collect();
    let observed = if ref_type.is_coding() { coding_variants(ref_seq, &comparison.snps) }
                   else { non_coding_variants(&comparison.snps) };

    let mut usable_known: Vec<(&KnownVariant, (usize, usize))> = Vec::new();
    for kv in known_variants {
        if kv.seq_type == VariantSeqType::Protein && !ref_type.is_coding() { continue; }
        let (start, end) = kv.nucleotide_range();
        if end < ref_seq.len() && comparison.coord_table.covers(start, end) {
            usable_known.push((kv, (start, end)));
        }
    }

    let mut table = VariantTable::new();
    let mut matched_known = vec![false; usable_known.len()];
    for variant in observed {
        let mut any_known = false;
        for (i, (kv, (start, end))) in usable_known.iter().enumerate() {
            if *start > variant.ref_end || *end < variant.ref_start { continue; }
            matched_known[i] = true;
            any_known = true;
            let mut with_known = variant.clone();
            with_known.has_known_var = assembly_has_variant(kv, *start, *end, comparison,
                                                            &contig_seqs);
            with_known.known = Some((*kv).clone());
            table.entry(with_known.ref_start).or_default().push(with_known);
        }
        if !any_known {
            table.entry(variant.ref_start).or_default().push(variant);
        }
    }

    // Known variant positions without any observed difference: the assembly is wild type there.
    for (i, (kv, (start, end))) in usable_known.iter().enumerate() {
        if matched_known[i] { continue; }
        let Some(first) = comparison.coord_table.get(*start) else { continue };
        let Some(last) = comparison.coord_table.get(*end) else { continue };
        let ctg_nt = assembly_bases(*start, *end, comparison, &contig_seqs).unwrap_or_default();
        let wild_type = AssemblyVariant {
            seq_type: kv.seq_type,
            ref_start: *start,
            ref_end: *end,
            ref_nt: ref_seq[*start..=*end].to_string(),
            contig: first.contig.clone(),
            ctg_start: first.pos.min(last.pos),
            ctg_end: first.pos.max(last.pos),
            ctg_nt,
            change: None,
            effect: None,
            known: Some((*kv).clone()),
            has_known_var: assembly_has_variant(kv, *start, *end, comparison, &contig_seqs),
        };
        table.entry(*start).or_default().push(wild_type);
    }
    table
}


pub fn has_nonsynonymous(table: &VariantTable) -> bool {
    table.values().flatten().any(|v| v.effect.is_some_and(|e| e.is_nonsynonymous()))
}


fn coding_variants(ref_seq: &str, snps: &[NucmerSnp]) -> Vec<AssemblyVariant> {
    let mut groups: BTreeMap<(usize, &str), Vec<&NucmerSnp>> = BTreeMap::new();
    for (codon, snp) in codons_of_rows(snps) {
        groups.entry((codon, snp.qry_name.as_str())).or_default().push(snp);
    }
    let ref_bytes = ref_seq.as_bytes();
    let last_ref_pos = ref_bytes.len().saturating_sub(1);
    let mut variants = Vec::new();
    for ((codon, contig), group) in groups {
        let codon_start = codon * 3;
        let codon_end = (codon_start + 2).min(last_ref_pos);
        let ref_codon: Vec<u8> = ref_bytes.get(codon_start..=codon_end).unwrap_or(&[]).to_vec();
        let ref_end = group.iter().map(|s| s.ref_pos).max().unwrap_or(codon_end)
            .max(codon_end).min(last_ref_pos);
        let wild_aa = translate_codon(&ref_codon) as char;
        let insertions = group.iter().filter(|s| s.is_insertion()).count() as i64;
        let deletions = group.iter().filter(|s| s.is_deletion()).count() as i64;

        let mut alt_codon = ref_codon.clone();
        let (effect, change) = if insertions > 0 || deletions > 0 {
            let effect = if (insertions - deletions) % 3 != 0 { Effect::FShift }
                         else if insertions > deletions { Effect::Ins }
                         else { Effect::Del };
            let suffix = match effect { Effect::FShift => "fs", Effect::Ins => "ins", _ => "del" };
            (effect, format!("{}{}{}", wild_aa, codon + 1, suffix))
        } else {
            for snp in &group {
                if let Some(b) = alt_codon.get_mut(snp.ref_pos - codon_start) {
                    *b = snp.qry_base as u8;
                }
            }
            let new_aa = translate_codon(&alt_codon) as char;
            let effect = if new_aa == wild_aa { Effect::Syn }
                         else if new_aa == '*' { Effect::Trunc }
                         else { Effect::NonSyn };
            (effect, format!("{}{}{}", wild_aa, codon + 1, new_aa))
        };

        let ctg_nt = if insertions > 0 || deletions > 0 {
            group.iter().map(|s| s.qry_base).collect()
        } else {
            String::from_utf8_lossy(&alt_codon).into_owned()
        };
        let (ctg_start, ctg_end) = contig_span(&group);
        variants.push(AssemblyVariant {
            seq_type: VariantSeqType::Protein,
            ref_start: codon_start,
            ref_end,
            ref_nt: String::from_utf8_lossy(ref_bytes.get(codon_start..=ref_end).unwrap_or(&[]))
                .into_owned(),
            contig: contig.to_string(),
            ctg_start,
            ctg_end,
            ctg_nt,
            change: Some(change),
            effect: Some(effect),
            known: None,
            has_known_var: false,
        });
    }
    variants
}


/// The codon each show-snps row belongs to. A run of consecutive indel rows on one contig is a
/// single event, placed in the codon of its first reference position.
fn codons_of_rows(snps: &[NucmerSnp]) -> Vec<(usize, &NucmerSnp)> {
    let mut sorted: Vec<&NucmerSnp> = snps.iter().collect();
    sorted.sort_by(|a, b| (&a.qry_name, a.ref_pos, a.qry_pos).cmp(&(&b.qry_name, b.ref_pos, b.qry_pos)));
    let mut rows = Vec::with_capacity(sorted.len());
    let mut prev: Option<(&NucmerSnp, usize)> = None;
    for snp in sorted {
        let codon = match prev {
            Some((p, codon)) if continues_indel(p, snp) => codon,
            _ => snp.ref_pos / 3,
        };
        rows.push((codon, snp));
        prev = Some((snp, codon));
    }
    rows
}


fn continues_indel(prev: &NucmerSnp, next: &NucmerSnp) -> bool {
    if prev.qry_name != next.qry_name { return false; }
    if prev.is_deletion() && next.is_deletion() {
        next.ref_pos == prev.ref_pos + 1 && next.qry_pos == prev.qry_pos
    } else if prev.is_insertion() && next.is_insertion() {
        next.ref_pos == prev.ref_pos && next.qry_pos.abs_diff(prev.qry_pos) == 1
    } else {
        false
    }
}


fn non_coding_variants(snps: &[NucmerSnp]) -> Vec<AssemblyVariant> {
    let mut sorted: Vec<&NucmerSnp> = snps.iter().collect();
    sorted.sort_by(|a, b| (a.ref_pos, &a.qry_name, a.qry_pos).cmp(&(b.ref_pos, &b.qry_name, b.qry_pos)));
    sorted.into_iter().map(|snp| AssemblyVariant {
        seq_type: VariantSeqType::Nucleotide,
        ref_start: snp.ref_pos,
        ref_end: snp.ref_pos,
        ref_nt: snp.ref_base.to_string(),
        contig: snp.qry_name.clone(),
        ctg_start: snp.qry_pos,
        ctg_end: snp.qry_pos,
        ctg_nt: snp.qry_base.to_string(),
        change: Some(format!("{}{}{}", snp.ref_base, snp.ref_pos + 1, snp.qry_base)),
        effect: Some(Effect::NonCoding),
        known: None,
        has_known_var: false,
    }).collect()
}


fn contig_span(group: &[&NucmerSnp]) -> (usize, usize) {
    let start = group.iter().map(|s| s.qry_pos).min().unwrap_or(0);
    let end = group.iter().map(|s| s.qry_pos).max().unwrap_or(0);
    (start, end)
}


/// The assembly's bases at the given reference positions, on the reference strand.
fn assembly_bases(start: usize, end: usize, comparison: &Comparison,
                  contig_seqs: &HashMap<&str, &[u8]>) -> Option<String> {
    let mut bases = Vec::with_capacity(end + 1 - start);
    for p in start..=end {
        let pos = comparison.coord_table.get(p)?;
        let base = *contig_seqs.get(pos.contig.as_str())?.get(pos.pos)?;
        if pos.reverse {
            bases.extend(reverse_complement(&[base]));
        } else {
            bases.push(base);
        }
    }
    Some(String::from_utf8_lossy(&bases).into_owned())
}


fn assembly_has_variant(kv: &KnownVariant, start: usize, end: usize, comparison: &Comparison,
                        contig_seqs: &HashMap<&str, &[u8]>) -> bool {
    let Some(bases) = assembly_bases(start, end, comparison, contig_seqs) else { return false };
    let observed = match kv.seq_type {
        VariantSeqType::Nucleotide => bases.chars().next().unwrap_or('N'),
        VariantSeqType::Protein => translate_codon(bases.as_bytes()) as char,
    };
    observed == kv.variant
}


#[cfg(test)]
mod tests {
    use crate::assembly_compare::Comparison;
    use crate::misc::reverse_complement_str;
    use crate::settings::ClusterSettings;
    use crate::test_data::{GENE_CONTIG, GENE_REF};
    use crate::tests::make_hit;
    use super::*;

    fn snp(ref_pos: usize, ref_base: char, qry_base: char, qry_pos: usize) -> NucmerSnp {
        NucmerSnp { ref_pos, ref_base, qry_base, qry_pos, ref_length: 30, qry_length: 60,
                    reverse: false, ref_name: "ref".to_string(), qry_name: "ctg1".to_string() }
    }

    fn comparison(contig: &str, snps: Vec<NucmerSnp>, ref_type: RefType) -> Comparison {
        let contigs = vec![("ctg1".to_string(), contig.to_string())];
        Comparison::from_hits("ref", 30, ref_type, &contigs, vec![make_hit(0, 29, 10, 39, 99.0, "ctg1")],
                              snps, &ClusterSettings::default())
    }

    fn mutate(seq: &str, pos: usize, base: char) -> String {
        let mut bytes = seq.as_bytes().to_vec();
        bytes[pos] = base as u8;
        String::from_utf8(bytes).unwrap()
    }

    fn known(seq_type: VariantSeqType, change: &str) -> KnownVariant {
        KnownVariant::parse(seq_type, change, None, "test variant").unwrap()
    }

    #[test]
    fn test_coding_effects() {
        // GCT (A) at codon 2: C->A gives GAT (D), T->C gives GCC (A).
        let snps = vec![snp(4, 'C', 'A', 14), snp(8, 'T', 'A', 18), snp(5, 'T', 'C', 15)];
        let variants = coding_variants(GENE_REF, &snps);
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].change.as_deref(), Some("A2D"));
        assert_eq!(variants[0].effect, Some(Effect::NonSyn));
        assert_eq!(variants[0].ref_nt, "GCT");
        assert_eq!(variants[0].ctg_nt, "GAC");
        assert_eq!((variants[0].ctg_start, variants[0].ctg_end), (14, 15));
        // TGT (C) at codon 3: T->A gives TGA (stop).
        assert_eq!(variants[1].change.as_deref(), Some("C3*"));
        assert_eq!(variants[1].effect, Some(Effect::Trunc));

        let syn = coding_variants(GENE_REF, &[snp(5, 'T', 'C', 15)]);
        assert_eq!(syn[0].effect, Some(Effect::Syn));
    }

    #[test]
    fn test_coding_indels() {
        let fshift = coding_variants(GENE_REF, &[snp(10, 'A', '.', 20)]);
        assert_eq!(fshift[0].effect, Some(Effect::FShift));
        assert_eq!(fshift[0].change.as_deref(), Some("K4fs"));
        let del = coding_variants(GENE_REF, &[snp(9, 'A', '.', 19), snp(10, 'A', '.', 19),
                                              snp(11, 'A', '.', 19)]);
        assert_eq!(del[0].effect, Some(Effect::Del));
        assert!(del[0].effect.unwrap().is_nonsynonymous());
    }

    #[test]
    fn test_in_frame_indels_across_codons() {
        // Deleting CTT (ref positions 4 to 6) spans codons 2 and 3 but keeps the frame.
        let del = coding_variants(GENE_REF, &[snp(5, 'T', '.', 14), snp(4, 'C', '.', 14),
                                              snp(6, 'T', '.', 14)]);
        assert_eq!(del.len(), 1);
        assert_eq!(del[0].effect, Some(Effect::Del));
        assert_eq!(del[0].change.as_deref(), Some("A2del"));
        assert_eq!((del[0].ref_start, del[0].ref_end), (3, 6));
        assert_eq!(del[0].ref_nt, "GCTT");

        // Three bases inserted after ref position 5, the last base of codon 2.
        let ins = coding_variants(GENE_REF, &[snp(5, '.', 'A', 16), snp(5, '.', 'C', 17),
                                              snp(5, '.', 'G', 18)]);
        assert_eq!(ins.len(), 1);
        assert_eq!(ins[0].effect, Some(Effect::Ins));
        assert_eq!(ins[0].ctg_nt, "ACG");

        // Two separate single-base deletions are two frameshifts.
        let two = coding_variants(GENE_REF, &[snp(4, 'C', '.', 14), snp(10, 'A', '.', 19)]);
        assert_eq!(two.len(), 2);
        assert!(two.iter().all(|v| v.effect == Some(Effect::FShift)));
    }

    #[test]
    fn test_non_coding() {
        let variants = non_coding_variants(&[snp(7, 'G', 'A', 17), snp(2, 'G', 'T', 12)]);
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].change.as_deref(), Some("G3T"));
        assert_eq!(variants[0].effect, Some(Effect::NonCoding));
        assert!(!variants[0].effect.unwrap().is_nonsynonymous());
    }

    #[test]
    fn test_known_variant_present() {
        // The contig carries GAT (D) at codon 2.
        let contig = mutate(GENE_CONTIG, 14, 'A');
        let c = comparison(&contig, vec![snp(4, 'C', 'A', 14)], RefType::VariantsOnly);
        let kv = known(VariantSeqType::Protein, "A2D");
        let contigs = vec![("ctg1".to_string(), contig.clone())];
        let table = get_variants(GENE_REF, RefType::VariantsOnly, &[kv.clone()], &c, &contigs);
        assert_eq!(table.len(), 1);
        let v = &table[&3][0];
        assert_eq!(v.known, Some(kv));
        assert!(v.has_known_var);
        assert_eq!(v.effect, Some(Effect::NonSyn));
        assert!(has_nonsynonymous(&table));
    }

    #[test]
    fn test_known_variant_wild_type() {
        let c = comparison(GENE_CONTIG, vec![], RefType::VariantsOnly);
        let contigs = vec![("ctg1".to_string(), GENE_CONTIG.to_string())];
        let kvs = vec![known(VariantSeqType::Protein, "A2D"),
                       known(VariantSeqType::Nucleotide, "A1G")];
        let table = get_variants(GENE_REF, RefType::VariantsOnly, &kvs, &c, &contigs);
        assert_eq!(table.len(), 2);
        let protein = &table[&3][0];
        assert!(!protein.has_known_var);
        assert_eq!(protein.change, None);
        assert_eq!(protein.ctg_nt, "GCT");
        assert_eq!((protein.ctg_start, protein.ctg_end), (13, 15));
        let nucleotide = &table[&0][0];
        assert_eq!(nucleotide.ref_nt, "A");
        assert!(!has_nonsynonymous(&table));
    }

    #[test]
    fn test_known_variants_on_reverse_strand_contig() {
        // Ref position p is at position 49 - p of the reverse complemented contig. The contig
        // carries GAT (D) at codon 2, so position 45 holds T.
        let contig = mutate(&reverse_complement_str(GENE_CONTIG), 45, 'T');
        let contigs = vec![("ctg1".to_string(), contig.clone())];
        let snps = vec![NucmerSnp { reverse: true, ..snp(4, 'C', 'A', 45) }];
        let c = Comparison::from_hits("ref", 30, RefType::VariantsOnly, &contigs,
                                      vec![make_hit(0, 29, 49, 20, 99.0, "ctg1")], snps,
                                      &ClusterSettings::default());
        let kvs = vec![known(VariantSeqType::Protein, "A2D"),
                       known(VariantSeqType::Protein, "C3Y"),
                       known(VariantSeqType::Nucleotide, "A1G")];
        let table = get_variants(GENE_REF, RefType::VariantsOnly, &kvs, &c, &contigs);
        assert_eq!(table.len(), 3);

        let present = &table[&3][0];
        assert_eq!(present.known, Some(kvs[0].clone()));
        assert!(present.has_known_var);
        assert_eq!(present.change.as_deref(), Some("A2D"));
        assert_eq!((present.ctg_start, present.ctg_end), (45, 45));

        let protein = &table[&6][0];
        assert!(!protein.has_known_var);
        assert_eq!(protein.ctg_nt, "TGT");
        assert_eq!((protein.ctg_start, protein.ctg_end), (41, 43));

        let nucleotide = &table[&0][0];
        assert!(!nucleotide.has_known_var);
        assert_eq!(nucleotide.ctg_nt, "A");
        assert_eq!((nucleotide.ctg_start, nucleotide.ctg_end), (49, 49));
    }

    #[test]
    fn test_known_variant_outside_assembly_is_omitted() {
        let contigs = vec![("ctg1".to_string(), GENE_CONTIG.to_string())];
        let c = Comparison::from_hits("ref", 30, RefType::VariantsOnly, &contigs,
                                      vec![make_hit(0, 14, 10, 24, 99.0, "ctg1")], vec![],
                                      &ClusterSettings::default());
        let kvs = vec![known(VariantSeqType::Protein, "H9Y")];
        let table = get_variants(GENE_REF, RefType::VariantsOnly, &kvs, &c, &contigs);
        assert!(table.is_empty());
    }

    #[test]
    fn test_protein_variants_ignored_for_non_coding() {
        let c = comparison(GENE_CONTIG, vec![], RefType::NonCoding);
        let contigs = vec![("ctg1".to_string(), GENE_CONTIG.to_string())];
        let table = get_variants(GENE_REF, RefType::NonCoding,
                                 &[known(VariantSeqType::Protein, "A2D")], &c, &contigs);
        assert!(table.is_empty());
    }
}
