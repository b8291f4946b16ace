// This file contains sequence-level biology: the bacterial genetic code, codon translation and the
// checks used to decide whether a stretch of sequence is a complete gene.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.


const BASES: [u8; 4] = [b'T', b'C', b'A', b'G'];

// Amino acids for codons in TCAG order (NCBI translation table 11).
const AMINO_ACIDS: &[u8; 64] = b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

const START_CODONS: [&[u8; 3]; 7] = [b"TTG", b"CTG", b"ATT", b"ATC", b"ATA", b"ATG", b"GTG"];


fn base_index(base: u8) -> Option<usize> {
    BASES.iter().position(|&b| b == base.to_ascii_uppercase())
}


pub fn translate_codon(codon: &[u8]) -> u8 {
    // Returns the amino acid for a codon, or 'X' if the codon is incomplete or ambiguous.
    if codon.len() != 3 { return b'X'; }
    match (base_index(codon[0]), base_index(codon[1]), base_index(codon[2])) {
        (Some(a), Some(b), Some(c)) => AMINO_ACIDS[a * 16 + b * 4 + c],
        _ => b'X',
    }
}


pub fn translate(seq: &[u8]) -> String {
    seq.chunks(3).filter(|c| c.len() == 3).map(|c| translate_codon(c) as char).collect()
}


pub fn is_start_codon(codon: &[u8]) -> bool {
    codon.len() == 3 && START_CODONS.iter().any(|s| s.eq_ignore_ascii_case(codon))
}


pub fn is_stop_codon(codon: &[u8]) -> bool {
    translate_codon(codon) == b'*'
}


pub fn is_complete_gene(seq: &[u8]) -> bool {
    // A complete gene starts with a start codon, ends with a stop codon and has no stop codon in
    // between.
    if seq.len() < 6 || seq.len() % 3 != 0 { return false; }
    if !is_start_codon(&seq[..3]) || !is_stop_codon(&seq[seq.len() - 3..]) { return false; }
    let protein = translate(&seq[..seq.len() - 3]);
    !protein.contains('*')
}
