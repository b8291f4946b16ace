// This file contains text fixtures (SAM, nucmer and VCF output) for AmrLocus's unit tests.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.


// Reads mapped to two references. ref1 gets two reads scoring 10 each, ref2 gets two reads
// scoring 30 each and one pair has no alignment.
pub const CHOOSER_SAM: &str = "@HD\tVN:1.0\tSO:unsorted\n\
@SQ\tSN:ref1\tLN:10\n\
@SQ\tSN:ref2\tLN:10\n\
@PG\tID:bowtie2\tPN:bowtie2\tVN:2.5.1\n\
read1\t99\tref1\t1\t42\t4M\t=\t5\t8\tACGT\tIIII\tAS:i:10\tYT:Z:CP\n\
read1\t147\tref1\t5\t42\t4M\t=\t1\t-8\tACGT\tIIII\tAS:i:10\tYT:Z:CP\n\
read2\t99\tref2\t1\t42\t4M\t=\t5\t8\tTTTT\tIIII\tAS:i:30\tYT:Z:CP\n\
read2\t147\tref2\t5\t42\t4M\t=\t1\t-8\tGGCC\tIIII\tAS:i:30\tYT:Z:CP\n\
read3\t77\t*\t0\t0\t*\t*\t0\t0\tAAAA\tIIII\tYT:Z:UP\n\
read3\t141\t*\t0\t0\t*\t*\t0\t0\tAAAA\tIIII\tYT:Z:UP\n";


// A complete 30 bp gene: M A C K G L T D H *
pub const GENE_REF: &str = "ATGGCTTGTAAAGGCCTGACCGATCATTAA";

// A 60 bp contig with GENE_REF at 0-based positions 10 to 39.
pub const GENE_CONTIG: &str = "CCCCCCCCCCATGGCTTGTAAAGGCCTGACCGATCATTAAGGGGGGGGGGGGGGGGGGGG";


// show-coords -dTlroH output: the whole of ref aligns to ctg1 positions 11 to 40 (1-based).
pub const COMPARE_COORDS: &str = "1\t30\t11\t40\t30\t30\t96.67\t30\t60\t1\t1\tref\tctg1\n";

// show-snps -ClrTH output: ref position 5 C is an A in ctg1 (GCT -> GAT in the second codon).
pub const COMPARE_SNPS: &str = "5\tC\tA\t15\t5\t5\t30\t60\t1\t1\tref\tctg1\n";


// bcftools mpileup output for three positions of GENE_CONTIG, where position 15 has reads
// supporting both C and A.
pub const PILEUP_VCF: &str = "##fileformat=VCFv4.2\n\
##contig=<ID=ctg1,length=60>\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tassembly.reads_mapped.bam\n\
ctg1\t14\t.\tG\t<*>\t0\t.\tDP=20;I16=10,10,0,0;QS=1,0;MQ0F=0\tPL:AD\t0,60,255:20,0\n\
ctg1\t15\t.\tC\tA,<*>\t0\t.\tDP=20;I16=5,4,6,5;QS=0.45,0.55,0;MQ0F=0\tPL:AD\t255,0,255,255,255,255:9,11,0\n\
ctg1\t16\t.\tT\t<*>\t0\t.\tDP=18;I16=9,9,0,0;QS=1,0;MQ0F=0\tPL:AD\t0,54,255:18,0\n";

// bcftools mpileup output where reads at position 15 carry an indel as well as a SNP, so the
// indel record follows the base record at the same position.
pub const PILEUP_VCF_WITH_INDEL: &str = "##fileformat=VCFv4.2\n\
##contig=<ID=ctg,length=60>\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tassembly.reads_mapped.bam\n\
ctg\t15\t.\tG\tA,<*>\t0\t.\tDP=20;I16=6,6,4,4;QS=0.6,0.4,0;MQ0F=0\tPL:AD\t255,0,255,255,255,255:12,8,0\n\
ctg\t15\t.\tGA\tG,<*>\t0\t.\tINDEL;IDV=2;IMF=0.1;DP=20;I16=2,1,1,1;QS=0.6,0.4,0;MQ0F=0\tPL:AD\t0,9,90,255,255,255:3,2,0\n\
ctg\t16\t.\tA\t<*>\t0\t.\tDP=19;I16=10,9,0,0;QS=1,0;MQ0F=0\tPL:AD\t0,57,255:19,0\n";

// bcftools call -m -v output. Only the call at position 15 passes the default filters: the call
// at 40 has low quality and the one at 50 has too little depth.
pub const CALLS_VCF: &str = "##fileformat=VCFv4.2\n\
##contig=<ID=ctg1,length=60>\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tassembly.reads_mapped.bam\n\
ctg1\t15\t.\tC\tA\t50.5\t.\tDP=20;VDB=0.5;MQ0F=0;AC=1;AN=2;MQ=42\tGT:PL:AD\t0/1:84,0,66:9,11\n\
ctg1\t40\t.\tA\tT\t10\t.\tDP=20;VDB=0.5;MQ0F=0;AC=1;AN=2;MQ=42\tGT:PL:AD\t0/1:40,0,90:15,5\n\
ctg1\t50\t.\tG\tT\t60\t.\tDP=6;VDB=0.5;MQ0F=0;AC=2;AN=2;MQ=42\tGT:PL:AD\t1/1:90,18,0:0,6\n";
