// This file contains the code for a cluster's report: one tab-delimited row per variant (or per
// contig when there are no variants), written to report.tsv in the cluster directory.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use crate::assembly_compare::Comparison;
use crate::assembly_variants::{AssemblyVariant, VariantTable};
use crate::error::{ClusterError, Result};
use crate::flag::Flags;
use crate::pileup_variants::{PileupCall, PileupResult};
use crate::ref_data::{RefType, VariantSeqType};


pub const COLUMNS: [&str; 29] = [
    "ref_name", "ref_type", "flag", "reads", "cluster", "ref_len", "ref_base_assembled",
    "pc_ident", "ctg", "ctg_len", "ctg_cov", "known_var", "var_type", "var_seq_type",
    "known_var_change", "has_known_var", "ref_ctg_change", "ref_ctg_effect", "ref_start",
    "ref_end", "ref_nt", "ctg_start", "ctg_end", "ctg_nt", "smtls_total_depth", "smtls_alt_nt",
    "smtls_alt_depth", "var_description", "free_text",
];


/// One report row. None is written as "." and coordinates are 1-based.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReportRow {
    pub ref_name: Option<String>,
    pub ref_type: Option<RefType>,
    pub flags: Flags,
    pub reads: u64,
    pub cluster: String,
    pub ref_len: Option<usize>,
    pub ref_base_assembled: Option<usize>,
    pub pc_ident: Option<f64>,
    pub ctg: Option<String>,
    pub ctg_len: Option<usize>,
    pub ctg_cov: Option<f64>,
    pub known_var: Option<bool>,
    pub var_type: Option<String>,
    pub var_seq_type: Option<VariantSeqType>,
    pub known_var_change: Option<String>,
    pub has_known_var: Option<bool>,
    pub ref_ctg_change: Option<String>,
    pub ref_ctg_effect: Option<String>,
    pub ref_start: Option<usize>,
    pub ref_end: Option<usize>,
    pub ref_nt: Option<String>,
    pub ctg_start: Option<usize>,
    pub ctg_end: Option<usize>,
    pub ctg_nt: Option<String>,
    pub smtls_total_depth: Option<String>,
    pub smtls_alt_nt: Option<String>,
    pub smtls_alt_depth: Option<String>,
    pub var_description: Option<String>,
    pub free_text: Option<String>,
}


fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_else(|| ".".to_string())
}

fn opt_float(value: Option<f64>, decimals: usize) -> String {
    value.map(|v| format!("{:.*}", decimals, v)).unwrap_or_else(|| ".".to_string())
}

fn opt_bool(value: Option<bool>) -> String {
    match value { Some(true) => "1", Some(false) => "0", None => "." }.to_string()
}

fn parse_opt<T: FromStr>(s: &str) -> std::result::Result<Option<T>, String> {
    if s == "." { return Ok(None); }
    s.parse::<T>().map(Some).map_err(|_| format!("bad value: {}", s))
}

fn parse_bool(s: &str) -> std::result::Result<Option<bool>, String> {
    match s {
        "1" => Ok(Some(true)),
        "0" => Ok(Some(false)),
        "." => Ok(None),
        _ => Err(format!("bad boolean: {}", s)),
    }
}

fn parse_seq_type(s: &str) -> std::result::Result<Option<VariantSeqType>, String> {
    match s {
        "n" => Ok(Some(VariantSeqType::Nucleotide)),
        "p" => Ok(Some(VariantSeqType::Protein)),
        "." => Ok(None),
        _ => Err(format!("bad variant sequence type: {}", s)),
    }
}


impl ReportRow {
    pub fn header() -> String {
        format!("#{}", COLUMNS.join("\t"))
    }

    /// The row as a tab-delimited line. pc_ident is rounded to 2 decimal places and ctg_cov to 1,
    /// so reading a line back gives the rounded values.
    pub fn to_line(&self) -> String {
        let fields = [
            opt(&self.ref_name), opt(&self.ref_type), self.flags.to_bit_string(),
            self.reads.to_string(), self.cluster.clone(), opt(&self.ref_len),
            opt(&self.ref_base_assembled), opt_float(self.pc_ident, 2), opt(&self.ctg),
            opt(&self.ctg_len), opt_float(self.ctg_cov, 1), opt_bool(self.known_var),
            opt(&self.var_type), opt(&self.var_seq_type.map(|t| t.code())),
            opt(&self.known_var_change), opt_bool(self.has_known_var), opt(&self.ref_ctg_change),
            opt(&self.ref_ctg_effect), opt(&self.ref_start), opt(&self.ref_end), opt(&self.ref_nt),
            opt(&self.ctg_start), opt(&self.ctg_end), opt(&self.ctg_nt),
            opt(&self.smtls_total_depth), opt(&self.smtls_alt_nt), opt(&self.smtls_alt_depth),
            opt(&self.var_description), opt(&self.free_text),
        ];
        fields.join("\t")
    }

    pub fn from_line(line: &str) -> std::result::Result<Self, String> {
        let f: Vec<&str> = line.split('\t').collect();
        if f.len() != COLUMNS.len() {
            return Err(format!("expected {} columns, found {}", COLUMNS.len(), f.len()));
        }
        Ok(ReportRow {
            ref_name: parse_opt(f[0])?,
            ref_type: parse_opt(f[1])?,
            flags: Flags::from_bit_string(f[2])?,
            reads: f[3].parse().map_err(|_| format!("bad read count: {}", f[3]))?,
            cluster: f[4].to_string(),
            ref_len: parse_opt(f[5])?,
            ref_base_assembled: parse_opt(f[6])?,
            pc_ident: parse_opt(f[7])?,
            ctg: parse_opt(f[8])?,
            ctg_len: parse_opt(f[9])?,
            ctg_cov: parse_opt(f[10])?,
            known_var: parse_bool(f[11])?,
            var_type: parse_opt(f[12])?,
            var_seq_type: parse_seq_type(f[13])?,
            known_var_change: parse_opt(f[14])?,
            has_known_var: parse_bool(f[15])?,
            ref_ctg_change: parse_opt(f[16])?,
            ref_ctg_effect: parse_opt(f[17])?,
            ref_start: parse_opt(f[18])?,
            ref_end: parse_opt(f[19])?,
            ref_nt: parse_opt(f[20])?,
            ctg_start: parse_opt(f[21])?,
            ctg_end: parse_opt(f[22])?,
            ctg_nt: parse_opt(f[23])?,
            smtls_total_depth: parse_opt(f[24])?,
            smtls_alt_nt: parse_opt(f[25])?,
            smtls_alt_depth: parse_opt(f[26])?,
            var_description: parse_opt(f[27])?,
            free_text: parse_opt(f[28])?,
        })
    }
}


pub fn write_report(filename: &Path, rows: &[ReportRow]) -> Result<()> {
    let file = File::create(filename).map_err(|e| ClusterError::io(filename, e))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", ReportRow::header()).map_err(|e| ClusterError::io(filename, e))?;
    for row in rows {
        writeln!(writer, "{}", row.to_line()).map_err(|e| ClusterError::io(filename, e))?;
    }
    writer.flush().map_err(|e| ClusterError::io(filename, e))
}


pub fn load_report(filename: &Path) -> Result<Vec<ReportRow>> {
    let file = File::open(filename).map_err(|e| ClusterError::io(filename, e))?;
    let mut rows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| ClusterError::io(filename, e))?;
        if line.is_empty() || line.starts_with('#') { continue; }
        rows.push(ReportRow::from_line(&line).map_err(|e| ClusterError::parse(filename, e))?);
    }
    Ok(rows)
}


/// What every row of a cluster's report shares.
pub struct RowContext<'a> {
    pub cluster: &'a str,
    pub reads: u64,
    pub flags: Flags,
    pub ref_name: &'a str,
    pub ref_type: RefType,
    pub ref_len: usize,
}

impl RowContext<'_> {
    fn row(&self) -> ReportRow {
        ReportRow { ref_name: Some(self.ref_name.to_string()), ref_type: Some(self.ref_type),
                    flags: self.flags, reads: self.reads, cluster: self.cluster.to_string(),
                    ref_len: Some(self.ref_len), ..Default::default() }
    }
}


/// The single row for a cluster whose reference could not be chosen.
pub fn ref_choose_failure_row(cluster: &str, reads: u64, flags: Flags) -> ReportRow {
    ReportRow { flags, reads, cluster: cluster.to_string(), ..Default::default() }
}


/// The single row for a cluster which did not assemble.
pub fn assembly_failure_row(context: &RowContext) -> ReportRow {
    context.row()
}


/// Rows for an assembled cluster. Each contig which hits the reference gets one row per variant
/// and one HET row per pileup call in its matching region that no variant explains. A contig with
/// neither gets a single row. An assembly with no hits gets a single row without contig details.
pub fn cluster_rows(context: &RowContext, comparison: &Comparison, contigs: &[(String, String)],
                    variants: &VariantTable, pileup: &PileupResult) -> Vec<ReportRow> {
    let mut base = context.row();
    base.ref_base_assembled = Some(comparison.ref_bases_assembled);
    if !comparison.matched() {
        return vec![base];
    }
    base.pc_ident = Some(comparison.percent_identity);

    let mut rows = Vec::new();
    for (contig, intervals) in comparison.contig_intervals() {
        let mut contig_row = base.clone();
        let ctg_len = contigs.iter().find(|(n, _)| *n == contig).map(|(_, s)| s.len()).unwrap_or(0);
        contig_row.ctg = Some(contig.clone());
        contig_row.ctg_len = Some(ctg_len);
        contig_row.ctg_cov = pileup.total_depth_per_contig.get(&contig)
            .filter(|_| ctg_len > 0).map(|d| *d as f64 / ctg_len as f64);

        let contig_variants: Vec<&AssemblyVariant> = variants.values().flatten()
            .filter(|v| v.contig == contig).collect();
        let mut contig_rows: Vec<ReportRow> = contig_variants.iter()
            .map(|v| variant_row(&contig_row, v, pileup)).collect();
        for call in pileup.calls.iter().filter(|c| c.contig == contig) {
            let in_region = intervals.iter().any(|&(s, e)| s <= call.pos && call.pos <= e);
            let explained = contig_variants.iter()
                .any(|v| v.ctg_start <= call.pos && call.pos <= v.ctg_end);
            if in_region && !explained {
                contig_rows.push(het_row(&contig_row, call));
            }
        }
        if contig_rows.is_empty() {
            contig_rows.push(contig_row);
        }
        rows.extend(contig_rows);
    }
    rows
}


fn variant_row(contig_row: &ReportRow, v: &AssemblyVariant, pileup: &PileupResult) -> ReportRow {
    let mut row = contig_row.clone();
    row.known_var = Some(v.known.is_some());
    row.var_type = Some("SNP".to_string());
    row.var_seq_type = Some(v.seq_type);
    if let Some(known) = &v.known {
        row.known_var_change = Some(known.change());
        row.has_known_var = Some(v.has_known_var);
        row.var_description = Some(known.description.clone());
        row.free_text = known.group.clone();
    }
    row.ref_ctg_change = v.change.clone();
    row.ref_ctg_effect = v.effect.map(|e| e.to_string());
    row.ref_start = Some(v.ref_start + 1);
    row.ref_end = Some(v.ref_end + 1);
    row.ref_nt = Some(v.ref_nt.clone());
    row.ctg_start = Some(v.ctg_start + 1);
    row.ctg_end = Some(v.ctg_end + 1);
    row.ctg_nt = Some(v.ctg_nt.clone());
    if let Some(depth) = pileup.read_depths.get(&(v.contig.clone(), v.ctg_start)) {
        row.smtls_total_depth = Some(depth.total().to_string());
        if !depth.alts.is_empty() {
            row.smtls_alt_nt = Some(depth.alts.join(","));
            let alt_depths: Vec<String> = depth.alt_depths().iter().map(|d| d.to_string()).collect();
            row.smtls_alt_depth = Some(alt_depths.join(","));
        }
    }
    row
}


fn het_row(contig_row: &ReportRow, call: &PileupCall) -> ReportRow {
    let mut row = contig_row.clone();
    row.known_var = Some(false);
    row.var_type = Some("HET".to_string());
    row.ctg_start = Some(call.pos + 1);
    row.ctg_end = Some(call.pos + 1);
    row.ctg_nt = Some(call.ref_base.clone());
    row.smtls_total_depth = Some(call.depth.to_string());
    row.smtls_alt_nt = Some(call.alt.clone());
    row.smtls_alt_depth = Some(call.alt_depth.to_string());
    row
}


#[cfg(test)]
mod tests {
    use maplit::btreemap;
    use tempfile::tempdir;
    use crate::assembly_variants::Effect;
    use crate::flag::StatusFlag;
    use crate::pileup_variants::ReadDepth;
    use crate::ref_data::KnownVariant;
    use crate::settings::ClusterSettings;
    use crate::test_data::GENE_CONTIG;
    use crate::tests::make_hit;
    use super::*;

    fn context(flags: Flags) -> RowContext<'static> {
        RowContext { cluster: "cluster_1", reads: 100, flags, ref_name: "ref",
                     ref_type: RefType::PresenceAbsence, ref_len: 30 }
    }

    fn comparison() -> Comparison {
        let contigs = vec![("ctg1".to_string(), GENE_CONTIG.to_string())];
        Comparison::from_hits("ref", 30, RefType::PresenceAbsence, &contigs,
                              vec![make_hit(0, 29, 10, 39, 96.67, "ctg1")], vec![],
                              &ClusterSettings::default())
    }

    fn contigs() -> Vec<(String, String)> {
        vec![("ctg1".to_string(), GENE_CONTIG.to_string())]
    }

    fn nonsyn_variant() -> AssemblyVariant {
        AssemblyVariant { seq_type: VariantSeqType::Protein, ref_start: 3, ref_end: 5,
                          ref_nt: "GCT".to_string(), contig: "ctg1".to_string(), ctg_start: 13,
                          ctg_end: 15, ctg_nt: "GAT".to_string(),
                          change: Some("A2D".to_string()), effect: Some(Effect::NonSyn),
                          known: None, has_known_var: false }
    }

    fn pileup() -> PileupResult {
        let mut result = PileupResult {
            total_depth_per_contig: btreemap! { "ctg1".to_string() => 1200 },
            ..Default::default()
        };
        result.read_depths.insert(("ctg1".to_string(), 13),
                                  ReadDepth { ref_base: "G".to_string(), alts: vec!["T".to_string()],
                                              depths: vec![15, 5] });
        result
    }

    #[test]
    fn test_header() {
        let header = ReportRow::header();
        assert!(header.starts_with("#ref_name\tref_type\tflag\t"));
        assert_eq!(header.split('\t').count(), 29);
    }

    #[test]
    fn test_failure_rows() {
        let mut flags = Flags::new();
        flags.add(StatusFlag::RefSeqChooseFail);
        let row = ref_choose_failure_row("cluster_1", 8, flags);
        assert_eq!(row.to_line(),
                   format!(".\t.\t00000000001\t8\tcluster_1{}", "\t.".repeat(24)));

        let mut flags = Flags::new();
        flags.add(StatusFlag::AssemblyFail);
        let line = assembly_failure_row(&context(flags)).to_line();
        assert!(line.starts_with("ref\tpresence_absence\t00000010000\t100\tcluster_1\t30\t.\t"));
    }

    #[test]
    fn test_variant_rows() {
        let variants = btreemap! { 3 => vec![nonsyn_variant()] };
        let rows = cluster_rows(&context(Flags::new()), &comparison(), &contigs(), &variants,
                                &pileup());
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.ctg.as_deref(), Some("ctg1"));
        assert_eq!(row.ctg_len, Some(60));
        assert_eq!(row.ctg_cov, Some(20.0));
        assert_eq!(row.ref_ctg_change.as_deref(), Some("A2D"));
        assert_eq!(row.ref_ctg_effect.as_deref(), Some("NONSYN"));
        assert_eq!((row.ref_start, row.ref_end), (Some(4), Some(6)));
        assert_eq!((row.ctg_start, row.ctg_end), (Some(14), Some(16)));
        assert_eq!(row.known_var, Some(false));
        assert_eq!(row.has_known_var, None);
        assert_eq!(row.smtls_total_depth.as_deref(), Some("20"));
        assert_eq!(row.smtls_alt_nt.as_deref(), Some("T"));
        assert_eq!(row.smtls_alt_depth.as_deref(), Some("5"));
    }

    #[test]
    fn test_known_variant_row() {
        let mut variant = nonsyn_variant();
        variant.known = Some(KnownVariant::parse(VariantSeqType::Protein, "A2D",
                                                 Some("group1".to_string()), "resistance")
                             .unwrap());
        variant.has_known_var = true;
        let variants = btreemap! { 3 => vec![variant] };
        let rows = cluster_rows(&context(Flags::new()), &comparison(), &contigs(), &variants,
                                &PileupResult::default());
        let row = &rows[0];
        assert_eq!(row.known_var, Some(true));
        assert_eq!(row.known_var_change.as_deref(), Some("A2D"));
        assert_eq!(row.has_known_var, Some(true));
        assert_eq!(row.var_description.as_deref(), Some("resistance"));
        assert_eq!(row.free_text.as_deref(), Some("group1"));
        assert_eq!(row.ctg_cov, None);
    }

    #[test]
    fn test_het_and_plain_rows() {
        let mut result = pileup();
        let call = |pos| PileupCall { contig: "ctg1".to_string(), pos, ref_base: "C".to_string(),
                                      alt: "A".to_string(), depth: 20, alt_depth: 11, qual: 50.0 };
        result.calls = vec![call(20), call(50)];
        let rows = cluster_rows(&context(Flags::new()), &comparison(), &contigs(),
                                &VariantTable::new(), &result);
        // The call at 50 is outside the region matching the reference.
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].var_type.as_deref(), Some("HET"));
        assert_eq!(rows[0].ctg_start, Some(21));
        assert_eq!(rows[0].smtls_alt_depth.as_deref(), Some("11"));

        let rows = cluster_rows(&context(Flags::new()), &comparison(), &contigs(),
                                &VariantTable::new(), &PileupResult::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].var_type, None);
        assert_eq!(rows[0].pc_ident, Some(96.67));
    }

    #[test]
    fn test_unmatched_assembly() {
        let unmatched = Comparison::from_hits("ref", 30, RefType::PresenceAbsence, &contigs(),
                                              vec![], vec![], &ClusterSettings::default());
        let rows = cluster_rows(&context(Flags::new()), &unmatched, &contigs(),
                                &VariantTable::new(), &PileupResult::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ctg, None);
        assert_eq!(rows[0].ref_base_assembled, Some(0));
    }

    #[test]
    fn test_report_file_round_trip() {
        let temp_dir = tempdir().unwrap();
        let report = temp_dir.path().join("report.tsv");
        let mut flags = Flags::new();
        flags.add(StatusFlag::Assembled);
        flags.add(StatusFlag::HasNonsynonymousVariants);
        let mut known = nonsyn_variant();
        known.known = Some(KnownVariant::parse(VariantSeqType::Protein, "A2D", None,
                                               "resistance").unwrap());
        let variants = btreemap! { 3 => vec![nonsyn_variant(), known] };
        let rows = cluster_rows(&context(flags), &comparison(), &contigs(), &variants, &pileup());
        assert_eq!(rows.len(), 2);
        write_report(&report, &rows).unwrap();

        let text = std::fs::read_to_string(&report).unwrap();
        assert!(text.starts_with("#ref_name"));
        let loaded = load_report(&report).unwrap();
        let lines = |rows: &[ReportRow]| rows.iter().map(|r| r.to_line()).collect::<Vec<_>>();
        assert_eq!(lines(&loaded), lines(&rows));
    }

    #[test]
    fn test_floats_are_rounded() {
        let row = ReportRow { pc_ident: Some(96.66667), ctg_cov: Some(12.345),
                              cluster: "c1".to_string(), ..Default::default() };
        let line = row.to_line();
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!((fields[7], fields[10]), ("96.67", "12.3"));
        let loaded = ReportRow::from_line(&line).unwrap();
        assert_eq!((loaded.pc_ident, loaded.ctg_cov), (Some(96.67), Some(12.3)));
        assert_ne!(loaded, row);
        assert_eq!(loaded.to_line(), line);
    }

    #[test]
    fn test_bad_line() {
        assert!(ReportRow::from_line("too\tfew").is_err());
        let mut line = ReportRow::default().to_line();
        line = line.replacen("00000000000", "0000", 1);
        assert!(ReportRow::from_line(&line).is_err());
    }
}
