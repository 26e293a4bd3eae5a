//! Consensus ACMG classification over the fully enriched set tables.
//!
//! Each set table carries criterion verdicts from up to three sources:
//! `*_intervar` columns from the classification service, `*_diablo_acmg`
//! columns from the annotator, and `prediction_criteria_*_prediction`
//! columns from the local prediction service. Per criterion the final
//! verdict is the maximum across the sources present, so any source marking
//! a criterion applicable wins.

use crate::table::{cell_to_string, Table};
use crate::variant::Row;
use serde_json::Value;
use std::collections::HashMap;

/// Criteria that receive a `Final_*` consensus column.
const CRITERIA: [&str; 19] = [
    "pvs1", "ps1", "ps3", "pm1", "pm2", "pm4", "bp3", "pm5", "pp2", "pp3", "bp4", "pp5", "ba1",
    "bs2", "bs3", "bp1", "bp6", "bp7", "bs1",
];

/// Columns carried into the final output, in order. Missing ones are added
/// empty so both sets concatenate onto the same layout.
const BASE_COLUMNS: &[&str] = &[
    "chrom",
    "pos",
    "ref_base",
    "alt_base",
    "hugo",
    "PHENOTYPEIDS",
    "PHENOTYPELIST",
    "so",
    "cchange",
    "achange",
    "clinvar.sig",
    "clinvar.disease_refs",
    "clinvar.disease_names",
    "clinvar.hgvs",
    "clinvar.rev_stat",
    "clinvar.id",
    "clinvar.af_go_esp",
    "clinvar.af_exac",
    "clinvar.af_tgp",
    "clinvar.clinvar_allele_id",
    "clinvar.variant_type",
    "clinvar.variant_clinical_sources",
    "clinvar.dbsnp_id",
    "extra_vcf_info.AC",
    "extra_vcf_info.AF",
    "extra_vcf_info.AN",
    "extra_vcf_info.DP",
    "fathmm_mkl.fathmm_mkl_coding_score",
    "fathmm_mkl.fathmm_mkl_coding_rankscore",
    "fathmm_mkl.fathmm_mkl_coding_pred",
    "fathmm_mkl.fathmm_mkl_group",
    "gerp.bp4_benign",
    "gerp.pp3_pathogenic",
    "hpo.id",
    "hpo.term",
    "hpo.all",
    "lrt.lrt_score",
    "lrt.lrt_converted_rankscore",
    "lrt.lrt_pred",
    "metalr.score",
    "metalr.rankscore",
    "metalr.pred",
    "metasvm.score",
    "metasvm.rankscore",
    "metasvm.pred",
    "mutation_assessor.transcript",
    "mutation_assessor.score",
    "mutation_assessor.rankscore",
    "mutation_assessor.impact",
    "mutation_assessor.all",
    "mutationtaster.rankscore",
    "mutationtaster.prediction",
    "provean.score",
    "provean.rankscore",
    "provean.prediction",
    "polyphen2.hdiv_pred",
    "polyphen2.hvar_pred",
    "polyphen2.hdiv_rank",
    "sift.prediction",
    "sift.confidence",
    "sift.score",
    "sift.rankscore",
    "sift.bp4_benign",
    "sift.pp3_pathogenic",
    "dbsnp.rsid",
    "gnomad3.af",
    "spliceai.ds_ag",
    "spliceai.ds_al",
    "spliceai.ds_dg",
    "spliceai.ds_dl",
    "spliceai.dp_ag",
    "spliceai.dp_al",
    "spliceai.dp_dg",
    "spliceai.dp_dl",
    "vcfinfo.phred",
    "vcfinfo.zygosity",
    "vcfinfo.alt_reads",
    "vcfinfo.tot_reads",
    "vcfinfo.af",
    "gnomad3.af_afr",
    "gnomad3.af_asj",
    "gnomad3.af_eas",
    "gnomad3.af_fin",
    "gnomad3.af_lat",
    "gnomad3.af_nfe",
    "gnomad3.af_oth",
    "gnomad3.af_sas",
    "prediction_data_consequence_mehari",
    "prediction_data_consequence_cadd",
    "prediction_data_consequence_cadd_consequence",
    "prediction_data_gene_symbol",
    "prediction_data_hgnc_id",
    "prediction_data_transcript_id",
    "prediction_data_transcript_tags",
    "prediction_data_tx_pos_utr",
    "prediction_data_cds_pos",
    "prediction_data_prot_pos",
    "prediction_data_prot_length",
    "prediction_data_pHGVS",
    "prediction_data_cds_start",
    "prediction_data_cds_end",
    "prediction_data_strand",
    "prediction_data_scores_cadd_phyloP100",
    "prediction_data_scores_cadd_gerp",
    "prediction_data_scores_cadd_spliceAI_acceptor_gain",
    "prediction_data_scores_cadd_spliceAI_acceptor_loss",
    "prediction_data_scores_cadd_spliceAI_donor_gain",
    "prediction_data_scores_cadd_spliceAI_donor_loss",
    "prediction_data_scores_cadd_ada",
    "prediction_data_scores_cadd_rf",
    "prediction_data_scores_dbnsfp_alpha_missense",
    "prediction_data_scores_dbnsfp_metaRNN",
    "prediction_data_scores_dbnsfp_bayesDel_noAF",
    "prediction_data_scores_dbnsfp_revel",
    "prediction_data_scores_dbnsfp_phyloP100",
    "prediction_data_scores_dbnsfp_sift",
    "prediction_data_scores_dbnsfp_polyphen2",
    "prediction_data_scores_dbnsfp_mutationTaster",
    "prediction_data_scores_dbnsfp_fathmm",
    "prediction_data_scores_dbnsfp_provean",
    "prediction_data_scores_dbnsfp_vest4",
    "prediction_data_scores_dbnsfp_mutpred",
    "prediction_data_scores_dbnsfp_primateAI",
    "prediction_data_scores_dbscsnv_ada",
    "prediction_data_scores_dbscsnv_rf",
    "prediction_data_scores_misZ",
    "prediction_data_thresholds_phyloP100",
    "prediction_data_thresholds_gerp",
    "prediction_data_thresholds_spliceAI_acceptor_gain",
    "prediction_data_thresholds_spliceAI_acceptor_loss",
    "prediction_data_thresholds_spliceAI_donor_gain",
    "prediction_data_thresholds_spliceAI_donor_loss",
    "prediction_data_thresholds_ada",
    "prediction_data_thresholds_rf",
    "prediction_data_thresholds_metaRNN_pathogenic",
    "prediction_data_thresholds_bayesDel_noAF_pathogenic",
    "prediction_data_thresholds_revel_pathogenic",
    "prediction_data_thresholds_cadd_pathogenic",
    "prediction_data_thresholds_metaRNN_benign",
    "prediction_data_thresholds_bayesDel_noAF_benign",
    "prediction_data_thresholds_revel_benign",
    "prediction_data_thresholds_cadd_benign",
    "Score",
    "Intervar",
    "ACMG",
];

/// Verdict and key columns consumed into the final columns and dropped.
const DROP_COLUMNS: [&str; 6] = [
    "ACMG",
    "Intervar",
    "Chromosome",
    "Risk_allele",
    "PHENOTYPEIDS",
    "PHENOTYPELIST",
];

/// Final header renames, applied last.
const RENAME_MAP: [(&str, &str); 13] = [
    ("so", "MC"),
    ("extra_vcf_info.AC", "AlleleCount"),
    ("extra_vcf_info.AF", "AlleleFrequency"),
    ("extra_vcf_info.AN", "AlleleNumber"),
    ("extra_vcf_info.DP", "Depth"),
    ("chrom", "CHROMOSOME"),
    ("pos", "CHROMOSOME_POSITION_HG38"),
    ("ref_base", "REFERENCE_ALLELE"),
    ("alt_base", "RISK_ALLELE"),
    ("dbsnp.rsid", "DBSNP.RSID"),
    ("hugo", "GENESYMBOL"),
    ("clinvar.sig", "CLINVAR.CLINICAL_SIGNIFICANCE"),
    ("Final_ACMG", "ACMG"),
];

/// Run the consensus classification over one set table.
pub fn classify_set(table: &Table) -> Table {
    if table.is_empty() {
        return Table::empty();
    }

    // Case-insensitive lookup from lowercased name to the actual header.
    let by_lower: HashMap<String, String> = table
        .headers
        .iter()
        .map(|h| (h.to_lowercase(), h.clone()))
        .collect();

    let prediction_columns: Vec<&String> = table
        .headers
        .iter()
        .filter(|h| {
            let lower = h.to_lowercase();
            lower.starts_with("prediction_criteria_") && lower.ends_with("_prediction")
        })
        .collect();

    let mut headers: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    for criterion in CRITERIA {
        headers.push(format!("Final_{}", criterion.to_uppercase()));
    }
    headers.push("Flag_Pathogenicity".into());
    headers.push("Flag_Phenotype".into());
    headers.push("Final_ACMG".into());

    let mut rows = Vec::new();
    for source in &table.rows {
        let cell = |name: &str| -> String {
            by_lower
                .get(&name.to_lowercase())
                .and_then(|actual| source.get(actual))
                .map(cell_to_string)
                .unwrap_or_default()
        };

        let mut row = Row::new();
        for &col in BASE_COLUMNS {
            row.insert(col.to_string(), Value::String(cell(col)));
        }

        // Prediction verdicts become binary, keyed by bare criterion name.
        let mut auto_verdicts: HashMap<String, u64> = HashMap::new();
        for col in &prediction_columns {
            let parts: Vec<&str> = col.split('_').collect();
            if parts.len() > 2 {
                let applicable = source
                    .get(col.as_str())
                    .map(cell_to_string)
                    .unwrap_or_default()
                    .trim()
                    .to_lowercase()
                    == "applicable";
                auto_verdicts.insert(parts[2].to_lowercase(), applicable as u64);
            }
        }

        for criterion in CRITERIA {
            let candidates = [
                auto_verdicts.get(criterion).map(|v| *v as f64),
                numeric_cell(&cell(&format!("{}_intervar", criterion))),
                numeric_cell(&cell(&format!("{}_diablo_acmg", criterion))),
            ];
            let verdict = candidates
                .into_iter()
                .flatten()
                .fold(0.0_f64, f64::max);
            row.insert(
                format!("Final_{}", criterion.to_uppercase()),
                Value::String(format_verdict(verdict)),
            );
        }

        let acmg = cell("ACMG");
        let acmg_lower = acmg.to_lowercase();
        let pathogenic =
            !(acmg.trim().is_empty() || acmg_lower.contains("benign") || acmg_lower.contains("vus"));
        row.insert(
            "Flag_Pathogenicity".into(),
            Value::String(if pathogenic { "1" } else { "0" }.into()),
        );

        let phenotype = cell("PHENOTYPEIDS");
        let has_phenotype = !matches!(phenotype.trim(), "" | "-");
        row.insert(
            "Flag_Phenotype".into(),
            Value::String(if has_phenotype { "1" } else { "0" }.into()),
        );

        let combined = [acmg.as_str(), cell("Intervar").as_str()]
            .join("/")
            .trim_matches('/')
            .to_string();
        row.insert("Final_ACMG".into(), Value::String(remove_auto(&combined)));

        rows.push(row);
    }

    let mut result = Table { headers, rows };
    drop_columns(&mut result);
    rename_columns(&mut result);
    result
}

/// Classify both set tables and concatenate them vertically. Empty sets
/// contribute nothing; two empty sets produce an empty table.
pub fn finalize(set1: &Table, set2: &Table) -> Table {
    let classified1 = classify_set(set1);
    let classified2 = classify_set(set2);

    match (classified1.is_empty(), classified2.is_empty()) {
        (true, true) => Table::empty(),
        (false, true) => classified1,
        (true, false) => classified2,
        (false, false) => {
            let mut headers = classified1.headers.clone();
            for h in &classified2.headers {
                if !headers.contains(h) {
                    headers.push(h.clone());
                }
            }
            let mut rows = classified1.rows;
            rows.extend(classified2.rows);
            Table { headers, rows }
        }
    }
}

fn numeric_cell(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        None
    } else {
        trimmed.parse().ok()
    }
}

/// Binary verdicts render without a trailing `.0`.
fn format_verdict(verdict: f64) -> String {
    if verdict.fract() == 0.0 {
        format!("{}", verdict as i64)
    } else {
        format!("{}", verdict)
    }
}

/// Strip every occurrence of "auto" regardless of case. The needle is pure
/// ASCII, so byte-level matching never lands inside a multi-byte character.
fn remove_auto(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(idx) = rest
        .as_bytes()
        .windows(4)
        .position(|w| w.eq_ignore_ascii_case(b"auto"))
    {
        out.push_str(&rest[..idx]);
        rest = &rest[idx + 4..];
    }
    out.push_str(rest);
    out
}

fn drop_columns(table: &mut Table) {
    table.headers.retain(|h| !DROP_COLUMNS.contains(&h.as_str()));
    for row in &mut table.rows {
        for col in DROP_COLUMNS {
            row.remove(col);
        }
    }
}

fn rename_columns(table: &mut Table) {
    let map: HashMap<&str, &str> = RENAME_MAP.iter().copied().collect();
    for header in &mut table.headers {
        if let Some(renamed) = map.get(header.as_str()) {
            *header = renamed.to_string();
        }
    }
    for row in &mut table.rows {
        for (from, to) in RENAME_MAP {
            if let Some(value) = row.remove(from) {
                row.insert(to.to_string(), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set_table(rows: Vec<Row>) -> Table {
        let headers = rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        Table { headers, rows }
    }

    fn enriched_row() -> Row {
        json!({
            "chrom": "1",
            "pos": "100",
            "ref_base": "A",
            "alt_base": "G",
            "hugo": "BRCA1",
            "PHENOTYPEIDS": "HP:0001",
            "ACMG": "pathogenic",
            "Intervar": "Likely pathogenic auto",
            "pvs1_intervar": "1",
            "ps1_diablo_acmg": "1",
            "prediction_criteria_pm2_prediction": "Applicable",
            "prediction_criteria_bp7_prediction": "NotApplicable"
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn test_base_columns_have_no_duplicates() {
        let unique: std::collections::HashSet<&str> = BASE_COLUMNS.iter().copied().collect();
        assert_eq!(unique.len(), BASE_COLUMNS.len());
    }

    #[test]
    fn test_consensus_takes_maximum_across_sources() {
        let result = classify_set(&set_table(vec![enriched_row()]));
        let row = &result.rows[0];

        assert_eq!(row["Final_PVS1"], json!("1"));
        assert_eq!(row["Final_PS1"], json!("1"));
        assert_eq!(row["Final_PM2"], json!("1"));
        assert_eq!(row["Final_BP7"], json!("0"));
        // No source mentions bs1 at all.
        assert_eq!(row["Final_BS1"], json!("0"));
    }

    #[test]
    fn test_flags() {
        let result = classify_set(&set_table(vec![enriched_row()]));
        let row = &result.rows[0];
        assert_eq!(row["Flag_Pathogenicity"], json!("1"));
        assert_eq!(row["Flag_Phenotype"], json!("1"));

        let mut benign = enriched_row();
        benign.insert("ACMG".into(), json!("Likely benign"));
        benign.insert("PHENOTYPEIDS".into(), json!("-"));
        let result = classify_set(&set_table(vec![benign]));
        let row = &result.rows[0];
        assert_eq!(row["Flag_Pathogenicity"], json!("0"));
        assert_eq!(row["Flag_Phenotype"], json!("0"));
    }

    #[test]
    fn test_final_acmg_merges_verdicts_and_strips_auto() {
        let result = classify_set(&set_table(vec![enriched_row()]));
        let row = &result.rows[0];
        // Final_ACMG is renamed to ACMG in the output.
        assert_eq!(row["ACMG"], json!("pathogenic/Likely pathogenic "));
        assert!(row.get("Intervar").is_none());
        assert!(row.get("Final_ACMG").is_none());
    }

    #[test]
    fn test_strips_auto_from_non_ascii_verdicts() {
        // Lowercasing can change byte lengths, so the scan must index the
        // original string only at character boundaries.
        assert_eq!(remove_auto("pathogenic/\u{1E9E}auto"), "pathogenic/\u{1E9E}");
        assert_eq!(remove_auto("AutoPathogenic AUTO"), "Pathogenic ");
        assert_eq!(remove_auto("aut"), "aut");

        let mut row = enriched_row();
        row.insert("Intervar".into(), json!("Likely pathogenic \u{1E9E}auto"));
        let result = classify_set(&set_table(vec![row]));
        assert_eq!(
            result.rows[0]["ACMG"],
            json!("pathogenic/Likely pathogenic \u{1E9E}")
        );
    }

    #[test]
    fn test_rename_map_applied() {
        let result = classify_set(&set_table(vec![enriched_row()]));
        assert!(result.headers.contains(&"CHROMOSOME".to_string()));
        assert!(result.headers.contains(&"GENESYMBOL".to_string()));
        assert!(!result.headers.contains(&"chrom".to_string()));
        assert_eq!(result.rows[0]["GENESYMBOL"], json!("BRCA1"));
    }

    #[test]
    fn test_missing_base_columns_added_empty() {
        let sparse: Row = json!({
            "chrom": "2", "pos": "5", "ref_base": "C", "alt_base": "T", "ACMG": ""
        })
        .as_object()
        .unwrap()
        .clone();
        let result = classify_set(&set_table(vec![sparse]));
        let row = &result.rows[0];
        assert_eq!(row["GENESYMBOL"], json!(""));
        assert_eq!(row["Flag_Pathogenicity"], json!("0"));
    }

    #[test]
    fn test_finalize_concatenates_and_handles_empty() {
        let empty = Table::empty();
        assert!(finalize(&empty, &empty).is_empty());

        let one = set_table(vec![enriched_row()]);
        assert_eq!(finalize(&one, &empty).len(), 1);
        assert_eq!(finalize(&empty, &one).len(), 1);
        assert_eq!(finalize(&one, &one).len(), 2);
    }
}
