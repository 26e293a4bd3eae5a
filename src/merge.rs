//! Table splitting and joining between pipeline stages.
//!
//! The split stage carves the annotator output into the pathogenic set and,
//! when an annotated VCF export is present, the common set. The classify
//! merge stage turns classification JSON into a table with suffixed
//! criterion columns and joins it back onto the originating set table.

use crate::convert::flatten_json;
use crate::enrich::Dataset;
use crate::table::{cell_to_string, Table};
use crate::variant::{Row, SCHEMA_ONE_COLUMNS, SCHEMA_TWO_COLUMNS};
use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::HashMap;

/// ACMG verdicts that place a row in the pathogenic set, compared after
/// lowercasing.
const PATHOGENIC_VERDICTS: [&str; 2] = ["pathogenic", "likely pathogenic"];

/// Classification criterion columns that receive the `_intervar` suffix so
/// they stay distinct from the other sources' verdicts after joining.
const CRITERION_COLUMNS: [&str; 28] = [
    "PVS1", "PS1", "PS2", "PS3", "PS4", "PM1", "PM2", "PM3", "PM4", "PM5", "PM6", "PP1", "PP2",
    "PP3", "PP4", "PP5", "BA1", "BP1", "BP2", "BP3", "BP4", "BP5", "BP6", "BP7", "BS1", "BS2",
    "BS3", "BS4",
];

const INTERVAR_SUFFIX: &str = "_intervar";

/// Join-side columns of a flattened classification table.
const INTERVAR_KEY_COLUMNS: [&str; 4] = ["Chromosome", "Position", "Ref_allele", "Risk_allele"];

/// Filter the annotator output down to pathogenic and likely pathogenic
/// rows. The `ACMG` verdict column is required and is lowercased in the
/// result; a missing column is fatal because nothing downstream can work
/// without the verdicts.
pub fn pathogenic_subset(annotator_output: &Table) -> Result<Table> {
    if !annotator_output.headers.iter().any(|h| h == "ACMG") {
        bail!(
            "annotator output is missing the ACMG column (available: {:?})",
            annotator_output.headers
        );
    }

    let rows = annotator_output
        .rows
        .iter()
        .filter_map(|row| {
            let verdict = row.get("ACMG").map(cell_to_string)?.to_lowercase();
            if PATHOGENIC_VERDICTS.contains(&verdict.as_str()) {
                let mut row = row.clone();
                row.insert("ACMG".into(), Value::String(verdict));
                Some(row)
            } else {
                None
            }
        })
        .collect();

    Ok(Table {
        headers: annotator_output.headers.clone(),
        rows,
    })
}

/// Inner-join the annotated VCF export against the annotator output on the
/// variant key columns, producing the common set. Both tables must carry
/// their schema's key columns.
pub fn common_subset(annotated: &Table, annotator_output: &Table) -> Result<Table> {
    for col in SCHEMA_ONE_COLUMNS {
        if !annotated.headers.iter().any(|h| h == col) {
            bail!("annotated VCF is missing required column {}", col);
        }
    }
    for col in SCHEMA_TWO_COLUMNS {
        if !annotator_output.headers.iter().any(|h| h == col) {
            bail!("annotator output is missing required column {}", col);
        }
    }

    let index = key_index(annotator_output, &SCHEMA_TWO_COLUMNS);

    let mut rows = Vec::new();
    for left in &annotated.rows {
        let key = row_key(left, &SCHEMA_ONE_COLUMNS);
        if let Some(matches) = index.get(&key) {
            for right in matches {
                let mut merged = merge_rows(left, right);
                // Verdicts compare lowercased everywhere downstream.
                if let Some(verdict) = merged.get("ACMG").map(cell_to_string) {
                    merged.insert("ACMG".into(), Value::String(verdict.to_lowercase()));
                }
                rows.push(merged);
            }
        }
    }

    Ok(Table {
        headers: joined_headers(annotated, annotator_output),
        rows,
    })
}

/// Flatten a list of classification responses into a table.
///
/// The variant key columns come first (`Risk_allele` is populated from the
/// response's `Alt_allele`), then the remaining response fields in first-seen
/// order, with the criterion columns renamed to carry the `_intervar` suffix.
pub fn intervar_table_from_json(responses: &[Row]) -> Table {
    if responses.is_empty() {
        return Table::empty();
    }

    let base: [(&str, &str); 6] = [
        ("Chromosome", "Chromosome"),
        ("Position", "Position"),
        ("Ref_allele", "Ref_allele"),
        ("Risk_allele", "Alt_allele"),
        ("Build", "Build"),
        ("Gene", "Gene"),
    ];

    let mut headers: Vec<String> = base.iter().map(|(out, _)| out.to_string()).collect();
    let mut rows = Vec::new();

    for response in responses {
        let flat = flatten_json(response);
        let mut row = Row::new();
        for (out, source) in &base {
            let value = flat.get(*source).cloned().unwrap_or(Value::String(String::new()));
            row.insert(out.to_string(), value);
        }
        for (key, value) in &flat {
            let key = suffix_criterion(key);
            if !row.contains_key(&key) {
                if !headers.iter().any(|h| h == &key) {
                    headers.push(key.clone());
                }
                row.insert(key, value.clone());
            }
        }
        rows.push(row);
    }

    Table { headers, rows }
}

/// Left-join a flattened classification table back onto the set table it
/// was produced from. An empty side passes the other side through; two
/// empty sides produce an empty table.
pub fn join_intervar(set_table: &Table, intervar: &Table, dataset: Dataset) -> Table {
    if set_table.is_empty() && intervar.is_empty() {
        return Table::empty();
    }
    if intervar.is_empty() {
        return set_table.clone();
    }
    if set_table.is_empty() {
        return intervar.clone();
    }

    // Set 2 keys carry a `chr` prefix the classification responses lack.
    let (left_cols, strip_left) = match dataset {
        Dataset::Set1 => (SCHEMA_ONE_COLUMNS, false),
        Dataset::Set2 => (SCHEMA_TWO_COLUMNS, true),
    };

    let index = key_index(intervar, &INTERVAR_KEY_COLUMNS);

    let mut rows = Vec::new();
    for left in &set_table.rows {
        let mut left = left.clone();
        if strip_left {
            if let Some(chrom) = left.get(left_cols[0]).map(cell_to_string) {
                let stripped = chrom.strip_prefix("chr").unwrap_or(&chrom).to_string();
                left.insert(left_cols[0].to_string(), Value::String(stripped));
            }
        }
        let key = row_key(&left, &left_cols);
        match index.get(&key) {
            Some(matches) => {
                for right in matches {
                    rows.push(merge_rows(&left, right));
                }
            }
            None => rows.push(left),
        }
    }

    Table {
        headers: joined_headers(set_table, intervar),
        rows,
    }
}

fn suffix_criterion(key: &str) -> String {
    if CRITERION_COLUMNS.contains(&key) {
        format!("{}{}", key, INTERVAR_SUFFIX)
    } else {
        key.to_string()
    }
}

/// Composite join key for a row. Cells compare as strings; a missing cell
/// compares as empty.
fn row_key(row: &Row, columns: &[&str]) -> Vec<String> {
    columns
        .iter()
        .map(|col| row.get(*col).map(cell_to_string).unwrap_or_default())
        .collect()
}

fn key_index<'a>(table: &'a Table, columns: &[&str]) -> HashMap<Vec<String>, Vec<&'a Row>> {
    let mut index: HashMap<Vec<String>, Vec<&Row>> = HashMap::new();
    for row in &table.rows {
        index.entry(row_key(row, columns)).or_default().push(row);
    }
    index
}

/// Left row fields first, then right row fields that do not collide.
fn merge_rows(left: &Row, right: &Row) -> Row {
    let mut merged = left.clone();
    for (key, value) in right {
        if !merged.contains_key(key) {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

fn joined_headers(left: &Table, right: &Table) -> Vec<String> {
    let mut headers = left.headers.clone();
    for h in &right.headers {
        if !headers.contains(h) {
            headers.push(h.clone());
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn annotator_table() -> Table {
        let make = |chrom: &str, pos: &str, verdict: &str| -> Row {
            json!({
                "chrom": chrom,
                "pos": pos,
                "ref_base": "A",
                "alt_base": "G",
                "ACMG": verdict,
            })
            .as_object()
            .unwrap()
            .clone()
        };
        Table {
            headers: vec![
                "chrom".into(),
                "pos".into(),
                "ref_base".into(),
                "alt_base".into(),
                "ACMG".into(),
            ],
            rows: vec![
                make("chr1", "100", "Pathogenic"),
                make("chr1", "200", "Benign"),
                make("chr2", "300", "Likely Pathogenic"),
                make("chr2", "400", "VUS"),
            ],
        }
    }

    #[test]
    fn test_pathogenic_subset_filters_and_lowercases() {
        let subset = pathogenic_subset(&annotator_table()).unwrap();
        assert_eq!(subset.len(), 2);
        assert_eq!(subset.rows[0]["ACMG"], json!("pathogenic"));
        assert_eq!(subset.rows[1]["ACMG"], json!("likely pathogenic"));
    }

    #[test]
    fn test_pathogenic_subset_missing_acmg_is_fatal() {
        let table = Table {
            headers: vec!["chrom".into()],
            rows: vec![],
        };
        assert!(pathogenic_subset(&table).is_err());
    }

    #[test]
    fn test_common_subset_inner_join() {
        let annotated = Table {
            headers: vec![
                "CHROMOSOME".into(),
                "CHROMOSOME_POSITION_HG38".into(),
                "REFERENCE_ALLELE".into(),
                "RISK_ALLELE".into(),
                "GENE".into(),
            ],
            rows: vec![
                json!({
                    "CHROMOSOME": "chr1", "CHROMOSOME_POSITION_HG38": "100",
                    "REFERENCE_ALLELE": "A", "RISK_ALLELE": "G", "GENE": "BRCA1"
                })
                .as_object()
                .unwrap()
                .clone(),
                json!({
                    "CHROMOSOME": "chr9", "CHROMOSOME_POSITION_HG38": "999",
                    "REFERENCE_ALLELE": "C", "RISK_ALLELE": "T", "GENE": "TP53"
                })
                .as_object()
                .unwrap()
                .clone(),
            ],
        };

        let joined = common_subset(&annotated, &annotator_table()).unwrap();
        // Only chr1:100:A:G appears in both tables.
        assert_eq!(joined.len(), 1);
        assert_eq!(joined.rows[0]["GENE"], json!("BRCA1"));
        assert_eq!(joined.rows[0]["ACMG"], json!("pathogenic"));
        assert!(joined.headers.contains(&"chrom".to_string()));
    }

    #[test]
    fn test_common_subset_missing_columns() {
        let bad = Table {
            headers: vec!["CHROMOSOME".into()],
            rows: vec![],
        };
        assert!(common_subset(&bad, &annotator_table()).is_err());
    }

    #[test]
    fn test_intervar_table_suffixes_criteria() {
        let responses: Vec<Row> = vec![json!({
            "Chromosome": "1",
            "Position": "100",
            "Ref_allele": "A",
            "Alt_allele": "G",
            "Build": "hg38",
            "Gene": "BRCA1",
            "Intervar": "Benign",
            "PVS1": 0,
            "BS4": 1
        })
        .as_object()
        .unwrap()
        .clone()];

        let table = intervar_table_from_json(&responses);
        assert_eq!(table.len(), 1);
        assert_eq!(table.headers[0], "Chromosome");
        assert_eq!(table.rows[0]["Risk_allele"], json!("G"));
        assert_eq!(table.rows[0]["PVS1_intervar"], json!(0));
        assert_eq!(table.rows[0]["BS4_intervar"], json!(1));
        assert!(table.rows[0].get("PVS1").is_none());
        assert_eq!(table.rows[0]["Intervar"], json!("Benign"));
    }

    #[test]
    fn test_intervar_table_empty() {
        assert!(intervar_table_from_json(&[]).is_empty());
    }

    #[test]
    fn test_join_intervar_set2_strips_chr_prefix() {
        let set_table = Table {
            headers: vec![
                "chrom".into(),
                "pos".into(),
                "ref_base".into(),
                "alt_base".into(),
                "ACMG".into(),
            ],
            rows: vec![json!({
                "chrom": "chr1", "pos": "100", "ref_base": "A",
                "alt_base": "G", "ACMG": "pathogenic"
            })
            .as_object()
            .unwrap()
            .clone()],
        };
        let intervar = intervar_table_from_json(&[json!({
            "Chromosome": "1", "Position": "100", "Ref_allele": "A",
            "Alt_allele": "G", "Intervar": "Pathogenic"
        })
        .as_object()
        .unwrap()
        .clone()]);

        let joined = join_intervar(&set_table, &intervar, Dataset::Set2);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined.rows[0]["chrom"], json!("1"));
        assert_eq!(joined.rows[0]["Intervar"], json!("Pathogenic"));
    }

    #[test]
    fn test_join_intervar_unmatched_left_row_survives() {
        let set_table = Table {
            headers: vec![
                "chrom".into(),
                "pos".into(),
                "ref_base".into(),
                "alt_base".into(),
            ],
            rows: vec![json!({
                "chrom": "5", "pos": "42", "ref_base": "T", "alt_base": "C"
            })
            .as_object()
            .unwrap()
            .clone()],
        };
        let intervar = intervar_table_from_json(&[json!({
            "Chromosome": "1", "Position": "100", "Ref_allele": "A", "Alt_allele": "G"
        })
        .as_object()
        .unwrap()
        .clone()]);

        let joined = join_intervar(&set_table, &intervar, Dataset::Set2);
        assert_eq!(joined.len(), 1);
        assert!(joined.rows[0].get("Intervar").is_none());
    }

    #[test]
    fn test_join_intervar_empty_sides() {
        let empty = Table::empty();
        assert!(join_intervar(&empty, &empty, Dataset::Set1).is_empty());

        let set_table = annotator_table();
        let passed = join_intervar(&set_table, &empty, Dataset::Set2);
        assert_eq!(passed.len(), set_table.len());
    }
}
