//! Variant identifier canonicalization and input schema detection.
//!
//! Input tables arrive in one of two known column layouts. Both map to the
//! same canonical identifier of the form `chr<chromosome>:<pos>:<ref>:<alt>`,
//! which keys the enrichment ledger and deduplicates queries.

use serde_json::{Map, Value};

/// A row from a tabular artifact: column name to cell value.
///
/// Backed by `serde_json::Map` (insertion-ordered with the `preserve_order`
/// feature) so that merged enrichment fields land after the original columns.
pub type Row = Map<String, Value>;

/// Column names required by the first known schema (annotated VCF export).
pub const SCHEMA_ONE_COLUMNS: [&str; 4] = [
    "CHROMOSOME",
    "CHROMOSOME_POSITION_HG38",
    "REFERENCE_ALLELE",
    "RISK_ALLELE",
];

/// Column names required by the second known schema (annotator output).
pub const SCHEMA_TWO_COLUMNS: [&str; 4] = ["chrom", "pos", "ref_base", "alt_base"];

/// The detected input schema. Identifier construction is selected by this
/// tag; everything downstream consumes it instead of re-sniffing columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// Uppercase annotated-VCF columns.
    SchemaOne,
    /// Lowercase annotator columns.
    SchemaTwo,
    /// Neither known column set is present.
    Unrecognized,
}

impl Schema {
    /// The (chromosome, position, ref, alt) column names for this schema,
    /// or `None` for an unrecognized layout.
    pub fn key_columns(&self) -> Option<[&'static str; 4]> {
        match self {
            Schema::SchemaOne => Some(SCHEMA_ONE_COLUMNS),
            Schema::SchemaTwo => Some(SCHEMA_TWO_COLUMNS),
            Schema::Unrecognized => None,
        }
    }
}

/// Detect which schema a header row belongs to.
///
/// Pure function; the only place in the crate where column sniffing happens.
pub fn detect_schema(headers: &[String]) -> Schema {
    let has = |cols: &[&str]| cols.iter().all(|c| headers.iter().any(|h| h == c));

    if has(&SCHEMA_ONE_COLUMNS) {
        Schema::SchemaOne
    } else if has(&SCHEMA_TWO_COLUMNS) {
        Schema::SchemaTwo
    } else {
        Schema::Unrecognized
    }
}

/// Normalize a chromosome to carry the `chr` prefix.
pub fn format_chromosome(chrom: &str) -> String {
    if chrom.starts_with("chr") {
        chrom.to_string()
    } else {
        format!("chr{}", chrom)
    }
}

/// Build the canonical variant identifier from its four components.
///
/// Two rows with identical (chromosome, position, ref, alt) after
/// normalization yield identical identifiers regardless of source schema.
pub fn canonical_id(chrom: &str, pos: &str, ref_allele: &str, alt_allele: &str) -> String {
    format!(
        "{}:{}:{}:{}",
        format_chromosome(chrom),
        pos,
        ref_allele,
        alt_allele
    )
}

/// Extract the canonical identifier for a row under the given schema.
///
/// Returns `None` for an unrecognized schema or a row missing any of the
/// four key columns.
pub fn identifier_for_row(schema: Schema, row: &Row) -> Option<String> {
    let cols = schema.key_columns()?;
    let cell = |name: &str| -> Option<String> {
        row.get(name)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
    };

    Some(canonical_id(
        &cell(cols[0])?,
        &cell(cols[1])?,
        &cell(cols[2])?,
        &cell(cols[3])?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_headers(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detect_schema_one() {
        let headers = to_headers(&[
            "CHROMOSOME",
            "CHROMOSOME_POSITION_HG38",
            "REFERENCE_ALLELE",
            "RISK_ALLELE",
            "GENE",
        ]);
        assert_eq!(detect_schema(&headers), Schema::SchemaOne);
    }

    #[test]
    fn test_detect_schema_two() {
        let headers = to_headers(&["chrom", "pos", "ref_base", "alt_base", "ACMG"]);
        assert_eq!(detect_schema(&headers), Schema::SchemaTwo);
    }

    #[test]
    fn test_detect_schema_unrecognized() {
        let headers = to_headers(&["a", "b", "c"]);
        assert_eq!(detect_schema(&headers), Schema::Unrecognized);
        assert_eq!(detect_schema(&[]), Schema::Unrecognized);
    }

    #[test]
    fn test_chromosome_normalization() {
        assert_eq!(format_chromosome("1"), "chr1");
        assert_eq!(format_chromosome("chr1"), "chr1");
        assert_eq!(format_chromosome("X"), "chrX");
    }

    #[test]
    fn test_canonical_id_stable_across_prefix() {
        assert_eq!(
            canonical_id("1", "12345", "A", "G"),
            canonical_id("chr1", "12345", "A", "G")
        );
        assert_eq!(canonical_id("1", "12345", "A", "G"), "chr1:12345:A:G");
    }

    #[test]
    fn test_canonical_id_injective() {
        let ids: Vec<String> = vec![
            canonical_id("1", "100", "A", "G"),
            canonical_id("1", "100", "A", "T"),
            canonical_id("1", "101", "A", "G"),
            canonical_id("2", "100", "A", "G"),
        ];
        for (i, a) in ids.iter().enumerate() {
            for (j, b) in ids.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b);
                }
            }
        }
    }

    #[test]
    fn test_identifier_for_row_both_schemas() {
        let mut row1 = Row::new();
        row1.insert("CHROMOSOME".into(), json!("1"));
        row1.insert("CHROMOSOME_POSITION_HG38".into(), json!("500"));
        row1.insert("REFERENCE_ALLELE".into(), json!("C"));
        row1.insert("RISK_ALLELE".into(), json!("T"));

        let mut row2 = Row::new();
        row2.insert("chrom".into(), json!("chr1"));
        row2.insert("pos".into(), json!("500"));
        row2.insert("ref_base".into(), json!("C"));
        row2.insert("alt_base".into(), json!("T"));

        let id1 = identifier_for_row(Schema::SchemaOne, &row1).unwrap();
        let id2 = identifier_for_row(Schema::SchemaTwo, &row2).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(id1, "chr1:500:C:T");
    }

    #[test]
    fn test_identifier_missing_column() {
        let mut row = Row::new();
        row.insert("chrom".into(), json!("1"));
        assert!(identifier_for_row(Schema::SchemaTwo, &row).is_none());
        assert!(identifier_for_row(Schema::Unrecognized, &row).is_none());
    }
}
