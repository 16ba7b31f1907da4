//! # Projection Compiler
//!
//! Turns a table's ordered column catalog into the SELECT expression list
//! used by every chunk of that table. Datatypes that do not travel well as
//! raw CSV text (dates, sub-second timestamps, intervals, XML) are wrapped
//! in source-side conversions so the cursor already yields stable textual
//! forms.
//!
//! The compiler is pure: no I/O, deterministic output for a given catalog.

use crate::domain::entities::ColumnInfo;
use crate::domain::errors::{ExportError, Result};

/// Types emitted verbatim because their textual form is already portable.
const NUMERIC_TYPES: &[&str] = &[
    "NUMBER",
    "DECIMAL",
    "DEC",
    "DOUBLE PRECISION",
    "FLOAT",
    "INTEGER",
    "INT",
    "REAL",
    "NUMERIC",
    "BINARY_FLOAT",
    "BINARY_DOUBLE",
    "SMALLINT",
];

const CHARACTER_TYPES: &[&str] = &[
    "BFILE",
    "CHARACTER",
    "LONG",
    "NCHAR VARYING",
    "ROWID",
    "UROWID",
    "VARCHAR",
    "CHAR",
    "NCHAR",
    "NVARCHAR2",
    "NCLOB",
    "CLOB",
];

const BINARY_TYPES: &[&str] = &["BLOB", "LONG RAW", "RAW"];

/// Compiles the catalog into a comma-joined projection string.
///
/// Fails only on a TIMESTAMP column whose declared scale cannot be parsed;
/// that error aborts the whole table's planning.
pub fn compile_projection(columns: &[ColumnInfo]) -> Result<String> {
    let mut parts = Vec::with_capacity(columns.len());
    for col in columns {
        parts.push(compile_column(col)?);
    }
    Ok(parts.join(","))
}

fn compile_column(col: &ColumnInfo) -> Result<String> {
    let data_type = col.data_type.to_uppercase();
    let name = col.name.as_str();

    if NUMERIC_TYPES.contains(&data_type.as_str())
        || CHARACTER_TYPES.contains(&data_type.as_str())
        || BINARY_TYPES.contains(&data_type.as_str())
    {
        return Ok(name.to_string());
    }
    if data_type == "XMLTYPE" {
        return Ok(format!("XMLSERIALIZE(CONTENT {} AS CLOB) AS {}", name, name));
    }
    if data_type == "DATE" {
        return Ok(format!("TO_CHAR({},'yyyy-MM-dd HH24:mi:ss') AS {}", name, name));
    }
    if data_type.contains("INTERVAL") {
        return Ok(format!("TO_CHAR({}) AS {}", name, name));
    }
    if data_type.contains("TIMESTAMP") {
        return timestamp_expr(col, name);
    }
    Ok(name.to_string())
}

/// Sub-second precision follows the declared scale; anything outside [0,6]
/// clamps to ff6 (Oracle caps fractional seconds at 6 digits).
fn timestamp_expr(col: &ColumnInfo, name: &str) -> Result<String> {
    let raw = col.data_scale.as_deref().unwrap_or("");
    let scale: i32 = raw.trim().parse().map_err(|_| {
        ExportError::Config(format!(
            "timestamp column {} has unparseable data_scale {:?}",
            name, raw
        ))
    })?;

    let expr = if scale == 0 {
        format!("TO_CHAR({},'yyyy-mm-dd hh24:mi:ss') AS {}", name, name)
    } else if (1..=6).contains(&scale) {
        format!("TO_CHAR({},'yyyy-mm-dd hh24:mi:ss.ff{}') AS {}", name, scale, name)
    } else {
        format!("TO_CHAR({},'yyyy-mm-dd hh24:mi:ss.ff6') AS {}", name, name)
    };
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str) -> ColumnInfo {
        ColumnInfo::new(name, data_type, None)
    }

    fn ts(name: &str, scale: &str) -> ColumnInfo {
        ColumnInfo::new(name, "TIMESTAMP(6)", Some(scale))
    }

    #[test]
    fn mixed_catalog_edge_cases() {
        let catalog = vec![
            col("D", "DATE"),
            col("I", "INTERVAL DAY TO SECOND"),
            col("X", "XMLTYPE"),
            col("N", "NUMBER"),
            col("R", "RAW"),
        ];
        assert_eq!(
            compile_projection(&catalog).unwrap(),
            "TO_CHAR(D,'yyyy-MM-dd HH24:mi:ss') AS D,\
             TO_CHAR(I) AS I,\
             XMLSERIALIZE(CONTENT X AS CLOB) AS X,\
             N,R"
        );
    }

    #[test]
    fn timestamp_scale_variants() {
        assert_eq!(
            compile_projection(&[ts("TS", "0")]).unwrap(),
            "TO_CHAR(TS,'yyyy-mm-dd hh24:mi:ss') AS TS"
        );
        assert_eq!(
            compile_projection(&[ts("TS", "3")]).unwrap(),
            "TO_CHAR(TS,'yyyy-mm-dd hh24:mi:ss.ff3') AS TS"
        );
        // out-of-range scales clamp to 6
        assert_eq!(
            compile_projection(&[ts("TS", "9")]).unwrap(),
            "TO_CHAR(TS,'yyyy-mm-dd hh24:mi:ss.ff6') AS TS"
        );
        assert_eq!(
            compile_projection(&[ts("TS", "-1")]).unwrap(),
            "TO_CHAR(TS,'yyyy-mm-dd hh24:mi:ss.ff6') AS TS"
        );
    }

    #[test]
    fn timestamp_with_time_zone_uses_substring_match() {
        let catalog = vec![ColumnInfo::new(
            "TS",
            "TIMESTAMP(6) WITH TIME ZONE",
            Some("6"),
        )];
        assert_eq!(
            compile_projection(&catalog).unwrap(),
            "TO_CHAR(TS,'yyyy-mm-dd hh24:mi:ss.ff6') AS TS"
        );
    }

    #[test]
    fn unparseable_timestamp_scale_fails_table() {
        let err = compile_projection(&[ts("TS", "abc")]).unwrap_err();
        assert!(matches!(err, ExportError::Config(_)));
        let err = compile_projection(&[ColumnInfo::new("TS", "TIMESTAMP(3)", None)]).unwrap_err();
        assert!(matches!(err, ExportError::Config(_)));
    }

    #[test]
    fn type_matching_is_case_insensitive() {
        assert_eq!(compile_projection(&[col("N", "number")]).unwrap(), "N");
        assert_eq!(
            compile_projection(&[col("D", "date")]).unwrap(),
            "TO_CHAR(D,'yyyy-MM-dd HH24:mi:ss') AS D"
        );
    }

    #[test]
    fn unknown_types_pass_through_bare() {
        assert_eq!(
            compile_projection(&[col("G", "SDO_GEOMETRY")]).unwrap(),
            "G"
        );
    }

    #[test]
    fn deterministic_for_same_catalog() {
        let catalog = vec![col("A", "NUMBER"), ts("B", "2"), col("C", "CLOB")];
        let first = compile_projection(&catalog).unwrap();
        let second = compile_projection(&catalog).unwrap();
        assert_eq!(first, second);
    }
}
