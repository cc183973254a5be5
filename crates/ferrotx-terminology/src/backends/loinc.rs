//! LOINC back-end over the distributed `Loinc.csv` table.
//!
//! Each row carries the multi-axial properties (COMPONENT, PROPERTY,
//! TIME_ASPCT, SYSTEM, SCALE_TYP, METHOD_TYP, CLASS, ORDER_OBS) plus
//! STATUS; displays come from LONG_COMMON_NAME with SHORTNAME as a
//! designation. Filters match axis values; regex is supported per axis.

use crate::provider::{
    CodeSystemProvider, ConceptProperty, ConceptRef, Designation, FilterContext, FilterOp,
    Located, PropertyValue, SubsumptionOutcome, unsupported_filter,
};
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::lang::LanguagePreferences;
use std::collections::HashMap;
use std::path::Path;

pub const LOINC_URI: &str = "http://loinc.org";

/// The axes exposed as filterable properties, by csv header name.
const AXES: &[&str] = &[
    "COMPONENT",
    "PROPERTY",
    "TIME_ASPCT",
    "SYSTEM",
    "SCALE_TYP",
    "METHOD_TYP",
    "CLASS",
    "ORDER_OBS",
];

#[derive(Debug, Clone)]
struct LoincRow {
    code: String,
    long_name: Option<String>,
    short_name: Option<String>,
    status: String,
    axes: Vec<(usize, String)>, // (AXES index, value)
}

/// Provider over one loaded LOINC table.
pub struct LoincCodeSystem {
    version: Option<String>,
    rows: Vec<LoincRow>,
    by_code: HashMap<String, usize>,
}

impl LoincCodeSystem {
    pub fn load(path: &Path, version: Option<String>) -> TxResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| TxIssue::exception(format!("Cannot read LOINC table: {e}")))?;

        let headers = reader
            .headers()
            .map_err(|e| TxIssue::exception(format!("Cannot read LOINC headers: {e}")))?
            .clone();
        let column = |name: &str| headers.iter().position(|h| h == name);

        let code_col = column("LOINC_NUM")
            .ok_or_else(|| TxIssue::exception("LOINC table has no LOINC_NUM column"))?;
        let long_col = column("LONG_COMMON_NAME");
        let short_col = column("SHORTNAME");
        let status_col = column("STATUS");
        let axis_cols: Vec<(usize, usize)> = AXES
            .iter()
            .enumerate()
            .filter_map(|(axis, name)| column(name).map(|col| (axis, col)))
            .collect();

        let mut rows = Vec::new();
        let mut by_code = HashMap::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| TxIssue::exception(format!("Malformed LOINC row: {e}")))?;
            let Some(code) = record.get(code_col).filter(|c| !c.is_empty()) else {
                continue;
            };
            let get = |col: Option<usize>| {
                col.and_then(|c| record.get(c))
                    .filter(|v| !v.is_empty())
                    .map(String::from)
            };
            let axes = axis_cols
                .iter()
                .filter_map(|&(axis, col)| {
                    record
                        .get(col)
                        .filter(|v| !v.is_empty())
                        .map(|v| (axis, v.to_string()))
                })
                .collect();
            by_code.insert(code.to_string(), rows.len());
            rows.push(LoincRow {
                code: code.to_string(),
                long_name: get(long_col),
                short_name: get(short_col),
                status: get(status_col).unwrap_or_else(|| "ACTIVE".to_string()),
                axes,
            });
        }

        tracing::info!(codes = rows.len(), "Loaded LOINC table");
        Ok(Self {
            version,
            rows,
            by_code,
        })
    }

    fn row(&self, concept: &ConceptRef) -> Option<&LoincRow> {
        self.rows.get(concept.index).filter(|r| r.code == concept.code)
    }

    fn axis_value<'a>(row: &'a LoincRow, axis_name: &str) -> Option<&'a str> {
        let axis = AXES.iter().position(|a| *a == axis_name)?;
        row.axes
            .iter()
            .find(|(a, _)| *a == axis)
            .map(|(_, v)| v.as_str())
    }
}

impl CodeSystemProvider for LoincCodeSystem {
    fn system(&self) -> &str {
        LOINC_URI
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn total_count(&self) -> i64 {
        self.rows.len() as i64
    }

    // LOINC codes are not case sensitive per the license terms of use.
    fn case_sensitive(&self) -> bool {
        false
    }

    fn locate(&self, code: &str) -> TxResult<Option<Located>> {
        let index = self
            .by_code
            .get(code)
            .copied()
            .or_else(|| {
                self.rows
                    .iter()
                    .position(|r| r.code.eq_ignore_ascii_case(code))
            });
        Ok(index.map(|i| {
            let row = &self.rows[i];
            let handle = ConceptRef::stored(row.code.clone(), i);
            if row.status != "ACTIVE" {
                Located::with_message(
                    handle,
                    format!("The LOINC code '{}' has status {}", row.code, row.status),
                )
            } else {
                Located::clean(handle)
            }
        }))
    }

    fn display(&self, concept: &ConceptRef, _languages: &LanguagePreferences) -> Option<String> {
        let row = self.row(concept)?;
        row.long_name.clone().or_else(|| row.short_name.clone())
    }

    fn designations(&self, concept: &ConceptRef) -> Vec<Designation> {
        let Some(row) = self.row(concept) else {
            return Vec::new();
        };
        row.short_name
            .iter()
            .map(|name| Designation {
                language: Some("en".to_string()),
                use_coding: None,
                value: name.clone(),
            })
            .collect()
    }

    fn properties(&self, concept: &ConceptRef, filter: Option<&[String]>) -> Vec<ConceptProperty> {
        let Some(row) = self.row(concept) else {
            return Vec::new();
        };
        let wanted = |name: &str| filter.map(|f| f.iter().any(|w| w == name)).unwrap_or(true);
        let mut props = Vec::new();
        for (axis, value) in &row.axes {
            if wanted(AXES[*axis]) {
                props.push(ConceptProperty::new(AXES[*axis], PropertyValue::String(value.clone())));
            }
        }
        if wanted("STATUS") {
            props.push(ConceptProperty::new("STATUS", PropertyValue::String(row.status.clone())));
        }
        props
    }

    fn is_inactive(&self, concept: &ConceptRef) -> bool {
        self.row(concept).map(|r| r.status != "ACTIVE").unwrap_or(false)
    }

    fn subsumes(&self, a: &ConceptRef, b: &ConceptRef) -> TxResult<SubsumptionOutcome> {
        // The code table itself is flat; the part hierarchy is a separate
        // artifact this back-end does not load.
        if a.index == b.index {
            Ok(SubsumptionOutcome::Equivalent)
        } else {
            Ok(SubsumptionOutcome::NotSubsumed)
        }
    }

    fn supported_filters(&self) -> Vec<(&str, Vec<FilterOp>)> {
        AXES.iter()
            .map(|axis| (*axis, vec![FilterOp::Equal, FilterOp::Regex, FilterOp::Exists]))
            .chain(std::iter::once((
                "STATUS",
                vec![FilterOp::Equal, FilterOp::Regex],
            )))
            .collect()
    }

    fn filter(&self, property: &str, op: FilterOp, value: &str) -> TxResult<FilterContext> {
        let is_axis = AXES.contains(&property) || property == "STATUS";
        if !is_axis {
            return Err(unsupported_filter(LOINC_URI, property, op, value));
        }
        let value_of = |row: &LoincRow| -> Option<String> {
            if property == "STATUS" {
                Some(row.status.clone())
            } else {
                Self::axis_value(row, property).map(String::from)
            }
        };
        let selected: Vec<ConceptRef> = match op {
            FilterOp::Equal => self
                .rows
                .iter()
                .enumerate()
                .filter(|(_, r)| value_of(r).as_deref() == Some(value))
                .map(|(i, r)| ConceptRef::stored(r.code.clone(), i))
                .collect(),
            FilterOp::Regex => {
                let re = regex::Regex::new(value)
                    .map_err(|e| TxIssue::invalid(format!("Invalid regex filter '{value}': {e}")))?;
                self.rows
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| value_of(r).map(|v| re.is_match(&v)).unwrap_or(false))
                    .map(|(i, r)| ConceptRef::stored(r.code.clone(), i))
                    .collect()
            }
            FilterOp::Exists => {
                let want = match value {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(TxIssue::invalid(format!(
                            "exists filter value must be true or false, not '{value}'"
                        )));
                    }
                };
                self.rows
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| value_of(r).is_some() == want)
                    .map(|(i, r)| ConceptRef::stored(r.code.clone(), i))
                    .collect()
            }
            _ => return Err(unsupported_filter(LOINC_URI, property, op, value)),
        };
        Ok(FilterContext::closed(selected))
    }

    fn iterate_all(&self) -> TxResult<Vec<ConceptRef>> {
        Ok(self
            .rows
            .iter()
            .enumerate()
            .map(|(i, r)| ConceptRef::stored(r.code.clone(), i))
            .collect())
    }
}
