//! SNOMED CT back-end over an RF2 snapshot subset.
//!
//! Loads the tab-delimited concept, description, and relationship
//! snapshot files of a release. Only stated is-a relationships
//! (typeId 116680003) build the hierarchy; subsumption is the transitive
//! closure over them. Post-coordinated expressions are recognized but
//! refused: a loaded subset is not authoritative for them.

use crate::provider::{
    CodeSystemProvider, ConceptProperty, ConceptRef, Designation, FilterContext, FilterOp,
    Located, PropertyValue, SubsumptionOutcome, unsupported_filter,
};
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::lang::LanguagePreferences;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

pub const SNOMED_URI: &str = "http://snomed.info/sct";

const IS_A: &str = "116680003";
const FULLY_SPECIFIED_NAME: &str = "900000000000003001";

#[derive(Debug, Clone)]
struct SnomedConcept {
    id: String,
    active: bool,
    module: String,
    fsn: Option<String>,
    /// Active synonyms, preferred first when the description file marks one.
    synonyms: Vec<(String, String)>, // (language, term)
    parents: Vec<usize>,
    children: Vec<usize>,
}

/// Provider over one loaded SNOMED edition subset.
pub struct SnomedCodeSystem {
    edition: String,
    version: Option<String>,
    concepts: Vec<SnomedConcept>,
    by_id: HashMap<String, usize>,
}

impl SnomedCodeSystem {
    /// Load from a directory containing RF2 snapshot files
    /// (`sct2_Concept_*`, `sct2_Description_*`, `sct2_Relationship_*`).
    pub fn load_dir(dir: &Path, edition: &str, version: Option<String>) -> TxResult<Self> {
        let mut concept_file = None;
        let mut description_file = None;
        let mut relationship_file = None;
        let entries = fs::read_dir(dir).map_err(|e| {
            TxIssue::exception(format!("Cannot read SNOMED directory {}: {e}", dir.display()))
        })?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("sct2_Concept_") {
                concept_file = Some(entry.path());
            } else if name.starts_with("sct2_Description_") {
                description_file = Some(entry.path());
            } else if name.starts_with("sct2_Relationship_") {
                relationship_file = Some(entry.path());
            }
        }
        let concept_file = concept_file
            .ok_or_else(|| TxIssue::exception("SNOMED directory has no sct2_Concept_ file"))?;
        let description_file = description_file
            .ok_or_else(|| TxIssue::exception("SNOMED directory has no sct2_Description_ file"))?;
        let relationship_file = relationship_file
            .ok_or_else(|| TxIssue::exception("SNOMED directory has no sct2_Relationship_ file"))?;
        Self::load_files(
            &concept_file,
            &description_file,
            &relationship_file,
            edition,
            version,
        )
    }

    pub fn load_files(
        concepts: &Path,
        descriptions: &Path,
        relationships: &Path,
        edition: &str,
        version: Option<String>,
    ) -> TxResult<Self> {
        let mut cs = Self {
            edition: edition.to_string(),
            version,
            concepts: Vec::new(),
            by_id: HashMap::new(),
        };

        // RF2 is tab-delimited with no quoting; split by hand.
        for line in read_rf2(concepts)? {
            let cols: Vec<&str> = line.split('\t').collect();
            // id, effectiveTime, active, moduleId, definitionStatusId
            if cols.len() < 5 {
                continue;
            }
            let id = cols[0].to_string();
            let index = cs.concepts.len();
            cs.by_id.insert(id.clone(), index);
            cs.concepts.push(SnomedConcept {
                id,
                active: cols[2] == "1",
                module: cols[3].to_string(),
                fsn: None,
                synonyms: Vec::new(),
                parents: Vec::new(),
                children: Vec::new(),
            });
        }

        for line in read_rf2(descriptions)? {
            let cols: Vec<&str> = line.split('\t').collect();
            // id, effectiveTime, active, moduleId, conceptId, languageCode,
            // typeId, term, caseSignificanceId
            if cols.len() < 9 || cols[2] != "1" {
                continue;
            }
            let Some(&index) = cs.by_id.get(cols[4]) else {
                continue;
            };
            let concept = &mut cs.concepts[index];
            if cols[6] == FULLY_SPECIFIED_NAME {
                concept.fsn = Some(cols[7].to_string());
            } else {
                concept.synonyms.push((cols[5].to_string(), cols[7].to_string()));
            }
        }

        for line in read_rf2(relationships)? {
            let cols: Vec<&str> = line.split('\t').collect();
            // id, effectiveTime, active, moduleId, sourceId, destinationId,
            // relationshipGroup, typeId, ...
            if cols.len() < 8 || cols[2] != "1" || cols[7] != IS_A {
                continue;
            }
            let (Some(&child), Some(&parent)) = (cs.by_id.get(cols[4]), cs.by_id.get(cols[5]))
            else {
                continue;
            };
            cs.concepts[child].parents.push(parent);
            cs.concepts[parent].children.push(child);
        }

        tracing::info!(
            edition = %cs.edition,
            concepts = cs.concepts.len(),
            "Loaded SNOMED snapshot"
        );
        Ok(cs)
    }

    fn row(&self, concept: &ConceptRef) -> Option<&SnomedConcept> {
        self.concepts.get(concept.index).filter(|c| c.id == concept.code)
    }

    fn descendants(&self, index: usize) -> TxResult<Vec<usize>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut path = vec![index];
        self.walk(index, &mut path, &mut seen, &mut out)?;
        Ok(out)
    }

    fn walk(
        &self,
        index: usize,
        path: &mut Vec<usize>,
        seen: &mut HashSet<usize>,
        out: &mut Vec<usize>,
    ) -> TxResult<()> {
        for &child in &self.concepts[index].children {
            if path.contains(&child) {
                return Err(TxIssue::business_rule(format!(
                    "Cycle detected in the SNOMED is-a graph at concept '{}'",
                    self.concepts[child].id
                ))
                .with_status(500));
            }
            if seen.insert(child) {
                out.push(child);
                path.push(child);
                self.walk(child, path, seen, out)?;
                path.pop();
            }
        }
        Ok(())
    }

    fn refs(&self, indices: impl IntoIterator<Item = usize>) -> Vec<ConceptRef> {
        indices
            .into_iter()
            .map(|i| ConceptRef::stored(self.concepts[i].id.clone(), i))
            .collect()
    }

    /// `:` / `+` / `=` mark a post-coordinated expression.
    fn is_expression(code: &str) -> bool {
        code.contains(':') || code.contains('+') || code.contains('=')
    }
}

impl CodeSystemProvider for SnomedCodeSystem {
    fn system(&self) -> &str {
        SNOMED_URI
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn total_count(&self) -> i64 {
        self.concepts.len() as i64
    }

    fn locate(&self, code: &str) -> TxResult<Option<Located>> {
        if Self::is_expression(code) {
            return Err(TxIssue::not_supported(format!(
                "Post-coordinated expressions are not supported for '{}'",
                self.edition
            )));
        }
        Ok(self.by_id.get(code).map(|&i| {
            let concept = &self.concepts[i];
            let handle = ConceptRef::stored(concept.id.clone(), i);
            if concept.active {
                Located::clean(handle)
            } else {
                Located::with_message(
                    handle,
                    format!("The SNOMED concept '{}' is inactive", concept.id),
                )
            }
        }))
    }

    fn display(&self, concept: &ConceptRef, languages: &LanguagePreferences) -> Option<String> {
        let row = self.row(concept)?;
        if !languages.is_empty() && !row.synonyms.is_empty() {
            let langs: Vec<&str> = row.synonyms.iter().map(|(l, _)| l.as_str()).collect();
            if let Some(i) = languages.best_match(&langs) {
                return Some(row.synonyms[i].1.clone());
            }
        }
        row.synonyms
            .first()
            .map(|(_, term)| term.clone())
            .or_else(|| row.fsn.clone())
    }

    fn designations(&self, concept: &ConceptRef) -> Vec<Designation> {
        let Some(row) = self.row(concept) else {
            return Vec::new();
        };
        let mut designations: Vec<Designation> = row
            .synonyms
            .iter()
            .map(|(language, term)| Designation {
                language: Some(language.clone()),
                use_coding: None,
                value: term.clone(),
            })
            .collect();
        if let Some(ref fsn) = row.fsn {
            designations.push(Designation {
                language: Some("en".to_string()),
                use_coding: Some(ferrotx_core::fhir::Coding::new(SNOMED_URI, FULLY_SPECIFIED_NAME)),
                value: fsn.clone(),
            });
        }
        designations
    }

    fn properties(&self, concept: &ConceptRef, filter: Option<&[String]>) -> Vec<ConceptProperty> {
        let Some(row) = self.row(concept) else {
            return Vec::new();
        };
        let wanted = |name: &str| filter.map(|f| f.iter().any(|w| w == name)).unwrap_or(true);
        let mut props = Vec::new();
        if wanted("moduleId") {
            props.push(ConceptProperty::new("moduleId", PropertyValue::Code(row.module.clone())));
        }
        if wanted("inactive") {
            props.push(ConceptProperty::new("inactive", PropertyValue::Boolean(!row.active)));
        }
        if wanted("parent") {
            for &parent in &row.parents {
                props.push(ConceptProperty::new(
                    "parent",
                    PropertyValue::Code(self.concepts[parent].id.clone()),
                ));
            }
        }
        if wanted("child") {
            for &child in &row.children {
                props.push(ConceptProperty::new(
                    "child",
                    PropertyValue::Code(self.concepts[child].id.clone()),
                ));
            }
        }
        props
    }

    fn is_inactive(&self, concept: &ConceptRef) -> bool {
        self.row(concept).map(|c| !c.active).unwrap_or(false)
    }

    fn subsumes(&self, a: &ConceptRef, b: &ConceptRef) -> TxResult<SubsumptionOutcome> {
        if a.index == b.index {
            return Ok(SubsumptionOutcome::Equivalent);
        }
        if self.descendants(a.index)?.contains(&b.index) {
            return Ok(SubsumptionOutcome::Subsumes);
        }
        if self.descendants(b.index)?.contains(&a.index) {
            return Ok(SubsumptionOutcome::SubsumedBy);
        }
        Ok(SubsumptionOutcome::NotSubsumed)
    }

    fn supported_filters(&self) -> Vec<(&str, Vec<FilterOp>)> {
        vec![
            (
                "concept",
                vec![FilterOp::IsA, FilterOp::DescendentOf, FilterOp::In, FilterOp::NotIn],
            ),
            ("moduleId", vec![FilterOp::Equal]),
        ]
    }

    fn filter(&self, property: &str, op: FilterOp, value: &str) -> TxResult<FilterContext> {
        match (property, op) {
            ("concept", FilterOp::IsA) | ("concept", FilterOp::DescendentOf) => {
                let Some(&root) = self.by_id.get(value) else {
                    return Ok(FilterContext::closed(Vec::new()));
                };
                let mut indices = self.descendants(root)?;
                if op == FilterOp::IsA {
                    indices.insert(0, root);
                }
                Ok(FilterContext::closed(self.refs(indices)))
            }
            ("concept", FilterOp::In) | ("concept", FilterOp::NotIn) => {
                let wanted: HashSet<&str> = value.split(',').map(str::trim).collect();
                let negate = op == FilterOp::NotIn;
                Ok(FilterContext::closed(self.refs(
                    (0..self.concepts.len())
                        .filter(|&i| wanted.contains(self.concepts[i].id.as_str()) != negate),
                )))
            }
            ("moduleId", FilterOp::Equal) => Ok(FilterContext::closed(self.refs(
                (0..self.concepts.len()).filter(|&i| self.concepts[i].module == value),
            ))),
            _ => Err(unsupported_filter(SNOMED_URI, property, op, value)),
        }
    }

    fn iterate_all(&self) -> TxResult<Vec<ConceptRef>> {
        Ok(self.refs(0..self.concepts.len()))
    }
}

fn read_rf2(path: &Path) -> TxResult<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| {
        TxIssue::exception(format!("Cannot read RF2 file {}: {e}", path.display()))
    })?;
    // First line is the column header.
    Ok(text.lines().skip(1).map(String::from).collect())
}
