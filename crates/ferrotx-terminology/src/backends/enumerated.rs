//! Back-end for enumerated FHIR CodeSystem resources.
//!
//! The `concept[]` tree is flattened into a depth-first index at
//! construction; child edges come from nesting, additional parents from
//! `parent` properties (DAG-capable content). Supplements merge extra
//! designations and properties but can never introduce codes.

use crate::provider::{
    CodeSystemProvider, ConceptProperty, ConceptRef, Designation, FilterContext, FilterOp,
    Located, PropertyValue, SubsumptionOutcome, unsupported_filter,
};
use ferrotx_core::fhir::Coding;
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::lang::LanguagePreferences;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
struct ConceptRow {
    code: String,
    display: Option<String>,
    definition: Option<String>,
    parents: Vec<usize>,
    children: Vec<usize>,
    designations: Vec<Designation>,
    properties: Vec<ConceptProperty>,
    inactive: bool,
    not_selectable: bool,
    deprecated: bool,
}

/// Provider over one enumerated CodeSystem resource (plus supplements).
pub struct EnumeratedCodeSystem {
    url: String,
    version: Option<String>,
    case_sensitive: bool,
    content: String,
    default_language: Option<String>,
    bound_value_set: Option<String>,
    concepts: Vec<ConceptRow>,
    by_code: HashMap<String, usize>,
    by_folded: HashMap<String, usize>,
}

impl EnumeratedCodeSystem {
    pub fn from_resource(resource: &Value) -> TxResult<Self> {
        let url = resource
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TxIssue::invalid("CodeSystem without a url"))?
            .to_string();
        let version = resource
            .get("version")
            .and_then(|v| v.as_str())
            .map(String::from);
        let case_sensitive = resource
            .get("caseSensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let content = resource
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("complete")
            .to_string();
        let default_language = resource
            .get("language")
            .and_then(|v| v.as_str())
            .map(String::from);
        let bound_value_set = resource
            .get("valueSet")
            .and_then(|v| v.as_str())
            .map(String::from);

        let mut cs = Self {
            url,
            version,
            case_sensitive,
            content,
            default_language,
            bound_value_set,
            concepts: Vec::new(),
            by_code: HashMap::new(),
            by_folded: HashMap::new(),
        };

        if let Some(tree) = resource.get("concept").and_then(|v| v.as_array()) {
            for node in tree {
                cs.index_concept(node, None)?;
            }
        }
        cs.link_declared_parents()?;
        Ok(cs)
    }

    /// The ValueSet this CodeSystem is bound to, if declared.
    pub fn bound_value_set(&self) -> Option<&str> {
        self.bound_value_set.as_deref()
    }

    fn index_concept(&mut self, node: &Value, parent: Option<usize>) -> TxResult<()> {
        let code = node
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                TxIssue::invalid(format!("Concept without a code in CodeSystem '{}'", self.url))
            })?
            .to_string();

        if self.by_code.contains_key(&code) {
            return Err(TxIssue::invalid(format!(
                "Duplicate code '{code}' in CodeSystem '{}'",
                self.url
            )));
        }
        if !self.case_sensitive {
            let folded = code.to_lowercase();
            if self.by_folded.contains_key(&folded) {
                return Err(TxIssue::invalid(format!(
                    "Codes differing only in case in case-insensitive CodeSystem '{}': '{code}'",
                    self.url
                )));
            }
        }

        let properties = parse_properties(node);
        let inactive = flag_property(&properties, "inactive")
            || matches!(
                property_str(&properties, "status"),
                Some("retired") | Some("inactive")
            );
        let not_selectable = flag_property(&properties, "notSelectable");
        let deprecated = property_str(&properties, "status") == Some("deprecated")
            || properties.iter().any(|p| p.code == "deprecationDate");

        let index = self.concepts.len();
        self.concepts.push(ConceptRow {
            code: code.clone(),
            display: node.get("display").and_then(|v| v.as_str()).map(String::from),
            definition: node.get("definition").and_then(|v| v.as_str()).map(String::from),
            parents: parent.into_iter().collect(),
            children: Vec::new(),
            designations: parse_designations(node),
            properties,
            inactive,
            not_selectable,
            deprecated,
        });
        self.by_code.insert(code.clone(), index);
        if !self.case_sensitive {
            self.by_folded.insert(code.to_lowercase(), index);
        }
        if let Some(parent) = parent {
            self.concepts[parent].children.push(index);
        }

        if let Some(children) = node.get("concept").and_then(|v| v.as_array()) {
            for child in children {
                self.index_concept(child, Some(index))?;
            }
        }
        Ok(())
    }

    /// Wire up extra parents declared as `parent` properties (DAG content).
    fn link_declared_parents(&mut self) -> TxResult<()> {
        let mut extra_edges = Vec::new();
        for (index, row) in self.concepts.iter().enumerate() {
            for prop in &row.properties {
                if prop.code == "parent" {
                    let parent_code = prop.value.as_display_string();
                    let parent = self.by_code.get(parent_code.as_str()).copied().ok_or_else(|| {
                        TxIssue::invalid(format!(
                            "Concept '{}' declares unknown parent '{parent_code}' in '{}'",
                            row.code, self.url
                        ))
                    })?;
                    extra_edges.push((parent, index));
                }
            }
        }
        for (parent, child) in extra_edges {
            if !self.concepts[parent].children.contains(&child) {
                self.concepts[parent].children.push(child);
            }
            if !self.concepts[child].parents.contains(&parent) {
                self.concepts[child].parents.push(parent);
            }
        }
        Ok(())
    }

    /// Merge a supplement: designations and properties only. A supplement
    /// code unknown to this system violates the supplement invariant.
    pub fn apply_supplement(&mut self, supplement: &Value) -> TxResult<()> {
        let supplement_url = supplement
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or("(anonymous)");
        let mut stack: Vec<&Value> = supplement
            .get("concept")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().collect())
            .unwrap_or_default();

        while let Some(node) = stack.pop() {
            let code = node.get("code").and_then(|v| v.as_str()).unwrap_or("");
            let Some(&index) = self.by_code.get(code) else {
                return Err(TxIssue::invalid(format!(
                    "Supplement '{supplement_url}' declares code '{code}' unknown to '{}'",
                    self.url
                )));
            };
            let row = &mut self.concepts[index];
            row.designations.extend(parse_designations(node));
            row.properties.extend(parse_properties(node));
            if let Some(children) = node.get("concept").and_then(|v| v.as_array()) {
                stack.extend(children.iter());
            }
        }
        Ok(())
    }

    fn row(&self, concept: &ConceptRef) -> Option<&ConceptRow> {
        self.concepts.get(concept.index).filter(|r| r.code == concept.code)
    }

    /// All transitive descendants of `index`, DFS order. A node revisited
    /// on the current path is a hierarchy cycle and is reported, never
    /// masked.
    fn descendants(&self, index: usize) -> TxResult<Vec<usize>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut path = vec![index];
        self.walk_descendants(index, &mut path, &mut seen, &mut out)?;
        Ok(out)
    }

    fn walk_descendants(
        &self,
        index: usize,
        path: &mut Vec<usize>,
        seen: &mut HashSet<usize>,
        out: &mut Vec<usize>,
    ) -> TxResult<()> {
        for &child in &self.concepts[index].children {
            if path.contains(&child) {
                return Err(self.cycle_error(child));
            }
            if seen.insert(child) {
                out.push(child);
                path.push(child);
                self.walk_descendants(child, path, seen, out)?;
                path.pop();
            }
        }
        Ok(())
    }

    fn ancestors(&self, index: usize) -> TxResult<Vec<usize>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut path = vec![index];
        self.walk_ancestors(index, &mut path, &mut seen, &mut out)?;
        Ok(out)
    }

    fn walk_ancestors(
        &self,
        index: usize,
        path: &mut Vec<usize>,
        seen: &mut HashSet<usize>,
        out: &mut Vec<usize>,
    ) -> TxResult<()> {
        for &parent in &self.concepts[index].parents {
            if path.contains(&parent) {
                return Err(self.cycle_error(parent));
            }
            if seen.insert(parent) {
                out.push(parent);
                path.push(parent);
                self.walk_ancestors(parent, path, seen, out)?;
                path.pop();
            }
        }
        Ok(())
    }

    fn cycle_error(&self, index: usize) -> TxIssue {
        TxIssue::business_rule(format!(
            "Cycle detected in the hierarchy of CodeSystem '{}' at code '{}'",
            self.url, self.concepts[index].code
        ))
        .with_status(500)
    }

    fn refs(&self, indices: impl IntoIterator<Item = usize>) -> Vec<ConceptRef> {
        indices
            .into_iter()
            .map(|i| ConceptRef::stored(self.concepts[i].code.clone(), i))
            .collect()
    }

    fn all_indices(&self) -> Vec<usize> {
        (0..self.concepts.len()).collect()
    }

    fn property_display_value(&self, row: &ConceptRow, property: &str) -> Option<String> {
        if property == "code" {
            return Some(row.code.clone());
        }
        if property == "display" {
            return row.display.clone();
        }
        row.properties
            .iter()
            .find(|p| p.code == property)
            .map(|p| p.value.as_display_string())
    }
}

impl CodeSystemProvider for EnumeratedCodeSystem {
    fn system(&self) -> &str {
        &self.url
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn total_count(&self) -> i64 {
        self.concepts.len() as i64
    }

    fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn content_mode(&self) -> &str {
        &self.content
    }

    fn locate(&self, code: &str) -> TxResult<Option<Located>> {
        let index = match self.by_code.get(code) {
            Some(&i) => Some(i),
            None if !self.case_sensitive => self.by_folded.get(&code.to_lowercase()).copied(),
            None => None,
        };
        Ok(index.map(|i| {
            let row = &self.concepts[i];
            let concept = ConceptRef::stored(row.code.clone(), i);
            if row.inactive {
                Located::with_message(concept, format!("The code '{}' is valid but is not active", row.code))
            } else {
                Located::clean(concept)
            }
        }))
    }

    fn display(&self, concept: &ConceptRef, languages: &LanguagePreferences) -> Option<String> {
        let row = self.row(concept)?;
        if languages.is_empty() {
            return row.display.clone();
        }

        // Candidates: the base display in the system's default language,
        // plus every language-tagged designation.
        let default_lang = self.default_language.as_deref().unwrap_or("en");
        let mut candidates: Vec<(&str, &str)> = Vec::new();
        if let Some(ref display) = row.display {
            candidates.push((default_lang, display.as_str()));
        }
        for d in &row.designations {
            if let Some(ref lang) = d.language {
                candidates.push((lang.as_str(), d.value.as_str()));
            }
        }

        let langs: Vec<&str> = candidates.iter().map(|(l, _)| *l).collect();
        match languages.best_match(&langs) {
            Some(i) => Some(candidates[i].1.to_string()),
            // No preference matched: fall back to the default-language display.
            None => row.display.clone(),
        }
    }

    fn designations(&self, concept: &ConceptRef) -> Vec<Designation> {
        self.row(concept).map(|r| r.designations.clone()).unwrap_or_default()
    }

    fn definition(&self, concept: &ConceptRef) -> Option<String> {
        self.row(concept)?.definition.clone()
    }

    fn properties(&self, concept: &ConceptRef, filter: Option<&[String]>) -> Vec<ConceptProperty> {
        let Some(row) = self.row(concept) else {
            return Vec::new();
        };
        let mut props = row.properties.clone();
        // Parent/child edges surface as standard properties. Parents may
        // also be declared explicitly; don't emit those twice.
        for &parent in &row.parents {
            let value = PropertyValue::Code(self.concepts[parent].code.clone());
            if !props.iter().any(|p| p.code == "parent" && p.value == value) {
                props.push(ConceptProperty::new("parent", value));
            }
        }
        for &child in &row.children {
            props.push(ConceptProperty::new(
                "child",
                PropertyValue::Code(self.concepts[child].code.clone()),
            ));
        }
        match filter {
            Some(wanted) => props
                .into_iter()
                .filter(|p| wanted.iter().any(|w| w == &p.code))
                .collect(),
            None => props,
        }
    }

    fn is_inactive(&self, concept: &ConceptRef) -> bool {
        self.row(concept).map(|r| r.inactive).unwrap_or(false)
    }

    fn is_abstract(&self, concept: &ConceptRef) -> bool {
        self.row(concept).map(|r| r.not_selectable).unwrap_or(false)
    }

    fn is_deprecated(&self, concept: &ConceptRef) -> bool {
        self.row(concept).map(|r| r.deprecated).unwrap_or(false)
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
        let mut filters: Vec<(&str, Vec<FilterOp>)> = vec![
            (
                "concept",
                vec![
                    FilterOp::IsA,
                    FilterOp::IsNotA,
                    FilterOp::DescendentOf,
                    FilterOp::In,
                    FilterOp::NotIn,
                    FilterOp::Generalizes,
                ],
            ),
            ("code", vec![FilterOp::Equal, FilterOp::Regex, FilterOp::In, FilterOp::NotIn]),
        ];
        let mut seen = HashSet::new();
        for row in &self.concepts {
            for prop in &row.properties {
                if seen.insert(prop.code.as_str()) {
                    filters.push((
                        prop.code.as_str(),
                        vec![FilterOp::Equal, FilterOp::Regex, FilterOp::Exists],
                    ));
                }
            }
        }
        filters
    }

    fn filter(&self, property: &str, op: FilterOp, value: &str) -> TxResult<FilterContext> {
        let hierarchy_property = property == "concept" || property == "code";
        match op {
            FilterOp::IsA | FilterOp::DescendentOf | FilterOp::Generalizes if hierarchy_property => {
                let Some(&root) = self.by_code.get(value) else {
                    // Unknown anchor selects nothing.
                    return Ok(FilterContext::closed(Vec::new()));
                };
                let mut indices = match op {
                    FilterOp::IsA => {
                        let mut v = vec![root];
                        v.extend(self.descendants(root)?);
                        v
                    }
                    FilterOp::DescendentOf => self.descendants(root)?,
                    FilterOp::Generalizes => {
                        let mut v = vec![root];
                        v.extend(self.ancestors(root)?);
                        v
                    }
                    _ => unreachable!(),
                };
                indices.sort_unstable();
                Ok(FilterContext::closed(self.refs(indices)))
            }
            FilterOp::IsNotA if hierarchy_property => {
                let excluded: HashSet<usize> = match self.by_code.get(value) {
                    Some(&root) => {
                        let mut v: HashSet<usize> = self.descendants(root)?.into_iter().collect();
                        v.insert(root);
                        v
                    }
                    None => HashSet::new(),
                };
                Ok(FilterContext::closed(self.refs(
                    self.all_indices().into_iter().filter(|i| !excluded.contains(i)),
                )))
            }
            FilterOp::In | FilterOp::NotIn if hierarchy_property => {
                let wanted: HashSet<&str> = value.split(',').map(str::trim).collect();
                let keep = |row: &ConceptRow| {
                    let inside = wanted.contains(row.code.as_str());
                    if op == FilterOp::In { inside } else { !inside }
                };
                Ok(FilterContext::closed(self.refs(
                    self.all_indices().into_iter().filter(|&i| keep(&self.concepts[i])),
                )))
            }
            FilterOp::Equal => Ok(FilterContext::closed(self.refs(
                self.all_indices().into_iter().filter(|&i| {
                    self.property_display_value(&self.concepts[i], property).as_deref()
                        == Some(value)
                }),
            ))),
            FilterOp::Regex => {
                let re = regex::Regex::new(value)
                    .map_err(|e| TxIssue::invalid(format!("Invalid regex filter '{value}': {e}")))?;
                Ok(FilterContext::closed(self.refs(
                    self.all_indices().into_iter().filter(|&i| {
                        self.property_display_value(&self.concepts[i], property)
                            .map(|v| re.is_match(&v))
                            .unwrap_or(false)
                    }),
                )))
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
                Ok(FilterContext::closed(self.refs(
                    self.all_indices().into_iter().filter(|&i| {
                        self.concepts[i].properties.iter().any(|p| p.code == property) == want
                    }),
                )))
            }
            _ => Err(unsupported_filter(&self.url, property, op, value)),
        }
    }

    fn iterate_all(&self) -> TxResult<Vec<ConceptRef>> {
        Ok(self.refs(self.all_indices()))
    }
}

fn parse_designations(node: &Value) -> Vec<Designation> {
    node.get("designation")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|d| {
                    let value = d.get("value").and_then(|v| v.as_str())?.to_string();
                    Some(Designation {
                        language: d.get("language").and_then(|v| v.as_str()).map(String::from),
                        use_coding: d
                            .get("use")
                            .and_then(|u| serde_json::from_value::<Coding>(u.clone()).ok()),
                        value,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_properties(node: &Value) -> Vec<ConceptProperty> {
    node.get("property")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|p| {
                    let code = p.get("code").and_then(|v| v.as_str())?.to_string();
                    let value = if let Some(s) = p.get("valueCode").and_then(|v| v.as_str()) {
                        PropertyValue::Code(s.to_string())
                    } else if let Some(s) = p.get("valueString").and_then(|v| v.as_str()) {
                        PropertyValue::String(s.to_string())
                    } else if let Some(b) = p.get("valueBoolean").and_then(|v| v.as_bool()) {
                        PropertyValue::Boolean(b)
                    } else if let Some(i) = p.get("valueInteger").and_then(|v| v.as_i64()) {
                        PropertyValue::Integer(i)
                    } else if let Some(d) = p.get("valueDecimal").and_then(|v| v.as_f64()) {
                        PropertyValue::Decimal(d)
                    } else if let Some(s) = p.get("valueDateTime").and_then(|v| v.as_str()) {
                        PropertyValue::DateTime(s.to_string())
                    } else if let Some(c) = p.get("valueCoding") {
                        PropertyValue::Coding(serde_json::from_value(c.clone()).ok()?)
                    } else {
                        return None;
                    };
                    Some(ConceptProperty { code, value })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn flag_property(props: &[ConceptProperty], code: &str) -> bool {
    props
        .iter()
        .any(|p| p.code == code && matches!(p.value, PropertyValue::Boolean(true)))
}

fn property_str<'a>(props: &'a [ConceptProperty], code: &str) -> Option<&'a str> {
    props.iter().find(|p| p.code == code).and_then(|p| match &p.value {
        PropertyValue::Code(s) | PropertyValue::String(s) => Some(s.as_str()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrotx_core::lang::parse_accept_language;
    use serde_json::json;

    fn gender() -> EnumeratedCodeSystem {
        EnumeratedCodeSystem::from_resource(&json!({
            "resourceType": "CodeSystem",
            "url": "http://hl7.org/fhir/administrative-gender",
            "version": "4.0.1",
            "caseSensitive": true,
            "content": "complete",
            "concept": [
                {"code": "male", "display": "Male", "definition": "Male gender.",
                 "designation": [{"language": "de", "value": "Männlich"}]},
                {"code": "female", "display": "Female",
                 "designation": [{"language": "de", "value": "Weiblich"}]},
                {"code": "other", "display": "Other"},
                {"code": "unknown", "display": "Unknown"}
            ]
        }))
        .unwrap()
    }

    fn hierarchy() -> EnumeratedCodeSystem {
        EnumeratedCodeSystem::from_resource(&json!({
            "url": "http://example.org/cs/animals",
            "caseSensitive": true,
            "concept": [
                {"code": "animal", "display": "Animal", "concept": [
                    {"code": "mammal", "display": "Mammal", "concept": [
                        {"code": "dog", "display": "Dog"},
                        {"code": "cat", "display": "Cat",
                         "property": [{"code": "status", "valueCode": "retired"}]}
                    ]},
                    {"code": "bird", "display": "Bird"}
                ]},
                {"code": "mineral", "display": "Mineral"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn locate_respects_case_sensitivity() {
        let cs = gender();
        assert!(cs.locate("male").unwrap().is_some());
        assert!(cs.locate("MALE").unwrap().is_none());

        let insensitive = EnumeratedCodeSystem::from_resource(&json!({
            "url": "http://example.org/cs/ci",
            "caseSensitive": false,
            "concept": [{"code": "Abc", "display": "Abc"}]
        }))
        .unwrap();
        let located = insensitive.locate("ABC").unwrap().unwrap();
        assert_eq!(located.concept.code, "Abc");
    }

    #[test]
    fn duplicate_codes_are_rejected() {
        let result = EnumeratedCodeSystem::from_resource(&json!({
            "url": "http://example.org/cs/dup",
            "concept": [{"code": "a"}, {"code": "a"}]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn display_honors_language_preferences() {
        let cs = gender();
        let located = cs.locate("male").unwrap().unwrap();

        let german = parse_accept_language("de, en;q=0.5").unwrap();
        assert_eq!(cs.display(&located.concept, &german).as_deref(), Some("Männlich"));

        // No French designation: fall back to the default-language display.
        let french = parse_accept_language("fr").unwrap();
        assert_eq!(cs.display(&located.concept, &french).as_deref(), Some("Male"));
    }

    #[test]
    fn subsumption_follows_the_tree() {
        let cs = hierarchy();
        let animal = cs.locate("animal").unwrap().unwrap().concept;
        let dog = cs.locate("dog").unwrap().unwrap().concept;
        let mineral = cs.locate("mineral").unwrap().unwrap().concept;

        assert_eq!(cs.subsumes(&animal, &animal).unwrap(), SubsumptionOutcome::Equivalent);
        assert_eq!(cs.subsumes(&animal, &dog).unwrap(), SubsumptionOutcome::Subsumes);
        assert_eq!(cs.subsumes(&dog, &animal).unwrap(), SubsumptionOutcome::SubsumedBy);
        assert_eq!(cs.subsumes(&dog, &mineral).unwrap(), SubsumptionOutcome::NotSubsumed);
    }

    #[test]
    fn is_a_filter_selects_self_and_descendants() {
        let cs = hierarchy();
        let ctx = cs.filter("concept", FilterOp::IsA, "mammal").unwrap();
        let codes: Vec<_> = ctx.concepts().iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["mammal", "dog", "cat"]);

        let ctx = cs.filter("concept", FilterOp::DescendentOf, "mammal").unwrap();
        let codes: Vec<_> = ctx.concepts().iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["dog", "cat"]);
    }

    #[test]
    fn is_not_a_filter_excludes_subtree() {
        let cs = hierarchy();
        let ctx = cs.filter("concept", FilterOp::IsNotA, "mammal").unwrap();
        let codes: Vec<_> = ctx.concepts().iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["animal", "bird", "mineral"]);
    }

    #[test]
    fn property_and_regex_filters() {
        let cs = hierarchy();
        let retired = cs.filter("status", FilterOp::Equal, "retired").unwrap();
        assert_eq!(retired.concepts()[0].code, "cat");

        let re = cs.filter("code", FilterOp::Regex, "^m.*").unwrap();
        let codes: Vec<_> = re.concepts().iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["mammal", "mineral"]);

        assert!(cs.filter("concept", FilterOp::Regex, "(").is_err());
    }

    #[test]
    fn status_retired_means_inactive() {
        let cs = hierarchy();
        let cat = cs.locate("cat").unwrap().unwrap();
        assert!(cs.is_inactive(&cat.concept));
        assert!(cat.message.is_some());
    }

    #[test]
    fn supplement_adds_designations_but_never_codes() {
        let mut cs = gender();
        cs.apply_supplement(&json!({
            "resourceType": "CodeSystem",
            "url": "http://example.org/cs/gender-nl",
            "content": "supplement",
            "supplements": "http://hl7.org/fhir/administrative-gender",
            "concept": [
                {"code": "male", "designation": [{"language": "nl", "value": "Man"}]}
            ]
        }))
        .unwrap();
        let male = cs.locate("male").unwrap().unwrap().concept;
        let dutch = parse_accept_language("nl").unwrap();
        assert_eq!(cs.display(&male, &dutch).as_deref(), Some("Man"));

        let bad = cs.apply_supplement(&json!({
            "url": "http://example.org/cs/gender-xx",
            "concept": [{"code": "no-such-code"}]
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn declared_parents_make_a_dag() {
        let cs = EnumeratedCodeSystem::from_resource(&json!({
            "url": "http://example.org/cs/dag",
            "concept": [
                {"code": "a", "concept": [{"code": "c"}]},
                {"code": "b", "concept": [
                    {"code": "d", "property": [{"code": "parent", "valueCode": "a"}]}
                ]}
            ]
        }))
        .unwrap();
        let a = cs.locate("a").unwrap().unwrap().concept;
        let d = cs.locate("d").unwrap().unwrap().concept;
        assert_eq!(cs.subsumes(&a, &d).unwrap(), SubsumptionOutcome::Subsumes);
        // d has two parents
        let props = cs.properties(&d, Some(&["parent".to_string()]));
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn parent_cycles_are_reported_not_masked() {
        let cs = EnumeratedCodeSystem::from_resource(&json!({
            "url": "http://example.org/cs/cyclic",
            "concept": [
                {"code": "a", "property": [{"code": "parent", "valueCode": "b"}]},
                {"code": "b", "property": [{"code": "parent", "valueCode": "a"}]}
            ]
        }))
        .unwrap();
        let a = cs.locate("a").unwrap().unwrap().concept;
        let b = cs.locate("b").unwrap().unwrap().concept;
        assert!(cs.subsumes(&a, &b).is_err());
    }

    #[test]
    fn iteration_is_depth_first_document_order() {
        let cs = hierarchy();
        let all: Vec<_> = cs.iterate_all().unwrap().iter().map(|c| c.code.clone()).collect();
        assert_eq!(all, vec!["animal", "mammal", "dog", "cat", "bird", "mineral"]);
        assert_eq!(cs.total_count(), 6);
    }
}
