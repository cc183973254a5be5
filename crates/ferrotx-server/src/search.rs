//! Resource search and read over the library's registries.
//!
//! Supports `url`, `name`, `status`, `_count`, `_offset`, `_sort`, and
//! `_elements` — enough for clients to discover what the server serves.

use crate::compat;
use crate::server::MountState;
use ferrotx_core::issue::{TxIssue, TxResult};
use serde_json::{Value, json};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SearchQuery {
    pub url: Option<String>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub count: usize,
    pub offset: usize,
    pub sort: Option<String>,
    pub elements: Option<Vec<String>>,
}

impl SearchQuery {
    pub fn from_pairs(pairs: &HashMap<String, String>) -> TxResult<Self> {
        let parse_number = |key: &str, default: usize| -> TxResult<usize> {
            match pairs.get(key) {
                Some(raw) => raw.parse().map_err(|_| {
                    TxIssue::invalid(format!("'{key}' must be a non-negative integer"))
                }),
                None => Ok(default),
            }
        };
        Ok(Self {
            url: pairs.get("url").cloned(),
            name: pairs.get("name").cloned(),
            status: pairs.get("status").cloned(),
            count: parse_number("_count", 50)?,
            offset: parse_number("_offset", 0)?,
            sort: pairs.get("_sort").cloned(),
            elements: pairs
                .get("_elements")
                .map(|e| e.split(',').map(|s| s.trim().to_string()).collect()),
        })
    }
}

/// Run a search over one resource type and shape a searchset Bundle.
pub fn search(state: &MountState, resource_type: &str, query: &SearchQuery) -> TxResult<Value> {
    let mut resources = list(state, resource_type)?;

    if let Some(ref url) = query.url {
        resources.retain(|r| r.get("url").and_then(|v| v.as_str()) == Some(url.as_str()));
    }
    if let Some(ref name) = query.name {
        let needle = name.to_lowercase();
        resources.retain(|r| {
            r.get("name")
                .and_then(|v| v.as_str())
                .map(|n| n.to_lowercase().contains(&needle))
                .unwrap_or(false)
        });
    }
    if let Some(ref status) = query.status {
        resources.retain(|r| r.get("status").and_then(|v| v.as_str()) == Some(status.as_str()));
    }

    if let Some(ref sort) = query.sort {
        let (key, descending) = match sort.strip_prefix('-') {
            Some(key) => (key, true),
            None => (sort.as_str(), false),
        };
        resources.sort_by(|a, b| {
            let left = a.get(key).and_then(|v| v.as_str()).unwrap_or("");
            let right = b.get(key).and_then(|v| v.as_str()).unwrap_or("");
            if descending { right.cmp(left) } else { left.cmp(right) }
        });
    }

    let total = resources.len();
    let page: Vec<Value> = resources
        .into_iter()
        .skip(query.offset)
        .take(query.count)
        .map(|r| project(r, query.elements.as_deref()))
        .map(|resource| json!({"resource": resource, "search": {"mode": "match"}}))
        .collect();

    Ok(json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": total,
        "entry": page,
    }))
}

/// Read one resource by server id.
pub fn read(state: &MountState, resource_type: &str, id: &str) -> TxResult<Value> {
    let found = match resource_type {
        "CodeSystem" => state.provider.get_code_system_by_id(id),
        "ValueSet" => state.provider.get_value_set_by_id(id),
        "ConceptMap" => state
            .provider
            .get_concept_map_by_id(id)
            .map(|m| compat::normalize_concept_map(&m, state.provider.fhir_version())),
        _ => None,
    };
    found.ok_or_else(|| TxIssue::not_found(format!("{resource_type} '{id}' is not known")))
}

fn list(state: &MountState, resource_type: &str) -> TxResult<Vec<Value>> {
    Ok(match resource_type {
        "CodeSystem" => state.provider.list_code_systems(),
        "ValueSet" => state.provider.list_value_sets(),
        "ConceptMap" => state
            .provider
            .list_concept_maps()
            .iter()
            .map(|m| compat::normalize_concept_map(m, state.provider.fhir_version()))
            .collect(),
        other => {
            return Err(TxIssue::not_supported(format!(
                "Search over '{other}' is not supported"
            )));
        }
    })
}

/// `_elements` projection: keep the named elements plus the mandatory
/// envelope fields.
fn project(resource: Value, elements: Option<&[String]>) -> Value {
    let Some(elements) = elements else {
        return resource;
    };
    let Value::Object(map) = resource else {
        return resource;
    };
    let keep = |key: &str| {
        key == "resourceType" || key == "id" || elements.iter().any(|e| e == key)
    };
    Value::Object(map.into_iter().filter(|(k, _)| keep(k)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_pairs() {
        let mut pairs = HashMap::new();
        pairs.insert("url".to_string(), "http://example.org/cs".to_string());
        pairs.insert("_count".to_string(), "10".to_string());
        pairs.insert("_elements".to_string(), "url,version".to_string());
        let query = SearchQuery::from_pairs(&pairs).unwrap();
        assert_eq!(query.url.as_deref(), Some("http://example.org/cs"));
        assert_eq!(query.count, 10);
        assert_eq!(query.elements.as_deref().unwrap().len(), 2);

        pairs.insert("_count".to_string(), "lots".to_string());
        assert!(SearchQuery::from_pairs(&pairs).is_err());
    }

    #[test]
    fn projection_keeps_envelope() {
        let resource = json!({
            "resourceType": "CodeSystem",
            "id": "x",
            "url": "http://example.org/cs",
            "version": "1.0",
            "concept": [{"code": "a"}]
        });
        let projected = project(resource, Some(&["url".to_string()]));
        assert_eq!(projected["resourceType"], "CodeSystem");
        assert_eq!(projected["id"], "x");
        assert_eq!(projected["url"], "http://example.org/cs");
        assert!(projected.get("concept").is_none());
    }
}
