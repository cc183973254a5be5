//! The FHIR `Parameters` resource as a typed value bag.
//!
//! Every terminology operation speaks Parameters in and out, so the
//! `valueX` polymorphism is modeled once here as a tagged union instead of
//! being re-decoded ad hoc per worker.

use crate::fhir::{CodeableConcept, Coding};
use crate::issue::{TxIssue, TxResult};
use serde_json::{Map, Value, json};

/// A parameter value: one of the `valueX` choices the terminology
/// operations use, or a nested resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Code(String),
    String(String),
    Uri(String),
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    DateTime(String),
    Coding(Coding),
    CodeableConcept(CodeableConcept),
    Quantity(Value),
    Resource(Value),
}

impl ParamValue {
    /// The wire key this value serializes under.
    fn wire_key(&self) -> &'static str {
        match self {
            ParamValue::Code(_) => "valueCode",
            ParamValue::String(_) => "valueString",
            ParamValue::Uri(_) => "valueUri",
            ParamValue::Boolean(_) => "valueBoolean",
            ParamValue::Integer(_) => "valueInteger",
            ParamValue::Decimal(_) => "valueDecimal",
            ParamValue::DateTime(_) => "valueDateTime",
            ParamValue::Coding(_) => "valueCoding",
            ParamValue::CodeableConcept(_) => "valueCodeableConcept",
            ParamValue::Quantity(_) => "valueQuantity",
            ParamValue::Resource(_) => "resource",
        }
    }

    fn to_wire(&self) -> Value {
        match self {
            ParamValue::Code(s) | ParamValue::String(s) | ParamValue::Uri(s) => json!(s),
            ParamValue::DateTime(s) => json!(s),
            ParamValue::Boolean(b) => json!(b),
            ParamValue::Integer(i) => json!(i),
            ParamValue::Decimal(d) => json!(d),
            ParamValue::Coding(c) => serde_json::to_value(c).unwrap_or(Value::Null),
            ParamValue::CodeableConcept(c) => serde_json::to_value(c).unwrap_or(Value::Null),
            ParamValue::Quantity(v) | ParamValue::Resource(v) => v.clone(),
        }
    }

    /// String view for code/string/uri values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Code(s) | ParamValue::String(s) | ParamValue::Uri(s)
            | ParamValue::DateTime(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Boolean(b) => Some(*b),
            // Lenient: "true"/"false" arrive as strings on GET requests.
            ParamValue::Code(s) | ParamValue::String(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Integer(i) => Some(*i),
            ParamValue::Code(s) | ParamValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// One named parameter, possibly with nested parts.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Option<ParamValue>,
    pub parts: Vec<Parameter>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: ParamValue) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
            parts: Vec::new(),
        }
    }

    pub fn group(name: impl Into<String>, parts: Vec<Parameter>) -> Self {
        Self {
            name: name.into(),
            value: None,
            parts,
        }
    }

    fn to_wire(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("name".into(), json!(self.name));
        if let Some(ref value) = self.value {
            obj.insert(value.wire_key().into(), value.to_wire());
        }
        if !self.parts.is_empty() {
            obj.insert(
                "part".into(),
                Value::Array(self.parts.iter().map(Parameter::to_wire).collect()),
            );
        }
        Value::Object(obj)
    }

    fn from_wire(v: &Value) -> TxResult<Self> {
        let name = v
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| TxIssue::invalid("Parameter without a name"))?
            .to_string();

        let mut value = None;
        for (key, val) in v.as_object().into_iter().flatten() {
            let parsed = match key.as_str() {
                "valueCode" => val.as_str().map(|s| ParamValue::Code(s.into())),
                "valueString" => val.as_str().map(|s| ParamValue::String(s.into())),
                "valueUri" | "valueUrl" | "valueCanonical" => {
                    val.as_str().map(|s| ParamValue::Uri(s.into()))
                }
                "valueBoolean" => val.as_bool().map(ParamValue::Boolean),
                "valueInteger" => val.as_i64().map(ParamValue::Integer),
                "valueDecimal" => val.as_f64().map(ParamValue::Decimal),
                "valueDateTime" => val.as_str().map(|s| ParamValue::DateTime(s.into())),
                "valueCoding" => serde_json::from_value(val.clone()).ok().map(ParamValue::Coding),
                "valueCodeableConcept" => serde_json::from_value(val.clone())
                    .ok()
                    .map(ParamValue::CodeableConcept),
                "valueQuantity" => Some(ParamValue::Quantity(val.clone())),
                "resource" => Some(ParamValue::Resource(val.clone())),
                _ => None,
            };
            if let Some(parsed) = parsed {
                if value.is_some() {
                    return Err(TxIssue::invalid(format!(
                        "Parameter '{name}' carries more than one value"
                    )));
                }
                value = Some(parsed);
            }
        }

        let parts = v
            .get("part")
            .and_then(|p| p.as_array())
            .map(|items| items.iter().map(Parameter::from_wire).collect::<TxResult<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self { name, value, parts })
    }
}

/// A full Parameters resource: a flat, named, repeatable container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    pub parameter: Vec<Parameter>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(v: &Value) -> TxResult<Self> {
        if v.get("resourceType").and_then(|t| t.as_str()) != Some("Parameters") {
            return Err(TxIssue::invalid("Expected a Parameters resource"));
        }
        let parameter = v
            .get("parameter")
            .and_then(|p| p.as_array())
            .map(|items| items.iter().map(Parameter::from_wire).collect::<TxResult<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();
        Ok(Self { parameter })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "resourceType": "Parameters",
            "parameter": self.parameter.iter().map(Parameter::to_wire).collect::<Vec<_>>(),
        })
    }

    pub fn push(&mut self, parameter: Parameter) -> &mut Self {
        self.parameter.push(parameter);
        self
    }

    pub fn add_code(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.push(Parameter::new(name, ParamValue::Code(value.into())))
    }

    pub fn add_string(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.push(Parameter::new(name, ParamValue::String(value.into())))
    }

    pub fn add_uri(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.push(Parameter::new(name, ParamValue::Uri(value.into())))
    }

    pub fn add_boolean(&mut self, name: &str, value: bool) -> &mut Self {
        self.push(Parameter::new(name, ParamValue::Boolean(value)))
    }

    pub fn add_integer(&mut self, name: &str, value: i64) -> &mut Self {
        self.push(Parameter::new(name, ParamValue::Integer(value)))
    }

    pub fn add_coding(&mut self, name: &str, value: Coding) -> &mut Self {
        self.push(Parameter::new(name, ParamValue::Coding(value)))
    }

    pub fn add_resource(&mut self, name: &str, value: Value) -> &mut Self {
        self.push(Parameter::new(name, ParamValue::Resource(value)))
    }

    /// First parameter with the given name.
    pub fn first(&self, name: &str) -> Option<&Parameter> {
        self.parameter.iter().find(|p| p.name == name)
    }

    /// All parameters with the given name, in order.
    pub fn all(&self, name: &str) -> impl Iterator<Item = &Parameter> {
        self.parameter.iter().filter(move |p| p.name == name)
    }

    pub fn str_value(&self, name: &str) -> Option<&str> {
        self.first(name)?.value.as_ref()?.as_str()
    }

    pub fn bool_value(&self, name: &str) -> Option<bool> {
        self.first(name)?.value.as_ref()?.as_bool()
    }

    pub fn int_value(&self, name: &str) -> Option<i64> {
        self.first(name)?.value.as_ref()?.as_i64()
    }

    pub fn coding_value(&self, name: &str) -> Option<&Coding> {
        match self.first(name)?.value.as_ref()? {
            ParamValue::Coding(c) => Some(c),
            _ => None,
        }
    }

    pub fn codeable_concept_value(&self, name: &str) -> Option<&CodeableConcept> {
        match self.first(name)?.value.as_ref()? {
            ParamValue::CodeableConcept(c) => Some(c),
            _ => None,
        }
    }

    pub fn resource_value(&self, name: &str) -> Option<&Value> {
        match self.first(name)?.value.as_ref()? {
            ParamValue::Resource(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip() {
        let mut params = Parameters::new();
        params
            .add_boolean("result", true)
            .add_code("code", "male")
            .add_uri("system", "http://hl7.org/fhir/administrative-gender")
            .add_string("display", "Male");
        let wire = params.to_json();
        assert_eq!(wire["resourceType"], "Parameters");
        assert_eq!(wire["parameter"][0]["valueBoolean"], true);
        assert_eq!(wire["parameter"][1]["valueCode"], "male");

        let back = Parameters::from_json(&wire).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn nested_parts_serialize() {
        let designation = Parameter::group(
            "designation",
            vec![
                Parameter::new("language", ParamValue::Code("de".into())),
                Parameter::new("value", ParamValue::String("Männlich".into())),
            ],
        );
        let mut params = Parameters::new();
        params.push(designation);
        let wire = params.to_json();
        assert_eq!(wire["parameter"][0]["part"][0]["valueCode"], "de");
        assert_eq!(wire["parameter"][0]["part"][1]["valueString"], "Männlich");
    }

    #[test]
    fn coding_value_extraction() {
        let wire = json!({
            "resourceType": "Parameters",
            "parameter": [
                {"name": "coding", "valueCoding": {"system": "http://loinc.org", "code": "8867-4"}}
            ]
        });
        let params = Parameters::from_json(&wire).unwrap();
        let coding = params.coding_value("coding").unwrap();
        assert_eq!(coding.code.as_deref(), Some("8867-4"));
    }

    #[test]
    fn double_valued_parameter_is_invalid() {
        let wire = json!({
            "resourceType": "Parameters",
            "parameter": [
                {"name": "x", "valueCode": "a", "valueString": "b"}
            ]
        });
        assert!(Parameters::from_json(&wire).is_err());
    }

    #[test]
    fn get_style_booleans_are_lenient() {
        let wire = json!({
            "resourceType": "Parameters",
            "parameter": [{"name": "activeOnly", "valueString": "true"}]
        });
        let params = Parameters::from_json(&wire).unwrap();
        assert_eq!(params.bool_value("activeOnly"), Some(true));
    }
}
