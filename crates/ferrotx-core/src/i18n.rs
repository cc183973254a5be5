//! Message catalog for user-visible diagnostics.
//!
//! Messages are keyed by id; substitution is positional `%s`. Languages
//! other than English can be layered in at library load; lookup falls back
//! to English.

use crate::lang::LanguagePreferences;
use std::collections::HashMap;

const FALLBACK_LANGUAGE: &str = "en";

/// English message table. Other languages overlay this at load time.
const MESSAGES_EN: &[(&str, &str)] = &[
    ("unknown-code", "Unknown code '%s' in the CodeSystem '%s'"),
    ("unknown-code-version", "Unknown code '%s' in the CodeSystem '%s' version '%s'"),
    ("unknown-system", "A definition for CodeSystem '%s' could not be found"),
    ("unknown-valueset", "A definition for ValueSet '%s' could not be found"),
    ("unknown-conceptmap", "A definition for ConceptMap '%s' could not be found"),
    ("inactive-code", "The code '%s' is valid but is not active"),
    ("abstract-code", "The code '%s' is abstract and not for direct use"),
    ("not-selectable", "The code '%s' is marked not selectable"),
    ("not-in-valueset", "The code '%s' from system '%s' is not in the value set '%s'"),
    ("display-mismatch", "Wrong display '%s' for code '%s' - should be one of: %s"),
    ("display-language", "No display for code '%s' is available in the requested languages"),
    ("case-mismatch", "The code '%s' differs from the defined code '%s' only in case"),
    ("version-mismatch", "The version '%s' does not match the required version '%s' for system '%s'"),
    ("version-conflict", "Conflicting version rules for system '%s': '%s' vs '%s'"),
    ("fragment-content", "The CodeSystem '%s' is a fragment; membership cannot be proven"),
    ("supplement-unknown-code", "Supplement '%s' declares code '%s' unknown to its target"),
    ("filter-unsupported", "Filter '%s %s %s' is not supported by CodeSystem '%s'"),
    ("filter-value-absent", "A compose filter on '%s' carries no value"),
    ("expansion-too-costly", "The value set expansion exceeds the limit of %s codes"),
    ("expansion-limited", "The expansion is limited to the first %s codes"),
    ("expansion-not-closed", "The expansion is not closed: filters over '%s' are provisional"),
    ("circular-reference", "Circular ValueSet reference: %s"),
    ("no-system", "No code system could be determined for this request"),
    ("post-coordination", "Post-coordinated expressions are not supported for '%s'"),
];

/// German overlay used by the built-in catalogs; intentionally partial.
const MESSAGES_DE: &[(&str, &str)] = &[
    ("unknown-code", "Unbekannter Code '%s' im CodeSystem '%s'"),
    ("inactive-code", "Der Code '%s' ist gültig, aber nicht aktiv"),
    ("not-in-valueset", "Der Code '%s' aus dem System '%s' ist nicht im ValueSet '%s'"),
    ("display-mismatch", "Falsche Anzeige '%s' für Code '%s' - erwartet: %s"),
];

/// Catalog of diagnostic messages, per language.
#[derive(Debug, Clone)]
pub struct MessageCatalog {
    tables: HashMap<String, HashMap<&'static str, String>>,
}

impl MessageCatalog {
    pub fn new() -> Self {
        let mut tables = HashMap::new();
        tables.insert(FALLBACK_LANGUAGE.to_string(), to_table(MESSAGES_EN));
        tables.insert("de".to_string(), to_table(MESSAGES_DE));
        Self { tables }
    }

    /// Overlay additional translations for a language.
    pub fn add_language(&mut self, language: &str, messages: &[(&'static str, &str)]) {
        let table = self.tables.entry(language.to_string()).or_default();
        for (id, text) in messages {
            table.insert(id, (*text).to_string());
        }
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Format a message by id in the best available language.
    pub fn message(&self, languages: &LanguagePreferences, id: &str, args: &[&str]) -> String {
        let template = self
            .pick_language(languages)
            .and_then(|table| table.get(id))
            .or_else(|| self.tables.get(FALLBACK_LANGUAGE).and_then(|t| t.get(id)));

        match template {
            Some(template) => substitute(template, args),
            None => {
                tracing::warn!(message_id = %id, "Unknown message id");
                format!("{id}: {}", args.join(", "))
            }
        }
    }

    fn pick_language(&self, languages: &LanguagePreferences) -> Option<&HashMap<&'static str, String>> {
        let available: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        let idx = languages.best_match(&available)?;
        self.tables.get(available[idx])
    }
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn to_table(messages: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
    messages.iter().map(|(id, text)| (*id, (*text).to_string())).collect()
}

fn substitute(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("%s") {
        out.push_str(&rest[..pos]);
        out.push_str(args.next().copied().unwrap_or(""));
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parse_accept_language;

    #[test]
    fn substitutes_positionally() {
        assert_eq!(substitute("a %s b %s", &["1", "2"]), "a 1 b 2");
        assert_eq!(substitute("no args", &[]), "no args");
        assert_eq!(substitute("%s %s", &["only"]), "only ");
    }

    #[test]
    fn falls_back_to_english() {
        let catalog = MessageCatalog::new();
        let prefs = parse_accept_language("fr").unwrap();
        let msg = catalog.message(&prefs, "unknown-code", &["x", "http://example.org"]);
        assert!(msg.starts_with("Unknown code 'x'"));
    }

    #[test]
    fn picks_german_when_preferred() {
        let catalog = MessageCatalog::new();
        let prefs = parse_accept_language("de, en;q=0.5").unwrap();
        let msg = catalog.message(&prefs, "inactive-code", &["x"]);
        assert!(msg.contains("nicht aktiv"));
    }

    #[test]
    fn partial_overlay_falls_back_per_message() {
        let catalog = MessageCatalog::new();
        let prefs = parse_accept_language("de").unwrap();
        // Not translated in the German overlay.
        let msg = catalog.message(&prefs, "expansion-too-costly", &["1000"]);
        assert!(msg.contains("exceeds the limit"));
    }
}
