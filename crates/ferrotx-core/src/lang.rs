//! BCP-47 language tags and Accept-Language negotiation.
//!
//! The engines pick displays and designations by an ordered language
//! preference list. Matching is exact tag first, then language-only,
//! then wildcard; script and region are preserved for fallback ranking.

use crate::issue::{TxIssue, TxResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed BCP-47 language tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageTag {
    /// Primary language subtag, lowercased (e.g. "en", "zh").
    pub language: String,
    /// Script subtag, title-cased (e.g. "Hans").
    pub script: Option<String>,
    /// Region subtag, uppercased (e.g. "US", "419").
    pub region: Option<String>,
    /// Remaining variant/extension subtags, lowercased, in order.
    pub variants: Vec<String>,
}

impl LanguageTag {
    /// Parse a tag. Accepts the common core of the grammar:
    /// `language ["-" script] ["-" region] *("-" variant)`.
    pub fn parse(raw: &str) -> TxResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "*" {
            return Err(TxIssue::invalid("Empty language tag"));
        }
        let mut language = None;
        let mut script = None;
        let mut region = None;
        let mut variants = Vec::new();

        for (i, part) in raw.split('-').enumerate() {
            if part.is_empty() {
                return Err(TxIssue::invalid(format!("Malformed language tag '{raw}'")));
            }
            if i == 0 {
                if part.len() < 2 || part.len() > 8 || !part.chars().all(|c| c.is_ascii_alphabetic())
                {
                    return Err(TxIssue::invalid(format!(
                        "Invalid primary language subtag in '{raw}'"
                    )));
                }
                language = Some(part.to_ascii_lowercase());
            } else if script.is_none()
                && region.is_none()
                && variants.is_empty()
                && part.len() == 4
                && part.chars().all(|c| c.is_ascii_alphabetic())
            {
                let mut s = part.to_ascii_lowercase();
                s[..1].make_ascii_uppercase();
                script = Some(s);
            } else if region.is_none()
                && variants.is_empty()
                && ((part.len() == 2 && part.chars().all(|c| c.is_ascii_alphabetic()))
                    || (part.len() == 3 && part.chars().all(|c| c.is_ascii_digit())))
            {
                region = Some(part.to_ascii_uppercase());
            } else {
                variants.push(part.to_ascii_lowercase());
            }
        }

        Ok(Self {
            language: language.expect("first subtag always consumed"),
            script,
            region,
            variants,
        })
    }

    /// True when `self` subsumes `other` by prefix containment:
    /// `en` matches `en-US`, `zh-Hans` matches `zh-Hans-CN`.
    pub fn is_prefix_of(&self, other: &LanguageTag) -> bool {
        if self.language != other.language {
            return false;
        }
        if let Some(ref s) = self.script {
            if other.script.as_deref() != Some(s.as_str()) {
                return false;
            }
        }
        if let Some(ref r) = self.region {
            if other.region.as_deref() != Some(r.as_str()) {
                return false;
            }
        }
        self.variants
            .iter()
            .all(|v| other.variants.contains(v))
    }

    /// Match quality against a candidate designation language.
    /// 3 = exact, 2 = same language+script or language+region prefix,
    /// 1 = same primary language, 0 = no match.
    pub fn match_quality(&self, candidate: &LanguageTag) -> u8 {
        if self == candidate {
            3
        } else if self.is_prefix_of(candidate) || candidate.is_prefix_of(self) {
            2
        } else if self.language == candidate.language {
            1
        } else {
            0
        }
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.language)?;
        if let Some(ref s) = self.script {
            write!(f, "-{s}")?;
        }
        if let Some(ref r) = self.region {
            write!(f, "-{r}")?;
        }
        for v in &self.variants {
            write!(f, "-{v}")?;
        }
        Ok(())
    }
}

/// One Accept-Language entry with its q-weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguagePreference {
    /// None means `*`.
    pub tag: Option<LanguageTag>,
    pub quality: f32,
}

/// Ordered language preferences for a request, highest quality first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguagePreferences {
    entries: Vec<LanguagePreference>,
}

impl LanguagePreferences {
    pub fn new(entries: Vec<LanguagePreference>) -> Self {
        let mut entries = entries;
        // Stable sort keeps header order among equal weights.
        entries.sort_by(|a, b| b.quality.partial_cmp(&a.quality).unwrap_or(std::cmp::Ordering::Equal));
        Self { entries }
    }

    /// A single explicit language, e.g. from the displayLanguage parameter.
    pub fn single(tag: LanguageTag) -> Self {
        Self {
            entries: vec![LanguagePreference { tag: Some(tag), quality: 1.0 }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LanguagePreference] {
        &self.entries
    }

    /// The most-preferred concrete tag, if any.
    pub fn primary(&self) -> Option<&LanguageTag> {
        self.entries.iter().find_map(|e| e.tag.as_ref())
    }

    /// Rank a candidate language against the preference list. Lower is
    /// better; `None` means the candidate is not acceptable anywhere in
    /// the list (no wildcard present).
    pub fn rank(&self, candidate: &str) -> Option<usize> {
        let candidate = LanguageTag::parse(candidate).ok()?;
        let mut best: Option<usize> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            let score = match &entry.tag {
                Some(tag) => tag.match_quality(&candidate),
                None => 1, // wildcard accepts anything, weakly
            };
            if score > 0 {
                // Position in the list dominates; quality of match breaks ties.
                let rank = i * 4 + (3 - score as usize);
                if best.map(|b| rank < b).unwrap_or(true) {
                    best = Some(rank);
                }
            }
        }
        best
    }

    /// Pick the best candidate index from a list of language codes.
    pub fn best_match(&self, candidates: &[&str]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .filter_map(|(i, c)| self.rank(c).map(|r| (r, i)))
            .min()
            .map(|(_, i)| i)
    }
}

/// Parse an Accept-Language header into ordered preferences.
///
/// A malformed entry is a client error, not a skipped token: the header is
/// part of the operation input.
pub fn parse_accept_language(header: &str) -> TxResult<LanguagePreferences> {
    let mut entries = Vec::new();
    for item in header.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let mut parts = item.split(';');
        let tag_part = parts.next().unwrap_or("").trim();
        let mut quality = 1.0f32;
        for param in parts {
            let param = param.trim();
            if let Some(q) = param.strip_prefix("q=") {
                quality = q.parse::<f32>().map_err(|_| {
                    TxIssue::invalid(format!("Invalid Accept-Language weight '{param}'"))
                })?;
                if !(0.0..=1.0).contains(&quality) {
                    return Err(TxIssue::invalid(format!(
                        "Accept-Language weight out of range: '{param}'"
                    )));
                }
            }
        }
        if tag_part == "*" {
            entries.push(LanguagePreference { tag: None, quality });
        } else {
            entries.push(LanguagePreference {
                tag: Some(LanguageTag::parse(tag_part)?),
                quality,
            });
        }
    }
    Ok(LanguagePreferences::new(entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_tag() {
        let tag = LanguageTag::parse("zh-Hans-CN").unwrap();
        assert_eq!(tag.language, "zh");
        assert_eq!(tag.script.as_deref(), Some("Hans"));
        assert_eq!(tag.region.as_deref(), Some("CN"));
        assert_eq!(tag.to_string(), "zh-Hans-CN");
    }

    #[test]
    fn normalizes_case() {
        let tag = LanguageTag::parse("EN-us").unwrap();
        assert_eq!(tag.to_string(), "en-US");
    }

    #[test]
    fn rejects_malformed_tags() {
        assert!(LanguageTag::parse("").is_err());
        assert!(LanguageTag::parse("e").is_err());
        assert!(LanguageTag::parse("en--US").is_err());
        assert!(LanguageTag::parse("123").is_err());
    }

    #[test]
    fn prefix_containment() {
        let en = LanguageTag::parse("en").unwrap();
        let en_us = LanguageTag::parse("en-US").unwrap();
        assert!(en.is_prefix_of(&en_us));
        assert!(!en_us.is_prefix_of(&en));
        assert!(en.is_prefix_of(&en));
    }

    #[test]
    fn accept_language_ordering() {
        let prefs = parse_accept_language("de, en;q=0.5").unwrap();
        assert_eq!(prefs.entries().len(), 2);
        assert_eq!(prefs.primary().unwrap().language, "de");
        // de preferred over en
        assert_eq!(prefs.best_match(&["en", "de"]), Some(1));
        // fr is not acceptable at all
        assert_eq!(prefs.rank("fr"), None);
    }

    #[test]
    fn q_weights_reorder_entries() {
        let prefs = parse_accept_language("en;q=0.3, fr;q=0.9").unwrap();
        assert_eq!(prefs.primary().unwrap().language, "fr");
    }

    #[test]
    fn wildcard_accepts_anything() {
        let prefs = parse_accept_language("de, *;q=0.1").unwrap();
        assert!(prefs.rank("ja").is_some());
        assert!(prefs.rank("de").unwrap() < prefs.rank("ja").unwrap());
    }

    #[test]
    fn malformed_weight_is_an_error() {
        assert!(parse_accept_language("en;q=banana").is_err());
        assert!(parse_accept_language("en;q=2.0").is_err());
    }
}
