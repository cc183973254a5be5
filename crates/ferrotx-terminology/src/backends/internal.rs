//! Fixed internal code systems backed by static ordered tables.
//!
//! Countries, currencies, US states, MIME types, and NANP area codes all
//! share one table back-end; every filter synthesizes a selection over
//! the same ordered sequence. HGVS is the odd one out: a grammar check
//! with no table, handled here because it is also an "internal" source.

use crate::provider::{
    CodeSystemProvider, ConceptProperty, ConceptRef, Designation, FilterContext, FilterOp,
    Located, PropertyValue, SubsumptionOutcome, unsupported_filter,
};
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::lang::LanguagePreferences;

/// One row of a fixed list: code, display, optional extra property.
#[derive(Debug, Clone, Copy)]
pub struct TableRow {
    pub code: &'static str,
    pub display: &'static str,
    pub property: Option<(&'static str, &'static str)>,
}

const fn row(code: &'static str, display: &'static str) -> TableRow {
    TableRow {
        code,
        display,
        property: None,
    }
}

const fn row_with(
    code: &'static str,
    display: &'static str,
    property: (&'static str, &'static str),
) -> TableRow {
    TableRow {
        code,
        display,
        property: Some(property),
    }
}

/// ISO 3166 alpha-2 country codes (working subset of the full list).
const COUNTRIES: &[TableRow] = &[
    row("AR", "Argentina"),
    row("AT", "Austria"),
    row("AU", "Australia"),
    row("BE", "Belgium"),
    row("BR", "Brazil"),
    row("CA", "Canada"),
    row("CH", "Switzerland"),
    row("CL", "Chile"),
    row("CN", "China"),
    row("CO", "Colombia"),
    row("CZ", "Czechia"),
    row("DE", "Germany"),
    row("DK", "Denmark"),
    row("EG", "Egypt"),
    row("ES", "Spain"),
    row("FI", "Finland"),
    row("FR", "France"),
    row("GB", "United Kingdom of Great Britain and Northern Ireland"),
    row("GR", "Greece"),
    row("HU", "Hungary"),
    row("ID", "Indonesia"),
    row("IE", "Ireland"),
    row("IL", "Israel"),
    row("IN", "India"),
    row("IT", "Italy"),
    row("JP", "Japan"),
    row("KE", "Kenya"),
    row("KR", "Korea, Republic of"),
    row("MX", "Mexico"),
    row("NG", "Nigeria"),
    row("NL", "Netherlands"),
    row("NO", "Norway"),
    row("NZ", "New Zealand"),
    row("PH", "Philippines"),
    row("PL", "Poland"),
    row("PT", "Portugal"),
    row("RO", "Romania"),
    row("RU", "Russian Federation"),
    row("SA", "Saudi Arabia"),
    row("SE", "Sweden"),
    row("SG", "Singapore"),
    row("TH", "Thailand"),
    row("TR", "Türkiye"),
    row("TW", "Taiwan, Province of China"),
    row("UA", "Ukraine"),
    row("US", "United States of America"),
    row("VN", "Viet Nam"),
    row("ZA", "South Africa"),
];

/// ISO 4217 currency codes.
const CURRENCIES: &[TableRow] = &[
    row_with("AUD", "Australian dollar", ("decimals", "2")),
    row_with("BRL", "Brazilian real", ("decimals", "2")),
    row_with("CAD", "Canadian dollar", ("decimals", "2")),
    row_with("CHF", "Swiss franc", ("decimals", "2")),
    row_with("CLP", "Chilean peso", ("decimals", "0")),
    row_with("CNY", "Yuan renminbi", ("decimals", "2")),
    row_with("CZK", "Czech koruna", ("decimals", "2")),
    row_with("DKK", "Danish krone", ("decimals", "2")),
    row_with("EUR", "Euro", ("decimals", "2")),
    row_with("GBP", "Pound sterling", ("decimals", "2")),
    row_with("HKD", "Hong Kong dollar", ("decimals", "2")),
    row_with("HUF", "Forint", ("decimals", "2")),
    row_with("IDR", "Rupiah", ("decimals", "2")),
    row_with("ILS", "New Israeli sheqel", ("decimals", "2")),
    row_with("INR", "Indian rupee", ("decimals", "2")),
    row_with("JPY", "Yen", ("decimals", "0")),
    row_with("KRW", "Won", ("decimals", "0")),
    row_with("MXN", "Mexican peso", ("decimals", "2")),
    row_with("NOK", "Norwegian krone", ("decimals", "2")),
    row_with("NZD", "New Zealand dollar", ("decimals", "2")),
    row_with("PLN", "Zloty", ("decimals", "2")),
    row_with("RUB", "Russian ruble", ("decimals", "2")),
    row_with("SEK", "Swedish krona", ("decimals", "2")),
    row_with("SGD", "Singapore dollar", ("decimals", "2")),
    row_with("THB", "Baht", ("decimals", "2")),
    row_with("TRY", "Turkish lira", ("decimals", "2")),
    row_with("TWD", "New Taiwan dollar", ("decimals", "2")),
    row_with("USD", "US dollar", ("decimals", "2")),
    row_with("ZAR", "Rand", ("decimals", "2")),
];

/// USPS state and territory codes.
const US_STATES: &[TableRow] = &[
    row("AL", "Alabama"),
    row("AK", "Alaska"),
    row("AZ", "Arizona"),
    row("AR", "Arkansas"),
    row("CA", "California"),
    row("CO", "Colorado"),
    row("CT", "Connecticut"),
    row("DE", "Delaware"),
    row("DC", "District of Columbia"),
    row("FL", "Florida"),
    row("GA", "Georgia"),
    row("HI", "Hawaii"),
    row("ID", "Idaho"),
    row("IL", "Illinois"),
    row("IN", "Indiana"),
    row("IA", "Iowa"),
    row("KS", "Kansas"),
    row("KY", "Kentucky"),
    row("LA", "Louisiana"),
    row("ME", "Maine"),
    row("MD", "Maryland"),
    row("MA", "Massachusetts"),
    row("MI", "Michigan"),
    row("MN", "Minnesota"),
    row("MS", "Mississippi"),
    row("MO", "Missouri"),
    row("MT", "Montana"),
    row("NE", "Nebraska"),
    row("NV", "Nevada"),
    row("NH", "New Hampshire"),
    row("NJ", "New Jersey"),
    row("NM", "New Mexico"),
    row("NY", "New York"),
    row("NC", "North Carolina"),
    row("ND", "North Dakota"),
    row("OH", "Ohio"),
    row("OK", "Oklahoma"),
    row("OR", "Oregon"),
    row("PA", "Pennsylvania"),
    row("RI", "Rhode Island"),
    row("SC", "South Carolina"),
    row("SD", "South Dakota"),
    row("TN", "Tennessee"),
    row("TX", "Texas"),
    row("UT", "Utah"),
    row("VT", "Vermont"),
    row("VA", "Virginia"),
    row("WA", "Washington"),
    row("WV", "West Virginia"),
    row("WI", "Wisconsin"),
    row("WY", "Wyoming"),
    row("AS", "American Samoa"),
    row("GU", "Guam"),
    row("MP", "Northern Mariana Islands"),
    row("PR", "Puerto Rico"),
    row("VI", "U.S. Virgin Islands"),
];

/// Common MIME types.
const MIME_TYPES: &[TableRow] = &[
    row("application/dicom", "DICOM"),
    row("application/fhir+json", "FHIR JSON"),
    row("application/fhir+xml", "FHIR XML"),
    row("application/json", "JSON"),
    row("application/octet-stream", "Binary data"),
    row("application/pdf", "PDF document"),
    row("application/xml", "XML"),
    row("application/zip", "ZIP archive"),
    row("audio/mpeg", "MP3 audio"),
    row("audio/wav", "WAV audio"),
    row("image/gif", "GIF image"),
    row("image/jpeg", "JPEG image"),
    row("image/png", "PNG image"),
    row("image/svg+xml", "SVG image"),
    row("image/tiff", "TIFF image"),
    row("text/csv", "CSV text"),
    row("text/html", "HTML"),
    row("text/plain", "Plain text"),
    row("text/rtf", "Rich text"),
    row("video/mp4", "MP4 video"),
    row("video/mpeg", "MPEG video"),
];

/// NANP area codes (subset).
const AREA_CODES: &[TableRow] = &[
    row("202", "Washington DC"),
    row("212", "New York NY"),
    row("213", "Los Angeles CA"),
    row("214", "Dallas TX"),
    row("215", "Philadelphia PA"),
    row("303", "Denver CO"),
    row("305", "Miami FL"),
    row("312", "Chicago IL"),
    row("404", "Atlanta GA"),
    row("415", "San Francisco CA"),
    row("206", "Seattle WA"),
    row("512", "Austin TX"),
    row("602", "Phoenix AZ"),
    row("617", "Boston MA"),
    row("702", "Las Vegas NV"),
    row("713", "Houston TX"),
];

/// A code system over one static ordered table.
pub struct InternalTable {
    url: &'static str,
    version: Option<&'static str>,
    case_sensitive: bool,
    rows: &'static [TableRow],
}

impl InternalTable {
    pub fn new(
        url: &'static str,
        version: Option<&'static str>,
        case_sensitive: bool,
        rows: &'static [TableRow],
    ) -> Self {
        Self {
            url,
            version,
            case_sensitive,
            rows,
        }
    }

    fn find(&self, code: &str) -> Option<usize> {
        self.rows.iter().position(|r| {
            if self.case_sensitive {
                r.code == code
            } else {
                r.code.eq_ignore_ascii_case(code)
            }
        })
    }

    fn row(&self, concept: &ConceptRef) -> Option<&TableRow> {
        self.rows.get(concept.index).filter(|r| r.code == concept.code)
    }
}

/// The internal source names the manifest recognizes, with their tables.
pub fn internal_code_system(name: &str) -> Option<InternalTable> {
    match name {
        "iso3166" | "countries" => Some(InternalTable::new(
            "urn:iso:std:iso:3166",
            Some("2018"),
            true,
            COUNTRIES,
        )),
        "iso4217" | "currencies" => Some(InternalTable::new(
            "urn:iso:std:iso:4217",
            Some("2015"),
            true,
            CURRENCIES,
        )),
        "us-states" => Some(InternalTable::new(
            "https://www.usps.com/",
            None,
            false,
            US_STATES,
        )),
        "mimetypes" => Some(InternalTable::new(
            "urn:ietf:bcp:13",
            None,
            false,
            MIME_TYPES,
        )),
        "area-codes" => Some(InternalTable::new(
            "http://nanpa.com/area-codes",
            None,
            true,
            AREA_CODES,
        )),
        _ => None,
    }
}

impl CodeSystemProvider for InternalTable {
    fn system(&self) -> &str {
        self.url
    }

    fn version(&self) -> Option<&str> {
        self.version
    }

    fn total_count(&self) -> i64 {
        self.rows.len() as i64
    }

    fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn locate(&self, code: &str) -> TxResult<Option<Located>> {
        Ok(self
            .find(code)
            .map(|i| Located::clean(ConceptRef::stored(self.rows[i].code, i))))
    }

    fn display(&self, concept: &ConceptRef, _languages: &LanguagePreferences) -> Option<String> {
        self.row(concept).map(|r| r.display.to_string())
    }

    fn designations(&self, _concept: &ConceptRef) -> Vec<Designation> {
        Vec::new()
    }

    fn properties(&self, concept: &ConceptRef, filter: Option<&[String]>) -> Vec<ConceptProperty> {
        self.row(concept)
            .and_then(|r| r.property)
            .filter(|(code, _)| filter.map(|f| f.iter().any(|w| w == code)).unwrap_or(true))
            .map(|(code, value)| vec![ConceptProperty::new(code, PropertyValue::String(value.to_string()))])
            .unwrap_or_default()
    }

    fn subsumes(&self, a: &ConceptRef, b: &ConceptRef) -> TxResult<SubsumptionOutcome> {
        // Flat lists have no hierarchy.
        if a.index == b.index {
            Ok(SubsumptionOutcome::Equivalent)
        } else {
            Ok(SubsumptionOutcome::NotSubsumed)
        }
    }

    fn supported_filters(&self) -> Vec<(&str, Vec<FilterOp>)> {
        vec![("code", vec![FilterOp::Equal, FilterOp::Regex, FilterOp::In, FilterOp::NotIn])]
    }

    fn filter(&self, property: &str, op: FilterOp, value: &str) -> TxResult<FilterContext> {
        let selected: Box<dyn Fn(&TableRow) -> bool> = match (property, op) {
            ("code", FilterOp::Equal) => Box::new(move |r: &TableRow| r.code == value),
            ("code", FilterOp::Regex) => {
                let re = regex::Regex::new(value)
                    .map_err(|e| TxIssue::invalid(format!("Invalid regex filter '{value}': {e}")))?;
                Box::new(move |r: &TableRow| re.is_match(r.code))
            }
            ("code", FilterOp::In) | ("code", FilterOp::NotIn) => {
                let wanted: Vec<String> = value.split(',').map(|s| s.trim().to_string()).collect();
                let negate = op == FilterOp::NotIn;
                Box::new(move |r: &TableRow| wanted.iter().any(|w| w == r.code) != negate)
            }
            _ => return Err(unsupported_filter(self.url, property, op, value)),
        };
        Ok(FilterContext::closed(
            self.rows
                .iter()
                .enumerate()
                .filter(|(_, r)| selected(r))
                .map(|(i, r)| ConceptRef::stored(r.code, i))
                .collect(),
        ))
    }

    fn iterate_all(&self) -> TxResult<Vec<ConceptRef>> {
        Ok(self
            .rows
            .iter()
            .enumerate()
            .map(|(i, r)| ConceptRef::stored(r.code, i))
            .collect())
    }
}

/// HGVS variant nomenclature: grammar validation only, open-ended.
pub struct HgvsCodeSystem;

pub const HGVS_URI: &str = "http://varnomen.hgvs.org";

impl HgvsCodeSystem {
    pub fn new() -> Self {
        Self
    }

    /// Accepts the common shapes: `NM_004006.2:c.4375C>T`,
    /// `NC_000023.10:g.32867861_32867862insT`, `p.(Arg97fs)`.
    fn looks_valid(code: &str) -> bool {
        let code = code.trim();
        if code.is_empty() {
            return false;
        }
        let body = match code.split_once(':') {
            Some((reference, body)) => {
                let ok_ref = reference.len() >= 3
                    && reference
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-');
                if !ok_ref {
                    return false;
                }
                body
            }
            None => code,
        };
        let mut parts = body.splitn(2, '.');
        let kind = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("");
        matches!(kind, "c" | "g" | "m" | "n" | "r" | "p") && !rest.is_empty()
    }
}

impl Default for HgvsCodeSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeSystemProvider for HgvsCodeSystem {
    fn system(&self) -> &str {
        HGVS_URI
    }

    fn version(&self) -> Option<&str> {
        None
    }

    fn total_count(&self) -> i64 {
        -1
    }

    fn locate(&self, code: &str) -> TxResult<Option<Located>> {
        Ok(Self::looks_valid(code).then(|| Located::clean(ConceptRef::synthesized(code))))
    }

    fn display(&self, concept: &ConceptRef, _languages: &LanguagePreferences) -> Option<String> {
        // HGVS expressions are their own display.
        Some(concept.code.clone())
    }

    fn designations(&self, _concept: &ConceptRef) -> Vec<Designation> {
        Vec::new()
    }

    fn properties(&self, _concept: &ConceptRef, _filter: Option<&[String]>) -> Vec<ConceptProperty> {
        Vec::new()
    }

    fn subsumes(&self, a: &ConceptRef, b: &ConceptRef) -> TxResult<SubsumptionOutcome> {
        if a.code == b.code {
            Ok(SubsumptionOutcome::Equivalent)
        } else {
            Ok(SubsumptionOutcome::NotSubsumed)
        }
    }

    fn supported_filters(&self) -> Vec<(&str, Vec<FilterOp>)> {
        Vec::new()
    }

    fn filter(&self, property: &str, op: FilterOp, value: &str) -> TxResult<FilterContext> {
        Err(unsupported_filter(HGVS_URI, property, op, value))
    }

    fn iterate_all(&self) -> TxResult<Vec<ConceptRef>> {
        Err(TxIssue::too_costly(
            "HGVS defines an unbounded expression space and cannot be enumerated",
        ))
    }

    fn filters_not_closed(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_internal_names_resolve() {
        for name in ["iso3166", "iso4217", "us-states", "mimetypes", "area-codes"] {
            assert!(internal_code_system(name).is_some(), "missing table: {name}");
        }
        assert!(internal_code_system("klingon").is_none());
    }

    #[test]
    fn lookup_and_display() {
        let states = internal_code_system("us-states").unwrap();
        let located = states.locate("wa").unwrap().unwrap();
        assert_eq!(located.concept.code, "WA");
        assert_eq!(
            states.display(&located.concept, &LanguagePreferences::default()).as_deref(),
            Some("Washington")
        );

        let countries = internal_code_system("iso3166").unwrap();
        assert!(countries.locate("us").unwrap().is_none()); // case-sensitive
        assert!(countries.locate("US").unwrap().is_some());
    }

    #[test]
    fn currency_properties() {
        let currencies = internal_code_system("iso4217").unwrap();
        let jpy = currencies.locate("JPY").unwrap().unwrap().concept;
        let props = currencies.properties(&jpy, None);
        assert_eq!(props[0].code, "decimals");
        assert_eq!(props[0].value, PropertyValue::String("0".into()));
    }

    #[test]
    fn filters_synthesize_over_the_sequence() {
        let states = internal_code_system("us-states").unwrap();
        let ctx = states.filter("code", FilterOp::Regex, "^W").unwrap();
        let codes: Vec<_> = ctx.concepts().iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["WA", "WV", "WI", "WY"]);

        let ctx = states.filter("code", FilterOp::In, "CA, OR, WA").unwrap();
        assert_eq!(ctx.len(), 3);
        assert!(ctx.is_closed());
    }

    #[test]
    fn ordering_matches_the_table() {
        let mime = internal_code_system("mimetypes").unwrap();
        let all = mime.iterate_all().unwrap();
        assert_eq!(all[0].code, "application/dicom");
        assert_eq!(mime.total_count(), MIME_TYPES.len() as i64);
    }

    #[test]
    fn hgvs_grammar_check() {
        let hgvs = HgvsCodeSystem::new();
        assert!(hgvs.locate("NM_004006.2:c.4375C>T").unwrap().is_some());
        assert!(hgvs.locate("p.(Arg97fs)").unwrap().is_some());
        assert!(hgvs.locate("banana").unwrap().is_none());
        assert!(hgvs.locate("").unwrap().is_none());
        assert!(hgvs.iterate_all().is_err());
    }
}
