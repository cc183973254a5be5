//! UCUM back-end: unit expressions validated and canonicalized by grammar,
//! not by a stored concept list.
//!
//! The model is the UCUM essence algebra: every parseable expression
//! reduces to a canonical form `factor × m^a·g^b·s^c·rad^d·K^e·C^f·cd^g`.
//! `locate` is parse success; displays are synthesized human names; the
//! only closed-ish filter is `canonical = <unit>` over the configured
//! common units, and even that is declared not-closed.

use crate::provider::{
    CodeSystemProvider, ConceptProperty, ConceptRef, Designation, FilterContext, FilterOp,
    Located, PropertyValue, SubsumptionOutcome, unsupported_filter,
};
use ferrotx_core::issue::{TxIssue, TxResult};
use ferrotx_core::lang::LanguagePreferences;

pub const UCUM_URI: &str = "http://unitsofmeasure.org";

/// Base dimensions, in canonical rendering order.
const DIMENSIONS: usize = 7;
const BASE_CODES: [&str; DIMENSIONS] = ["m", "g", "s", "rad", "K", "C", "cd"];
const BASE_NAMES: [&str; DIMENSIONS] = [
    "meter", "gram", "second", "radian", "kelvin", "coulomb", "candela",
];

/// Metric prefixes: (code, name, power of ten).
const PREFIXES: &[(&str, &str, i32)] = &[
    ("Y", "yotta", 24),
    ("Z", "zetta", 21),
    ("E", "exa", 18),
    ("P", "peta", 15),
    ("T", "tera", 12),
    ("G", "giga", 9),
    ("M", "mega", 6),
    ("k", "kilo", 3),
    ("h", "hecto", 2),
    ("da", "deka", 1),
    ("d", "deci", -1),
    ("c", "centi", -2),
    ("m", "milli", -3),
    ("u", "micro", -6),
    ("n", "nano", -9),
    ("p", "pico", -12),
    ("f", "femto", -15),
    ("a", "atto", -18),
    ("z", "zepto", -21),
    ("y", "yocto", -24),
];

struct UnitDef {
    code: &'static str,
    name: &'static str,
    metric: bool,
    factor: f64,
    dims: [i8; DIMENSIONS],
}

macro_rules! unit {
    ($code:literal, $name:literal, $metric:literal, $factor:expr, [$($dim:expr),*]) => {
        UnitDef { code: $code, name: $name, metric: $metric, factor: $factor, dims: [$($dim),*] }
    };
}

/// Derived and customary units, canonical form precomputed.
/// Dimension order: m, g, s, rad, K, C, cd.
const UNITS: &[UnitDef] = &[
    unit!("mol", "mole", true, 6.02214076e23, [0, 0, 0, 0, 0, 0, 0]),
    unit!("sr", "steradian", true, 1.0, [0, 0, 0, 2, 0, 0, 0]),
    unit!("Hz", "hertz", true, 1.0, [0, 0, -1, 0, 0, 0, 0]),
    unit!("N", "newton", true, 1000.0, [1, 1, -2, 0, 0, 0, 0]),
    unit!("Pa", "pascal", true, 1000.0, [-1, 1, -2, 0, 0, 0, 0]),
    unit!("J", "joule", true, 1000.0, [2, 1, -2, 0, 0, 0, 0]),
    unit!("W", "watt", true, 1000.0, [2, 1, -3, 0, 0, 0, 0]),
    unit!("A", "ampere", true, 1.0, [0, 0, -1, 0, 0, 1, 0]),
    unit!("V", "volt", true, 1000.0, [2, 1, -2, 0, 0, -1, 0]),
    unit!("F", "farad", true, 0.001, [-2, -1, 2, 0, 0, 2, 0]),
    unit!("Ohm", "ohm", true, 1000.0, [2, 1, -1, 0, 0, -2, 0]),
    unit!("S", "siemens", true, 0.001, [-2, -1, 1, 0, 0, 2, 0]),
    unit!("Wb", "weber", true, 1000.0, [2, 1, -1, 0, 0, -1, 0]),
    unit!("T", "tesla", true, 1000.0, [0, 1, -1, 0, 0, -1, 0]),
    unit!("H", "henry", true, 1000.0, [2, 1, 0, 0, 0, -2, 0]),
    unit!("lm", "lumen", true, 1.0, [0, 0, 0, 2, 0, 0, 1]),
    unit!("lx", "lux", true, 1.0, [-2, 0, 0, 2, 0, 0, 1]),
    unit!("Bq", "becquerel", true, 1.0, [0, 0, -1, 0, 0, 0, 0]),
    unit!("Gy", "gray", true, 1.0, [2, 0, -2, 0, 0, 0, 0]),
    unit!("Sv", "sievert", true, 1.0, [2, 0, -2, 0, 0, 0, 0]),
    unit!("l", "liter", true, 0.001, [3, 0, 0, 0, 0, 0, 0]),
    unit!("L", "liter", true, 0.001, [3, 0, 0, 0, 0, 0, 0]),
    unit!("min", "minute", false, 60.0, [0, 0, 1, 0, 0, 0, 0]),
    unit!("h", "hour", false, 3600.0, [0, 0, 1, 0, 0, 0, 0]),
    unit!("d", "day", false, 86400.0, [0, 0, 1, 0, 0, 0, 0]),
    unit!("wk", "week", false, 604800.0, [0, 0, 1, 0, 0, 0, 0]),
    unit!("mo", "month", false, 2629800.0, [0, 0, 1, 0, 0, 0, 0]),
    unit!("a", "year", false, 31557600.0, [0, 0, 1, 0, 0, 0, 0]),
    unit!("t", "tonne", true, 1.0e6, [0, 1, 0, 0, 0, 0, 0]),
    unit!("bar", "bar", true, 1.0e8, [-1, 1, -2, 0, 0, 0, 0]),
    unit!("u", "unified atomic mass unit", true, 1.6605402e-24, [0, 1, 0, 0, 0, 0, 0]),
    unit!("eV", "electronvolt", true, 1.602176634e-16, [2, 1, -2, 0, 0, 0, 0]),
    unit!("[in_i]", "inch", false, 0.0254, [1, 0, 0, 0, 0, 0, 0]),
    unit!("[ft_i]", "foot", false, 0.3048, [1, 0, 0, 0, 0, 0, 0]),
    unit!("[mi_i]", "mile", false, 1609.344, [1, 0, 0, 0, 0, 0, 0]),
    unit!("[lb_av]", "pound", false, 453.59237, [0, 1, 0, 0, 0, 0, 0]),
    unit!("[oz_av]", "ounce", false, 28.349523125, [0, 1, 0, 0, 0, 0, 0]),
    unit!("[gal_us]", "gallon", false, 0.003785411784, [3, 0, 0, 0, 0, 0, 0]),
    unit!("[foz_us]", "fluid ounce", false, 2.95735295625e-5, [3, 0, 0, 0, 0, 0, 0]),
    unit!("[drp]", "drop", false, 5.0e-8, [3, 0, 0, 0, 0, 0, 0]),
    unit!("atm", "standard atmosphere", false, 1.01325e8, [-1, 1, -2, 0, 0, 0, 0]),
    unit!("mm[Hg]", "millimeter of mercury", false, 133322.0, [-1, 1, -2, 0, 0, 0, 0]),
    unit!("Cel", "degree Celsius", true, 1.0, [0, 0, 0, 0, 1, 0, 0]),
    unit!("[degF]", "degree Fahrenheit", false, 0.5555555555555556, [0, 0, 0, 0, 1, 0, 0]),
    unit!("deg", "degree", false, 0.017453292519943295, [0, 0, 0, 1, 0, 0, 0]),
    unit!("%", "percent", false, 0.01, [0, 0, 0, 0, 0, 0, 0]),
    unit!("[ppm]", "parts per million", false, 1.0e-6, [0, 0, 0, 0, 0, 0, 0]),
    unit!("[ppb]", "parts per billion", false, 1.0e-9, [0, 0, 0, 0, 0, 0, 0]),
    unit!("[iU]", "international unit", true, 1.0, [0, 0, 0, 0, 0, 0, 0]),
    unit!("[IU]", "international unit", true, 1.0, [0, 0, 0, 0, 0, 0, 0]),
    unit!("kat", "katal", true, 6.02214076e23, [0, 0, -1, 0, 0, 0, 0]),
    unit!("osm", "osmole", true, 6.02214076e23, [0, 0, 0, 0, 0, 0, 0]),
    unit!("eq", "equivalent", true, 6.02214076e23, [0, 0, 0, 0, 0, 0, 0]),
];

/// Canonical form of a unit expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Canonical {
    pub factor: f64,
    pub dims: [i8; DIMENSIONS],
}

impl Canonical {
    fn one() -> Self {
        Self {
            factor: 1.0,
            dims: [0; DIMENSIONS],
        }
    }

    fn mul(&self, other: &Canonical) -> Canonical {
        let mut dims = self.dims;
        for (d, o) in dims.iter_mut().zip(other.dims.iter()) {
            *d += o;
        }
        Canonical {
            factor: self.factor * other.factor,
            dims,
        }
    }

    fn div(&self, other: &Canonical) -> Canonical {
        let mut dims = self.dims;
        for (d, o) in dims.iter_mut().zip(other.dims.iter()) {
            *d -= o;
        }
        Canonical {
            factor: self.factor / other.factor,
            dims,
        }
    }

    fn pow(&self, exp: i32) -> Canonical {
        Canonical {
            factor: self.factor.powi(exp),
            dims: self.dims.map(|d| d * exp as i8),
        }
    }

    /// Two canonical forms are commensurable when the dimension vectors
    /// match; equal when the factors match too (within float tolerance).
    pub fn same_as(&self, other: &Canonical) -> bool {
        self.dims == other.dims
            && (self.factor - other.factor).abs()
                <= f64::EPSILON * 32.0 * self.factor.abs().max(other.factor.abs()).max(1.0)
    }

    /// Render as a UCUM expression over base units, e.g. `10*-3.g` for mg.
    pub fn expression(&self) -> String {
        let mut parts = Vec::new();
        let log = self.factor.log10();
        if (log - log.round()).abs() < 1e-9 {
            let power = log.round() as i32;
            if power != 0 {
                parts.push(format!("10*{power}"));
            }
        } else if (self.factor - 1.0).abs() > f64::EPSILON {
            parts.push(format!("{}", self.factor));
        }
        for (i, &exp) in self.dims.iter().enumerate() {
            if exp == 1 {
                parts.push(BASE_CODES[i].to_string());
            } else if exp != 0 {
                parts.push(format!("{}{exp}", BASE_CODES[i]));
            }
        }
        if parts.is_empty() {
            "1".to_string()
        } else {
            parts.join(".")
        }
    }
}

/// A parsed component with its human rendering.
#[derive(Debug, Clone)]
struct Parsed {
    canonical: Canonical,
    human: String,
}

/// The UCUM code system provider.
pub struct UcumCodeSystem {
    version: Option<String>,
    /// Codes of the common-units ValueSet, wired in by the library when
    /// both are configured. The canonical filter enumerates these.
    common_units: Vec<String>,
}

impl UcumCodeSystem {
    pub fn new(version: Option<String>) -> Self {
        Self {
            version,
            common_units: Vec::new(),
        }
    }

    pub fn with_common_units(mut self, units: Vec<String>) -> Self {
        self.common_units = units;
        self
    }

    /// Parse and canonicalize a unit expression.
    pub fn analyse(&self, code: &str) -> TxResult<Canonical> {
        parse_term(code).map(|p| p.canonical)
    }

    fn human_name(&self, code: &str) -> Option<String> {
        parse_term(code).ok().map(|p| p.human)
    }
}

impl CodeSystemProvider for UcumCodeSystem {
    fn system(&self) -> &str {
        UCUM_URI
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn total_count(&self) -> i64 {
        -1
    }

    fn locate(&self, code: &str) -> TxResult<Option<Located>> {
        match parse_term(code) {
            Ok(_) => Ok(Some(Located::clean(ConceptRef::synthesized(code)))),
            Err(issue) => {
                tracing::debug!(code = %code, reason = %issue, "UCUM parse failure");
                Ok(None)
            }
        }
    }

    fn display(&self, concept: &ConceptRef, _languages: &LanguagePreferences) -> Option<String> {
        self.human_name(&concept.code)
    }

    fn designations(&self, concept: &ConceptRef) -> Vec<Designation> {
        self.human_name(&concept.code)
            .map(|value| {
                vec![Designation {
                    language: Some("en".to_string()),
                    use_coding: None,
                    value,
                }]
            })
            .unwrap_or_default()
    }

    fn properties(&self, concept: &ConceptRef, filter: Option<&[String]>) -> Vec<ConceptProperty> {
        let wanted = |name: &str| filter.map(|f| f.iter().any(|w| w == name)).unwrap_or(true);
        let mut props = Vec::new();
        if wanted("canonical") {
            if let Ok(canonical) = self.analyse(&concept.code) {
                props.push(ConceptProperty::new(
                    "canonical",
                    PropertyValue::Code(canonical.expression()),
                ));
            }
        }
        props
    }

    fn subsumes(&self, a: &ConceptRef, b: &ConceptRef) -> TxResult<SubsumptionOutcome> {
        let ca = self.analyse(&a.code)?;
        let cb = self.analyse(&b.code)?;
        // Units have no hierarchy; equal canonical forms are the same unit.
        if ca.same_as(&cb) {
            Ok(SubsumptionOutcome::Equivalent)
        } else {
            Ok(SubsumptionOutcome::NotSubsumed)
        }
    }

    fn supported_filters(&self) -> Vec<(&str, Vec<FilterOp>)> {
        vec![("canonical", vec![FilterOp::Equal])]
    }

    fn filter(&self, property: &str, op: FilterOp, value: &str) -> TxResult<FilterContext> {
        if property == "canonical" && op == FilterOp::Equal {
            let target = self.analyse(value)?;
            let matching: Vec<ConceptRef> = self
                .common_units
                .iter()
                .filter(|unit| {
                    self.analyse(unit)
                        .map(|c| c.same_as(&target))
                        .unwrap_or(false)
                })
                .map(ConceptRef::synthesized)
                .collect();
            // Enumerating common units only: the filter set is provisional.
            return Ok(FilterContext::not_closed(matching));
        }
        Err(unsupported_filter(UCUM_URI, property, op, value))
    }

    fn iterate_all(&self) -> TxResult<Vec<ConceptRef>> {
        Err(TxIssue::too_costly(
            "The UCUM grammar defines an unbounded set of units and cannot be enumerated",
        ))
    }

    fn filters_not_closed(&self) -> bool {
        true
    }
}

// ---- expression grammar ----

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }
}

fn parse_term(input: &str) -> TxResult<Parsed> {
    let input = input.trim();
    if input.is_empty() {
        return Err(TxIssue::invalid("Empty unit expression"));
    }
    if !input.is_ascii() {
        return Err(TxIssue::invalid(format!(
            "Unit expression contains non-ASCII characters: '{input}'"
        )));
    }
    let mut lexer = Lexer::new(input);
    let parsed = term(&mut lexer, input)?;
    if lexer.pos != input.len() {
        return Err(TxIssue::invalid(format!(
            "Trailing characters in unit expression '{input}' at offset {}",
            lexer.pos
        )));
    }
    Ok(parsed)
}

fn term(lexer: &mut Lexer, whole: &str) -> TxResult<Parsed> {
    // A leading '/' inverts the first component.
    let mut acc = if lexer.eat('/') {
        let c = component(lexer, whole)?;
        Parsed {
            canonical: Canonical::one().div(&c.canonical),
            human: format!("per {}", c.human),
        }
    } else {
        component(lexer, whole)?
    };

    while let Some(op) = lexer.peek() {
        match op {
            '.' => {
                lexer.bump();
                let rhs = component(lexer, whole)?;
                acc = Parsed {
                    canonical: acc.canonical.mul(&rhs.canonical),
                    human: format!("{} {}", acc.human, rhs.human),
                };
            }
            '/' => {
                lexer.bump();
                let rhs = component(lexer, whole)?;
                acc = Parsed {
                    canonical: acc.canonical.div(&rhs.canonical),
                    human: format!("{} per {}", acc.human, rhs.human),
                };
            }
            _ => break,
        }
    }
    Ok(acc)
}

fn component(lexer: &mut Lexer, whole: &str) -> TxResult<Parsed> {
    // Standalone annotation is dimensionless.
    if lexer.peek() == Some('{') {
        let text = annotation(lexer, whole)?;
        return Ok(Parsed {
            canonical: Canonical::one(),
            human: text,
        });
    }

    let mut parsed = if lexer.eat('(') {
        let inner = term(lexer, whole)?;
        if !lexer.eat(')') {
            return Err(TxIssue::invalid(format!(
                "Unbalanced parentheses in unit expression '{whole}'"
            )));
        }
        inner
    } else {
        atom(lexer, whole)?
    };

    if let Some(exp) = exponent(lexer) {
        parsed = Parsed {
            canonical: parsed.canonical.pow(exp),
            human: match exp {
                2 => format!("square {}", parsed.human),
                3 => format!("cubic {}", parsed.human),
                _ => format!("{}^{exp}", parsed.human),
            },
        };
    }

    // A trailing annotation attaches to the component without changing it.
    if lexer.peek() == Some('{') {
        annotation(lexer, whole)?;
    }
    Ok(parsed)
}

fn annotation(lexer: &mut Lexer, whole: &str) -> TxResult<String> {
    lexer.bump(); // '{'
    let start = lexer.pos;
    while let Some(c) = lexer.peek() {
        if c == '}' {
            let text = lexer.input[start..lexer.pos].to_string();
            lexer.bump();
            return Ok(text);
        }
        lexer.bump();
    }
    Err(TxIssue::invalid(format!(
        "Unterminated annotation in unit expression '{whole}'"
    )))
}

fn exponent(lexer: &mut Lexer) -> Option<i32> {
    let save = lexer.pos;
    let mut digits = String::new();
    if matches!(lexer.peek(), Some('+') | Some('-')) {
        digits.push(lexer.bump().unwrap());
    }
    while matches!(lexer.peek(), Some(c) if c.is_ascii_digit()) {
        digits.push(lexer.bump().unwrap());
    }
    match digits.parse::<i32>() {
        Ok(exp) if digits.chars().any(|c| c.is_ascii_digit()) => Some(exp),
        _ => {
            lexer.pos = save;
            None
        }
    }
}

/// One unit atom: an integer factor, a power of ten, or a (possibly
/// prefixed) unit symbol.
fn atom(lexer: &mut Lexer, whole: &str) -> TxResult<Parsed> {
    let rest = &lexer.input[lexer.pos..];

    // Powers of ten: 10* and 10^ take their exponent from the suffix.
    for marker in ["10*", "10^"] {
        if let Some(after) = rest.strip_prefix(marker) {
            lexer.pos += marker.len();
            let exp = if after.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+') {
                exponent(lexer).unwrap_or(1)
            } else {
                1
            };
            return Ok(Parsed {
                canonical: Canonical {
                    factor: 10f64.powi(exp),
                    dims: [0; DIMENSIONS],
                },
                human: format!("10^{exp}"),
            });
        }
    }

    // Integer factor.
    if rest.starts_with(|c: char| c.is_ascii_digit()) {
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        lexer.pos += digits.len();
        let value: f64 = digits
            .parse()
            .map_err(|_| TxIssue::invalid(format!("Invalid numeric factor in '{whole}'")))?;
        return Ok(Parsed {
            canonical: Canonical {
                factor: value,
                dims: [0; DIMENSIONS],
            },
            human: digits,
        });
    }

    // Longest-match unit symbol, bare or with a metric prefix. Longer
    // symbols win so that "mo" is month, not milli-something.
    let mut best: Option<(usize, Parsed)> = None;

    let mut consider = |symbol: &str, parsed: Parsed| {
        if rest.starts_with(symbol) {
            let len = symbol.len();
            if best.as_ref().map(|(l, _)| len > *l).unwrap_or(true) {
                best = Some((len, parsed));
            }
        }
    };

    for (i, code) in BASE_CODES.iter().enumerate() {
        let mut dims = [0i8; DIMENSIONS];
        dims[i] = 1;
        consider(
            code,
            Parsed {
                canonical: Canonical { factor: 1.0, dims },
                human: BASE_NAMES[i].to_string(),
            },
        );
    }
    for unit in UNITS {
        consider(
            unit.code,
            Parsed {
                canonical: Canonical {
                    factor: unit.factor,
                    dims: unit.dims,
                },
                human: unit.name.to_string(),
            },
        );
    }
    // Prefixed forms.
    for (prefix, prefix_name, power) in PREFIXES {
        if !rest.starts_with(prefix) {
            continue;
        }
        let after = &rest[prefix.len()..];
        for (i, code) in BASE_CODES.iter().enumerate() {
            if after.starts_with(code) {
                let mut dims = [0i8; DIMENSIONS];
                dims[i] = 1;
                consider_prefixed(
                    &mut best,
                    prefix.len() + code.len(),
                    Parsed {
                        canonical: Canonical {
                            factor: 10f64.powi(*power),
                            dims,
                        },
                        human: format!("{prefix_name}{}", BASE_NAMES[i]),
                    },
                );
            }
        }
        for unit in UNITS.iter().filter(|u| u.metric) {
            if after.starts_with(unit.code) {
                consider_prefixed(
                    &mut best,
                    prefix.len() + unit.code.len(),
                    Parsed {
                        canonical: Canonical {
                            factor: unit.factor * 10f64.powi(*power),
                            dims: unit.dims,
                        },
                        human: format!("{prefix_name}{}", unit.name),
                    },
                );
            }
        }
    }

    match best {
        Some((len, parsed)) => {
            lexer.pos += len;
            Ok(parsed)
        }
        None => Err(TxIssue::invalid(format!(
            "Unknown unit symbol at offset {} in '{whole}'",
            lexer.pos
        ))),
    }
}

fn consider_prefixed(best: &mut Option<(usize, Parsed)>, len: usize, parsed: Parsed) {
    if best.as_ref().map(|(l, _)| len > *l).unwrap_or(true) {
        *best = Some((len, parsed));
    }
}
