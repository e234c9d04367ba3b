//! Claim-level contradiction detection
//!
//! A claim is an (entity, predicate, value) triple pulled from one sentence:
//! the entity is the capitalized run closest before a known predicate verb,
//! the value is the first date or percentage in the sentence. Two sources
//! contradict when they make claims with the same entity, predicate and
//! value kind but incompatible values.

use regex_lite::Regex;
use researchforge_common::models::Source;
use std::sync::OnceLock;

const MONTHS: &str = "jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";

/// Capitalized words that never start an entity
const NON_ENTITY: &[&str] = &[
    "the", "a", "an", "in", "on", "at", "by", "for", "according", "its", "it", "this", "that",
    "these", "those", "after", "before", "during", "since", "when", "while", "however", "also",
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "monday", "tuesday", "wednesday", "thursday", "friday",
    "saturday", "sunday",
];

/// (stem, canonical predicate)
const PREDICATES: &[(&str, &str)] = &[
    ("launch", "launched"),
    ("releas", "released"),
    ("found", "founded"),
    ("establish", "founded"),
    ("creat", "founded"),
    ("announc", "announced"),
    ("publish", "published"),
    ("achiev", "achieved"),
    ("reach", "reached"),
    ("occur", "occurred"),
    ("began", "began"),
    ("begin", "began"),
    ("start", "began"),
    ("complet", "completed"),
    ("finish", "completed"),
    ("born", "born"),
    ("die", "died"),
    ("open", "opened"),
    ("sign", "signed"),
    ("discover", "discovered"),
    ("invent", "discovered"),
    ("introduc", "introduced"),
    ("debut", "introduced"),
    ("rose", "changed"),
    ("fell", "changed"),
    ("grew", "changed"),
    ("increas", "changed"),
    ("decreas", "changed"),
    ("declin", "changed"),
    ("account", "accounts for"),
];

const SUFFIXES: &[&str] = &["", "e", "s", "es", "ed", "d", "ing"];

struct Patterns {
    sentence: Regex,
    iso_date: Regex,
    month_day_year: Regex,
    day_month_year: Regex,
    month_year: Regex,
    year: Regex,
    percent: Regex,
}

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| {
        let build = |p: &str| Regex::new(p).expect("valid regex");
        Patterns {
            sentence: build(r"[.!?]+\s+|\n+"),
            iso_date: build(r"\b(\d{4})-(\d{2})-(\d{2})\b"),
            month_day_year: build(&format!(
                r"(?i)\b({})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b",
                MONTHS
            )),
            day_month_year: build(&format!(r"(?i)\b(\d{{1,2}})\s+({})\.?,?\s+(\d{{4}})\b", MONTHS)),
            month_year: build(&format!(r"(?i)\b({})\.?,?\s+(\d{{4}})\b", MONTHS)),
            year: build(r"\b(1[89]\d{2}|20\d{2})\b"),
            percent: build(r"(?i)(\d+(?:\.\d+)?)\s*(?:%|percent\b)"),
        }
    })
}

/// Calendar value with optional precision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateValue {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl DateValue {
    /// Dates conflict only where both carry the differing component
    fn conflicts_with(&self, other: &DateValue) -> bool {
        if self.year != other.year {
            return true;
        }
        match (self.month, other.month) {
            (Some(a), Some(b)) if a != b => true,
            (Some(_), Some(_)) => matches!((self.day, other.day), (Some(a), Some(b)) if a != b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClaimValue {
    Date(DateValue),
    Percent(f64),
}

impl ClaimValue {
    fn same_kind(&self, other: &ClaimValue) -> bool {
        matches!(
            (self, other),
            (ClaimValue::Date(_), ClaimValue::Date(_)) | (ClaimValue::Percent(_), ClaimValue::Percent(_))
        )
    }

    fn conflicts_with(&self, other: &ClaimValue) -> bool {
        match (self, other) {
            (ClaimValue::Date(a), ClaimValue::Date(b)) => a.conflicts_with(b),
            (ClaimValue::Percent(a), ClaimValue::Percent(b)) => (a - b).abs() > 0.5,
            _ => false,
        }
    }
}

/// One extracted claim
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    /// Zero-based position of the source in the ranked list
    pub source: usize,
    pub entity: String,
    pub predicate: &'static str,
    pub value: ClaimValue,
    /// Value as written in the text
    pub raw: String,
}

/// Two claims that cannot both be true
#[derive(Debug, Clone, PartialEq)]
pub struct Contradiction {
    pub first: Claim,
    pub second: Claim,
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    let prefix: String = lower.chars().take(3).collect();
    let index = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ]
    .iter()
    .position(|m| *m == prefix)?;
    Some(index as u32 + 1)
}

fn find_date(sentence: &str) -> Option<(DateValue, String)> {
    let p = patterns();
    if let Some(c) = p.iso_date.captures(sentence) {
        return Some((
            DateValue {
                year: c[1].parse().ok()?,
                month: c[2].parse().ok(),
                day: c[3].parse().ok(),
            },
            c[0].to_string(),
        ));
    }
    if let Some(c) = p.month_day_year.captures(sentence) {
        return Some((
            DateValue {
                year: c[3].parse().ok()?,
                month: month_number(&c[1]),
                day: c[2].parse().ok(),
            },
            c[0].to_string(),
        ));
    }
    if let Some(c) = p.day_month_year.captures(sentence) {
        return Some((
            DateValue {
                year: c[3].parse().ok()?,
                month: month_number(&c[2]),
                day: c[1].parse().ok(),
            },
            c[0].to_string(),
        ));
    }
    if let Some(c) = p.month_year.captures(sentence) {
        return Some((
            DateValue {
                year: c[2].parse().ok()?,
                month: month_number(&c[1]),
                day: None,
            },
            c[0].to_string(),
        ));
    }
    let c = p.year.captures(sentence)?;
    Some((
        DateValue {
            year: c[1].parse().ok()?,
            month: None,
            day: None,
        },
        c[0].to_string(),
    ))
}

fn find_value(sentence: &str) -> Option<(ClaimValue, String)> {
    if let Some(c) = patterns().percent.captures(sentence) {
        if let Ok(v) = c[1].parse::<f64>() {
            return Some((ClaimValue::Percent(v), c[0].to_string()));
        }
    }
    find_date(sentence).map(|(d, raw)| (ClaimValue::Date(d), raw))
}

fn predicate_of(word: &str) -> Option<&'static str> {
    PREDICATES.iter().find_map(|(stem, canonical)| {
        let rest = word.strip_prefix(stem)?;
        SUFFIXES.contains(&rest).then_some(*canonical)
    })
}

fn is_entity_word(word: &str) -> bool {
    let starts_upper = word.chars().next().is_some_and(|c| c.is_uppercase());
    starts_upper && !NON_ENTITY.contains(&word.to_lowercase().as_str())
}

/// Extract (entity, predicate) from a sentence: the capitalized run
/// nearest before the first predicate word
fn subject_and_predicate(sentence: &str) -> Option<(String, &'static str)> {
    let mut runs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for raw in sentence.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
        if word.is_empty() {
            continue;
        }
        if let Some(predicate) = predicate_of(&word.to_lowercase()) {
            if !current.is_empty() {
                runs.push(current.join(" "));
            }
            return runs.pop().map(|entity| (entity, predicate));
        }

        if is_entity_word(word) {
            current.push(word);
            if raw.ends_with([',', ';', ':']) {
                runs.push(current.join(" "));
                current.clear();
            }
        } else if !current.is_empty() {
            runs.push(current.join(" "));
            current.clear();
        }
    }
    None
}

/// Extract every claim from the evidence text of `sources`
pub fn extract_claims(sources: &[Source]) -> Vec<Claim> {
    let mut claims = Vec::new();
    for (index, source) in sources.iter().enumerate() {
        for sentence in patterns().sentence.split(source.evidence()) {
            let Some((entity, predicate)) = subject_and_predicate(sentence) else {
                continue;
            };
            let Some((value, raw)) = find_value(sentence) else {
                continue;
            };
            claims.push(Claim {
                source: index,
                entity,
                predicate,
                value,
                raw,
            });
        }
    }
    claims
}

fn same_entity(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    a == b || a.ends_with(&format!(" {}", b)) || b.ends_with(&format!(" {}", a))
}

/// Pairs of conflicting claims across different sources, one per
/// (source pair, entity, predicate)
pub fn detect(sources: &[Source]) -> Vec<Contradiction> {
    let claims = extract_claims(sources);
    let mut found: Vec<Contradiction> = Vec::new();

    for (i, a) in claims.iter().enumerate() {
        for b in &claims[i + 1..] {
            if a.source == b.source
                || a.predicate != b.predicate
                || !a.value.same_kind(&b.value)
                || !same_entity(&a.entity, &b.entity)
                || !a.value.conflicts_with(&b.value)
            {
                continue;
            }
            let duplicate = found.iter().any(|c| {
                c.first.source == a.source
                    && c.second.source == b.source
                    && c.first.predicate == a.predicate
                    && same_entity(&c.first.entity, &a.entity)
            });
            if !duplicate {
                found.push(Contradiction {
                    first: a.clone(),
                    second: b.clone(),
                });
            }
        }
    }
    found
}

/// Why `higher` outranks `lower`
fn weighting_reason(higher: &Source, lower: &Source) -> String {
    match (&higher.score, &lower.score) {
        (Some(h), Some(l)) if (h.reliability - l.reliability).abs() > 0.05 => {
            format!("higher reliability ({:.2} vs {:.2})", h.reliability, l.reliability)
        }
        (Some(h), Some(l)) if (h.recency - l.recency).abs() > 0.05 => {
            format!("more recent coverage (recency {:.2} vs {:.2})", h.recency, l.recency)
        }
        (Some(_), None) => "it was assessed while the other source could not be".to_string(),
        _ => match (higher.published_date, lower.published_date) {
            (Some(h), Some(l)) if h > l => "it was published more recently".to_string(),
            _ => "comparable reliability, ranked earlier by relevance".to_string(),
        },
    }
}

/// Human-readable report naming both sources of every conflict
pub fn describe(contradictions: &[Contradiction], sources: &[Source]) -> Option<String> {
    let lines: Vec<String> = contradictions
        .iter()
        .filter_map(|c| {
            let first = sources.get(c.first.source)?;
            let second = sources.get(c.second.source)?;
            Some(format!(
                "{} {}: Source {} ({}) says \"{}\" while Source {} ({}) says \"{}\". \
                 Source {} is weighted higher: {}.",
                c.first.entity,
                c.first.predicate,
                c.first.source + 1,
                first.name,
                c.first.raw,
                c.second.source + 1,
                second.name,
                c.second.raw,
                c.first.source + 1,
                weighting_reason(first, second)
            ))
        })
        .collect();

    (!lines.is_empty()).then(|| lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use researchforge_common::models::{ContentScore, SourceType};

    fn source(name: &str, text: &str, reliability: Option<f64>) -> Source {
        Source {
            name: name.into(),
            url: format!("https://{}.example", name.to_lowercase()),
            snippet: String::new(),
            summarized_content: Some(text.into()),
            source_type: SourceType::Web,
            published_date: None,
            score: reliability.map(|r| ContentScore {
                reliability: r,
                ..ContentScore::neutral("")
            }),
        }
    }

    #[test]
    fn test_conflicting_dates_are_reported_with_both_names() {
        let sources = vec![
            source("Alpha", "The ITER project was founded in 2006. It is based in France.", Some(0.9)),
            source("Beta", "Officially, ITER was founded in 2007 by seven members.", Some(0.4)),
        ];

        let found = detect(&sources);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].first.entity, "ITER");

        let report = describe(&found, &sources).unwrap();
        assert!(report.contains("Alpha"));
        assert!(report.contains("Beta"));
        assert!(report.contains("higher reliability"));
    }

    #[test]
    fn test_precision_differences_are_not_conflicts() {
        let sources = vec![
            source("Alpha", "SpaceX launched Starship in March 2023.", None),
            source("Beta", "SpaceX launched Starship on March 14, 2023.", None),
        ];
        assert!(detect(&sources).is_empty());
    }

    #[test]
    fn test_same_source_never_contradicts_itself() {
        let sources = vec![source(
            "Alpha",
            "Tesla opened the factory in 2019. Tesla opened the factory in 2020.",
            None,
        )];
        assert!(detect(&sources).is_empty());
    }

    #[test]
    fn test_percent_claims() {
        let sources = vec![
            source("Alpha", "Solar accounts for 12% of generation.", None),
            source("Beta", "According to the agency, Solar accounts for 18 percent of generation.", None),
        ];
        let found = detect(&sources);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].second.raw, "18 percent");
    }

    #[test]
    fn test_entity_requires_predicate() {
        assert_eq!(
            subject_and_predicate("According to Reuters, SpaceX launched Starship"),
            Some(("SpaceX".to_string(), "launched"))
        );
        assert_eq!(subject_and_predicate("Nothing capitalized happens here"), None);
    }
}
