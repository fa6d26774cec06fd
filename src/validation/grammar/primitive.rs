//! Lexical grammar of FHIR primitive types in JSON.

use chrono::{DateTime, NaiveDate, NaiveTime};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

use crate::types::Severity;

static ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-\.]{1,64}$").unwrap());
static CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^\s]+( [^\s]+)*$").unwrap());
static OID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^urn:oid:[0-2](\.(0|[1-9][0-9]*))+$").unwrap());
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^urn:uuid:[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});
static BASE64_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*([0-9a-zA-Z+/=]){4}\s*)+$").unwrap());
static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").unwrap());
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})(?:-(\d{2})(?:-(\d{2}))?)?$").unwrap());
static DATE_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})(?:-(\d{2})(?:-(\d{2})(?:T(\d{2}):(\d{2}):(\d{2})(?:\.\d{1,9})?(Z|[+-](\d{2}):(\d{2})))?)?)?$",
    )
    .unwrap()
});
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2}):(\d{2}):(\d{2})(?:\.\d{1,9})?$").unwrap());

/// One lexical problem with a primitive value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveIssue {
    pub code: &'static str,
    pub severity: Severity,
    pub message: String,
}

impl PrimitiveIssue {
    fn error(code: &'static str, message: String) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message,
        }
    }
}

/// How string content is judged.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextPolicy {
    /// The element is declared as multi-line text.
    pub long_text: bool,
    pub flag_line_breaks: bool,
}

/// Checks `value` against the JSON grammar of `type_code`.
pub fn check_primitive(
    type_code: &str,
    value: &JsonValue,
    policy: TextPolicy,
) -> Vec<PrimitiveIssue> {
    match type_code {
        "boolean" => expect(value.is_boolean(), type_code, value),
        "decimal" => expect(value.is_number(), type_code, value),
        "integer" => check_integer(value, i64::from(i32::MIN), type_code),
        "unsignedInt" => check_integer(value, 0, type_code),
        "positiveInt" => check_integer(value, 1, type_code),
        "integer64" => check_integer64(value),
        _ => match value.as_str() {
            Some(text) => check_text(type_code, text, policy),
            None => expect(false, type_code, value),
        },
    }
}

fn expect(ok: bool, type_code: &str, value: &JsonValue) -> Vec<PrimitiveIssue> {
    if ok {
        return Vec::new();
    }
    vec![PrimitiveIssue::error(
        "INVALID_PRIMITIVE_TYPE",
        format!("Expected a JSON value of FHIR type '{type_code}', found {}", json_kind(value)),
    )]
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

fn check_integer(value: &JsonValue, min: i64, type_code: &str) -> Vec<PrimitiveIssue> {
    let JsonValue::Number(number) = value else {
        return expect(false, type_code, value);
    };
    let Some(n) = number.as_i64() else {
        if number.is_u64() {
            return vec![out_of_range(type_code, &number.to_string())];
        }
        return vec![PrimitiveIssue::error(
            "INVALID_PRIMITIVE_TYPE",
            format!("Value {number} is not a whole number as required by '{type_code}'"),
        )];
    };
    if n < min || n > i64::from(i32::MAX) {
        return vec![out_of_range(type_code, &n.to_string())];
    }
    Vec::new()
}

fn check_integer64(value: &JsonValue) -> Vec<PrimitiveIssue> {
    let valid = match value {
        JsonValue::String(s) => s.parse::<i64>().is_ok(),
        JsonValue::Number(n) => n.is_i64(),
        _ => false,
    };
    expect(valid, "integer64", value)
}

fn out_of_range(type_code: &str, literal: &str) -> PrimitiveIssue {
    PrimitiveIssue::error(
        "INVALID_NUMBER_RANGE",
        format!("Value {literal} is outside the range of '{type_code}'"),
    )
}

fn check_text(type_code: &str, text: &str, policy: TextPolicy) -> Vec<PrimitiveIssue> {
    if text.trim().is_empty() {
        return vec![PrimitiveIssue::error(
            "EMPTY_VALUE",
            "String values must contain non-whitespace content".to_string(),
        )];
    }

    match type_code {
        "string" => check_free_text(text, policy, true),
        "markdown" => check_free_text(text, policy, false),
        "xhtml" => Vec::new(),
        "id" => check_token(text, &ID_RE, "INVALID_ID", "an id (1-64 of A-Z a-z 0-9 - .)"),
        "code" => check_token(
            text,
            &CODE_RE,
            "INVALID_CODE",
            "a code (no leading, trailing or repeated whitespace)",
        ),
        "oid" => check_token(text, &OID_RE, "INVALID_OID", "an OID (urn:oid:...)"),
        "uuid" => check_token(
            text,
            &UUID_RE,
            "INVALID_UUID",
            "a lowercase UUID URN (urn:uuid:...)",
        ),
        "base64Binary" => check_token(text, &BASE64_RE, "INVALID_BASE64", "base64 content"),
        "uri" => check_uri(text, false),
        "url" => check_uri(text, true),
        "canonical" => check_canonical(text),
        "date" => check_temporal(text, valid_date(text), "date"),
        "dateTime" => check_temporal(text, valid_date_time(text), "dateTime"),
        "instant" => check_temporal(text, valid_instant(text), "instant"),
        "time" => check_temporal(text, valid_time(text), "time"),
        _ => Vec::new(),
    }
}

fn is_forbidden_control(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n' | '\r')
}

fn check_free_text(text: &str, policy: TextPolicy, short_text: bool) -> Vec<PrimitiveIssue> {
    let mut issues = Vec::new();
    if let Some(c) = text.chars().find(|c| is_forbidden_control(*c)) {
        issues.push(PrimitiveIssue::error(
            "INVALID_CONTROL_CHARACTER",
            format!("Text contains control character U+{:04X}", c as u32),
        ));
    }
    if short_text && !policy.long_text && policy.flag_line_breaks && text.contains(['\n', '\r']) {
        issues.push(PrimitiveIssue {
            code: "INVALID_LINE_BREAK",
            severity: Severity::Warning,
            message: "Line breaks are not expected in a short text field".to_string(),
        });
    }
    issues
}

fn check_token(text: &str, re: &Regex, code: &'static str, expected: &str) -> Vec<PrimitiveIssue> {
    if let Some(c) = text.chars().find(|c| c.is_control()) {
        return vec![PrimitiveIssue::error(
            "INVALID_CONTROL_CHARACTER",
            format!("Token contains control character U+{:04X}", c as u32),
        )];
    }
    if re.is_match(text) {
        return Vec::new();
    }
    vec![PrimitiveIssue::error(code, format!("'{text}' is not {expected}"))]
}

fn check_uri(text: &str, absolute_only: bool) -> Vec<PrimitiveIssue> {
    if let Some(c) = text.chars().find(|c| c.is_control()) {
        return vec![PrimitiveIssue::error(
            "INVALID_CONTROL_CHARACTER",
            format!("URI contains control character U+{:04X}", c as u32),
        )];
    }
    let invalid = |reason: &str| {
        vec![PrimitiveIssue::error(
            "INVALID_URI",
            format!("'{text}' {reason}"),
        )]
    };

    if text.chars().any(char::is_whitespace) {
        return invalid("contains whitespace");
    }
    if SCHEME_RE.is_match(text) {
        if let Err(e) = url::Url::parse(text) {
            return invalid(&format!("is not a valid absolute URI: {e}"));
        }
    } else if absolute_only {
        return invalid("is not an absolute URL");
    }
    Vec::new()
}

fn check_canonical(text: &str) -> Vec<PrimitiveIssue> {
    match text.split_once('|') {
        Some((_, "")) => vec![PrimitiveIssue::error(
            "INVALID_URI",
            format!("'{text}' has an empty version after '|'"),
        )],
        Some((uri, _)) => check_uri(uri, false),
        None => check_uri(text, false),
    }
}

fn check_temporal(text: &str, valid: bool, type_code: &str) -> Vec<PrimitiveIssue> {
    if valid {
        return Vec::new();
    }
    vec![PrimitiveIssue::error(
        "INVALID_DATE_TIME",
        format!("'{text}' is not a valid FHIR {type_code}"),
    )]
}

fn valid_calendar(year: &str, month: Option<&str>, day: Option<&str>) -> bool {
    let (Ok(year), month, day) = (
        year.parse::<i32>(),
        month.map(str::parse::<u32>),
        day.map(str::parse::<u32>),
    ) else {
        return false;
    };
    match (month, day) {
        (None, _) => true,
        (Some(Ok(m)), None) => (1..=12).contains(&m),
        (Some(Ok(m)), Some(Ok(d))) => NaiveDate::from_ymd_opt(year, m, d).is_some(),
        _ => false,
    }
}

pub fn valid_date(text: &str) -> bool {
    DATE_RE.captures(text).is_some_and(|c| {
        valid_calendar(
            &c[1],
            c.get(2).map(|m| m.as_str()),
            c.get(3).map(|m| m.as_str()),
        )
    })
}

pub fn valid_date_time(text: &str) -> bool {
    let Some(c) = DATE_TIME_RE.captures(text) else {
        return false;
    };
    if !valid_calendar(
        &c[1],
        c.get(2).map(|m| m.as_str()),
        c.get(3).map(|m| m.as_str()),
    ) {
        return false;
    }
    let Some(hour) = c.get(4) else {
        return true;
    };
    let clock = (
        hour.as_str().parse::<u32>(),
        c[5].parse::<u32>(),
        c[6].parse::<u32>(),
    );
    let (Ok(h), Ok(m), Ok(s)) = clock else {
        return false;
    };
    if NaiveTime::from_hms_opt(h, m, s).is_none() {
        return false;
    }
    match (c.get(8), c.get(9)) {
        (Some(oh), Some(om)) => {
            let (Ok(oh), Ok(om)) = (oh.as_str().parse::<u32>(), om.as_str().parse::<u32>()) else {
                return false;
            };
            oh <= 14 && om < 60
        }
        _ => true,
    }
}

pub fn valid_instant(text: &str) -> bool {
    text.contains('T') && valid_date_time(text) && DateTime::parse_from_rfc3339(text).is_ok()
}

pub fn valid_time(text: &str) -> bool {
    TIME_RE.captures(text).is_some_and(|c| {
        matches!(
            (c[1].parse::<u32>(), c[2].parse::<u32>(), c[3].parse::<u32>()),
            (Ok(h), Ok(m), Ok(s)) if NaiveTime::from_hms_opt(h, m, s).is_some()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codes(type_code: &str, value: JsonValue) -> Vec<&'static str> {
        check_primitive(
            type_code,
            &value,
            TextPolicy {
                long_text: false,
                flag_line_breaks: true,
            },
        )
        .into_iter()
        .map(|i| i.code)
        .collect()
    }

    #[test]
    fn test_json_shapes() {
        assert!(codes("boolean", json!(true)).is_empty());
        assert_eq!(codes("boolean", json!("true")), ["INVALID_PRIMITIVE_TYPE"]);
        assert_eq!(codes("string", json!(12)), ["INVALID_PRIMITIVE_TYPE"]);
        assert!(codes("decimal", json!(1.5)).is_empty());
        assert_eq!(codes("integer", json!(1.5)), ["INVALID_PRIMITIVE_TYPE"]);
    }

    #[test]
    fn test_integer_ranges() {
        assert!(codes("integer", json!(-5)).is_empty());
        assert_eq!(codes("integer", json!(3_000_000_000i64)), ["INVALID_NUMBER_RANGE"]);
        assert_eq!(codes("unsignedInt", json!(-1)), ["INVALID_NUMBER_RANGE"]);
        assert!(codes("unsignedInt", json!(0)).is_empty());
        assert_eq!(codes("positiveInt", json!(0)), ["INVALID_NUMBER_RANGE"]);
        assert!(codes("integer64", json!("9007199254740993")).is_empty());
        assert_eq!(codes("integer64", json!("12a")), ["INVALID_PRIMITIVE_TYPE"]);
    }

    #[test]
    fn test_tokens() {
        assert!(codes("id", json!("pat-1.a")).is_empty());
        assert_eq!(codes("id", json!("pat_1")), ["INVALID_ID"]);
        assert_eq!(codes("id", json!("x".repeat(65))), ["INVALID_ID"]);
        assert!(codes("code", json!("final draft")).is_empty());
        assert_eq!(codes("code", json!("final  draft")), ["INVALID_CODE"]);
        assert_eq!(codes("code", json!("fin\u{0007}al")), ["INVALID_CONTROL_CHARACTER"]);
        assert!(codes("oid", json!("urn:oid:1.2.840.10008")).is_empty());
        assert_eq!(codes("oid", json!("1.2.3")), ["INVALID_OID"]);
        assert!(codes("uuid", json!("urn:uuid:c757873d-ec9a-4326-a141-556f43239520")).is_empty());
        assert_eq!(codes("uuid", json!("urn:uuid:C757873D")), ["INVALID_UUID"]);
        assert!(codes("base64Binary", json!("aGVsbG8=")).is_empty());
        assert_eq!(codes("base64Binary", json!("not base64!")), ["INVALID_BASE64"]);
    }

    #[test]
    fn test_text_rules() {
        assert_eq!(codes("string", json!("")), ["EMPTY_VALUE"]);
        assert_eq!(codes("string", json!("two\nlines")), ["INVALID_LINE_BREAK"]);
        assert!(codes("markdown", json!("two\nlines")).is_empty());
        assert_eq!(codes("string", json!("bell\u{0007}")), ["INVALID_CONTROL_CHARACTER"]);

        let long = check_primitive(
            "string",
            &json!("two\nlines"),
            TextPolicy {
                long_text: true,
                flag_line_breaks: true,
            },
        );
        assert!(long.is_empty());

        let policy = TextPolicy {
            long_text: false,
            flag_line_breaks: true,
        };
        let issues = check_primitive("string", &json!("a\nb"), policy);
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn test_uris() {
        assert!(codes("uri", json!("http://loinc.org")).is_empty());
        assert!(codes("uri", json!("Patient/123")).is_empty());
        assert!(codes("uri", json!("urn:uuid:abc")).is_empty());
        assert_eq!(codes("uri", json!("http://exa mple.org")), ["INVALID_URI"]);
        assert_eq!(codes("url", json!("relative/path")), ["INVALID_URI"]);
        assert!(codes("canonical", json!("http://hl7.org/fhir/ValueSet/x|4.0.1")).is_empty());
        assert_eq!(codes("canonical", json!("http://hl7.org/fhir/ValueSet/x|")), ["INVALID_URI"]);
    }

    #[test]
    fn test_dates_and_times() {
        for ok in ["2024", "2024-02", "2024-02-29"] {
            assert!(valid_date(ok), "{ok}");
        }
        for bad in ["2023-02-29", "2024-13", "24-01-01", "2024-01-01T10:00:00Z"] {
            assert!(!valid_date(bad), "{bad}");
        }

        assert!(valid_date_time("2024-05-01T10:30:00+02:00"));
        assert!(valid_date_time("2024-05-01T10:30:00.123Z"));
        assert!(valid_date_time("2024-05"));
        assert!(!valid_date_time("2024-05-01T10:30:00"));
        assert!(!valid_date_time("2024-05-01T25:00:00Z"));
        assert!(!valid_date_time("2024-05-01T10:00:00+15:00"));

        assert!(valid_instant("2024-05-01T10:30:00Z"));
        assert!(!valid_instant("2024-05-01"));

        assert!(valid_time("23:59:59"));
        assert!(!valid_time("24:00:00"));
        assert_eq!(codes("dateTime", json!("yesterday")), ["INVALID_DATE_TIME"]);
    }
}
