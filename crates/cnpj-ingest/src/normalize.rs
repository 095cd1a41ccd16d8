//! Record normalizer
//!
//! Pure conversion of raw source fields into typed values. Nothing here
//! fails: a field that cannot be coerced becomes [`Value::Null`] and the rest
//! of the record is kept.
//!
//! The SQL conversion pass in [`crate::sql`] implements the same rules, so a
//! file produces the same rows whether it goes through the bulk path or the
//! row-by-row fallback.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::schema::{ColumnType, TableSpec};

/// Characters stripped from both ends of every field
pub const WHITESPACE: &[char] = &[' ', '\t', '\n', '\r', '\u{0b}', '\u{0c}'];

/// Earliest and latest year accepted in a date field
pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 2100;

/// Integer digits allowed in a currency amount, keeping cents inside `i64`
/// and the value inside `NUMERIC(18,2)`
pub const MAX_CURRENCY_INTEGER_DIGITS: usize = 16;

/// A typed field value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Text(String),
    Date(NaiveDate),
    /// Currency in cents
    MinorUnits(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Render back to source-compatible text for a staging table
    ///
    /// Dates become `YYYYMMDD` and amounts `1234.56`, so the conversion pass
    /// reproduces the same value when it reads the staging row.
    pub fn to_staging_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            Value::Date(d) => Some(format!("{:04}{:02}{:02}", d.year(), d.month(), d.day())),
            Value::MinorUnits(cents) => Some(format!("{}.{:02}", cents / 100, cents % 100)),
        }
    }
}

/// Typed values aligned to a [`TableSpec`], one per column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NormalizedRecord {
    values: Vec<Value>,
}

impl NormalizedRecord {
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, ordinal: usize) -> Option<&Value> {
        self.values.get(ordinal)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Staging text for each column, `None` for null
    pub fn staging_fields(&self) -> Vec<Option<String>> {
        self.values.iter().map(Value::to_staging_text).collect()
    }
}

/// Normalize one raw record against its table
///
/// Fields are taken by column ordinal; a missing field is null and fields
/// past the last column are ignored, so the result always has exactly
/// `spec.width()` values.
pub fn normalize_record<S: AsRef<str>>(fields: &[S], spec: &TableSpec) -> NormalizedRecord {
    let values = spec
        .columns()
        .iter()
        .map(|column| match fields.get(column.ordinal) {
            Some(raw) => normalize_value(raw.as_ref(), column.kind),
            None => Value::Null,
        })
        .collect();

    NormalizedRecord { values }
}

pub fn normalize_value(raw: &str, kind: ColumnType) -> Value {
    match kind {
        ColumnType::Code { width } => normalize_code(raw, width).map_or(Value::Null, Value::Text),
        ColumnType::Text { max_len } => {
            normalize_text(raw, max_len).map_or(Value::Null, Value::Text)
        },
        ColumnType::Date => normalize_date(raw).map_or(Value::Null, Value::Date),
        ColumnType::Currency => normalize_currency(raw).map_or(Value::Null, Value::MinorUnits),
    }
}

fn clean(raw: &str) -> std::borrow::Cow<'_, str> {
    if raw.contains('\0') {
        std::borrow::Cow::Owned(raw.replace('\0', ""))
    } else {
        std::borrow::Cow::Borrowed(raw)
    }
}

fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Fixed-width code: stripped, cut to `width` characters, left-padded with `0`
///
/// `normalize_code(normalize_code(x, w), w) == normalize_code(x, w)`.
pub fn normalize_code(raw: &str, width: usize) -> Option<String> {
    let cleaned = clean(raw);
    let cut = take_chars(cleaned.trim_matches(WHITESPACE), width).trim_end_matches(WHITESPACE);
    if cut.is_empty() {
        return None;
    }
    Some(format!("{:0>width$}", cut, width = width))
}

/// Free text: stripped, empty to null, cut to `max_len` characters
pub fn normalize_text(raw: &str, max_len: Option<usize>) -> Option<String> {
    let cleaned = clean(raw);
    let trimmed = cleaned.trim_matches(WHITESPACE);
    let cut = match max_len {
        Some(max) => take_chars(trimmed, max).trim_end_matches(WHITESPACE),
        None => trimmed,
    };
    if cut.is_empty() {
        None
    } else {
        Some(cut.to_string())
    }
}

/// `YYYYMMDD` to a calendar date
///
/// Null for blanks, `00000000`, anything marked `BC`, years outside
/// 1900..=2100, and triples that are not real dates such as `20230230`.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let cleaned = clean(raw);
    let s = cleaned.trim_matches(WHITESPACE);

    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let year: i32 = s[0..4].parse().ok()?;
    let month: u32 = s[4..6].parse().ok()?;
    let day: u32 = s[6..8].parse().ok()?;

    if !(MIN_YEAR..=MAX_YEAR).contains(&year) || !(1..=12).contains(&month) || !(1..=31).contains(&day)
    {
        return None;
    }

    NaiveDate::from_ymd_opt(year, month, day)
}

/// Decimal amount to cents
///
/// The last `,` or `.` is the decimal separator and any earlier separator is
/// a thousands mark, so `"1.234,56"` and `"1234,56"` are both 123456. Extra
/// fraction digits are truncated. Negative or non-numeric input is null.
pub fn normalize_currency(raw: &str) -> Option<i64> {
    let cleaned = clean(raw);
    let s = cleaned.trim_matches(WHITESPACE);

    let is_separator = |c: char| c == ',' || c == '.';
    if !s.chars().all(|c| c.is_ascii_digit() || is_separator(c))
        || !s.chars().any(|c| c.is_ascii_digit())
    {
        return None;
    }

    let (integer, fraction) = match s.rfind(is_separator) {
        Some(idx) => (&s[..idx], &s[idx + 1..]),
        None => (s, ""),
    };

    let integer: String = integer.chars().filter(char::is_ascii_digit).collect();
    let integer = integer.trim_start_matches('0');
    if integer.len() > MAX_CURRENCY_INTEGER_DIGITS {
        return None;
    }

    let whole: i64 = if integer.is_empty() { 0 } else { integer.parse().ok()? };
    let cents: i64 = format!("{:0<2}", take_chars(fraction, 2)).parse().ok()?;

    whole.checked_mul(100)?.checked_add(cents)
}

/// 14-digit CNPJ from its company-group, branch and check-digit parts
pub fn full_cnpj(basico: &str, ordem: &str, dv: &str) -> Option<String> {
    Some(format!(
        "{}{}{}",
        normalize_code(basico, 8)?,
        normalize_code(ordem, 4)?,
        normalize_code(dv, 2)?
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::{SchemaRegistry, TableKind};
    use proptest::prelude::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_code_padding_and_truncation() {
        assert_eq!(normalize_code("123", 8).as_deref(), Some("00000123"));
        assert_eq!(normalize_code("  41 ", 2).as_deref(), Some("41"));
        assert_eq!(normalize_code("1\u{0}2", 4).as_deref(), Some("0012"));
        assert_eq!(normalize_code("123456789", 8).as_deref(), Some("12345678"));
        assert_eq!(normalize_code("", 8), None);
        assert_eq!(normalize_code(" \u{0} ", 8), None);
    }

    #[test]
    fn test_code_cut_never_leaves_trailing_space() {
        assert_eq!(normalize_code("12 345", 3).as_deref(), Some("012"));
    }

    #[test]
    fn test_text_rules() {
        assert_eq!(normalize_text("  ACME LTDA \u{0}", Some(200)).as_deref(), Some("ACME LTDA"));
        assert_eq!(normalize_text("   ", Some(10)), None);
        assert_eq!(normalize_text("SÃO PAULO", Some(3)).as_deref(), Some("SÃO"));
        assert_eq!(normalize_text("AB CD", Some(3)).as_deref(), Some("AB"));
        assert_eq!(normalize_text("6201501,6202300", None).as_deref(), Some("6201501,6202300"));
    }

    #[test]
    fn test_date_rules() {
        assert_eq!(normalize_date("20230115"), Some(ymd(2023, 1, 15)));
        assert_eq!(normalize_date(" 19000101 "), Some(ymd(1900, 1, 1)));
        assert_eq!(normalize_date("21001231"), Some(ymd(2100, 12, 31)));
        assert_eq!(normalize_date("20240229"), Some(ymd(2024, 2, 29)));

        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("00000000"), None);
        assert_eq!(normalize_date("00000000 BC"), None);
        assert_eq!(normalize_date("18991231"), None);
        assert_eq!(normalize_date("21010101"), None);
        assert_eq!(normalize_date("20231301"), None);
        assert_eq!(normalize_date("20230100"), None);
        assert_eq!(normalize_date("20230132"), None);
        assert_eq!(normalize_date("20230230"), None);
        assert_eq!(normalize_date("20230229"), None);
        assert_eq!(normalize_date("2023-01-15"), None);
        assert_eq!(normalize_date("15/01/2023"), None);
    }

    #[test]
    fn test_currency_rules() {
        assert_eq!(normalize_currency("1.234,56"), Some(123_456));
        assert_eq!(normalize_currency("1234,56"), Some(123_456));
        assert_eq!(normalize_currency("1234.56"), Some(123_456));
        assert_eq!(normalize_currency("1,234.56"), Some(123_456));
        assert_eq!(normalize_currency("000000010000,00"), Some(1_000_000));
        assert_eq!(normalize_currency("5000"), Some(500_000));
        assert_eq!(normalize_currency("10,5"), Some(1_050));
        assert_eq!(normalize_currency(",99"), Some(99));
        assert_eq!(normalize_currency("1,999"), Some(199));

        assert_eq!(normalize_currency(""), None);
        assert_eq!(normalize_currency(","), None);
        assert_eq!(normalize_currency("-10,00"), None);
        assert_eq!(normalize_currency("R$ 10,00"), None);
        assert_eq!(normalize_currency("12345678901234567,00"), None);
        assert_eq!(normalize_currency("9999999999999999,99"), Some(999_999_999_999_999_999));
    }

    #[test]
    fn test_full_cnpj() {
        assert_eq!(full_cnpj("191", "1", "91").as_deref(), Some("00000191000191"));
        assert_eq!(full_cnpj("33000167", "0001", "").as_deref(), None);
    }

    #[test]
    fn test_short_company_row_pads_with_nulls() {
        let registry = SchemaRegistry::cnpj();
        let spec = registry.get(TableKind::Empresas).unwrap();
        let record = normalize_record(&["123", "ACME"], spec);

        assert_eq!(record.len(), 7);
        assert_eq!(record.get(0), Some(&Value::Text("00000123".into())));
        assert_eq!(record.get(1), Some(&Value::Text("ACME".into())));
        assert!(record.values()[2..].iter().all(Value::is_null));
    }

    #[test]
    fn test_record_typed_values() {
        let registry = SchemaRegistry::cnpj();
        let spec = registry.get(TableKind::Simples).unwrap();
        let record = normalize_record(
            &["12345678", "S", "20070701", "00000000", "N", "20090701", "20091231 BC"],
            spec,
        );

        assert_eq!(record.get(2), Some(&Value::Date(ymd(2007, 7, 1))));
        assert_eq!(record.get(3), Some(&Value::Null));
        assert_eq!(record.get(5), Some(&Value::Date(ymd(2009, 7, 1))));
        assert_eq!(record.get(6), Some(&Value::Null));
    }

    #[test]
    fn test_staging_text_reproduces_value() {
        let cases = [
            (Value::Date(ymd(2001, 2, 3)), ColumnType::Date),
            (Value::MinorUnits(123_456), ColumnType::Currency),
            (Value::MinorUnits(7), ColumnType::Currency),
            (Value::Text("0042".into()), ColumnType::code(4)),
        ];
        for (value, kind) in cases {
            let text = value.to_staging_text().unwrap();
            assert_eq!(normalize_value(&text, kind), value, "{}", text);
        }
        assert_eq!(Value::Null.to_staging_text(), None);
    }

    proptest! {
        #[test]
        fn prop_code_is_idempotent(raw in "\\PC{0,12}", width in 1usize..10) {
            let once = normalize_code(&raw, width);
            let twice = once.as_deref().and_then(|c| normalize_code(c, width));
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_code_has_exact_width(raw in "[0-9 ]{0,12}", width in 1usize..10) {
            if let Some(code) = normalize_code(&raw, width) {
                prop_assert_eq!(code.chars().count(), width);
            }
        }

        #[test]
        fn prop_real_dates_round_trip(y in MIN_YEAR..=MAX_YEAR, m in 1u32..=12, d in 1u32..=31) {
            let raw = format!("{:04}{:02}{:02}", y, m, d);
            prop_assert_eq!(normalize_date(&raw), NaiveDate::from_ymd_opt(y, m, d));
        }

        #[test]
        fn prop_out_of_range_years_are_null(y in 0i32..=9999, m in 1u32..=12, d in 1u32..=28) {
            prop_assume!(!(MIN_YEAR..=MAX_YEAR).contains(&y));
            let raw = format!("{:04}{:02}{:02}", y, m, d);
            prop_assert_eq!(normalize_date(&raw), None);
        }

        #[test]
        fn prop_bc_marker_is_null(prefix in "[0-9 ]{0,8}", suffix in "[0-9 ]{0,4}") {
            let raw = format!("{}BC{}", prefix, suffix);
            prop_assert_eq!(normalize_date(&raw), None);
        }

        #[test]
        fn prop_currency_never_negative(raw in "-?[0-9.,]{0,20}") {
            if let Some(cents) = normalize_currency(&raw) {
                prop_assert!(cents >= 0);
            }
        }
    }
}
