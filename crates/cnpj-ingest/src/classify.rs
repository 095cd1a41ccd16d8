//! Row classifier
//!
//! Decides what to do with a record whose field count differs from the table
//! width. Rows are never discarded here; the class only drives repair and
//! statistics.

use serde::Serialize;

/// Disposition of one raw record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowClass {
    /// Exactly N fields
    Valid,
    /// More than N but within the 10% tolerance; trailing extras are dropped
    ValidWithExcess,
    /// Fewer than N fields; padded with empty fields
    Short,
    /// Beyond the tolerance; truncated to N
    Long,
}

impl RowClass {
    /// Eligible for the bulk path without repair
    pub fn is_bulk_eligible(self) -> bool {
        matches!(self, RowClass::Valid | RowClass::ValidWithExcess)
    }

    /// Counted as repaired in load statistics
    pub fn is_repaired(self) -> bool {
        !self.is_bulk_eligible()
    }
}

/// Upper bound of the excess tolerance, `ceil(1.1 * expected)`
pub fn excess_limit(expected: usize) -> usize {
    (expected * 11).div_ceil(10)
}

pub fn classify(field_count: usize, expected: usize) -> RowClass {
    if field_count == expected {
        RowClass::Valid
    } else if field_count < expected {
        RowClass::Short
    } else if field_count <= excess_limit(expected) {
        RowClass::ValidWithExcess
    } else {
        RowClass::Long
    }
}

/// Classify `fields` and force it to exactly `expected` entries
pub fn conform(fields: &mut Vec<String>, expected: usize) -> RowClass {
    let class = classify(fields.len(), expected);
    match class {
        RowClass::Valid => {},
        RowClass::Short => fields.resize(expected, String::new()),
        RowClass::ValidWithExcess | RowClass::Long => fields.truncate(expected),
    }
    class
}

/// Per-class tallies for a file or table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassCounts {
    pub valid: u64,
    pub valid_with_excess: u64,
    pub short: u64,
    pub long: u64,
}

impl ClassCounts {
    pub fn record(&mut self, class: RowClass) {
        match class {
            RowClass::Valid => self.valid += 1,
            RowClass::ValidWithExcess => self.valid_with_excess += 1,
            RowClass::Short => self.short += 1,
            RowClass::Long => self.long += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.valid + self.valid_with_excess + self.short + self.long
    }

    pub fn clean(&self) -> u64 {
        self.valid + self.valid_with_excess
    }

    pub fn repaired(&self) -> u64 {
        self.short + self.long
    }

    pub fn merge(&mut self, other: &ClassCounts) {
        self.valid += other.valid;
        self.valid_with_excess += other.valid_with_excess;
        self.short += other.short;
        self.long += other.long;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_excess_limit_rounds_up() {
        assert_eq!(excess_limit(7), 8);
        assert_eq!(excess_limit(10), 11);
        assert_eq!(excess_limit(30), 33);
        assert_eq!(excess_limit(2), 3);
    }

    #[test]
    fn test_classify_company_rows() {
        assert_eq!(classify(7, 7), RowClass::Valid);
        assert_eq!(classify(8, 7), RowClass::ValidWithExcess);
        assert_eq!(classify(9, 7), RowClass::Long);
        assert_eq!(classify(2, 7), RowClass::Short);
        assert_eq!(classify(0, 7), RowClass::Short);
    }

    #[test]
    fn test_conform_short_row() {
        let mut fields = vec!["123".to_string(), "ACME".to_string()];
        let class = conform(&mut fields, 7);
        assert_eq!(class, RowClass::Short);
        assert!(class.is_repaired());
        assert_eq!(fields.len(), 7);
        assert!(fields[2..].iter().all(String::is_empty));
    }

    #[test]
    fn test_conform_drops_trailing_extras() {
        let mut fields: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        let class = conform(&mut fields, 7);
        assert_eq!(class, RowClass::ValidWithExcess);
        assert!(class.is_bulk_eligible());
        assert_eq!(fields.last().map(String::as_str), Some("6"));
    }

    #[test]
    fn test_class_counts() {
        let mut counts = ClassCounts::default();
        for class in [RowClass::Valid, RowClass::Valid, RowClass::Short, RowClass::Long] {
            counts.record(class);
        }
        let mut other = ClassCounts::default();
        other.record(RowClass::ValidWithExcess);
        counts.merge(&other);

        assert_eq!(counts.total(), 5);
        assert_eq!(counts.clean(), 3);
        assert_eq!(counts.repaired(), 2);
    }

    proptest! {
        #[test]
        fn prop_conform_always_yields_expected_width(count in 0usize..80, expected in 1usize..40) {
            let mut fields = vec![String::from("x"); count];
            let class = conform(&mut fields, expected);
            prop_assert_eq!(fields.len(), expected);
            prop_assert_eq!(class, classify(count, expected));
        }

        #[test]
        fn prop_bulk_eligible_iff_within_tolerance(count in 0usize..80, expected in 1usize..40) {
            let eligible = classify(count, expected).is_bulk_eligible();
            prop_assert_eq!(eligible, count >= expected && count <= excess_limit(expected));
        }
    }
}
