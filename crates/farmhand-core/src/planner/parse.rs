//! Parsers for the semi-structured strings found on crop pages.
//!
//! Each parser is total: malformed input maps to a documented default
//! instead of an error.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_YIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)-?(\d*)").expect("yield regex"));
static RE_INITIAL_DAYS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*days?").expect("initial growth regex"));
static RE_REGROWTH_DAYS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"then (\d+)\s*days? regrowth").expect("regrowth regex"));
static RE_SORT_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-sort-value="(\d+)""#).expect("sort value regex"));
static RE_PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(.*\)").expect("parenthetical regex"));
static RE_PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*[-–]?\s*(\d*)").expect("price regex"));

/// An inclusive integer range such as a yield of `1-2` or a price of `50-100g`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub min: u32,
    pub max: u32,
}

impl Range {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub const fn exact(v: u32) -> Self {
        Self { min: v, max: v }
    }
}

/// Initial growth and optional regrowth, in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrowthTime {
    pub initial_days: u32,
    pub regrowth_days: Option<u32>,
}

/// Parse a per-harvest yield such as `"1-2"`, `"3"` or `"1-2 per harvest"`.
///
/// Anything without a number yields `{1, 1}`.
pub fn parse_yield(input: &str) -> Range {
    let cleaned = input.to_lowercase().replace("per harvest", "");
    match RE_YIELD.captures(cleaned.trim()) {
        Some(caps) => {
            let min = to_u32(&caps[1]);
            let max = caps
                .get(2)
                .filter(|m| !m.as_str().is_empty())
                .map(|m| to_u32(m.as_str()))
                .unwrap_or(min);
            Range::new(min, max)
        }
        None => Range::exact(1),
    }
}

/// Parse a growth string such as `"6 days"` or `"10 days, then 3 days regrowth"`.
///
/// Missing initial days parse as `0`.
pub fn parse_growth_time(input: &str) -> GrowthTime {
    let lower = input.to_lowercase();
    let initial_days = RE_INITIAL_DAYS
        .captures(&lower)
        .map(|c| to_u32(&c[1]))
        .unwrap_or(0);
    let regrowth_days = RE_REGROWTH_DAYS.captures(&lower).map(|c| to_u32(&c[1]));
    GrowthTime {
        initial_days,
        regrowth_days,
    }
}

/// Parse a price such as `"100g"`, `"50-100g"`, `"1,000g"` or `"Free"`.
///
/// Order of precedence:
/// 1. `free`, `not sold` or `n/a` anywhere → `{0, 0}`.
/// 2. A `data-sort-value="N"` attribute → exactly `N`.
/// 3. Strip `g`, commas and parentheticals, then read `N` or `N-M`.
/// 4. Otherwise `{0, 0}`.
pub fn parse_price(input: &str) -> Range {
    let lower = input.to_lowercase();
    if lower.contains("free") || lower.contains("not sold") || lower.contains("n/a") {
        return Range::exact(0);
    }

    if let Some(caps) = RE_SORT_VALUE.captures(&lower) {
        return Range::exact(to_u32(&caps[1]));
    }

    let cleaned = lower.replace('g', "").replace(',', "");
    let cleaned = RE_PARENTHETICAL.replace_all(cleaned.trim(), "");
    match RE_PRICE.captures(cleaned.trim()) {
        Some(caps) => {
            let min = to_u32(&caps[1]);
            let max = caps
                .get(2)
                .filter(|m| !m.as_str().is_empty())
                .map(|m| to_u32(m.as_str()))
                .unwrap_or(min);
            Range::new(min, max)
        }
        None => Range::exact(0),
    }
}

/// Split a comma-separated season list into trimmed lowercase names.
pub fn parse_seasons(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

// Digit runs too long for u32 saturate instead of failing.
fn to_u32(digits: &str) -> u32 {
    digits.parse().unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yield_range() {
        assert_eq!(parse_yield("1-2"), Range::new(1, 2));
    }

    #[test]
    fn test_yield_single() {
        assert_eq!(parse_yield("3"), Range::exact(3));
    }

    #[test]
    fn test_yield_no_number_defaults_to_one() {
        assert_eq!(parse_yield("produces continuously"), Range::exact(1));
    }

    #[test]
    fn test_yield_per_harvest_suffix() {
        assert_eq!(parse_yield("2-4 Per Harvest"), Range::new(2, 4));
    }

    #[test]
    fn test_price_free() {
        assert_eq!(parse_price("Free"), Range::exact(0));
        assert_eq!(parse_price("Not sold"), Range::exact(0));
        assert_eq!(parse_price("N/A"), Range::exact(0));
    }

    #[test]
    fn test_price_single() {
        assert_eq!(parse_price("100g"), Range::exact(100));
    }

    #[test]
    fn test_price_range() {
        assert_eq!(parse_price("50-100g"), Range::new(50, 100));
        assert_eq!(parse_price("50–100g"), Range::new(50, 100));
    }

    #[test]
    fn test_price_thousands_and_parenthetical() {
        assert_eq!(parse_price("1,000g (Year 2)"), Range::exact(1000));
    }

    #[test]
    fn test_price_sort_value_wins() {
        assert_eq!(
            parse_price(r#"<span data-sort-value="60">60g</span>"#),
            Range::exact(60)
        );
    }

    #[test]
    fn test_price_garbage_is_zero() {
        assert_eq!(parse_price("ask Pierre"), Range::exact(0));
    }

    #[test]
    fn test_growth_single_harvest() {
        let g = parse_growth_time("4 Days");
        assert_eq!(g.initial_days, 4);
        assert_eq!(g.regrowth_days, None);
    }

    #[test]
    fn test_growth_with_regrowth() {
        let g = parse_growth_time("10 days, then 3 days regrowth");
        assert_eq!(g.initial_days, 10);
        assert_eq!(g.regrowth_days, Some(3));
    }

    #[test]
    fn test_growth_missing_is_zero() {
        assert_eq!(parse_growth_time("unknown").initial_days, 0);
    }

    #[test]
    fn test_seasons_lowercased() {
        assert_eq!(parse_seasons("Summer, Fall"), vec!["summer", "fall"]);
        assert!(parse_seasons("").is_empty());
    }
}
