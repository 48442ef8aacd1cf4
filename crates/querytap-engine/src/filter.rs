//! URL substring filter.
//!
//! Both surface discovery and the capture listener decide relevance by URL:
//! discovery matches embedded-surface markers, the listener matches the
//! backend query endpoints. The filter is a disjunction of case-insensitive
//! substrings.

/// A disjunction of case-insensitive URL substrings.
#[derive(Debug, Clone)]
pub struct UrlFilter {
    needles: Vec<String>,
}

impl UrlFilter {
    /// Build a filter from substring patterns. Empty patterns are dropped.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            needles: patterns
                .into_iter()
                .map(|p| p.into().trim().to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// True when the URL contains any of the patterns.
    pub fn matches(&self, url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        self.needles.iter().any(|needle| lower.contains(needle))
    }

    /// True when the filter has no patterns (and therefore matches nothing).
    pub fn is_empty(&self) -> bool {
        self.needles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_any_substring() {
        let filter = UrlFilter::new(["/public/reports/querydata", "pbidedicated.windows.net"]);
        assert!(filter.matches(
            "https://wabi-west-europe-api.analysis.windows.net/public/reports/querydata?synchronous=true"
        ));
        assert!(filter.matches("https://abc123.pbidedicated.windows.net/webapi/capacities/q"));
        assert!(!filter.matches("https://app.powerbi.com/13.0.1/scripts/telemetry.js"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let filter = UrlFilter::new(["QueryData"]);
        assert!(filter.matches("https://x.example/public/reports/QUERYDATA"));
        assert!(filter.matches("https://x.example/public/reports/querydata"));
    }

    #[test]
    fn empty_patterns_are_dropped() {
        let filter = UrlFilter::new(["", "  ", "real"]);
        assert!(!filter.is_empty());
        assert!(filter.matches("https://x.example/real"));

        let empty = UrlFilter::new(Vec::<String>::new());
        assert!(empty.is_empty());
        assert!(!empty.matches("https://anything.example/"));
    }
}
