//! Control locator: ordered matcher strategies over rendered controls.
//!
//! Login pages vary across portal revisions, so the submit control is never
//! looked up through one hardcoded selector. Instead an ordered list of
//! matcher strategies runs over the gathered candidate controls and the
//! first hit wins. The strategy list is explicit data, testable against
//! fixture controls without a browser.

use querytap_browser::ControlDescription;

/// One way of recognizing a control.
#[derive(Debug, Clone)]
pub enum MatcherStrategy {
    /// Match the visible label against case-insensitive keyword substrings.
    ByVisibleText { keywords: Vec<String> },
    /// Match the element kind (e.g. `input:submit`, `button`).
    ByKind { kinds: Vec<String> },
    /// Match the ARIA role attribute.
    ByRole { role: String },
}

impl MatcherStrategy {
    fn matches(&self, control: &ControlDescription) -> bool {
        match self {
            MatcherStrategy::ByVisibleText { keywords } => {
                let label = control.text.to_ascii_lowercase();
                !label.is_empty()
                    && keywords
                        .iter()
                        .any(|kw| label.contains(&kw.to_ascii_lowercase()))
            }
            MatcherStrategy::ByKind { kinds } => {
                kinds.iter().any(|k| control.kind.eq_ignore_ascii_case(k))
            }
            MatcherStrategy::ByRole { role } => control.role.eq_ignore_ascii_case(role),
        }
    }
}

/// Ordered list of strategies; earlier strategies take precedence.
#[derive(Debug, Clone)]
pub struct ControlLocator {
    strategies: Vec<MatcherStrategy>,
}

impl ControlLocator {
    pub fn new(strategies: Vec<MatcherStrategy>) -> Self {
        Self { strategies }
    }

    /// The locator for the login submit control: labeled controls first,
    /// then any generic submit-type control, then ARIA buttons.
    pub fn submit(labels: &[String]) -> Self {
        Self::new(vec![
            MatcherStrategy::ByVisibleText {
                keywords: labels.to_vec(),
            },
            MatcherStrategy::ByKind {
                kinds: vec!["input:submit".to_string(), "button".to_string()],
            },
            MatcherStrategy::ByRole {
                role: "button".to_string(),
            },
        ])
    }

    /// Run the strategies in order; the first strategy with a hit returns
    /// its first matching control (document order).
    pub fn find<'a>(&self, controls: &'a [ControlDescription]) -> Option<&'a ControlDescription> {
        for strategy in &self.strategies {
            if let Some(hit) = controls.iter().find(|c| strategy.matches(c)) {
                return Some(hit);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(index: usize, text: &str, role: &str, kind: &str) -> ControlDescription {
        ControlDescription {
            index,
            text: text.to_string(),
            role: role.to_string(),
            kind: kind.to_string(),
        }
    }

    fn submit_labels() -> Vec<String> {
        ["continue", "log in", "sign in", "login"]
            .iter()
            .map(|s| (*s).to_string())
            .collect()
    }

    #[test]
    fn labeled_control_wins_over_generic_submit() {
        let controls = vec![
            control(0, "", "", "input:submit"),
            control(1, "Sign In", "", "button"),
        ];
        let locator = ControlLocator::submit(&submit_labels());
        let hit = locator.find(&controls).unwrap();
        assert_eq!(hit.index, 1);
    }

    #[test]
    fn label_match_is_case_insensitive_substring() {
        let controls = vec![
            control(0, "Help", "", "button"),
            control(1, "CONTINUE TO PORTAL", "", "a"),
        ];
        let locator = ControlLocator::submit(&submit_labels());
        assert_eq!(locator.find(&controls).unwrap().index, 1);
    }

    #[test]
    fn falls_back_to_submit_kind_when_no_label_matches() {
        let controls = vec![
            control(0, "Forgot password?", "", "a"),
            control(1, "", "", "input:submit"),
        ];
        let locator = ControlLocator::submit(&submit_labels());
        assert_eq!(locator.find(&controls).unwrap().index, 1);
    }

    #[test]
    fn falls_back_to_role_last() {
        let controls = vec![
            control(0, "Forgot password?", "", "a"),
            control(1, "", "button", "div"),
        ];
        let locator = ControlLocator::submit(&submit_labels());
        assert_eq!(locator.find(&controls).unwrap().index, 1);
    }

    #[test]
    fn no_candidate_yields_none() {
        let controls = vec![control(0, "Forgot password?", "", "a")];
        let locator = ControlLocator::submit(&submit_labels());
        assert!(locator.find(&controls).is_none());
        assert!(locator.find(&[]).is_none());
    }

    #[test]
    fn strategy_order_is_explicit() {
        // A locator that prefers kind over text finds the submit input even
        // though a labeled button exists.
        let locator = ControlLocator::new(vec![
            MatcherStrategy::ByKind {
                kinds: vec!["input:submit".to_string()],
            },
            MatcherStrategy::ByVisibleText {
                keywords: submit_labels(),
            },
        ]);
        let controls = vec![
            control(0, "Sign in", "", "button"),
            control(1, "", "", "input:submit"),
        ];
        assert_eq!(locator.find(&controls).unwrap().index, 1);
    }

    #[test]
    fn empty_label_never_matches_text_strategy() {
        let locator = ControlLocator::new(vec![MatcherStrategy::ByVisibleText {
            keywords: vec!["".to_string(), "go".to_string()],
        }]);
        // An empty keyword must not make every control match.
        let controls = vec![control(0, "", "", "button")];
        assert!(locator.find(&controls).is_none());
    }
}
