//! Derived-column rule evaluation.

use std::collections::BTreeSet;

use rostersync_core::{Behavior, Rule, RuleMode};

/// Compute one cell value for an identity holding `groups`.
///
/// A rule matches when the identity holds at least one of its groups.
/// `first` takes the first match in list order; `combine` joins every
/// distinct non-empty match value with `", "`.
pub fn evaluate(groups: &BTreeSet<String>, rules: &[Rule], behavior: Behavior) -> String {
    let mut matches = rules
        .iter()
        .filter(|rule| rule.group_ids.iter().any(|g| groups.contains(g)))
        .map(rule_value);

    match behavior {
        Behavior::First => matches.next().unwrap_or_default(),
        Behavior::Combine => {
            let mut seen: Vec<String> = Vec::new();
            for value in matches {
                if !value.is_empty() && !seen.contains(&value) {
                    seen.push(value);
                }
            }
            seen.join(", ")
        }
    }
}

fn rule_value(rule: &Rule) -> String {
    match rule.mode {
        RuleMode::TrueFalse => "true".to_string(),
        RuleMode::String => rule.value.clone(),
    }
}
