//! Keyword-driven intent classification.
//!
//! Scores a lower-cased natural-language question against the four
//! keyword groups from the catalog (time-period, metric, granularity,
//! filter), derives categories and a date-filter name, and selects the
//! query patterns the question most plausibly needs.

use crate::catalog::{DateFilterDef, RulesCatalog};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Keywords that fired within one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMatch {
    pub group: String,
    pub keywords: Vec<String>,
    pub score: usize,
}

/// A date filter with its catalog name attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedDateFilter {
    pub name: String,
    pub description: String,
    pub sql: String,
}

/// One suggested pattern with its applicable rule package.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternSuggestion {
    pub name: String,
    pub description: String,
    /// Why this pattern was selected.
    pub reason: String,
    pub core_rules: BTreeMap<String, String>,
    pub date_filter: Option<NamedDateFilter>,
    pub validation: Vec<String>,
}

/// The classification result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentClassification {
    pub question: String,
    pub group_matches: Vec<GroupMatch>,
    pub categories: Vec<String>,
    pub required_patterns: Vec<String>,
    pub date_filter: Option<String>,
    pub patterns: Vec<PatternSuggestion>,
    pub fallback_used: bool,
}

/// A keyword matches either as a whole token (single word) or as a
/// substring (multi-word phrase).
fn keyword_matches(question: &str, tokens: &BTreeSet<String>, keyword: &str) -> bool {
    if keyword.contains(' ') {
        question.contains(keyword)
    } else {
        tokens.contains(keyword)
    }
}

fn tokenize(question: &str) -> BTreeSet<String> {
    question
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Classify a question against the catalog.
pub fn classify_sales_intent(question: &str, catalog: &RulesCatalog) -> IntentClassification {
    let lowered = question.to_lowercase();
    let tokens = tokenize(&lowered);

    let mut group_matches = Vec::new();
    let mut categories: Vec<String> = Vec::new();
    let mut required: Vec<String> = Vec::new();
    let mut date_filter: Option<String> = None;

    for (group, rules) in &catalog.classifier.keyword_groups {
        let mut fired: Vec<String> = Vec::new();
        for rule in rules {
            let hits: Vec<&String> = rule
                .keywords
                .iter()
                .filter(|kw| keyword_matches(&lowered, &tokens, kw))
                .collect();
            if hits.is_empty() {
                continue;
            }
            fired.extend(hits.into_iter().cloned());
            for c in &rule.categories {
                if !categories.contains(c) {
                    categories.push(c.clone());
                }
            }
            for p in &rule.required_patterns {
                if !required.contains(p) {
                    required.push(p.clone());
                }
            }
            // Later matches override: "this month vs last year" lands
            // on the prior-year filter, not the plain MTD one.
            if rule.date_filter.is_some() {
                date_filter = rule.date_filter.clone();
            }
        }
        if !fired.is_empty() {
            group_matches.push(GroupMatch {
                group: group.clone(),
                score: fired.len(),
                keywords: fired,
            });
        }
    }

    // Selection: required patterns, then category matches, then plain
    // keyword overlap with the pattern's own keywords.
    let mut selected: Vec<(String, String)> = Vec::new();
    let push = |name: &str, reason: String, selected: &mut Vec<(String, String)>| {
        if !selected.iter().any(|(n, _)| n == name) {
            selected.push((name.to_string(), reason));
        }
    };

    for name in &required {
        push(name, "required by matched keywords".to_string(), &mut selected);
    }
    for (name, pattern) in &catalog.patterns {
        if categories.contains(&pattern.category) {
            push(name, format!("category match: {}", pattern.category), &mut selected);
        }
    }
    for (name, pattern) in &catalog.patterns {
        if pattern
            .keywords
            .iter()
            .any(|kw| keyword_matches(&lowered, &tokens, kw))
        {
            push(name, "keyword overlap".to_string(), &mut selected);
        }
    }

    let fallback_used = selected.is_empty();
    if fallback_used {
        selected.push((
            catalog.classifier.default_pattern.clone(),
            "default pattern".to_string(),
        ));
    }

    let patterns = selected
        .into_iter()
        .filter_map(|(name, reason)| {
            let pattern = catalog.patterns.get(&name)?;
            let filter_name = date_filter
                .clone()
                .or_else(|| pattern.date_filter.clone());
            let named_filter = filter_name.and_then(|fname| {
                catalog
                    .date_filters
                    .get(&fname)
                    .map(|def: &DateFilterDef| NamedDateFilter {
                        name: fname,
                        description: def.description.clone(),
                        sql: def.sql.clone(),
                    })
            });
            Some(PatternSuggestion {
                name,
                description: pattern.description.clone(),
                reason,
                core_rules: pattern
                    .core_rules
                    .iter()
                    .filter_map(|r| {
                        catalog.core_rules.get(r).map(|text| (r.clone(), text.clone()))
                    })
                    .collect(),
                date_filter: named_filter,
                validation: pattern.validation.clone(),
            })
        })
        .collect();

    IntentClassification {
        question: question.to_string(),
        group_matches,
        categories,
        required_patterns: required,
        date_filter,
        patterns,
        fallback_used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> &'static RulesCatalog {
        RulesCatalog::builtin()
    }

    #[test]
    fn sales_mtd_question_selects_sales_patterns() {
        let c = classify_sales_intent("How many sales did we close this month?", catalog());
        assert!(c.categories.contains(&"sales".to_string()));
        assert_eq!(c.date_filter.as_deref(), Some("mtd_current"));
        assert!(c.patterns.iter().any(|p| p.name == "sales_by_source" || p.name == "sales_mtd_vs_prior_year" || p.name == "revenue_by_month"));
        assert!(!c.fallback_used);
    }

    #[test]
    fn funnel_question_requires_conversion_pattern() {
        let c = classify_sales_intent("show me the conversion funnel", catalog());
        assert!(c
            .required_patterns
            .contains(&"prospect_conversion_funnel".to_string()));
        let suggestion = c
            .patterns
            .iter()
            .find(|p| p.name == "prospect_conversion_funnel")
            .unwrap();
        assert_eq!(suggestion.reason, "required by matched keywords");
        assert!(!suggestion.core_rules.is_empty());
    }

    #[test]
    fn yoy_question_picks_prior_year_filter() {
        let c = classify_sales_intent("revenue this month vs last year", catalog());
        assert_eq!(c.date_filter.as_deref(), Some("mtd_prior_year"));
        assert!(c
            .patterns
            .iter()
            .any(|p| p.name == "sales_mtd_vs_prior_year"));
    }

    #[test]
    fn unrelated_question_falls_back_to_default() {
        let c = classify_sales_intent("what is the weather like", catalog());
        assert!(c.fallback_used);
        assert_eq!(c.patterns.len(), 1);
        assert_eq!(c.patterns[0].name, catalog().classifier.default_pattern);
    }

    #[test]
    fn group_scores_reflect_fired_keywords() {
        let c = classify_sales_intent("monthly leads trend by source", catalog());
        let groups: Vec<&str> = c.group_matches.iter().map(|g| g.group.as_str()).collect();
        assert!(groups.contains(&"granularity"));
        assert!(groups.contains(&"metric"));
        for g in &c.group_matches {
            assert_eq!(g.score, g.keywords.len());
        }
    }

    #[test]
    fn multi_word_keywords_match_as_phrases() {
        let c = classify_sales_intent("leads month to date please", catalog());
        assert_eq!(c.date_filter.as_deref(), Some("mtd_current"));
    }
}
