use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::analytics::{Dimension, ResultTable};

pub const DEFAULT_GAP_COUNT: usize = 10;

const EMBEDDED_STOPWORDS: &str = include_str!("../../../config/stopwords-en.txt");

/// Injectable stopword dictionary. The analyzer never reaches for an external
/// linguistic resource; tests inject whatever set they need.
#[derive(Debug, Clone, Default)]
pub struct StopwordSet {
    words: HashSet<String>,
}

impl StopwordSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The embedded default English dictionary.
    pub fn english() -> Self {
        Self::from_lines(EMBEDDED_STOPWORDS)
    }

    /// One token per line; blank lines and '#' comments are skipped.
    pub fn from_lines(content: &str) -> Self {
        let words = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_lowercase)
            .collect();
        Self { words }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.words.contains(token)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for StopwordSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let words = iter
            .into_iter()
            .map(|word| word.into().to_lowercase())
            .collect();
        Self { words }
    }
}

/// A token present in user queries but absent from the page copy, ranked by
/// how many distinct queries carry it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GapTerm {
    pub token: String,
    pub frequency: u64,
}

/// Ranks the vocabulary of the target page's queries.
///
/// Rows are filtered to the target page, grouped to distinct query strings,
/// whitespace-tokenized and case-folded. Stopwords and tokens without any
/// alphanumeric character are discarded. The result is sorted by frequency
/// descending with first-occurrence order breaking ties, truncated to `count`.
/// A target matching zero rows yields an empty list.
pub fn analyze(
    table: &ResultTable,
    target_page: &str,
    stopwords: &StopwordSet,
    count: usize,
) -> Vec<GapTerm> {
    let queries = distinct_page_queries(table, target_page);

    let mut terms: Vec<GapTerm> = Vec::new();
    let mut slot_by_token: HashMap<String, usize> = HashMap::new();
    for query in &queries {
        for raw in query.split_whitespace() {
            let token = raw.to_lowercase();
            if !token.chars().any(char::is_alphanumeric) {
                continue;
            }
            if stopwords.contains(&token) {
                continue;
            }
            match slot_by_token.get(&token) {
                Some(&slot) => terms[slot].frequency += 1,
                None => {
                    slot_by_token.insert(token.clone(), terms.len());
                    terms.push(GapTerm {
                        token,
                        frequency: 1,
                    });
                }
            }
        }
    }

    // Stable sort keeps first-seen order within equal frequencies.
    terms.sort_by(|left, right| right.frequency.cmp(&left.frequency));
    terms.truncate(count);
    terms
}

/// Per-query clicks/impressions for the target page, aggregated across the
/// remaining dimensions. Display data only; the ranking never reads it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QueryMetrics {
    pub query: String,
    pub clicks: u64,
    pub impressions: u64,
}

pub fn aggregate_page_queries(table: &ResultTable, target_page: &str) -> Vec<QueryMetrics> {
    let (Some(page_index), Some(query_index)) = (
        table.dimension_index(Dimension::Page),
        table.dimension_index(Dimension::Query),
    ) else {
        return Vec::new();
    };

    let mut metrics: Vec<QueryMetrics> = Vec::new();
    let mut slot_by_query: HashMap<String, usize> = HashMap::new();
    for row in table.rows() {
        if row.keys.get(page_index).map(String::as_str) != Some(target_page) {
            continue;
        }
        let Some(query) = row.keys.get(query_index) else {
            continue;
        };
        match slot_by_query.get(query) {
            Some(&slot) => {
                metrics[slot].clicks += row.clicks;
                metrics[slot].impressions += row.impressions;
            }
            None => {
                slot_by_query.insert(query.clone(), metrics.len());
                metrics.push(QueryMetrics {
                    query: query.clone(),
                    clicks: row.clicks,
                    impressions: row.impressions,
                });
            }
        }
    }
    metrics
}

fn distinct_page_queries(table: &ResultTable, target_page: &str) -> Vec<String> {
    let (Some(page_index), Some(query_index)) = (
        table.dimension_index(Dimension::Page),
        table.dimension_index(Dimension::Query),
    ) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut queries = Vec::new();
    for row in table.rows() {
        if row.keys.get(page_index).map(String::as_str) != Some(target_page) {
            continue;
        }
        if let Some(query) = row.keys.get(query_index)
            && seen.insert(query.clone())
        {
            queries.push(query.clone());
        }
    }
    queries
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_GAP_COUNT, StopwordSet, aggregate_page_queries, analyze};
    use crate::analytics::{Dimension, ResultRow, ResultTable};

    const PAGE_A: &str = "https://example.com/a";
    const PAGE_B: &str = "https://example.com/b";

    fn table(rows: &[(&str, &str, u64, u64)]) -> ResultTable {
        let mut table = ResultTable::new(vec![Dimension::Page, Dimension::Query]);
        for (page, query, clicks, impressions) in rows {
            table
                .push(ResultRow {
                    keys: vec![page.to_string(), query.to_string()],
                    clicks: *clicks,
                    impressions: *impressions,
                    ctr: 0.0,
                    position: 1.0,
                })
                .expect("push row");
        }
        table
    }

    fn tokens(terms: &[super::GapTerm]) -> Vec<&str> {
        terms.iter().map(|term| term.token.as_str()).collect()
    }

    #[test]
    fn ranking_is_deterministic_with_first_seen_tie_break() {
        let table = table(&[
            (PAGE_A, "red shoes", 1, 10),
            (PAGE_A, "red socks", 1, 10),
            (PAGE_A, "blue socks", 1, 10),
        ]);

        let terms = analyze(&table, PAGE_A, &StopwordSet::empty(), DEFAULT_GAP_COUNT);
        assert_eq!(tokens(&terms), vec!["red", "socks", "shoes", "blue"]);
        assert_eq!(terms[0].frequency, 2);
        assert_eq!(terms[1].frequency, 2);
        assert_eq!(terms[2].frequency, 1);
    }

    #[test]
    fn unmatched_target_yields_empty_list() {
        let table = table(&[(PAGE_A, "red shoes", 1, 10)]);
        let terms = analyze(
            &table,
            "https://example.com/no-such-page",
            &StopwordSet::empty(),
            DEFAULT_GAP_COUNT,
        );
        assert!(terms.is_empty());
    }

    #[test]
    fn rows_for_other_pages_are_ignored() {
        let table = table(&[
            (PAGE_A, "red shoes", 1, 10),
            (PAGE_B, "green hats", 5, 50),
        ]);
        let terms = analyze(&table, PAGE_A, &StopwordSet::empty(), DEFAULT_GAP_COUNT);
        assert_eq!(tokens(&terms), vec!["red", "shoes"]);
    }

    #[test]
    fn duplicate_query_rows_count_once() {
        // The same query reported twice (e.g. across dates) is one distinct
        // query, so its tokens are counted once.
        let table = table(&[
            (PAGE_A, "red shoes", 1, 10),
            (PAGE_A, "red shoes", 2, 20),
            (PAGE_A, "red boots", 1, 10),
        ]);
        let terms = analyze(&table, PAGE_A, &StopwordSet::empty(), DEFAULT_GAP_COUNT);
        assert_eq!(tokens(&terms), vec!["red", "shoes", "boots"]);
        assert_eq!(terms[0].frequency, 2);
    }

    #[test]
    fn tokens_are_case_folded() {
        let table = table(&[
            (PAGE_A, "Red Shoes", 1, 10),
            (PAGE_A, "RED boots", 1, 10),
        ]);
        let terms = analyze(&table, PAGE_A, &StopwordSet::empty(), DEFAULT_GAP_COUNT);
        assert_eq!(tokens(&terms), vec!["red", "shoes", "boots"]);
        assert_eq!(terms[0].frequency, 2);
    }

    #[test]
    fn stopwords_and_punctuation_are_discarded() {
        let stopwords: StopwordSet = ["the", "for"].into_iter().collect();
        let table = table(&[
            (PAGE_A, "the best shoes for - running", 1, 10),
            (PAGE_A, "??? !!!", 1, 10),
        ]);
        let terms = analyze(&table, PAGE_A, &stopwords, DEFAULT_GAP_COUNT);
        assert_eq!(tokens(&terms), vec!["best", "shoes", "running"]);
    }

    #[test]
    fn count_truncates_but_never_errors_on_fewer() {
        let table = table(&[
            (PAGE_A, "alpha beta gamma", 1, 10),
            (PAGE_A, "alpha beta", 1, 10),
            (PAGE_A, "alpha", 1, 10),
        ]);

        let terms = analyze(&table, PAGE_A, &StopwordSet::empty(), 2);
        assert_eq!(tokens(&terms), vec!["alpha", "beta"]);

        let terms = analyze(&table, PAGE_A, &StopwordSet::empty(), 50);
        assert_eq!(tokens(&terms), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn analyze_without_query_dimension_is_empty() {
        let table = ResultTable::new(vec![Dimension::Date, Dimension::Page]);
        let terms = analyze(&table, PAGE_A, &StopwordSet::empty(), DEFAULT_GAP_COUNT);
        assert!(terms.is_empty());
    }

    #[test]
    fn embedded_dictionary_filters_common_words() {
        let stopwords = StopwordSet::english();
        assert!(!stopwords.is_empty());
        assert!(stopwords.contains("the"));
        assert!(stopwords.contains("don't"));
        assert!(!stopwords.contains("shoes"));

        let table = table(&[(PAGE_A, "the best shoes", 1, 10)]);
        let terms = analyze(&table, PAGE_A, &stopwords, DEFAULT_GAP_COUNT);
        assert_eq!(tokens(&terms), vec!["best", "shoes"]);
    }

    #[test]
    fn from_lines_skips_comments_and_case_folds() {
        let stopwords = StopwordSet::from_lines("# comment\nThe\n\n  and  \n");
        assert_eq!(stopwords.len(), 2);
        assert!(stopwords.contains("the"));
        assert!(stopwords.contains("and"));
    }

    #[test]
    fn aggregation_sums_metrics_per_query() {
        let table = table(&[
            (PAGE_A, "red shoes", 1, 10),
            (PAGE_A, "red shoes", 2, 20),
            (PAGE_A, "red boots", 4, 40),
            (PAGE_B, "red shoes", 8, 80),
        ]);

        let metrics = aggregate_page_queries(&table, PAGE_A);
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].query, "red shoes");
        assert_eq!(metrics[0].clicks, 3);
        assert_eq!(metrics[0].impressions, 30);
        assert_eq!(metrics[1].query, "red boots");
        assert_eq!(metrics[1].clicks, 4);
    }
}
