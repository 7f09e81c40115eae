use serde::Serialize;

use crate::analytics::{Dimension, ResultTable};
use crate::gaps::{self, DEFAULT_GAP_COUNT, GapTerm, QueryMetrics, StopwordSet};
use crate::metadata::{MetadataSource, PageMetadata};
use crate::suggest::SuggestionSource;

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub gap_count: usize,
    pub include_query_metrics: bool,
    pub request_suggestions: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            gap_count: DEFAULT_GAP_COUNT,
            include_query_metrics: true,
            request_suggestions: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageAnalysis {
    pub page: String,
    pub metadata: PageMetadata,
    pub gap_terms: Vec<GapTerm>,
    pub query_metrics: Vec<QueryMetrics>,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub pattern: String,
    pub pages: Vec<PageAnalysis>,
}

/// Distinct page values containing `pattern`, in first-seen order.
pub fn matching_pages(table: &ResultTable, pattern: &str) -> Vec<String> {
    table
        .distinct_values(Dimension::Page)
        .into_iter()
        .filter(|page| page.contains(pattern))
        .collect()
}

/// Walks every page matching `pattern`: probes its current copy, ranks the
/// vocabulary gaps, and optionally asks for rewritten copy. The probe and the
/// suggestor are advisory collaborators; their failures never abort a run.
pub fn analyze_pages<M: MetadataSource, S: SuggestionSource>(
    table: &ResultTable,
    pattern: &str,
    stopwords: &StopwordSet,
    options: &AnalysisOptions,
    metadata: &mut M,
    suggestions: &mut S,
) -> AnalysisReport {
    let mut pages = Vec::new();
    for page in matching_pages(table, pattern) {
        let page_metadata = metadata.probe(&page);
        let gap_terms = gaps::analyze(table, &page, stopwords, options.gap_count);
        let query_metrics = if options.include_query_metrics {
            gaps::aggregate_page_queries(table, &page)
        } else {
            Vec::new()
        };
        let suggestion = if options.request_suggestions {
            suggestions.suggest(&page_metadata.title, &page_metadata.description, &gap_terms)
        } else {
            None
        };
        tracing::info!(
            page,
            gap_terms = gap_terms.len(),
            suggested = suggestion.is_some(),
            "analyzed page"
        );
        pages.push(PageAnalysis {
            page,
            metadata: page_metadata,
            gap_terms,
            query_metrics,
            suggestion,
        });
    }

    AnalysisReport {
        pattern: pattern.to_string(),
        pages,
    }
}
