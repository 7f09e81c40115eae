use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AnalyticsClientConfig;
use crate::error::FetchError;
use crate::session::{Session, percent_encode};

/// Fixed page size for the cursor-paged query endpoint.
pub const PAGE_ROW_LIMIT: usize = 25_000;

pub const METRIC_COLUMNS: [&str; 4] = ["clicks", "impressions", "ctr", "position"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Date,
    Page,
    Query,
    Country,
    Device,
}

impl Dimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Page => "page",
            Self::Query => "query",
            Self::Country => "country",
            Self::Device => "device",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        if value.eq_ignore_ascii_case("date") {
            return Ok(Self::Date);
        }
        if value.eq_ignore_ascii_case("page") {
            return Ok(Self::Page);
        }
        if value.eq_ignore_ascii_case("query") {
            return Ok(Self::Query);
        }
        if value.eq_ignore_ascii_case("country") {
            return Ok(Self::Country);
        }
        if value.eq_ignore_ascii_case("device") {
            return Ok(Self::Device);
        }
        bail!("unsupported dimension: {value} (expected date|page|query|country|device)")
    }
}

/// One immutable query: inclusive date range, ordered dimensions, and opaque
/// pass-through filter predicates.
#[derive(Debug, Clone)]
pub struct QueryFilter {
    start_date: NaiveDate,
    end_date: NaiveDate,
    dimensions: Vec<Dimension>,
    dimension_filter_groups: Vec<Value>,
}

impl QueryFilter {
    pub fn new(
        start_date: NaiveDate,
        end_date: NaiveDate,
        dimensions: Vec<Dimension>,
    ) -> Result<Self> {
        if start_date > end_date {
            bail!("invalid date range: {start_date} is after {end_date}");
        }
        if dimensions.is_empty() {
            bail!("a query requires at least one dimension");
        }
        for (index, dimension) in dimensions.iter().enumerate() {
            if dimensions[..index].contains(dimension) {
                bail!("duplicate dimension: {}", dimension.as_str());
            }
        }
        Ok(Self {
            start_date,
            end_date,
            dimensions,
            dimension_filter_groups: Vec::new(),
        })
    }

    pub fn with_filter_groups(mut self, groups: Vec<Value>) -> Self {
        self.dimension_filter_groups = groups;
        self
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }
}

/// One tuple of dimension values (filter order) plus the four metrics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultRow {
    pub keys: Vec<String>,
    pub clicks: u64,
    pub impressions: u64,
    pub ctr: f64,
    pub position: f64,
}

/// Rows sharing one filter's dimension schema, in fetch order.
#[derive(Debug, Clone)]
pub struct ResultTable {
    dimensions: Vec<Dimension>,
    rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn new(dimensions: Vec<Dimension>) -> Self {
        Self {
            dimensions,
            rows: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension_index(&self, dimension: Dimension) -> Option<usize> {
        self.dimensions.iter().position(|item| *item == dimension)
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: ResultRow) -> Result<()> {
        if row.keys.len() != self.dimensions.len() {
            bail!(
                "row has {} keys but the schema has {} dimensions",
                row.keys.len(),
                self.dimensions.len()
            );
        }
        self.rows.push(row);
        Ok(())
    }

    /// Distinct values of one dimension in first-seen order.
    pub fn distinct_values(&self, dimension: Dimension) -> Vec<String> {
        let Some(index) = self.dimension_index(dimension) else {
            return Vec::new();
        };
        let mut seen = std::collections::HashSet::new();
        let mut values = Vec::new();
        for row in &self.rows {
            if let Some(value) = row.keys.get(index)
                && seen.insert(value.clone())
            {
                values.push(value.clone());
            }
        }
        values
    }
}

/// One page of the remote response. `rows` is optional so "no row data"
/// stays distinguishable from a malformed payload.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct QueryPageResponse {
    #[serde(default)]
    pub rows: Option<Vec<ApiRow>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiRow {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub clicks: u64,
    #[serde(default)]
    pub impressions: u64,
    #[serde(default)]
    pub ctr: f64,
    #[serde(default)]
    pub position: f64,
}

/// Seam over the paged query endpoint so the fetch loop tests run offline.
pub trait AnalyticsApi {
    fn query_page(&mut self, filter: &QueryFilter, start_row: usize) -> Result<QueryPageResponse>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequestBody<'a> {
    start_date: String,
    end_date: String,
    dimensions: &'a [Dimension],
    dimension_filter_groups: &'a [Value],
    row_limit: usize,
    data_state: &'static str,
    start_row: usize,
}

/// Blocking client for the analytics query endpoint. Borrows the session for
/// the duration of one fetch and never mutates or persists it.
pub struct AnalyticsClient<'a> {
    client: Client,
    config: AnalyticsClientConfig,
    session: &'a Session,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl<'a> AnalyticsClient<'a> {
    pub fn new(config: AnalyticsClientConfig, session: &'a Session) -> Result<Self> {
        if config.site_url.trim().is_empty() {
            bail!("no site URL configured (set GAPTOOL_SITE_URL or [analytics].site_url)");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build analytics HTTP client")?;
        Ok(Self {
            client,
            config,
            session,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn query_url(&self) -> String {
        format!(
            "{}/sites/{}/searchAnalytics/query",
            self.config.endpoint.trim_end_matches('/'),
            percent_encode(self.config.site_url.trim()),
        )
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl AnalyticsApi for AnalyticsClient<'_> {
    fn query_page(&mut self, filter: &QueryFilter, start_row: usize) -> Result<QueryPageResponse> {
        let body = QueryRequestBody {
            start_date: filter.start_date().format("%Y-%m-%d").to_string(),
            end_date: filter.end_date().format("%Y-%m-%d").to_string(),
            dimensions: filter.dimensions(),
            dimension_filter_groups: &filter.dimension_filter_groups,
            row_limit: PAGE_ROW_LIMIT,
            data_state: "final",
            start_row,
        };
        let url = self.query_url();

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let response = self
                .client
                .post(&url)
                .header("User-Agent", self.config.user_agent.clone())
                .bearer_auth(&self.session.access_token)
                .json(&body)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("analytics API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode analytics API JSON response")?;
                    if let Some(error) = payload.get("error") {
                        let code = error
                            .get("status")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_error");
                        let info = error
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown info");
                        bail!("analytics API error [{code}]: {info}");
                    }
                    let parsed: QueryPageResponse = serde_json::from_value(payload)
                        .context("failed to decode analytics query page")?;
                    return Ok(parsed);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call analytics API");
                }
            }
        }

        bail!("analytics API request exhausted retry budget")
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Drains the paged query into one complete table.
///
/// The cursor advances by the number of rows each page returns. A short page
/// or a page with no row data terminates the loop; a full page always
/// triggers exactly one more request. Any page error aborts the whole fetch
/// and no partial table is returned.
pub fn fetch_all<A: AnalyticsApi>(
    api: &mut A,
    filter: &QueryFilter,
) -> std::result::Result<ResultTable, FetchError> {
    let mut table = ResultTable::new(filter.dimensions().to_vec());
    let mut start_row = 0usize;

    loop {
        let response = api
            .query_page(filter, start_row)
            .map_err(|error| FetchError::RemoteQuery(format!("{error:#}")))?;

        let rows = match response.rows {
            Some(rows) if !rows.is_empty() => rows,
            // End of data: the response carried no rows. Legitimately reached
            // on the first page (empty result) or right after a full page.
            _ => break,
        };

        let page_len = rows.len();
        for row in rows {
            let row = decode_row(row, filter.dimensions().len())
                .map_err(FetchError::MalformedResponse)?;
            table
                .push(row)
                .map_err(|error| FetchError::MalformedResponse(format!("{error:#}")))?;
        }
        start_row += page_len;
        tracing::debug!(start_row, page_len, "fetched analytics page");

        if page_len < PAGE_ROW_LIMIT {
            // Short page: end of data.
            break;
        }
    }

    Ok(table)
}

fn decode_row(row: ApiRow, expected_keys: usize) -> std::result::Result<ResultRow, String> {
    if row.keys.len() != expected_keys {
        return Err(format!(
            "row carries {} keys, expected {expected_keys}",
            row.keys.len()
        ));
    }
    if row.clicks > row.impressions {
        return Err(format!(
            "row reports {} clicks against {} impressions",
            row.clicks, row.impressions
        ));
    }
    Ok(ResultRow {
        keys: row.keys,
        clicks: row.clicks,
        impressions: row.impressions,
        ctr: row.ctr,
        position: row.position,
    })
}
