// src/fetch/mod.rs
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use reqwest::{
    header::{HeaderMap, HeaderValue, REFERER, USER_AGENT},
    Client, StatusCode,
};
use std::future::Future;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::process::{
    date_parser::format_reference_date, flatten_columns, normalize_numbers, Column, ColumnLabel,
    Table, REFERENCE_DATE_COLUMN,
};

pub mod html;

/// Result of asking the provider for one reference date.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Normalized snapshot, `Data` leftmost.
    Fetched(Table),
    /// Nothing published for that date, or nothing usable came back.
    Unavailable,
}

/// Anything that can produce a yield-curve snapshot for a date.
pub trait CurveSource {
    fn fetch(&self, reference_date: NaiveDate) -> impl Future<Output = FetchOutcome>;
}

/// HTTP client for the ANBIMA term-structure download endpoint.
pub struct AnbimaClient {
    client: Client,
    endpoint: Url,
    language: String,
    output_format: String,
}

impl AnbimaClient {
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("invalid user agent")?,
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(&config.referer).context("invalid referer")?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(config.timeout())
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            language: config.language.clone(),
            output_format: config.output_format.clone(),
        })
    }

    /// One POST for `reference_date`. `Ok(None)` when the status is not 200
    /// or the body is blank.
    pub async fn download(&self, reference_date: NaiveDate) -> Result<Option<String>> {
        let day = format_reference_date(reference_date);
        let resp = self
            .client
            .post(self.endpoint.clone())
            .form(&[
                ("Idioma", self.language.as_str()),
                ("Dt_Ref", day.as_str()),
                ("saida", self.output_format.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("POST {} for {}", self.endpoint, day))?;

        if resp.status() != StatusCode::OK {
            debug!(date = %day, status = %resp.status(), "non-200 response");
            return Ok(None);
        }

        let body = resp
            .text()
            .await
            .with_context(|| format!("reading body for {}", day))?;
        if body.trim().is_empty() {
            debug!(date = %day, "empty body");
            return Ok(None);
        }
        Ok(Some(body))
    }
}

impl CurveSource for AnbimaClient {
    async fn fetch(&self, reference_date: NaiveDate) -> FetchOutcome {
        let body = match self.download(reference_date).await {
            Ok(Some(body)) => body,
            Ok(None) => return FetchOutcome::Unavailable,
            Err(e) => {
                warn!(date = %reference_date, "download failed: {:#}", e);
                return FetchOutcome::Unavailable;
            }
        };

        match snapshot_from_html(&body, reference_date) {
            Ok(table) => FetchOutcome::Fetched(table),
            Err(e) => {
                warn!(date = %format_reference_date(reference_date), "could not parse table: {:#}", e);
                FetchOutcome::Unavailable
            }
        }
    }
}

/// First HTML table of a response, flattened, with the reference date
/// prepended as `Data` and locale numbers converted.
pub fn snapshot_from_html(html: &str, reference_date: NaiveDate) -> Result<Table> {
    let mut table = flatten_columns(html::parse_first_table(html)?);
    if table.column_index(REFERENCE_DATE_COLUMN).is_some() {
        bail!("source table already has a `{}` column", REFERENCE_DATE_COLUMN);
    }

    let day = format_reference_date(reference_date);
    let dates = Column::text(
        ColumnLabel::single(REFERENCE_DATE_COLUMN),
        vec![Some(day); table.num_rows()],
    );
    table.insert_column(0, dates)?;
    normalize_numbers(table)
}
