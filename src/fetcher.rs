use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::fetch_error::FetchError;
use crate::source::{FeedRequest, Period, SourceFamily};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Result of retrieving one upstream document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Document(String),
    /// Upstream answered "not found": expected for future dates or stations without data
    NoData,
}

/// Retrieves source documents over HTTP with a fixed per-request timeout
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    bcws_base_url: String,
    eccc_base_url: String,
}

impl FeedFetcher {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            bcws_base_url: config.bcws_base_url.clone(),
            eccc_base_url: config.eccc_base_url.clone(),
        })
    }

    /// Deterministic locator for a request
    ///
    /// BCWS: `{base}{YYYY}/{YYYY-MM-DD}.csv`
    /// ECCC: `{base}climate_hourly_BC_{station}_{YYYY}_P1H.csv`
    pub fn resource_url(&self, request: &FeedRequest) -> Result<String, FetchError> {
        match (request.source, &request.station, request.period) {
            (SourceFamily::Bcws, _, Period::Date(date)) => Ok(format!(
                "{}{}/{}.csv",
                self.bcws_base_url,
                date.format("%Y"),
                date.format("%Y-%m-%d")
            )),
            (SourceFamily::Eccc, Some(station), Period::Year(year)) => Ok(format!(
                "{}climate_hourly_BC_{station}_{year}_P1H.csv",
                self.eccc_base_url
            )),
            _ => Err(FetchError::InvalidRequest(request.to_string())),
        }
    }

    /// Base URL of the ECCC directory listing
    pub fn eccc_index_url(&self) -> &str {
        &self.eccc_base_url
    }

    #[instrument(skip(self), fields(request = %request))]
    pub async fn fetch(&self, request: &FeedRequest) -> Result<FetchOutcome, FetchError> {
        let url = self.resource_url(request)?;
        self.fetch_url(&url, &[]).await
    }

    /// GET `url`, mapping 404 to [`FetchOutcome::NoData`] and any other non-2xx status to an error
    pub async fn fetch_url(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<FetchOutcome, FetchError> {
        debug!("Sending HTTP request to {}", url);
        let mut request = self.client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }
        let response = request.send().await?;
        let status = response.status();
        debug!("Received HTTP response with status: {}", status);

        if status.as_u16() == 404 {
            debug!("No document at {}", url);
            return Ok(FetchOutcome::NoData);
        }

        if !status.is_success() {
            warn!("Upstream returned {} for {}", status, url);
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        debug!("Retrieved {} bytes from {}", bytes.len(), url);

        Ok(FetchOutcome::Document(decode_document(&bytes)))
    }
}

/// Decode a feed body as text, dropping a leading byte-order marker.
///
/// Invalid UTF-8 (e.g. Latin-1 degree signs in headers) decodes to U+FFFD;
/// the column alias tables account for those garbled variants.
pub fn decode_document(bytes: &[u8]) -> String {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    String::from_utf8_lossy(body).into_owned()
}
