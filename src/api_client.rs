use crate::config::Config;
use crate::credentials::Credential;
use crate::error::Error;
use chrono::NaiveDate;
use log::{debug, warn};
use reqwest::{header::AUTHORIZATION, Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_DATE_FORMAT: &str = "%Y-%m-%d";
const REPORT_READY_STATE: &str = "OK";

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PerformanceApi: Send + Sync + 'static {
    /// Exchanges client credentials for a bearer token.
    async fn authenticate(&self, credential: &Credential) -> Result<AccessToken, Error>;

    /// Lists the account's advertising campaigns.
    async fn campaigns(&self, token: &AccessToken) -> Result<Vec<Campaign>, Error>;

    /// Lists the advertised object ids inside one campaign.
    async fn objects(&self, token: &AccessToken, campaign_id: &str) -> Result<Vec<String>, Error>;

    /// Queues an asynchronous campaign statistics report for one batch.
    /// # Returns
    /// A [`ReportHandle`] to poll; its container format is a single csv
    /// file when the batch addresses exactly one campaign, a zip bundle
    /// otherwise.
    async fn request_statistics(
        &self,
        token: &AccessToken,
        campaigns: &[String],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<ReportHandle, Error>;

    /// Queues an asynchronous phrase-level report for one campaign's objects.
    async fn request_phrases(
        &self,
        token: &AccessToken,
        campaign_id: &str,
        objects: &[String],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<ReportHandle, Error>;

    /// Queues an asynchronous order-attribution report for one batch.
    async fn request_attribution(
        &self,
        token: &AccessToken,
        campaigns: &[String],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<ReportHandle, Error>;

    /// Polls a queued report until it is ready, then downloads its content.
    /// The poll loop is bounded; a report that never becomes ready fails
    /// with [`Error::ReportTimeout`] instead of hanging its worker.
    async fn await_report(
        &self,
        token: &AccessToken,
        handle: &ReportHandle,
    ) -> Result<Vec<u8>, Error>;

    /// Media campaign statistics, returned synchronously.
    async fn media_report(
        &self,
        token: &AccessToken,
        campaigns: &[String],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<u8>, Error>;

    /// Product campaign statistics, returned synchronously.
    async fn product_report(
        &self,
        token: &AccessToken,
        campaigns: &[String],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<u8>, Error>;

    /// Per-day campaign statistics, returned synchronously.
    async fn daily_report(
        &self,
        token: &AccessToken,
        campaigns: &[String],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<u8>, Error>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub(crate) token_type: String,
    pub(crate) access_token: String,
}

impl AccessToken {
    fn header_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Campaign {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Csv,
    Zip,
}

impl ReportFormat {
    /// Multi-campaign requests come back as a zip bundle of per-campaign
    /// csv files; single-campaign requests as one csv.
    pub fn for_campaign_count(count: usize) -> Self {
        if count == 1 {
            ReportFormat::Csv
        } else {
            ReportFormat::Zip
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Zip => "zip",
        }
    }
}

/// Opaque reference to a queued report: polled until ready, downloaded once.
#[derive(Debug, Clone)]
pub struct ReportHandle {
    pub uuid: String,
    pub format: ReportFormat,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
}

#[derive(Serialize)]
struct ReportRequest<'a> {
    campaigns: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    objects: Option<&'a [String]>,
    #[serde(rename = "dateFrom")]
    date_from: String,
    #[serde(rename = "dateTo")]
    date_to: String,
    #[serde(rename = "groupBy")]
    group_by: &'static str,
}

#[derive(Deserialize)]
struct ReportQueued {
    #[serde(rename = "UUID")]
    uuid: String,
}

#[derive(Deserialize)]
struct ReportStatus {
    state: String,
}

#[derive(Deserialize)]
struct CampaignList {
    list: Vec<Campaign>,
}

#[derive(Deserialize)]
struct AdObject {
    id: String,
}

#[derive(Deserialize)]
struct ObjectList {
    list: Vec<AdObject>,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    rate_limit_attempts: u32,
    rate_limit_delay: Duration,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl ApiClient {
    pub fn new(config: &Config) -> Self {
        ApiClient {
            client: Client::new(),
            base_url: config.api_url.to_string(),
            rate_limit_attempts: config.rate_limit_attempts,
            rate_limit_delay: Duration::from_secs(config.rate_limit_delay_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            poll_attempts: config.poll_attempts,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .extend(segments);
        Ok(url)
    }

    /// POSTs a generate-report request, retrying on the rate-limit status
    /// with a fixed delay until the configured attempt budget runs out.
    async fn queue_report(
        &self,
        token: &AccessToken,
        url: Url,
        body: &ReportRequest<'_>,
        endpoint: &'static str,
    ) -> Result<String, Error> {
        let mut attempt = 0u32;
        loop {
            let resp = self
                .client
                .post(url.clone())
                .header(AUTHORIZATION, token.header_value())
                .json(body)
                .send()
                .await?;

            match resp.status() {
                StatusCode::OK => return Ok(resp.json::<ReportQueued>().await?.uuid),
                StatusCode::TOO_MANY_REQUESTS => {
                    if attempt == self.rate_limit_attempts {
                        return Err(Error::RateLimited {
                            endpoint,
                            attempts: attempt,
                        });
                    }
                    attempt += 1;
                    warn!(
                        "{endpoint}: rate limited, retry {attempt}/{} in {:?}",
                        self.rate_limit_attempts, self.rate_limit_delay
                    );
                    tokio::time::sleep(self.rate_limit_delay).await;
                }
                status => {
                    let detail = resp.text().await.unwrap_or_default();
                    return Err(Error::UnexpectedStatus {
                        endpoint,
                        status,
                        detail,
                    });
                }
            }
        }
    }

    /// GETs a synchronous report endpoint and returns the body verbatim.
    async fn sync_report(
        &self,
        token: &AccessToken,
        segments: &[&str],
        campaigns: &[String],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<u8>, Error> {
        let mut url = self.endpoint(segments)?;
        {
            let mut query = url.query_pairs_mut();
            for campaign in campaigns {
                query.append_pair("campaigns", campaign);
            }
            query.append_pair("dateFrom", &date_from.format(API_DATE_FORMAT).to_string());
            query.append_pair("dateTo", &date_to.format(API_DATE_FORMAT).to_string());
        }

        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, token.header_value())
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.bytes().await?.to_vec())
    }

    fn report_request<'a>(
        campaigns: &'a [String],
        objects: Option<&'a [String]>,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> ReportRequest<'a> {
        ReportRequest {
            campaigns,
            objects,
            date_from: date_from.format(API_DATE_FORMAT).to_string(),
            date_to: date_to.format(API_DATE_FORMAT).to_string(),
            group_by: "DATE",
        }
    }
}

#[async_trait::async_trait]
impl PerformanceApi for ApiClient {
    async fn authenticate(&self, credential: &Credential) -> Result<AccessToken, Error> {
        let url = self.endpoint(&["api", "client", "token"])?;
        let body = TokenRequest {
            client_id: &credential.client_id,
            client_secret: &credential.client_secret,
            grant_type: "client_credentials",
        };

        let resp = self.client.post(url).json(&body).send().await?;
        if resp.status() != StatusCode::OK {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(Error::AuthFailed {
                account_id: credential.account_id.clone(),
                detail: format!("{status}: {detail}"),
            });
        }

        Ok(resp.json().await?)
    }

    async fn campaigns(&self, token: &AccessToken) -> Result<Vec<Campaign>, Error> {
        let url = self.endpoint(&["api", "client", "campaign"])?;
        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, token.header_value())
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.json::<CampaignList>().await?.list)
    }

    async fn objects(&self, token: &AccessToken, campaign_id: &str) -> Result<Vec<String>, Error> {
        let url = self.endpoint(&["api", "client", "campaign", campaign_id, "objects"])?;
        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, token.header_value())
            .send()
            .await?
            .error_for_status()?;

        let objects = resp.json::<ObjectList>().await?;
        Ok(objects.list.into_iter().map(|obj| obj.id).collect())
    }

    async fn request_statistics(
        &self,
        token: &AccessToken,
        campaigns: &[String],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<ReportHandle, Error> {
        let url = self.endpoint(&["api", "client", "statistics"])?;
        let body = Self::report_request(campaigns, None, date_from, date_to);
        let uuid = self.queue_report(token, url, &body, "statistics").await?;
        Ok(ReportHandle {
            uuid,
            format: ReportFormat::for_campaign_count(campaigns.len()),
        })
    }

    async fn request_phrases(
        &self,
        token: &AccessToken,
        campaign_id: &str,
        objects: &[String],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<ReportHandle, Error> {
        let url = self.endpoint(&["api", "client", "statistics", "phrases"])?;
        let campaigns = [campaign_id.to_string()];
        let body = Self::report_request(&campaigns, Some(objects), date_from, date_to);
        let uuid = self.queue_report(token, url, &body, "phrases").await?;
        Ok(ReportHandle {
            uuid,
            format: ReportFormat::Csv,
        })
    }

    async fn request_attribution(
        &self,
        token: &AccessToken,
        campaigns: &[String],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<ReportHandle, Error> {
        let url = self.endpoint(&["api", "client", "statistics", "attribution"])?;
        let body = Self::report_request(campaigns, None, date_from, date_to);
        let uuid = self.queue_report(token, url, &body, "attribution").await?;
        Ok(ReportHandle {
            uuid,
            format: ReportFormat::for_campaign_count(campaigns.len()),
        })
    }

    async fn await_report(
        &self,
        token: &AccessToken,
        handle: &ReportHandle,
    ) -> Result<Vec<u8>, Error> {
        for _ in 0..self.poll_attempts {
            tokio::time::sleep(self.poll_interval).await;

            let url = self.endpoint(&["api", "client", "statistics", &handle.uuid])?;
            let resp = self
                .client
                .get(url)
                .header(AUTHORIZATION, token.header_value())
                .send()
                .await?
                .error_for_status()?;
            let status = resp.json::<ReportStatus>().await?;

            if status.state == REPORT_READY_STATE {
                let mut url = self.endpoint(&["api", "client", "statistics", "report"])?;
                url.query_pairs_mut().append_pair("UUID", &handle.uuid);
                let resp = self
                    .client
                    .get(url)
                    .header(AUTHORIZATION, token.header_value())
                    .send()
                    .await?
                    .error_for_status()?;
                return Ok(resp.bytes().await?.to_vec());
            }

            debug!("report {}: state {}", handle.uuid, status.state);
        }

        Err(Error::ReportTimeout {
            uuid: handle.uuid.clone(),
            attempts: self.poll_attempts,
        })
    }

    async fn media_report(
        &self,
        token: &AccessToken,
        campaigns: &[String],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<u8>, Error> {
        self.sync_report(
            token,
            &["api", "client", "statistics", "campaign", "media"],
            campaigns,
            date_from,
            date_to,
        )
        .await
    }

    async fn product_report(
        &self,
        token: &AccessToken,
        campaigns: &[String],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<u8>, Error> {
        self.sync_report(
            token,
            &["api", "client", "statistics", "campaign", "product"],
            campaigns,
            date_from,
            date_to,
        )
        .await
    }

    async fn daily_report(
        &self,
        token: &AccessToken,
        campaigns: &[String],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<u8>, Error> {
        self.sync_report(
            token,
            &["api", "client", "statistics", "daily"],
            campaigns,
            date_from,
            date_to,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn test_config(api_url: &str) -> Config {
        Config {
            api_url: api_url.to_string(),
            keys_file: "./keys.json".to_string(),
            history_dir: "./history".to_string(),
            output_dir: "./data".to_string(),
            reports: vec![],
            day_limit: 5,
            campaign_limit: 5,
            rate_limit_attempts: 5,
            rate_limit_delay_secs: 3,
            poll_interval_secs: 1,
            poll_attempts: 120,
            keep_archives: false,
            upload: false,
        }
    }

    fn test_token() -> AccessToken {
        AccessToken {
            token_type: "Bearer".to_string(),
            access_token: "token".to_string(),
        }
    }

    #[test]
    fn test_report_format_tracks_campaign_count() {
        assert_eq!(ReportFormat::for_campaign_count(1), ReportFormat::Csv);
        assert_eq!(ReportFormat::for_campaign_count(2), ReportFormat::Zip);
        assert_eq!(ReportFormat::for_campaign_count(5), ReportFormat::Zip);
        assert_eq!(ReportFormat::Csv.extension(), "csv");
        assert_eq!(ReportFormat::Zip.extension(), "zip");
    }

    #[tokio::test]
    async fn test_authenticate_invalid_url() {
        let client = ApiClient::new(&test_config("invalid_url"));
        let credential = Credential {
            account_id: "7".to_string(),
            client_id: "7-abc".to_string(),
            client_secret: "secret".to_string(),
        };

        let result = client.authenticate(&credential).await;
        assert!(matches!(result.unwrap_err(), Error::UrlParsingFailed(_)));
    }

    #[tokio::test]
    async fn test_request_statistics_invalid_url() {
        let client = ApiClient::new(&test_config("invalid_url"));
        let campaigns = vec![String::from("101")];
        let from = NaiveDate::from_str("2024-05-01").unwrap();
        let to = NaiveDate::from_str("2024-05-05").unwrap();

        let result = client
            .request_statistics(&test_token(), &campaigns, from, to)
            .await;
        assert!(matches!(result.unwrap_err(), Error::UrlParsingFailed(_)));
    }

    #[tokio::test]
    async fn test_await_report_is_bounded() {
        // With a zero attempt budget the loop must give up immediately
        // instead of polling forever.
        let mut config = test_config("https://api.example.com");
        config.poll_attempts = 0;
        let client = ApiClient::new(&config);
        let handle = ReportHandle {
            uuid: "11111111-2222-3333-4444-555555555555".to_string(),
            format: ReportFormat::Csv,
        };

        let result = client.await_report(&test_token(), &handle).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::ReportTimeout { attempts: 0, .. }
        ));
    }
}
