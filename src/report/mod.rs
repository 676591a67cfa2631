use crate::storage::traits::{SettingsStore, StorageError};
use chrono::NaiveDate;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const REPORT_ENDPOINT_KEY: &str = "user_report_endpoint_url";
pub const CALLBACK_TOKEN_KEY: &str = "log_server_callback_token";

/// Path, relative to the site URL, where the LRS delivers finished reports.
const CALLBACK_PATH: &str = "/local/log_sender/callback.php";

const BODY_EXCERPT_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report endpoint is not configured (setting 'user_report_endpoint_url')")]
    NotConfigured,

    #[error("invalid report request: {0}")]
    InvalidRequest(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Report endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read settings: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, ReportError>;

/// A time-usage report for one user over a date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub user_id: i64,
    pub requestor_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Minutes of inactivity after which a session counts as idle
    pub idle_time: u32,
    /// Minutes credited to an activity before the first logged event
    pub borrowed_time: u32,
}

impl ReportRequest {
    pub fn validate(&self) -> Result<()> {
        if self.user_id <= 0 {
            return Err(ReportError::InvalidRequest(format!(
                "user id must be positive, got {}",
                self.user_id
            )));
        }
        if self.requestor_id <= 0 {
            return Err(ReportError::InvalidRequest(format!(
                "requestor id must be positive, got {}",
                self.requestor_id
            )));
        }
        if self.start_date >= self.end_date {
            return Err(ReportError::InvalidRequest(format!(
                "start date {} must be before end date {}",
                self.start_date, self.end_date
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ReportPayload<'a> {
    token: Option<&'a str>,
    userid: i64,
    requestorid: i64,
    startdate: i64,
    enddate: i64,
    idletime: u32,
    borrowedtime: u32,
    callbackurl: Option<String>,
}

/// Seconds since the epoch at UTC midnight.
fn day_start(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

/// Asks the LRS to compute a report; the result arrives later on the callback.
pub struct ReportClient {
    settings: Arc<dyn SettingsStore>,
    site_url: Option<String>,
    client: reqwest::Client,
}

impl ReportClient {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        site_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            settings,
            site_url,
            client,
        })
    }

    pub fn callback_url(&self) -> Option<String> {
        self.site_url
            .as_deref()
            .map(|site| format!("{}{}", site.trim_end_matches('/'), CALLBACK_PATH))
    }

    /// Returns the response body of the LRS.
    pub async fn request(&self, request: &ReportRequest) -> Result<String> {
        request.validate()?;

        let endpoint = self
            .settings
            .get_setting(REPORT_ENDPOINT_KEY)
            .await?
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or(ReportError::NotConfigured)?;
        let token = self.settings.get_setting(CALLBACK_TOKEN_KEY).await?;

        let payload = serde_json::to_vec(&ReportPayload {
            token: token.as_deref(),
            userid: request.user_id,
            requestorid: request.requestor_id,
            startdate: day_start(request.start_date),
            enddate: day_start(request.end_date),
            idletime: request.idle_time,
            borrowedtime: request.borrowed_time,
            callbackurl: self.callback_url(),
        })?;

        info!(
            user_id = request.user_id,
            requestor_id = request.requestor_id,
            endpoint = %endpoint,
            "Requesting report"
        );

        let response = self
            .client
            .post(&endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ReportError::Status {
                status: status.as_u16(),
                body: body.chars().take(BODY_EXCERPT_LEN).collect(),
            });
        }

        info!(status = status.as_u16(), "Report request accepted");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::duckdb::DuckDbStorage;
    use axum::{extract::State, http::StatusCode, routing::post, Router};
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    type Bodies = Arc<Mutex<Vec<serde_json::Value>>>;

    async fn start_endpoint(status: StatusCode) -> (String, Bodies) {
        let bodies: Bodies = Arc::default();
        let app = Router::new()
            .route(
                "/report",
                post(
                    move |State(bodies): State<Bodies>, body: axum::body::Bytes| async move {
                        if let Ok(value) = serde_json::from_slice(&body) {
                            bodies.lock().unwrap().push(value);
                        }
                        (status, "queued")
                    },
                ),
            )
            .with_state(bodies.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/report", addr), bodies)
    }

    async fn storage_with_endpoint(endpoint: Option<&str>) -> Arc<DuckDbStorage> {
        let storage = Arc::new(DuckDbStorage::in_memory().unwrap());
        storage.init_schema().await.unwrap();
        if let Some(endpoint) = endpoint {
            storage
                .set_setting(REPORT_ENDPOINT_KEY, endpoint)
                .await
                .unwrap();
        }
        storage
    }

    fn request() -> ReportRequest {
        ReportRequest {
            user_id: 7,
            requestor_id: 2,
            start_date: NaiveDate::from_ymd_opt(2024, 11, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 11, 30).unwrap(),
            idle_time: 30,
            borrowed_time: 5,
        }
    }

    #[tokio::test]
    async fn test_posts_report_payload() {
        let (endpoint, bodies) = start_endpoint(StatusCode::OK).await;
        let storage = storage_with_endpoint(Some(&endpoint)).await;
        storage
            .set_setting(CALLBACK_TOKEN_KEY, "s3cret")
            .await
            .unwrap();

        let client = ReportClient::new(
            storage,
            Some("https://lms.example.org/".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let body = client.request(&request()).await.unwrap();
        assert_eq!(body, "queued");

        let bodies = bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        let sent = &bodies[0];
        assert_eq!(sent["token"], "s3cret");
        assert_eq!(sent["userid"], 7);
        assert_eq!(sent["requestorid"], 2);
        assert_eq!(sent["startdate"], 1730419200);
        assert_eq!(sent["enddate"], 1732924800);
        assert_eq!(sent["idletime"], 30);
        assert_eq!(sent["borrowedtime"], 5);
        assert_eq!(
            sent["callbackurl"],
            "https://lms.example.org/local/log_sender/callback.php"
        );
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_not_configured() {
        let storage = storage_with_endpoint(None).await;
        let client = ReportClient::new(storage, None, Duration::from_secs(5)).unwrap();
        let err = client.request(&request()).await.unwrap_err();
        assert!(matches!(err, ReportError::NotConfigured));
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_sending() {
        let (endpoint, bodies) = start_endpoint(StatusCode::OK).await;
        let storage = storage_with_endpoint(Some(&endpoint)).await;
        let client = ReportClient::new(storage, None, Duration::from_secs(5)).unwrap();

        let mut reversed = request();
        std::mem::swap(&mut reversed.start_date, &mut reversed.end_date);
        assert!(matches!(
            client.request(&reversed).await,
            Err(ReportError::InvalidRequest(_))
        ));

        let mut no_user = request();
        no_user.user_id = 0;
        assert!(matches!(
            client.request(&no_user).await,
            Err(ReportError::InvalidRequest(_))
        ));

        assert!(bodies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let (endpoint, _bodies) = start_endpoint(StatusCode::BAD_GATEWAY).await;
        let storage = storage_with_endpoint(Some(&endpoint)).await;
        let client = ReportClient::new(storage, None, Duration::from_secs(5)).unwrap();

        match client.request(&request()).await {
            Err(ReportError::Status { status, body }) => {
                assert_eq!(status, 502);
                assert_eq!(body, "queued");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_callback_url_requires_site_url() {
        let settings: Arc<dyn SettingsStore> = Arc::new(DuckDbStorage::in_memory().unwrap());
        let client = ReportClient::new(settings, None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.callback_url(), None);
    }
}
