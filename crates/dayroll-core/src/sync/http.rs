use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::SCHEMA_VERSION;
use super::remote::{RemoteChange, RemoteDocument, RemoteReplica};
use super::session::{Identity, Session};
use crate::error::SyncError;
use crate::state::AppState;

const TABLE_PATH: &str = "rest/v1/user_data";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Remote replica stored as one row per identity in a PostgREST
/// `user_data` table.
pub struct HttpRemote {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Row {
    user_id: String,
    data: serde_json::Value,
    #[serde(default)]
    schema_version: Option<u32>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct UpsertBody<'a> {
    user_id: &'a str,
    data: &'a AppState,
    schema_version: u32,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    fn table_url(&self) -> String {
        format!("{}/{TABLE_PATH}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, session: &Session) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.table_url())
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", session.access_token))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, SyncError> {
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_http_error(status, &body))
    }
}

fn map_transport_error(err: reqwest::Error) -> SyncError {
    if err.is_decode() {
        SyncError::MalformedRemote(err.to_string())
    } else {
        SyncError::NetworkUnavailable(err.to_string())
    }
}

fn map_http_error(status: reqwest::StatusCode, body: &str) -> SyncError {
    let message = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => SyncError::AuthRequired,
        code => SyncError::Remote {
            status: code,
            message,
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.to_string())
}

fn into_document(row: Row) -> Result<RemoteDocument, SyncError> {
    let data: AppState = serde_json::from_value(row.data)
        .map_err(|err| SyncError::MalformedRemote(format!("document data: {err}")))?;
    Ok(RemoteDocument {
        identity: Identity::from(row.user_id),
        data,
        schema_version: row.schema_version.unwrap_or(0),
        updated_at: row.updated_at,
    })
}

#[async_trait]
impl RemoteReplica for HttpRemote {
    #[tracing::instrument(skip(self, session), fields(identity = %session.identity))]
    async fn fetch(&self, session: &Session) -> Result<Option<RemoteDocument>, SyncError> {
        let request = self.request(reqwest::Method::GET, session).query(&[
            ("select", "user_id,data,schema_version,updated_at".to_string()),
            ("user_id", format!("eq.{}", session.identity)),
        ]);
        let response = match self.send(request).await {
            Ok(response) => response,
            Err(SyncError::Remote { status: 404, .. }) => {
                debug!("remote answered 404; no document");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let rows: Vec<Row> = response
            .json()
            .await
            .map_err(|err| SyncError::MalformedRemote(err.to_string()))?;

        let Some(row) = rows.into_iter().next() else {
            debug!("no remote document");
            return Ok(None);
        };
        into_document(row).map(Some)
    }

    #[tracing::instrument(skip(self, session, data), fields(identity = %session.identity))]
    async fn upsert(&self, session: &Session, data: &AppState) -> Result<DateTime<Utc>, SyncError> {
        let body = UpsertBody {
            user_id: session.identity.as_str(),
            data,
            schema_version: SCHEMA_VERSION,
        };
        let request = self
            .request(reqwest::Method::POST, session)
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&body);
        let rows: Vec<Row> = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|err| SyncError::MalformedRemote(err.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::MalformedRemote("upsert returned no row".to_string()))?;
        info!(updated_at = %row.updated_at, "remote document stored");
        Ok(row.updated_at)
    }

    #[tracing::instrument(skip(self, session), fields(identity = %session.identity))]
    async fn delete(&self, session: &Session) -> Result<(), SyncError> {
        let request = self
            .request(reqwest::Method::DELETE, session)
            .query(&[("user_id", format!("eq.{}", session.identity))]);
        self.send(request).await?;
        info!("remote document deleted");
        Ok(())
    }

    fn subscribe(&self, _session: &Session) -> Option<broadcast::Receiver<RemoteChange>> {
        None
    }
}
