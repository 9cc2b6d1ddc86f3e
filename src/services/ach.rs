//! Client for the ACH transfer processor.
//!
//! Every call is two explicit steps: exchange client credentials for an
//! [`AccessToken`], then make the authenticated request with it. Each step
//! reports its own failure and nothing is retried.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{header::LOCATION, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    models::PaymentStatus,
};

const PROCESSOR_MEDIA_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn to_payment_status(self) -> PaymentStatus {
        match self {
            Self::Pending => PaymentStatus::Pending,
            Self::Processing => PaymentStatus::Processing,
            Self::Completed => PaymentStatus::Succeeded,
            Self::Failed | Self::Cancelled => PaymentStatus::Failed,
        }
    }
}

impl FromStr for TransferStatus {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" | "processed" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(AppError::Dependency(format!(
                "ACH processor returned unknown transfer status '{other}'."
            ))),
        }
    }
}

/// Result of the credential exchange; required by every authenticated call.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferSnapshot {
    pub id: String,
    pub status: TransferStatus,
    pub raw: Value,
}

/// Anything that can report the processor-side status of a transfer.
#[async_trait]
pub trait TransferStatusSource: Send + Sync {
    async fn transfer_status(&self, transfer_id: &str) -> AppResult<TransferSnapshot>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

pub struct AchClient<'a> {
    http_client: &'a Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl<'a> AchClient<'a> {
    pub fn from_config(http_client: &'a Client, config: &AppConfig) -> AppResult<Self> {
        let (Some(base_url), Some(client_id), Some(client_secret)) = (
            config.ach_api_base_url.as_deref(),
            config.ach_client_id.as_deref(),
            config.ach_client_secret.as_deref(),
        ) else {
            return Err(AppError::Dependency(
                "ACH processor is not configured.".to_string(),
            ));
        };

        Ok(Self {
            http_client,
            base_url: base_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// Step one: OAuth2 client-credentials exchange.
    pub async fn fetch_access_token(&self) -> AppResult<AccessToken> {
        let response = self
            .http_client
            .post(format!("{}/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|error| {
                tracing::error!(error = %error, "ACH token request failed");
                AppError::Dependency("ACH token exchange failed.".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Dependency(format!(
                "ACH token exchange rejected ({status})."
            )));
        }

        let body: TokenResponse = response.json().await.map_err(|error| {
            AppError::Dependency(format!("ACH token response unreadable: {error}"))
        })?;

        Ok(AccessToken {
            token: body.access_token,
            expires_at: Utc::now() + Duration::seconds(body.expires_in.max(0)),
        })
    }

    /// Step two: look up a transfer.
    pub async fn get_transfer(
        &self,
        token: &AccessToken,
        transfer_id: &str,
    ) -> AppResult<TransferSnapshot> {
        let body = self
            .authorized_get(token, &format!("{}/transfers/{transfer_id}", self.base_url))
            .await?;
        parse_transfer(transfer_id, body)
    }

    /// Step two: initiate a transfer between two funding sources. Returns
    /// the new transfer id taken from the `Location` header.
    pub async fn create_transfer(
        &self,
        token: &AccessToken,
        source_funding_source: &str,
        destination_funding_source: &str,
        amount: f64,
        currency: &str,
        payment_id: &str,
    ) -> AppResult<String> {
        let response = self
            .http_client
            .post(format!("{}/transfers", self.base_url))
            .bearer_auth(&token.token)
            .header("Accept", PROCESSOR_MEDIA_TYPE)
            .json(&json!({
                "_links": {
                    "source": { "href": source_funding_source },
                    "destination": { "href": destination_funding_source },
                },
                "amount": {
                    "currency": currency.to_uppercase(),
                    "value": format!("{amount:.2}"),
                },
                "metadata": { "payment_id": payment_id },
            }))
            .send()
            .await
            .map_err(|error| {
                tracing::error!(error = %error, "ACH transfer request failed");
                AppError::Dependency("ACH transfer request failed.".to_string())
            })?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Dependency(format!(
                "ACH transfer rejected ({status}): {detail}"
            )));
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(transfer_id_from_location)
            .ok_or_else(|| {
                AppError::Dependency("ACH transfer response had no Location header.".to_string())
            })
    }

    /// Step two: the account's capabilities as reported by the processor.
    pub async fn get_account_capabilities(&self, token: &AccessToken) -> AppResult<Value> {
        self.authorized_get(token, &format!("{}/capabilities", self.base_url))
            .await
    }

    async fn authorized_get(&self, token: &AccessToken, url: &str) -> AppResult<Value> {
        if token.is_expired(Utc::now()) {
            return Err(AppError::Dependency(
                "ACH access token expired before use.".to_string(),
            ));
        }

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&token.token)
            .header("Accept", PROCESSOR_MEDIA_TYPE)
            .send()
            .await
            .map_err(|error| {
                tracing::error!(error = %error, url, "ACH request failed");
                AppError::Dependency("ACH request failed.".to_string())
            })?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .unwrap_or(json!({"error": "failed to parse response"}));

        if status.is_success() {
            Ok(body)
        } else {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown ACH processor error");
            Err(AppError::Dependency(format!(
                "ACH processor error ({status}): {message}"
            )))
        }
    }
}

#[async_trait]
impl TransferStatusSource for AchClient<'_> {
    async fn transfer_status(&self, transfer_id: &str) -> AppResult<TransferSnapshot> {
        let token = self.fetch_access_token().await?;
        self.get_transfer(&token, transfer_id).await
    }
}

fn parse_transfer(transfer_id: &str, body: Value) -> AppResult<TransferSnapshot> {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            AppError::Dependency("ACH transfer response had no status.".to_string())
        })?
        .parse::<TransferStatus>()?;
    let id = body
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(transfer_id)
        .to_string();

    Ok(TransferSnapshot {
        id,
        status,
        raw: body,
    })
}

fn transfer_id_from_location(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToOwned::to_owned)
}
