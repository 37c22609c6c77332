use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::auth::{AuthSession, AuthState, Credentials};
use super::error::{ApiError, ApiResult};
use super::types::{
    BatchRequest, BatchResponse, CourseResponse, CourseVersion, RefreshRequest, TokenPair,
};

/// REST client for the course backend. Every call carries the session's
/// bearer token; a 401 triggers one shared refresh and a single retry.
pub struct ApiClient {
    http: Client,
    base_url: String,
    auth: Arc<AuthSession>,
}

impl ApiClient {
    pub fn new(base_url: &str, auth: Arc<AuthSession>, timeout: Duration) -> ApiResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    #[cfg(test)]
    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn post_batch(&self, batch: &BatchRequest) -> ApiResult<BatchResponse> {
        let url = self.url("/positions/batch");
        self.send_authorized(|http| http.post(&url).json(batch)).await
    }

    pub async fn fetch_course(&self, slug: &str) -> ApiResult<CourseResponse> {
        let url = self.url(&format!("/courses/{}", slug));
        self.send_authorized(|http| http.get(&url)).await
    }

    pub async fn fetch_course_version(&self, slug: &str) -> ApiResult<u64> {
        let url = self.url(&format!("/courses/{}/version", slug));
        let version: CourseVersion = self.send_authorized(|http| http.get(&url)).await?;
        Ok(version.data_version)
    }

    async fn send_authorized<T, F>(&self, build: F) -> ApiResult<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let token = self.auth.access_token().ok_or(ApiError::SessionExpired)?;
        let response = build(&self.http).bearer_auth(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return decode(response).await;
        }

        debug!("401 from {}, refreshing credentials", response.url());
        self.refresh_after_unauthorized(&token).await?;

        let token = self.auth.access_token().ok_or(ApiError::SessionExpired)?;
        let response = build(&self.http).bearer_auth(&token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Still unauthorized after refresh, ending session");
            self.auth.expire();
            return Err(ApiError::SessionExpired);
        }
        decode(response).await
    }

    /// Refreshes the credentials unless another caller already replaced the
    /// token that was rejected. Concurrent 401s on the same token therefore
    /// produce a single refresh request.
    async fn refresh_after_unauthorized(&self, rejected_token: &str) -> ApiResult<()> {
        let _guard = self.auth.lock_refresh().await;

        let credentials = match self.auth.current() {
            AuthState::Expired => return Err(ApiError::SessionExpired),
            AuthState::Active(c) if c.access_token != rejected_token => {
                debug!("Credentials already refreshed by a concurrent request");
                return Ok(());
            }
            AuthState::Active(c) => c,
        };

        match self.request_refresh(&credentials.refresh_token).await {
            Ok(fresh) => {
                info!("Access token refreshed");
                self.auth.update(fresh);
                Ok(())
            }
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                self.auth.expire();
                Err(ApiError::SessionExpired)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> ApiResult<Credentials> {
        let response = self
            .http
            .post(self.url("/auth/refresh"))
            .json(&RefreshRequest {
                refresh_token: refresh_token.to_string(),
            })
            .send()
            .await?;
        let tokens: TokenPair = decode(response).await?;
        Ok(Credentials {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}
