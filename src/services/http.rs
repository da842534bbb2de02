//! HTTP registration backend over reqwest.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{
    CompleteRegistrationRequest, InitiateRegistrationRequest, RegistrationComplete,
    RegistrationService, ServiceAck, VerifyOtpRequest,
};
use crate::config::OnboardingConfig;
use crate::error::{ConfigError, ServiceError};

const INITIATE_PATH: &str = "/auth/register/initiate";
const RESEND_PATH: &str = "/auth/register/resend-otp";
const VERIFY_PATH: &str = "/auth/register/verify-otp";
const CHECK_EMAIL_PATH: &str = "/auth/check-email";
const COMPLETE_PATH: &str = "/auth/register/complete";

/// Envelope shared by the acknowledgement endpoints.
#[derive(Debug, Deserialize)]
struct AckBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ExistsBody {
    #[serde(alias = "taken")]
    exists: bool,
}

#[derive(Debug, Deserialize)]
struct CompleteBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    user: serde_json::Value,
    #[serde(default)]
    token: Option<String>,
}

/// Talks to the marketplace registration API.
pub struct HttpRegistrationService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRegistrationService {
    pub fn new(config: &OnboardingConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_ack<B: Serialize + ?Sized>(
        &self,
        path: &'static str,
        body: &B,
    ) -> Result<ServiceAck, ServiceError> {
        let (status, parsed): (_, AckBody) =
            read_json(path, self.client.post(self.url(path)).json(body)).await?;

        if !status.is_success() || !parsed.success {
            tracing::warn!(endpoint = path, status = %status, "Backend rejected request");
            return Err(rejection(status, parsed.message));
        }
        Ok(ServiceAck {
            message: parsed.message,
        })
    }
}

/// Send a request and decode its JSON body regardless of status.
async fn read_json<T: DeserializeOwned>(
    endpoint: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<(reqwest::StatusCode, T), ServiceError> {
    let response = request.send().await.map_err(|e| ServiceError::Transport {
        endpoint: endpoint.into(),
        reason: e.to_string(),
    })?;
    let status = response.status();
    let text = response.text().await.map_err(|e| ServiceError::Transport {
        endpoint: endpoint.into(),
        reason: e.to_string(),
    })?;

    match serde_json::from_str::<T>(&text) {
        Ok(parsed) => Ok((status, parsed)),
        Err(_) if !status.is_success() => Err(rejection(status, String::new())),
        Err(e) => Err(ServiceError::InvalidResponse {
            endpoint: endpoint.into(),
            reason: e.to_string(),
        }),
    }
}

fn rejection(status: reqwest::StatusCode, message: String) -> ServiceError {
    if message.trim().is_empty() {
        ServiceError::rejected(format!("Request failed ({status})"))
    } else {
        ServiceError::rejected(message)
    }
}

#[async_trait]
impl RegistrationService for HttpRegistrationService {
    async fn initiate_registration(
        &self,
        request: &InitiateRegistrationRequest,
    ) -> Result<ServiceAck, ServiceError> {
        self.post_ack(INITIATE_PATH, request).await
    }

    async fn resend_otp(
        &self,
        request: &InitiateRegistrationRequest,
    ) -> Result<ServiceAck, ServiceError> {
        self.post_ack(RESEND_PATH, request).await
    }

    async fn verify_otp(&self, request: &VerifyOtpRequest) -> Result<ServiceAck, ServiceError> {
        self.post_ack(VERIFY_PATH, request).await
    }

    async fn email_exists(&self, email: &str) -> Result<bool, ServiceError> {
        let request = self
            .client
            .get(self.url(CHECK_EMAIL_PATH))
            .query(&[("email", email)]);
        let (status, parsed): (_, ExistsBody) = read_json(CHECK_EMAIL_PATH, request).await?;
        if !status.is_success() {
            return Err(rejection(status, String::new()));
        }
        Ok(parsed.exists)
    }

    async fn complete_registration(
        &self,
        request: &CompleteRegistrationRequest,
    ) -> Result<RegistrationComplete, ServiceError> {
        let (status, parsed): (_, CompleteBody) = read_json(
            COMPLETE_PATH,
            self.client.post(self.url(COMPLETE_PATH)).json(request),
        )
        .await?;

        if !status.is_success() || !parsed.success {
            tracing::warn!(endpoint = COMPLETE_PATH, status = %status, "Registration rejected");
            return Err(rejection(status, parsed.message));
        }
        let token = parsed.token.ok_or_else(|| ServiceError::InvalidResponse {
            endpoint: COMPLETE_PATH.into(),
            reason: "missing token".into(),
        })?;
        Ok(RegistrationComplete {
            message: parsed.message,
            user: parsed.user,
            token,
        })
    }
}
