//! HTTP client for the cloud license authority.

use async_trait::async_trait;
use chrono::Utc;
use entitle_core::config::CloudConfig;
use entitle_core::license::{LicenseGrant, key_prefix};
use entitle_core::ports::{LicenseStore, RemoteAuthority};
use entitle_core::remote::{
    ActivationCheck, RemoteError, RemoteValidation, TrialEligibility, TrialGrant,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    license_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    valid: bool,
    #[serde(default)]
    data: Option<LicenseGrant>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct ActivationRequest<'a> {
    license_key: &'a str,
    machine_fingerprint: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_info: Option<&'a serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ActivateResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct TrialRequest<'a> {
    machine_id: &'a str,
}

/// Error bodies carry their text in `message` or `error`.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Remote authority over JSON/HTTPS.
///
/// When the cloud cannot answer a validation, the optional fallback store
/// supplies the locally cached license instead.
pub struct HttpRemoteAuthority {
    config: CloudConfig,
    client: reqwest::Client,
    fallback: Option<Arc<dyn LicenseStore>>,
}

impl HttpRemoteAuthority {
    pub fn new(config: CloudConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.probe_timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "HTTP client setup failed, using per-request timeouts only");
                reqwest::Client::new()
            });

        Self {
            config,
            client,
            fallback: None,
        }
    }

    /// Answer validations from `store` when the cloud is unreachable.
    pub fn with_fallback(mut self, store: Arc<dyn LicenseStore>) -> Self {
        self.fallback = Some(store);
        self
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.config.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// POST with the retry budget: timeouts and connection failures are
    /// retried with linear back-off, any HTTP answer is final.
    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, RemoteError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path);
        let attempts = self.config.max_retries + 1;
        let mut errors = Vec::new();

        for attempt in 1..=attempts {
            debug!(url = %url, attempt, "Calling license server");

            let call = self
                .request(reqwest::Method::POST, &url)
                .timeout(self.config.request_timeout())
                .json(body);
            match call.send().await {
                Ok(response) => return Self::decode(response).await,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    warn!(url = %url, attempt, error = %e, "License server call failed");
                    errors.push(format!("attempt {attempt}: {e}"));
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_delay() * attempt).await;
                    }
                }
                Err(e) => {
                    errors.push(format!("attempt {attempt}: {e}"));
                    return Err(RemoteError::Unreachable {
                        attempts: attempt,
                        errors,
                    });
                }
            }
        }

        Err(RemoteError::Unreachable { attempts, errors })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| RemoteError::Protocol(e.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let message = body.message.or(body.error).unwrap_or(text);

        if status.is_client_error() {
            Err(RemoteError::Rejected {
                status: status.as_u16(),
                message,
            })
        } else if status.is_server_error() {
            Err(RemoteError::Server {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(RemoteError::Protocol(format!("unexpected status {status}")))
        }
    }

    async fn offline_fallback(&self, key: &str, mut errors: Vec<String>) -> RemoteValidation {
        let Some(store) = &self.fallback else {
            return RemoteValidation::offline(None, false, errors);
        };

        match store.get_license_by_key(key).await {
            Ok(Some(license)) => {
                let valid = license.is_usable(Utc::now());
                info!(key = key_prefix(key), valid, "Answered from local cache while offline");
                RemoteValidation::offline(Some(license), valid, errors)
            }
            Ok(None) => RemoteValidation::offline(None, false, errors),
            Err(e) => {
                errors.push(format!("local fallback: {e}"));
                RemoteValidation::offline(None, false, errors)
            }
        }
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn is_online(&self) -> bool {
        let url = self.config.probe_endpoint();
        match self
            .request(reqwest::Method::GET, &url)
            .timeout(self.config.probe_timeout())
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!(url = %url, error = %e, "Connectivity probe failed");
                false
            }
        }
    }

    async fn validate_license(&self, key: &str) -> RemoteValidation {
        if !self.is_online().await {
            warn!(key = key_prefix(key), "License server offline, using local data");
            let errors = vec![format!(
                "license server unreachable: {}",
                self.config.probe_endpoint()
            )];
            return self.offline_fallback(key, errors).await;
        }

        let request = ValidateRequest { license_key: key };
        match self
            .post_json::<_, ValidateResponse>("/licenses/validate", &request)
            .await
        {
            Ok(response) => {
                info!(key = key_prefix(key), valid = response.valid, "Cloud validation answered");
                let grant = if response.valid { response.data } else { None };
                RemoteValidation::cloud(response.valid, grant, response.message)
            }
            Err(e) if e.is_definitive() => {
                info!(key = key_prefix(key), error = %e, "Cloud rejected license");
                RemoteValidation::cloud(false, None, Some(e.to_string()))
            }
            Err(RemoteError::Unreachable { errors, .. }) => {
                self.offline_fallback(key, errors).await
            }
            Err(e) => {
                warn!(key = key_prefix(key), error = %e, "Cloud validation failed, using local data");
                self.offline_fallback(key, vec![e.to_string()]).await
            }
        }
    }

    async fn check_activation(
        &self,
        key: &str,
        fingerprint: &str,
    ) -> Result<ActivationCheck, RemoteError> {
        let request = ActivationRequest {
            license_key: key,
            machine_fingerprint: fingerprint,
            device_info: None,
        };
        self.post_json("/licenses/check-activation", &request).await
    }

    async fn record_activation(
        &self,
        key: &str,
        fingerprint: &str,
        device_info: &serde_json::Value,
    ) -> Result<(), RemoteError> {
        let request = ActivationRequest {
            license_key: key,
            machine_fingerprint: fingerprint,
            device_info: Some(device_info),
        };
        let response: ActivateResponse = self.post_json("/licenses/activate", &request).await?;

        if response.success {
            Ok(())
        } else {
            Err(RemoteError::Refused(
                response
                    .error
                    .unwrap_or_else(|| "activation refused".to_string()),
            ))
        }
    }

    async fn check_trial_eligibility(
        &self,
        machine_id: &str,
    ) -> Result<TrialEligibility, RemoteError> {
        self.post_json("/trials/eligibility", &TrialRequest { machine_id })
            .await
    }

    async fn generate_trial_license(&self, machine_id: &str) -> Result<TrialGrant, RemoteError> {
        self.post_json("/trials", &TrialRequest { machine_id }).await
    }
}
