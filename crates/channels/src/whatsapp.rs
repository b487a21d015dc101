//! WhatsApp Business Cloud API transport for plain text campaigns.

use crate::credentials::CredentialKind;
use crate::transport::{MessageTransport, TransportError, TransportFactory};
use async_trait::async_trait;
use campaign_core::config::WhatsAppConfig;
use campaign_core::types::{RecipientKind, TransportCredentials};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outgoing text message body for the `/messages` endpoint.
#[derive(Debug, Serialize)]
struct TextMessage<'a> {
    messaging_product: &'static str,
    recipient_type: &'static str,
    to: String,
    #[serde(rename = "type")]
    message_type: &'static str,
    text: TextBody<'a>,
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    body: &'a str,
    preview_url: bool,
}

/// Strip everything but digits from a phone number.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn message_payload<'a>(recipient: &str, kind: RecipientKind, text: &'a str) -> TextMessage<'a> {
    let (recipient_type, to) = match kind {
        RecipientKind::Individual => ("individual", normalize_phone(recipient)),
        // Group ids are opaque; pass them through untouched.
        RecipientKind::Group => ("group", recipient.trim().to_string()),
    };
    TextMessage {
        messaging_product: "whatsapp",
        recipient_type,
        to,
        message_type: "text",
        text: TextBody {
            body: text,
            preview_url: false,
        },
    }
}

fn auth_error(status: StatusCode) -> TransportError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TransportError::AuthFailed(format!("access token rejected ({})", status))
        }
        StatusCode::NOT_FOUND => TransportError::AuthFailed("phone number id not found".to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => TransportError::Timeout,
        other => TransportError::Unknown(format!("unexpected status {}", other)),
    }
}

fn send_error(status: StatusCode, recipient: &str) -> TransportError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
            TransportError::RecipientUnreachable(recipient.to_string())
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TransportError::AuthFailed(format!("access token rejected ({})", status))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => TransportError::Timeout,
        other => TransportError::Unknown(format!("unexpected status {}", other)),
    }
}

fn request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Unknown(err.to_string())
    }
}

/// One authenticated session against the cloud API.
pub struct WhatsAppCloudTransport {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    phone_number_id: String,
    closed: bool,
}

impl WhatsAppCloudTransport {
    pub fn new(
        client: reqwest::Client,
        config: &WhatsAppConfig,
        access_token: String,
        phone_number_id: String,
    ) -> Self {
        Self {
            client,
            base_url: format!(
                "{}/{}",
                config.api_base_url.trim_end_matches('/'),
                config.api_version
            ),
            access_token,
            phone_number_id,
            closed: false,
        }
    }

    fn phone_url(&self) -> String {
        format!("{}/{}", self.base_url, self.phone_number_id)
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.base_url, self.phone_number_id)
    }
}

#[async_trait]
impl MessageTransport for WhatsAppCloudTransport {
    async fn authenticate(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let response = self
            .client
            .get(self.phone_url())
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            return Err(auth_error(response.status()));
        }

        info!(
            phone_number_id = %self.phone_number_id,
            "WhatsApp cloud session authenticated"
        );
        Ok(())
    }

    async fn send(
        &mut self,
        recipient: &str,
        kind: RecipientKind,
        text: &str,
    ) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let payload = message_payload(recipient, kind, text);
        if payload.to.is_empty() {
            return Err(TransportError::RecipientUnreachable(recipient.to_string()));
        }

        debug!(to = %payload.to, body_len = text.len(), "Sending WhatsApp text message");

        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status.is_success() {
            metrics::counter!("whatsapp.messages_sent").increment(1);
            Ok(())
        } else {
            metrics::counter!("whatsapp.send_errors").increment(1);
            Err(send_error(status, recipient))
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

/// Builds cloud transports sharing one HTTP connection pool.
pub struct WhatsAppTransportFactory {
    client: reqwest::Client,
    config: WhatsAppConfig,
}

impl WhatsAppTransportFactory {
    pub fn new(config: WhatsAppConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TransportError::Unknown(e.to_string()))?;

        info!(
            base = %config.api_base_url,
            version = %config.api_version,
            "WhatsApp cloud transport factory initialized"
        );
        Ok(Self { client, config })
    }

    fn resolve(
        &self,
        credentials: &TransportCredentials,
    ) -> Result<(String, String), TransportError> {
        match CredentialKind::parse(credentials)? {
            CredentialKind::CloudApi {
                access_token,
                phone_number_id,
            } => Ok((access_token, phone_number_id)),
            CredentialKind::Token { token } => {
                let phone_number_id = self.config.default_phone_number_id.clone().ok_or_else(|| {
                    TransportError::InvalidCredentials(
                        "token credentials need a configured default phone number id".to_string(),
                    )
                })?;
                Ok((token, phone_number_id))
            }
            CredentialKind::LinkedDevice { account_id } => {
                warn!(
                    account = account_id.as_deref().unwrap_or("unknown"),
                    "Linked-device session credentials are not usable with the cloud API"
                );
                Err(TransportError::InvalidCredentials(
                    "linked-device session credentials are not supported".to_string(),
                ))
            }
        }
    }
}

#[async_trait]
impl TransportFactory for WhatsAppTransportFactory {
    fn validate(&self, credentials: &TransportCredentials) -> Result<(), TransportError> {
        self.resolve(credentials).map(|_| ())
    }

    async fn connect(
        &self,
        credentials: &TransportCredentials,
    ) -> Result<Box<dyn MessageTransport>, TransportError> {
        let (access_token, phone_number_id) = self.resolve(credentials)?;
        Ok(Box::new(WhatsAppCloudTransport::new(
            self.client.clone(),
            &self.config,
            access_token,
            phone_number_id,
        )))
    }

    fn name(&self) -> &'static str {
        "whatsapp_cloud"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn factory(default_number: Option<&str>) -> WhatsAppTransportFactory {
        WhatsAppTransportFactory::new(WhatsAppConfig {
            default_phone_number_id: default_number.map(str::to_string),
            ..WhatsAppConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+40 (712) 345-678"), "40712345678");
        assert_eq!(normalize_phone("abc"), "");
    }

    #[test]
    fn test_individual_payload_uses_digits() {
        let payload = message_payload("+1 555-0100", RecipientKind::Individual, "hi");
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["to"], "15550100");
        assert_eq!(value["type"], "text");
        assert_eq!(value["recipient_type"], "individual");
        assert_eq!(value["text"]["body"], "hi");
        assert_eq!(value["messaging_product"], "whatsapp");
    }

    #[test]
    fn test_group_payload_keeps_id() {
        let payload = message_payload(" family-chat ", RecipientKind::Group, "hi");
        assert_eq!(payload.to, "family-chat");
        assert_eq!(payload.recipient_type, "group");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            auth_error(StatusCode::UNAUTHORIZED),
            TransportError::AuthFailed(_)
        ));
        assert_eq!(auth_error(StatusCode::GATEWAY_TIMEOUT), TransportError::Timeout);
        assert_eq!(
            send_error(StatusCode::BAD_REQUEST, "+1555"),
            TransportError::RecipientUnreachable("+1555".into())
        );
        assert!(matches!(
            send_error(StatusCode::INTERNAL_SERVER_ERROR, "+1555"),
            TransportError::Unknown(_)
        ));
    }

    #[test]
    fn test_validate_credentials() {
        let cloud = TransportCredentials::new(json!({"access_token": "t", "phone_number_id": "9"}));
        let token = TransportCredentials::new(json!({"token": "t"}));
        let linked = TransportCredentials::new(json!({"noiseKey": {}, "me": {"id": "1:2@x"}}));

        assert!(factory(None).validate(&cloud).is_ok());
        assert!(factory(None).validate(&token).is_err());
        assert!(factory(Some("9")).validate(&token).is_ok());
        assert!(matches!(
            factory(Some("9")).validate(&linked),
            Err(TransportError::InvalidCredentials(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_transport_refuses_work() {
        let factory = factory(None);
        let creds = TransportCredentials::new(json!({"access_token": "t", "phone_number_id": "9"}));
        let mut transport = factory.connect(&creds).await.unwrap();
        transport.close().await;
        transport.close().await;
        assert_eq!(
            transport.send("+1555", RecipientKind::Individual, "hi").await,
            Err(TransportError::Closed)
        );
        assert_eq!(transport.authenticate().await, Err(TransportError::Closed));
    }
}
