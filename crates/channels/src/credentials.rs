//! Recognised credential file shapes.

use crate::transport::TransportError;
use campaign_core::types::TransportCredentials;

/// Typed view over an opaque credential blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialKind {
    /// Business cloud API access token bound to a sending phone number.
    CloudApi {
        access_token: String,
        phone_number_id: String,
    },
    /// Bare bearer token; the sending number comes from configuration.
    Token { token: String },
    /// Linked-device session export (`noiseKey` + `me.id`).
    LinkedDevice { account_id: Option<String> },
}

impl CredentialKind {
    pub fn parse(credentials: &TransportCredentials) -> Result<Self, TransportError> {
        let value = credentials.as_value();
        if !value.is_object() {
            return Err(TransportError::InvalidCredentials(
                "credentials must be a JSON object".to_string(),
            ));
        }

        if let Some(access_token) = non_empty(credentials.str_field("access_token")) {
            let phone_number_id = non_empty(credentials.str_field("phone_number_id"))
                .ok_or_else(|| {
                    TransportError::InvalidCredentials(
                        "access_token requires phone_number_id".to_string(),
                    )
                })?;
            return Ok(CredentialKind::CloudApi {
                access_token: access_token.to_string(),
                phone_number_id: phone_number_id.to_string(),
            });
        }

        if let Some(token) = non_empty(credentials.str_field("token")) {
            return Ok(CredentialKind::Token {
                token: token.to_string(),
            });
        }

        if value.get("noiseKey").is_some() {
            return Ok(CredentialKind::LinkedDevice {
                account_id: account_id(credentials),
            });
        }

        Err(TransportError::InvalidCredentials(
            "unrecognised credential format".to_string(),
        ))
    }
}

/// Account number from a linked-device `me.id` such as `40712345678:12@s.whatsapp.net`.
pub fn account_id(credentials: &TransportCredentials) -> Option<String> {
    let id = credentials.as_value().get("me")?.get("id")?.as_str()?;
    let number = id.split([':', '@']).next()?;
    non_empty(Some(number)).map(str::to_string)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn creds(value: serde_json::Value) -> TransportCredentials {
        TransportCredentials::new(value)
    }

    #[test]
    fn test_cloud_api_credentials() {
        let kind =
            CredentialKind::parse(&creds(json!({"access_token": "EAAG", "phone_number_id": "1099"})))
                .unwrap();
        assert_eq!(
            kind,
            CredentialKind::CloudApi {
                access_token: "EAAG".into(),
                phone_number_id: "1099".into()
            }
        );
    }

    #[test]
    fn test_access_token_without_number_rejected() {
        let err = CredentialKind::parse(&creds(json!({"access_token": "EAAG"}))).unwrap_err();
        assert!(matches!(err, TransportError::InvalidCredentials(_)));
    }

    #[test]
    fn test_token_credentials() {
        let kind = CredentialKind::parse(&creds(json!({"token": "abc"}))).unwrap();
        assert_eq!(kind, CredentialKind::Token { token: "abc".into() });
    }

    #[test]
    fn test_linked_device_credentials() {
        let kind = CredentialKind::parse(&creds(json!({
            "noiseKey": {"private": "x", "public": "y"},
            "me": {"id": "40712345678:12@s.whatsapp.net", "name": "Ana"}
        })))
        .unwrap();
        assert_eq!(
            kind,
            CredentialKind::LinkedDevice {
                account_id: Some("40712345678".into())
            }
        );
    }

    #[test]
    fn test_unknown_shapes_rejected() {
        assert!(CredentialKind::parse(&creds(json!({"foo": "bar"}))).is_err());
        assert!(CredentialKind::parse(&creds(json!("just a string"))).is_err());
        assert!(CredentialKind::parse(&creds(json!({"token": "  "}))).is_err());
    }
}
