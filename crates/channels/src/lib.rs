//! Messaging transports: the capability a campaign runner uses to log in to
//! a messaging surface and deliver one message to one addressee.

#![warn(clippy::unwrap_used)]

pub mod credentials;
pub mod scripted;
pub mod transport;
pub mod whatsapp;

pub use credentials::CredentialKind;
pub use scripted::{AuthScript, ScriptedTransportFactory, SendLog, SendRecord};
pub use transport::{MessageTransport, TransportError, TransportFactory};
pub use whatsapp::{WhatsAppCloudTransport, WhatsAppTransportFactory};
