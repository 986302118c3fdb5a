//! Outgoing mail. With no SMTP host configured every send is logged and dropped.

use std::sync::Arc;

use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SmtpConfig;

const DEFAULT_FROM: &str = "noreply@juniper.local";
const VERIFICATION_SUBJECT: &str = "Verify your email address";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid mailbox {address}: {source}")]
    Address {
        address: String,
        source: lettre::address::AddressError,
    },
    #[error("failed to configure SMTP transport: {0}")]
    Transport(#[source] lettre::transport::smtp::Error),
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("failed to send mail: {0}")]
    Send(#[source] lettre::transport::smtp::Error),
}

#[derive(Clone)]
pub struct Mailer {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
    site_url: String,
}

impl Mailer {
    pub fn new(config: &SmtpConfig, site_url: &str) -> Result<Self, MailError> {
        let from_address = config
            .from
            .clone()
            .or_else(|| config.username.clone().filter(|name| name.contains('@')))
            .unwrap_or_else(|| String::from(DEFAULT_FROM));
        let from = parse_mailbox(&from_address)?;

        let transport = if config.host.trim().is_empty() {
            warn!("SMTP host not configured; mail is logged instead of sent");
            None
        } else {
            let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(MailError::Transport)?;
            if let Some(port) = config.port {
                builder = builder.port(port);
            }
            if let (Some(username), Some(password)) = (&config.username, &config.password) {
                builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
            }
            info!(host = %config.host, port = ?config.port, "SMTP transport configured");
            Some(Arc::new(builder.build()))
        };

        Ok(Self {
            transport,
            from,
            site_url: site_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub fn verification_link(&self, username: &str, token: &str) -> String {
        format!(
            "{}/verify?token={}&username={}",
            self.site_url,
            utf8_percent_encode(token, NON_ALPHANUMERIC),
            utf8_percent_encode(username, NON_ALPHANUMERIC)
        )
    }

    pub async fn send_verification(
        &self,
        to: &str,
        username: &str,
        token: &str,
    ) -> Result<(), MailError> {
        let body = format!(
            "Please verify your email address by clicking the link below:\n\n{}\n",
            self.verification_link(username, token)
        );
        self.send(to, VERIFICATION_SUBJECT, body).await
    }

    async fn send(&self, to: &str, subject: &str, body: String) -> Result<(), MailError> {
        let Some(transport) = &self.transport else {
            info!(recipient = %to, subject, "mail delivery disabled; skipping send");
            return Ok(());
        };

        let message = Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(to)?)
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)?;

        transport.send(message).await.map_err(MailError::Send)?;
        info!(recipient = %to, subject, "mail sent");
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse::<Mailbox>().map_err(|source| MailError::Address {
        address: address.to_string(),
        source,
    })
}
