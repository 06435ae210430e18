use lettre::address::{Address, Envelope};
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use arxiv_messaging_core::Subscription;

use crate::error::NotificationError;

/// SMTP transport configuration, read once from the process environment at
/// startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub use_ssl: bool,
    pub default_sender: String,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            server: "smtp-relay.gmail.com".to_string(),
            port: 465,
            user: "smtp-relay@arxiv.org".to_string(),
            password: String::new(),
            use_ssl: true,
            default_sender: "arxiv-messaging@arxiv.org".to_string(),
        }
    }
}

/// TLS behavior derived from port and `use_ssl`: port 465 opens an
/// implicit-TLS connection, any other port starts plaintext and upgrades via
/// STARTTLS when `use_ssl` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    SslImplicit,
    StartTls,
    None,
}

impl SmtpSettings {
    pub fn tls_mode(&self) -> TlsMode {
        if self.port == 465 {
            TlsMode::SslImplicit
        } else if self.use_ssl {
            TlsMode::StartTls
        } else {
            TlsMode::None
        }
    }
}

enum BodyKind {
    Html,
    RawMime,
    Text,
}

fn classify_body(body: &str) -> BodyKind {
    let trimmed = body.trim_start();
    if trimmed.starts_with("<!DOCTYPE html") || trimmed.starts_with("<html") {
        BodyKind::Html
    } else if body.contains("Content-Type: multipart/mixed") {
        BodyKind::RawMime
    } else {
        BodyKind::Text
    }
}

enum TextEncoding {
    Ascii,
    Latin1,
    Utf8,
}

fn is_latin1(s: &str) -> bool {
    s.chars().all(|c| (c as u32) <= 0xFF)
}

/// Narrowest encoding that losslessly represents both subject and body.
fn narrowest_encoding(subject: &str, body: &str) -> TextEncoding {
    if subject.is_ascii() && body.is_ascii() {
        TextEncoding::Ascii
    } else if is_latin1(subject) && is_latin1(body) {
        TextEncoding::Latin1
    } else {
        TextEncoding::Utf8
    }
}

fn latin1_bytes(s: &str) -> Vec<u8> {
    s.chars().map(|c| c as u8).collect()
}

fn content_type(value: &str) -> Result<ContentType, NotificationError> {
    ContentType::parse(value)
        .map_err(|e| NotificationError::invalid_message(format!("content type '{value}': {e}")))
}

/// SMTP delivery provider.
///
/// Each send opens a connection, authenticates, sends and closes; there is no
/// pooling. The message shape is sniffed from the body: a full HTML document
/// becomes a multipart/alternative HTML mail, a pre-built multipart/mixed
/// digest is forwarded as the raw DATA payload, and anything else goes out as
/// text in the narrowest lossless charset.
pub struct EmailProvider {
    settings: SmtpSettings,
}

impl EmailProvider {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    pub async fn send(
        &self,
        subscription: &Subscription,
        body: &str,
        subject: &str,
        sender: &str,
        correlation_id: &str,
    ) -> bool {
        let Some(recipient) = subscription
            .email_address
            .as_deref()
            .filter(|a| !a.is_empty())
        else {
            tracing::error!(
                user_id = %subscription.user_id,
                subscription_id = %subscription.subscription_id,
                correlation_id,
                "email address not configured for subscription"
            );
            return false;
        };

        tracing::info!(
            recipient,
            subject,
            sender,
            smtp_server = %self.settings.server,
            smtp_port = self.settings.port,
            tls_mode = ?self.settings.tls_mode(),
            user_id = %subscription.user_id,
            subscription_id = %subscription.subscription_id,
            correlation_id,
            "email delivery initiated"
        );

        match self
            .try_send(recipient, body, subject, sender, correlation_id)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    recipient,
                    subject,
                    subscription_id = %subscription.subscription_id,
                    correlation_id,
                    "email delivered"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    recipient,
                    subject,
                    subscription_id = %subscription.subscription_id,
                    correlation_id,
                    "email delivery failed"
                );
                false
            }
        }
    }

    async fn try_send(
        &self,
        recipient: &str,
        body: &str,
        subject: &str,
        sender: &str,
        correlation_id: &str,
    ) -> Result<(), NotificationError> {
        let transport = self.build_transport()?;

        match classify_body(body) {
            BodyKind::RawMime => {
                // Pre-built digest already carries its own headers; hand it to
                // the server untouched.
                let envelope = self.raw_envelope(recipient)?;
                transport
                    .send_raw(&envelope, body.as_bytes())
                    .await
                    .map(|_| ())
                    .map_err(|e| self.classify_smtp_error(e, correlation_id))
            }
            kind => {
                let message = self.build_message(recipient, body, subject, sender, kind)?;
                transport
                    .send(message)
                    .await
                    .map(|_| ())
                    .map_err(|e| self.classify_smtp_error(e, correlation_id))
            }
        }
    }

    fn build_transport(
        &self,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotificationError> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(self.settings.server.as_str())
                .port(self.settings.port);

        builder = match self.settings.tls_mode() {
            TlsMode::SslImplicit => {
                let tls = TlsParameters::new(self.settings.server.clone())
                    .map_err(|e| NotificationError::tls(e.to_string()))?;
                builder.tls(Tls::Wrapper(tls))
            }
            TlsMode::StartTls => {
                let tls = TlsParameters::new(self.settings.server.clone())
                    .map_err(|e| NotificationError::tls(e.to_string()))?;
                builder.tls(Tls::Required(tls))
            }
            TlsMode::None => builder,
        };

        if !self.settings.user.is_empty() && !self.settings.password.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.settings.user.clone(),
                self.settings.password.clone(),
            ));
        }

        Ok(builder.build())
    }

    /// The event sender is rendered as From. Free-form senders that are not
    /// addresses become a display name on the configured default sender.
    fn sender_mailbox(&self, sender: &str) -> Result<Mailbox, NotificationError> {
        let effective = if sender.is_empty() {
            &self.settings.default_sender
        } else {
            sender
        };
        if let Ok(mailbox) = effective.parse::<Mailbox>() {
            return Ok(mailbox);
        }
        let default: Address = self.settings.default_sender.parse().map_err(|e| {
            NotificationError::invalid_config(format!(
                "default sender '{}': {e}",
                self.settings.default_sender
            ))
        })?;
        Ok(Mailbox::new(Some(effective.to_string()), default))
    }

    fn raw_envelope(&self, recipient: &str) -> Result<Envelope, NotificationError> {
        let from: Address = self.settings.default_sender.parse().map_err(|e| {
            NotificationError::invalid_config(format!(
                "default sender '{}': {e}",
                self.settings.default_sender
            ))
        })?;
        let to: Address = recipient
            .parse()
            .map_err(|e| NotificationError::invalid_message(format!("recipient '{recipient}': {e}")))?;
        Envelope::new(Some(from), vec![to])
            .map_err(|e| NotificationError::invalid_message(e.to_string()))
    }

    fn build_message(
        &self,
        recipient: &str,
        body: &str,
        subject: &str,
        sender: &str,
        kind: BodyKind,
    ) -> Result<Message, NotificationError> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| NotificationError::invalid_message(format!("recipient '{recipient}': {e}")))?;
        let from = self.sender_mailbox(sender)?;
        let builder = Message::builder().from(from).to(to).subject(subject);

        let message = match kind {
            BodyKind::Html => {
                let html_part = SinglePart::builder()
                    .header(content_type("text/html; charset=utf-8")?)
                    .header(ContentTransferEncoding::QuotedPrintable)
                    .body(body.to_string());
                builder.multipart(MultiPart::alternative().singlepart(html_part))
            }
            _ => {
                let part = match narrowest_encoding(subject, body) {
                    TextEncoding::Ascii => SinglePart::builder()
                        .header(content_type("text/plain; charset=us-ascii")?)
                        .header(ContentTransferEncoding::SevenBit)
                        .body(body.to_string()),
                    TextEncoding::Latin1 => SinglePart::builder()
                        .header(content_type("text/plain; charset=iso-8859-1")?)
                        .header(ContentTransferEncoding::QuotedPrintable)
                        .body(latin1_bytes(body)),
                    TextEncoding::Utf8 => SinglePart::builder()
                        .header(content_type("text/plain; charset=utf-8")?)
                        .header(ContentTransferEncoding::EightBit)
                        .body(body.to_string()),
                };
                builder.singlepart(part)
            }
        };

        message.map_err(|e| NotificationError::invalid_message(e.to_string()))
    }

    fn classify_smtp_error(
        &self,
        error: lettre::transport::smtp::Error,
        correlation_id: &str,
    ) -> NotificationError {
        let kind = if error.is_permanent() {
            "permanent"
        } else if error.is_transient() {
            "transient"
        } else if error.is_client() {
            "client"
        } else if error.is_timeout() {
            "timeout"
        } else {
            "connection"
        };
        tracing::error!(
            error = %error,
            kind,
            smtp_server = %self.settings.server,
            smtp_user = %self.settings.user,
            correlation_id,
            "smtp send failed"
        );
        NotificationError::invalid_message(format!("{kind} smtp failure: {error}"))
    }
}
