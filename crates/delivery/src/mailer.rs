//! Mailer capability and the SMTP implementation.

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::info;

use reportworks_reports::BuiltReport;

use crate::message::ReportMail;

/// Mailer failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MailerError {
    /// A mail address did not parse; retrying cannot help.
    #[error("invalid mail address: {0}")]
    Address(String),
    /// Message assembly failed; retrying cannot help.
    #[error("failed to compose message: {0}")]
    Compose(String),
    /// Provider/network fault; safe to retry.
    #[error("smtp transport error: {0}")]
    Transport(String),
}

impl MailerError {
    /// Whether a retry can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, MailerError::Transport(_))
    }
}

/// Provider acknowledgement of a handed-off mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Provider response code, when the transport exposes one.
    pub provider_response: Option<String>,
}

/// Mail transport capability.
///
/// Implementations must be safe to share across worker threads.
pub trait Mailer: Send + Sync {
    fn send(&self, mail: &ReportMail) -> Result<DeliveryReceipt, MailerError>;
}

/// SMTP relay configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub relay: String,
    pub username: String,
    pub password: String,
    /// Sender address for all report mails.
    pub from: String,
}

/// Production mailer over an SMTP relay.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self, MailerError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| MailerError::Address(format!("{}: {e}", config.from)))?;

        let transport = SmtpTransport::relay(&config.relay)
            .map_err(|e| MailerError::Transport(e.to_string()))?
            .credentials(Credentials::new(config.username, config.password))
            .build();

        Ok(Self { transport, from })
    }
}

fn build_message(from: &Mailbox, mail: &ReportMail) -> Result<Message, MailerError> {
    let to = mail
        .to
        .parse::<Mailbox>()
        .map_err(|e| MailerError::Address(format!("{}: {e}", mail.to)))?;
    let content_type = BuiltReport::CONTENT_TYPE
        .parse::<ContentType>()
        .map_err(|e| MailerError::Compose(e.to_string()))?;

    let attachment =
        Attachment::new(mail.attachment_name.clone()).body(mail.attachment.clone(), content_type);

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(mail.subject.clone())
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::html(mail.html_body.clone()))
                .singlepart(attachment),
        )
        .map_err(|e| MailerError::Compose(e.to_string()))
}

impl Mailer for SmtpMailer {
    fn send(&self, mail: &ReportMail) -> Result<DeliveryReceipt, MailerError> {
        let message = build_message(&self.from, mail)?;
        let response = self
            .transport
            .send(&message)
            .map_err(|e| MailerError::Transport(e.to_string()))?;

        info!(to = %mail.to, attachment = %mail.attachment_name, "report mail handed off");
        Ok(DeliveryReceipt {
            provider_response: Some(response.code().to_string()),
        })
    }
}
