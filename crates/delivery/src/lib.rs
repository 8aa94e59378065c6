//! `reportworks-delivery` — hands finished artifacts to the mailer capability.
//!
//! Mail transport stays behind the [`Mailer`] trait so the pool can run
//! against a recording fake in tests; [`SmtpMailer`] is the production
//! implementation.

pub mod mailer;
pub mod message;

pub use mailer::{DeliveryReceipt, Mailer, MailerError, SmtpConfig, SmtpMailer};
pub use message::{attachment_filename, compose_report_mail, ReportMail};
