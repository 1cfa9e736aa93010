//! Run summary email.
//!
//! The dispatcher never fails outward: every problem is logged and reported
//! through [`DispatchOutcome`] only.

use crate::core::config::EmailSection;
use crate::core::error::NotificationError;
use flate2::Compression;
use flate2::write::GzEncoder;
use lettre::address::{Address, Envelope};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::client::SmtpConnection;
use lettre::transport::smtp::commands::Vrfy;
use lettre::transport::smtp::extension::ClientId;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Answer to a `VRFY` for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyReply {
    /// 250: the address is known.
    Verified,
    /// 252: the server will not verify but will accept the message.
    CannotVerify,
    /// Anything else; the recipient is dropped.
    Rejected(String),
}

impl VerifyReply {
    pub fn from_code(code: u16, text: &str) -> Self {
        match code {
            250 => VerifyReply::Verified,
            252 => VerifyReply::CannotVerify,
            other => VerifyReply::Rejected(format!("{} {}", other, text).trim().to_string()),
        }
    }
}

/// One open mail session.
pub trait MailTransport {
    fn verify(&mut self, address: &str) -> VerifyReply;

    fn send(
        &mut self,
        from: &str,
        recipients: &[String],
        message: &[u8],
    ) -> Result<(), NotificationError>;

    fn close(&mut self) {}
}

/// Opens mail sessions.
pub trait MailConnector {
    fn connect(
        &self,
        server: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn MailTransport>, NotificationError>;
}

/// Plain SMTP through `lettre`'s low-level connection.
pub struct SmtpConnector;

impl MailConnector for SmtpConnector {
    fn connect(
        &self,
        server: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn MailTransport>, NotificationError> {
        let conn = SmtpConnection::connect(
            (server, port),
            Some(timeout),
            &ClientId::default(),
            None,
            None,
        )
        .map_err(|e| NotificationError::Smtp(e.to_string()))?;
        Ok(Box::new(SmtpMailTransport { conn }))
    }
}

struct SmtpMailTransport {
    conn: SmtpConnection,
}

impl MailTransport for SmtpMailTransport {
    fn verify(&mut self, address: &str) -> VerifyReply {
        match self.conn.command(Vrfy::new(address.to_string())) {
            Ok(response) => {
                let code = response.code().to_string().parse::<u16>().unwrap_or(0);
                VerifyReply::from_code(code, &response.message().collect::<Vec<_>>().join(" "))
            }
            Err(e) => match e.status() {
                Some(code) => {
                    VerifyReply::from_code(code.to_string().parse::<u16>().unwrap_or(0), &e.to_string())
                }
                None => VerifyReply::Rejected(e.to_string()),
            },
        }
    }

    fn send(
        &mut self,
        from: &str,
        recipients: &[String],
        message: &[u8],
    ) -> Result<(), NotificationError> {
        let envelope = envelope(from, recipients)?;
        self.conn
            .send(&envelope, message)
            .map_err(|e| NotificationError::Smtp(e.to_string()))?;
        Ok(())
    }

    fn close(&mut self) {
        if let Err(e) = self.conn.quit() {
            debug!("SMTP quit failed: {}", e);
        }
    }
}

fn parse_address(address: &str) -> Result<Address, NotificationError> {
    address
        .trim()
        .parse::<Address>()
        .map_err(|e| NotificationError::Address {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

fn envelope(from: &str, recipients: &[String]) -> Result<Envelope, NotificationError> {
    let to = recipients
        .iter()
        .map(|r| parse_address(r))
        .collect::<Result<Vec<_>, _>>()?;
    Envelope::new(Some(parse_address(from)?), to)
        .map_err(|e| NotificationError::Compose(e.to_string()))
}

/// Expand `{env}`, `{query}` and `{rundate}` in the subject template.
pub fn render_subject(template: &str, env: &str, query: &str, rundate: &str) -> String {
    template
        .replace("{env}", env)
        .replace("{query}", query)
        .replace("{rundate}", rundate)
}

/// Subject line, then every status line.
pub fn compose_body(subject: &str, lines: &[String]) -> String {
    let mut body = format!("{}:\r\n", subject);
    body.push_str(&lines.join("\r\n"));
    body
}

/// Keep recipients that verify (250) or that the server will not verify but
/// accepts (252). Everything else is dropped with a logged reason.
pub fn verify_recipients(transport: &mut dyn MailTransport, recipients: &[String]) -> Vec<String> {
    let mut kept = Vec::new();
    for recipient in recipients {
        match transport.verify(recipient) {
            VerifyReply::Verified => kept.push(recipient.clone()),
            VerifyReply::CannotVerify => {
                debug!(
                    "Could not verify email address \"{}\"; the server does not support verification, still sending to it",
                    recipient
                );
                kept.push(recipient.clone());
            }
            VerifyReply::Rejected(reason) => {
                error!(
                    "Error while verifying email address \"{}\": {}. Not sending to this recipient",
                    recipient, reason
                );
            }
        }
    }
    kept
}

/// Gzip `log_file` next to itself as `<log_file>.gz`.
pub fn compress_log(log_file: &Path) -> Result<PathBuf, NotificationError> {
    let mut target = log_file.as_os_str().to_owned();
    target.push(".gz");
    let target = PathBuf::from(target);
    let attach_err = |source| NotificationError::Attachment {
        path: log_file.to_path_buf(),
        source,
    };
    let mut input = File::open(log_file).map_err(attach_err)?;
    let output = File::create(&target).map_err(attach_err)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder).map_err(attach_err)?;
    encoder.finish().map_err(attach_err)?;
    Ok(target)
}

/// Build the MIME message. `To` lists every configured recipient.
pub fn build_message(
    from: &str,
    to: &[String],
    subject: &str,
    body: &str,
    attachment: Option<&Path>,
) -> Result<Vec<u8>, NotificationError> {
    let mailbox = |address: &str| {
        address
            .trim()
            .parse::<Mailbox>()
            .map_err(|e| NotificationError::Address {
                address: address.to_string(),
                reason: e.to_string(),
            })
    };

    let mut builder = Message::builder().from(mailbox(from)?).subject(subject);
    for recipient in to {
        builder = builder.to(mailbox(recipient)?);
    }

    let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(body.to_string()));
    if let Some(path) = attachment {
        let content = fs::read(path).map_err(|source| NotificationError::Attachment {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let content_type = ContentType::parse("application/octet-stream")
            .map_err(|e| NotificationError::Compose(e.to_string()))?;
        parts = parts.singlepart(Attachment::new(filename).body(content, content_type));
    }

    let message = builder
        .multipart(parts)
        .map_err(|e| NotificationError::Compose(e.to_string()))?;
    Ok(message.formatted())
}

/// What the dispatcher did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Skipped(String),
    NoValidRecipients,
    Sent { recipients: Vec<String> },
    Failed(String),
}

pub struct NotificationDispatcher<'a> {
    email: &'a EmailSection,
    debug: bool,
}

impl<'a> NotificationDispatcher<'a> {
    pub fn new(email: &'a EmailSection, debug: bool) -> Self {
        Self { email, debug }
    }

    /// Email `lines` under `subject`, optionally attaching `log_file`.
    pub fn send(
        &self,
        connector: &dyn MailConnector,
        subject: &str,
        lines: &[String],
        log_file: Option<&Path>,
    ) -> DispatchOutcome {
        if !self.email.email_results {
            debug!("Email with results will not be sent");
            return DispatchOutcome::Skipped("email disabled".to_string());
        }
        let recipients = self.email.recipients();
        if recipients.is_empty() {
            warn!("No email recipients specified, skipping outbound email");
            return DispatchOutcome::Skipped("no recipients".to_string());
        }
        let Some(server) = self.email.server() else {
            error!("No SMTP server configured; unable to send email");
            return DispatchOutcome::Skipped("no smtp server".to_string());
        };
        if self.debug {
            debug!(
                "SMTP server: {}, port: {}, from: {}, to: {}",
                server,
                self.email.email_port,
                self.email.email_from,
                recipients.join(",")
            );
        }

        let mut transport = match connector.connect(
            server,
            self.email.email_port,
            Duration::from_secs(self.email.email_timeout),
        ) {
            Ok(transport) => transport,
            Err(e) => {
                error!("Unable to open SMTP session: {}", e);
                return DispatchOutcome::Failed(e.to_string());
            }
        };

        let outcome = self.deliver(transport.as_mut(), &recipients, subject, lines, log_file);
        transport.close();
        outcome
    }

    fn deliver(
        &self,
        transport: &mut dyn MailTransport,
        recipients: &[String],
        subject: &str,
        lines: &[String],
        log_file: Option<&Path>,
    ) -> DispatchOutcome {
        let verified = verify_recipients(transport, recipients);
        if verified.is_empty() {
            error!("Unable to send email results, no valid recipients");
            return DispatchOutcome::NoValidRecipients;
        }

        let mut compressed = None;
        let attachment = match log_file.filter(|_| self.email.email_include_log) {
            Some(path) if self.email.email_zip_log => match compress_log(path) {
                Ok(gz) => {
                    compressed = Some(gz.clone());
                    Some(gz)
                }
                Err(e) => {
                    error!("{}; sending without attachment", e);
                    None
                }
            },
            Some(path) => Some(path.to_path_buf()),
            None => None,
        };

        let body = compose_body(subject, lines);
        let outcome = match build_message(
            &self.email.email_from,
            recipients,
            subject,
            &body,
            attachment.as_deref(),
        )
        .and_then(|message| transport.send(&self.email.email_from, &verified, &message))
        {
            Ok(()) => {
                info!("Email sent successfully to {}", verified.join(","));
                DispatchOutcome::Sent {
                    recipients: verified,
                }
            }
            Err(e) => {
                error!("Unable to send email: {}", e);
                DispatchOutcome::Failed(e.to_string())
            }
        };

        // A failed send keeps the compressed copy on disk.
        let sent = matches!(outcome, DispatchOutcome::Sent { .. });
        if let Some(gz) = compressed.filter(|_| sent && self.email.email_remove_zip_log) {
            if let Err(e) = fs::remove_file(&gz) {
                warn!("Unable to remove {}: {}", gz.display(), e);
            }
        }
        outcome
    }
}
