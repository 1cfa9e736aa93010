use multiquery::core::config::EmailSection;
use multiquery::core::error::NotificationError;
use multiquery::plugins::notify::{
    DispatchOutcome, MailConnector, MailTransport, NotificationDispatcher, VerifyReply,
    verify_recipients,
};
use std::cell::RefCell;
use std::fs;
use std::rc::Rc;
use std::time::Duration;
use tempfile::tempdir;

#[derive(Debug, Default)]
struct Recorded {
    connects: usize,
    verified: Vec<String>,
    sent_to: Vec<Vec<String>>,
    messages: Vec<String>,
    closed: bool,
}

/// Answers `VRFY` from a fixed list, in order.
struct FakeTransport {
    replies: Vec<VerifyReply>,
    fail_send: bool,
    log: Rc<RefCell<Recorded>>,
}

impl MailTransport for FakeTransport {
    fn verify(&mut self, address: &str) -> VerifyReply {
        let mut log = self.log.borrow_mut();
        let idx = log.verified.len();
        log.verified.push(address.to_string());
        self.replies
            .get(idx)
            .cloned()
            .unwrap_or(VerifyReply::Verified)
    }

    fn send(
        &mut self,
        _from: &str,
        recipients: &[String],
        message: &[u8],
    ) -> Result<(), NotificationError> {
        if self.fail_send {
            return Err(NotificationError::Smtp("554 transaction failed".to_string()));
        }
        let mut log = self.log.borrow_mut();
        log.sent_to.push(recipients.to_vec());
        log.messages.push(String::from_utf8_lossy(message).into_owned());
        Ok(())
    }

    fn close(&mut self) {
        self.log.borrow_mut().closed = true;
    }
}

struct FakeConnector {
    replies: Vec<VerifyReply>,
    fail_connect: bool,
    fail_send: bool,
    log: Rc<RefCell<Recorded>>,
}

impl FakeConnector {
    fn new(replies: Vec<VerifyReply>) -> Self {
        Self {
            replies,
            fail_connect: false,
            fail_send: false,
            log: Rc::new(RefCell::new(Recorded::default())),
        }
    }
}

impl MailConnector for FakeConnector {
    fn connect(
        &self,
        _server: &str,
        _port: u16,
        _timeout: Duration,
    ) -> Result<Box<dyn MailTransport>, NotificationError> {
        self.log.borrow_mut().connects += 1;
        if self.fail_connect {
            return Err(NotificationError::Smtp("connection refused".to_string()));
        }
        Ok(Box::new(FakeTransport {
            replies: self.replies.clone(),
            fail_send: self.fail_send,
            log: Rc::clone(&self.log),
        }))
    }
}

fn email(recipients: &str) -> EmailSection {
    EmailSection {
        email_results: true,
        email_server: Some("smtp.example.com".to_string()),
        email_port: 25,
        email_timeout: 5,
        email_from: "multiquery@example.com".to_string(),
        email_recipients: recipients.to_string(),
        email_subject: "[{env}] {query} results for {rundate}".to_string(),
        email_include_log: false,
        email_zip_log: false,
        email_remove_zip_log: false,
    }
}

fn lines() -> Vec<String> {
    vec!["[n1 (10.0.0.1)] q: 3 rows in 00.10 sec".to_string()]
}

#[test]
fn verification_keeps_ok_and_cannot_verify() {
    let connector = FakeConnector::new(vec![
        VerifyReply::Verified,
        VerifyReply::CannotVerify,
        VerifyReply::Rejected("550 no such user".to_string()),
    ]);
    let config = email("a@example.com,b@example.com,c@example.com");
    let outcome =
        NotificationDispatcher::new(&config, false).send(&connector, "subject", &lines(), None);

    let expected = vec!["a@example.com".to_string(), "b@example.com".to_string()];
    assert_eq!(
        outcome,
        DispatchOutcome::Sent {
            recipients: expected.clone()
        }
    );
    let log = connector.log.borrow();
    assert_eq!(log.sent_to, vec![expected]);
    assert!(log.closed);
    let message = &log.messages[0];
    assert!(message.contains("c@example.com"), "To header lists every recipient");
    assert!(message.contains("subject:"));
}

#[test]
fn verify_recipients_drops_rejections() {
    let log = Rc::new(RefCell::new(Recorded::default()));
    let mut transport = FakeTransport {
        replies: vec![VerifyReply::Rejected("551".to_string()), VerifyReply::Verified],
        fail_send: false,
        log,
    };
    let kept = verify_recipients(&mut transport, &["x@a.com".to_string(), "y@a.com".to_string()]);
    assert_eq!(kept, vec!["y@a.com".to_string()]);
}

#[test]
fn nothing_is_sent_without_valid_recipients() {
    let connector = FakeConnector::new(vec![
        VerifyReply::Rejected("550".to_string()),
        VerifyReply::Rejected("553".to_string()),
    ]);
    let config = email("a@example.com,b@example.com");
    let outcome =
        NotificationDispatcher::new(&config, false).send(&connector, "s", &lines(), None);
    assert_eq!(outcome, DispatchOutcome::NoValidRecipients);
    assert!(connector.log.borrow().sent_to.is_empty());
}

#[test]
fn skip_conditions_never_connect() {
    let connector = FakeConnector::new(Vec::new());

    let mut disabled = email("a@example.com");
    disabled.email_results = false;
    let no_recipients = email(" , ");
    let mut no_server = email("a@example.com");
    no_server.email_server = Some("  ".to_string());

    for config in [&disabled, &no_recipients, &no_server] {
        let outcome =
            NotificationDispatcher::new(config, true).send(&connector, "s", &lines(), None);
        assert!(matches!(outcome, DispatchOutcome::Skipped(_)));
    }
    assert_eq!(connector.log.borrow().connects, 0);
}

#[test]
fn transport_failures_are_reported_not_raised() {
    let mut connector = FakeConnector::new(Vec::new());
    connector.fail_connect = true;
    let config = email("a@example.com");
    let outcome =
        NotificationDispatcher::new(&config, false).send(&connector, "s", &lines(), None);
    assert!(matches!(outcome, DispatchOutcome::Failed(reason) if reason.contains("refused")));

    let mut connector = FakeConnector::new(Vec::new());
    connector.fail_send = true;
    let outcome =
        NotificationDispatcher::new(&config, false).send(&connector, "s", &lines(), None);
    assert!(matches!(outcome, DispatchOutcome::Failed(_)));
    assert!(connector.log.borrow().closed);
}

#[test]
fn compressed_log_is_attached_then_removed() {
    let dir = tempdir().unwrap();
    let log_file = dir.path().join("run.log");
    fs::write(&log_file, "run log\n".repeat(100)).unwrap();

    let mut config = email("a@example.com");
    config.email_include_log = true;
    config.email_zip_log = true;
    config.email_remove_zip_log = true;
    let connector = FakeConnector::new(Vec::new());
    let outcome = NotificationDispatcher::new(&config, false).send(
        &connector,
        "s",
        &lines(),
        Some(&log_file),
    );

    assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
    let log = connector.log.borrow();
    assert!(log.messages[0].contains("run.log.gz"));
    assert!(log_file.exists());
    assert!(!dir.path().join("run.log.gz").exists());
}

#[test]
fn missing_log_still_sends_without_attachment() {
    let dir = tempdir().unwrap();
    let mut config = email("a@example.com");
    config.email_include_log = true;
    config.email_zip_log = true;
    let connector = FakeConnector::new(Vec::new());
    let outcome = NotificationDispatcher::new(&config, false).send(
        &connector,
        "s",
        &lines(),
        Some(&dir.path().join("absent.log")),
    );
    assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
}

#[test]
fn compressed_log_stays_when_send_fails() {
    let dir = tempdir().unwrap();
    let log_file = dir.path().join("run.log");
    fs::write(&log_file, "run log\n").unwrap();

    let mut config = email("a@example.com");
    config.email_include_log = true;
    config.email_zip_log = true;
    config.email_remove_zip_log = true;
    let mut connector = FakeConnector::new(Vec::new());
    connector.fail_send = true;
    let outcome = NotificationDispatcher::new(&config, false).send(
        &connector,
        "s",
        &lines(),
        Some(&log_file),
    );

    assert!(matches!(outcome, DispatchOutcome::Failed(_)));
    assert!(dir.path().join("run.log.gz").exists());
}
