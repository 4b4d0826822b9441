//! Result and failure-notice emails.

use std::time::Duration;

use chrono::{DateTime, Utc};
use lettre::message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::mailer::Mailer;
use crate::table::Table;

const MAX_ATTEMPTS: u32 = 2;
const RETRY_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum MailError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl MailError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Serialize `table` to CSV and mail it to every recipient as an
/// attachment.
pub async fn deliver_success(
    mailer: &Mailer,
    sender: &Mailbox,
    job_name: &str,
    recipients: &[String],
    table: &Table,
    run_time: DateTime<Utc>,
) -> Result<(), MailError> {
    let csv_content = table
        .to_csv()
        .map_err(|e| MailError::Permanent(format!("CSV conversion failed: {e}")))?;

    let timestamp = run_time.format("%Y-%m-%d %H:%M:%S");
    let subject = format!("Job Results: {job_name} - {timestamp}");
    let attachment_name = format!("{job_name}_{}.csv", run_time.format("%Y%m%d_%H%M%S"));

    let body = format!(
        "Hello,\n\n\
         The scheduled job '{job_name}' has completed successfully.\n\n\
         Please find the results attached as a CSV file.\n\n\
         Execution Time: {timestamp}\n"
    );

    let message = build_message(sender, recipients, &subject)?
        .multipart(
            MultiPart::mixed()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(body),
                )
                .singlepart(Attachment::new(attachment_name).body(
                    csv_content,
                    ContentType::parse("text/csv").expect("static content type"),
                )),
        )
        .map_err(|e| MailError::Permanent(format!("Failed to build email: {e}")))?;

    send_with_retry(mailer, message, job_name, "results").await
}

/// Notify every recipient that a run failed.
pub async fn deliver_failure(
    mailer: &Mailer,
    sender: &Mailbox,
    job_name: &str,
    recipients: &[String],
    error_summary: &str,
    run_time: DateTime<Utc>,
) -> Result<(), MailError> {
    let timestamp = run_time.format("%Y-%m-%d %H:%M:%S");
    let subject = format!("Job Failed: {job_name} - {timestamp}");

    let body = format!(
        "Hello,\n\n\
         The scheduled job '{job_name}' has failed during execution.\n\n\
         Execution Time: {timestamp}\n\n\
         Error Details:\n{error_summary}\n\n\
         Please review the job configuration and data source.\n"
    );

    let message = build_message(sender, recipients, &subject)?
        .header(ContentType::TEXT_PLAIN)
        .body(body)
        .map_err(|e| MailError::Permanent(format!("Failed to build email: {e}")))?;

    send_with_retry(mailer, message, job_name, "failure notice").await
}

fn build_message(
    sender: &Mailbox,
    recipients: &[String],
    subject: &str,
) -> Result<lettre::message::MessageBuilder, MailError> {
    let mut builder = Message::builder().from(sender.clone()).subject(subject);
    for recipient in recipients {
        let mailbox: Mailbox = recipient.parse().map_err(|e| {
            MailError::Permanent(format!("Invalid recipient address '{recipient}': {e}"))
        })?;
        builder = builder.to(mailbox);
    }
    Ok(builder)
}

/// Two attempts with a short pause; permanent SMTP rejections are not
/// retried.
async fn send_with_retry(
    mailer: &Mailer,
    message: Message,
    job_name: &str,
    kind: &str,
) -> Result<(), MailError> {
    let mut attempt = 1;
    loop {
        match mailer.send(message.clone()).await {
            Ok(()) => {
                info!(job = %job_name, "{kind} email sent (attempt {attempt}/{MAX_ATTEMPTS})");
                return Ok(());
            }
            Err(e) => {
                let error = classify_smtp_error(&e);
                warn!(
                    job = %job_name,
                    "failed to send {kind} email (attempt {attempt}/{MAX_ATTEMPTS}): {e}"
                );
                if !error.is_transient() || attempt >= MAX_ATTEMPTS {
                    return Err(error);
                }
                sleep(RETRY_PAUSE).await;
                attempt += 1;
            }
        }
    }
}

fn classify_smtp_error(e: &lettre::transport::smtp::Error) -> MailError {
    if e.is_permanent() {
        MailError::Permanent(e.to_string())
    } else {
        MailError::Transient(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;

    fn sender() -> Mailbox {
        "jobs@example.com".parse().unwrap()
    }

    fn table() -> Table {
        let mut table = Table::new(vec!["a".to_string(), "b".to_string()]);
        table.push_row(vec![Cell::Int(1), Cell::Int(2)]).unwrap();
        table
    }

    fn header_value(message: &lettre::Message, name: &str) -> String {
        let rendered = String::from_utf8(message.formatted()).unwrap();
        rendered
            .lines()
            .find(|line| line.starts_with(name))
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn test_success_email_shape() {
        let mailer = Mailer::mock();
        let run_time = Utc::now();

        deliver_success(
            &mailer,
            &sender(),
            "report",
            &["x@example.com".to_string()],
            &table(),
            run_time,
        )
        .await
        .unwrap();

        let messages = mailer.messages().unwrap();
        assert_eq!(messages.len(), 1);

        let subject = header_value(&messages[0], "Subject:");
        assert!(subject.starts_with("Subject: Job Results: report - "));

        let rendered = String::from_utf8(messages[0].formatted()).unwrap();
        assert!(rendered.contains("filename=\"report_"));
        assert!(rendered.contains("text/csv"));
    }

    #[tokio::test]
    async fn test_failure_email_shape() {
        let mailer = Mailer::mock();

        deliver_failure(
            &mailer,
            &sender(),
            "report",
            &["x@example.com".to_string()],
            "Data fetch failed: GET https://example.test returned 500",
            Utc::now(),
        )
        .await
        .unwrap();

        let messages = mailer.messages().unwrap();
        assert_eq!(messages.len(), 1);

        let subject = header_value(&messages[0], "Subject:");
        assert!(subject.starts_with("Subject: Job Failed: report - "));

        let rendered = String::from_utf8(messages[0].formatted()).unwrap();
        assert!(rendered.contains("Data fetch failed"));
    }

    #[tokio::test]
    async fn test_all_recipients_addressed() {
        let mailer = Mailer::mock();
        let recipients = vec!["a@example.com".to_string(), "b@example.com".to_string()];

        deliver_success(&mailer, &sender(), "report", &recipients, &table(), Utc::now())
            .await
            .unwrap();

        let messages = mailer.messages().unwrap();
        let to_header = header_value(&messages[0], "To:");
        assert!(to_header.contains("a@example.com"));
        assert!(to_header.contains("b@example.com"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_permanent() {
        let mailer = Mailer::mock();
        let err = deliver_failure(
            &mailer,
            &sender(),
            "report",
            &["not an address".to_string()],
            "boom",
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(!err.is_transient());
    }
}
