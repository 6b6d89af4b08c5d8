use crate::config::NotificationConfig;
use crate::error::{GalleryError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client as SesClient;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sends one templated e-mail
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()>;
}

/// Amazon SES notifier
pub struct SesNotifier {
    client: SesClient,
    from: String,
}

impl SesNotifier {
    pub async fn new(config: &NotificationConfig, fallback_region: &str) -> Self {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| fallback_region.to_string());
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()))
            .load()
            .await;

        info!(region = %region, from = %config.from_email, "SES notifier initialized");

        Self {
            client: SesClient::new(&aws_config),
            from: config.from_email.clone(),
        }
    }
}

#[async_trait]
impl Notifier for SesNotifier {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        let failure = |message: String| GalleryError::Notification {
            to: to.to_string(),
            message,
        };

        let subject = Content::builder()
            .data(subject)
            .build()
            .map_err(|e| failure(e.to_string()))?;
        let body = Body::builder()
            .html(
                Content::builder()
                    .data(html_body)
                    .build()
                    .map_err(|e| failure(e.to_string()))?,
            )
            .build();
        let message = Message::builder().subject(subject).body(body).build();

        self.client
            .send_email()
            .from_email_address(&self.from)
            .destination(Destination::builder().to_addresses(to).build())
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .map_err(|e| failure(e.to_string()))?;

        info!(to = to, "Notification sent");
        Ok(())
    }
}

/// Used when notifications are disabled
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> Result<()> {
        debug!(to = to, subject = subject, "Notifications disabled, skipping");
        Ok(())
    }
}

/// The three workflow e-mails
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// To every administrator: a batch is waiting for review
    NewSubmission {
        upload_id: String,
        uploader_name: String,
        uploader_email: String,
        category: String,
        photos_count: usize,
    },
    /// To the submitter
    Approved { to: String, title: String },
    /// To the submitter, with the reason
    Rejected {
        to: String,
        title: String,
        reason: String,
    },
}

impl Notification {
    fn recipients(&self, admins: &[String]) -> Vec<String> {
        match self {
            Self::NewSubmission { .. } => admins.to_vec(),
            Self::Approved { to, .. } | Self::Rejected { to, .. } => vec![to.clone()],
        }
    }

    pub fn subject(&self) -> String {
        match self {
            Self::NewSubmission { photos_count, .. } => {
                format!("{photos_count} new photo(s) awaiting review")
            }
            Self::Approved { .. } => "Your photo is now in the gallery".to_string(),
            Self::Rejected { .. } => "Your photo was not approved".to_string(),
        }
    }

    pub fn html_body(&self, console_url: Option<&str>) -> String {
        match self {
            Self::NewSubmission {
                upload_id,
                uploader_name,
                uploader_email,
                category,
                photos_count,
            } => {
                let link = console_url
                    .map(|url| {
                        format!(
                            "<p><a href=\"{}\">Open the moderation queue</a></p>",
                            escape_html(url)
                        )
                    })
                    .unwrap_or_default();
                format!(
                    "<h2>New photo submission</h2>\
                     <p>{} ({}) submitted {} photo(s) in <strong>{}</strong>.</p>\
                     <p>Batch: {}</p>{}",
                    escape_html(uploader_name),
                    escape_html(uploader_email),
                    photos_count,
                    escape_html(category),
                    escape_html(upload_id),
                    link
                )
            }
            Self::Approved { title, .. } => format!(
                "<h2>Thank you!</h2>\
                 <p>Your photo <strong>{}</strong> has been approved and is now visible in the gallery.</p>",
                escape_html(title)
            ),
            Self::Rejected { title, reason, .. } => format!(
                "<h2>Photo review</h2>\
                 <p>Your photo <strong>{}</strong> was not approved.</p>\
                 <p>Reason: {}</p>",
                escape_html(title),
                escape_html(reason)
            ),
        }
    }
}

/// Best-effort notification delivery.
///
/// Each dispatch is one spawned task with a single attempt per recipient. The
/// request path never awaits it; failures are logged and discarded.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    admin_recipients: Arc<Vec<String>>,
    console_url: Option<String>,
}

impl NotificationDispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        admin_recipients: Vec<String>,
        console_url: Option<String>,
    ) -> Self {
        Self {
            notifier,
            admin_recipients: Arc::new(admin_recipients),
            console_url,
        }
    }

    /// Fire-and-forget: the returned handle may be dropped
    pub fn dispatch(&self, notification: Notification) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        let recipients = notification.recipients(&self.admin_recipients);
        let subject = notification.subject();
        let body = notification.html_body(self.console_url.as_deref());

        tokio::spawn(async move {
            for to in recipients {
                if let Err(e) = notifier.send(&to, &subject, &body).await {
                    metrics::counter!("gallery.notifications.failed").increment(1);
                    warn!(error = %e, "Notification failed, discarding");
                }
            }
        })
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
