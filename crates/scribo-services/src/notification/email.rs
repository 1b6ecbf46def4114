use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

use scribo_core::models::{NotificationChannelKind, NotificationRequest};
use scribo_infra::EmailSender;

use super::{NotificationChannel, NotificationError};

/// Emails every configured admin address. Succeeds only if every send succeeds.
#[derive(Clone)]
pub struct EmailChannel {
    sender: Arc<dyn EmailSender>,
    recipients: Vec<String>,
}

impl EmailChannel {
    pub fn new(sender: Arc<dyn EmailSender>, recipients: Vec<String>) -> Self {
        Self { sender, recipients }
    }

    fn subject(request: &NotificationRequest) -> String {
        format!("[{}] {}", request.priority.to_string().to_uppercase(), request.title)
    }

    fn render_html(request: &NotificationRequest) -> String {
        let mut html = format!(
            "<h2>{}</h2>\n<p>{}</p>\n",
            escape_html(&request.title),
            escape_html(&request.body)
        );
        if !request.metadata.is_empty() {
            html.push_str("<ul>\n");
            for (key, value) in &request.metadata {
                html.push_str(&format!(
                    "<li><strong>{}</strong>: {}</li>\n",
                    escape_html(key),
                    escape_html(value)
                ));
            }
            html.push_str("</ul>\n");
        }
        html
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

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn kind(&self) -> NotificationChannelKind {
        NotificationChannelKind::Email
    }

    async fn deliver(&self, request: &NotificationRequest) -> Result<(), NotificationError> {
        if self.recipients.is_empty() {
            return Err(NotificationError::NoRecipients);
        }

        let subject = Self::subject(request);
        let html = Self::render_html(request);
        let results = join_all(
            self.recipients
                .iter()
                .map(|to| self.sender.send(to, &subject, &html)),
        )
        .await;

        let failures: Vec<String> = self
            .recipients
            .iter()
            .zip(results)
            .filter_map(|(to, result)| result.err().map(|e| format!("{to}: {e}")))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotificationError::Email(failures.join(", ")))
        }
    }
}
