//! Transactional email: template resolution plus SMTP/file delivery.

pub mod templates;

use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::config::{EmailConfig, EmailTransportConfig};
use crate::errors::{Error, Result};
use templates::{Rendered, TemplateService};

enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

/// Outbound mailer over SMTP, or file drops for development.
pub struct Mailer {
    transport: Transport,
    from_email: String,
    from_name: String,
    reply_to: Option<String>,
}

impl Mailer {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let transport = match &config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }
                let builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));
                Transport::Smtp(builder.build())
            }
            EmailTransportConfig::File { path } => {
                let dir = Path::new(path);
                if !dir.exists() {
                    std::fs::create_dir_all(dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                Transport::File(AsyncFileTransport::<Tokio1Executor>::new(dir))
            }
        };

        Ok(Self {
            transport,
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
            reply_to: config.reply_to.clone(),
        })
    }

    /// Send a multipart/alternative message (plaintext + HTML).
    pub async fn send(&self, to_email: &str, subject: &str, html: &str, text: &str) -> Result<()> {
        let from_address = self.from_email.parse().map_err(|e| Error::Internal {
            operation: format!("parse from address: {e}"),
        })?;
        let from = Mailbox::new(Some(self.from_name.clone()), from_address);
        let to_address = to_email
            .parse()
            .map_err(|e| Error::bad_field(format!("invalid recipient address: {e}"), "to"))?;
        let to = Mailbox::new(None, to_address);

        let mut builder = Message::builder().from(from).to(to).subject(subject);
        if let Some(reply_to) = &self.reply_to {
            let reply_address = reply_to.parse().map_err(|e| Error::Internal {
                operation: format!("parse reply-to address: {e}"),
            })?;
            builder = builder.reply_to(Mailbox::new(Some(self.from_name.clone()), reply_address));
        }

        let message = builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.to_string()),
                    ),
            )
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        match &self.transport {
            Transport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            Transport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("write email file: {e}"),
                })?;
            }
        }
        Ok(())
    }
}

/// Template-aware send service. The mailer sits behind a read-write lock so
/// config changes can swap it at runtime without tearing the service down.
pub struct EmailService {
    templates: TemplateService,
    mailer: RwLock<Arc<Mailer>>,
}

impl EmailService {
    pub fn new(pool: PgPool, mailer: Mailer) -> Self {
        Self {
            templates: TemplateService::new(pool),
            mailer: RwLock::new(Arc::new(mailer)),
        }
    }

    pub fn templates(&self) -> &TemplateService {
        &self.templates
    }

    /// Replace the mailer; in-flight sends keep the old one.
    pub async fn swap_mailer(&self, mailer: Mailer) {
        *self.mailer.write().await = Arc::new(mailer);
        tracing::info!("Mailer replaced");
    }

    /// Render `key` (override or built-in) and send to one recipient.
    #[instrument(skip(self, vars), err)]
    pub async fn send_templated(&self, to: &str, key: &str, vars: &serde_json::Value) -> Result<Rendered> {
        let rendered = self.templates.render_with_fallback(key, vars).await?;
        let mailer = self.mailer.read().await.clone();
        match mailer.send(to, &rendered.subject, &rendered.html, &rendered.text).await {
            Ok(()) => {
                metrics::counter!("ayb_emails_sent_total").increment(1);
                Ok(rendered)
            }
            Err(e) => {
                metrics::counter!("ayb_emails_failed_total").increment(1);
                Err(e)
            }
        }
    }

    /// Send a one-off message without template resolution (admin test sends).
    #[instrument(skip(self, html), err)]
    pub async fn send_raw(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        let text = templates::html_to_text(html);
        let mailer = self.mailer.read().await.clone();
        let result = mailer.send(to, subject, html, &text).await;
        match &result {
            Ok(()) => metrics::counter!("ayb_emails_sent_total").increment(1),
            Err(_) => metrics::counter!("ayb_emails_failed_total").increment(1),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_mailer(dir: &Path) -> Mailer {
        Mailer::new(&EmailConfig {
            transport: EmailTransportConfig::File {
                path: dir.to_string_lossy().into_owned(),
            },
            from_email: "noreply@example.com".to_string(),
            from_name: "AYB Test".to_string(),
            reply_to: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn file_transport_writes_a_multipart_message() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = file_mailer(dir.path());
        mailer
            .send("user@example.com", "Hello", "<p>Hi <b>there</b></p>", "Hi there")
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let content = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        assert!(content.contains("Subject: Hello"));
        assert!(content.contains("multipart/alternative"));
        assert!(content.contains("Hi there"));
    }

    #[tokio::test]
    async fn invalid_recipient_is_a_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = file_mailer(dir.path());
        let err = mailer.send("not an address", "s", "<p>h</p>", "h").await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn recipient_names_with_special_characters_send_fine() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = file_mailer(dir.path());
        for to in ["alice@example.com", "o'brien@example.com", "a.b+tag@example.co.uk"] {
            assert!(mailer.send(to, "s", "<p>h</p>", "h").await.is_ok(), "send to {to}");
        }
    }
}
