// src/mailer.rs
//
// Outbound transactional email. Delivery is best-effort: callers log failures
// and carry on.

use std::sync::Arc;

use async_trait::async_trait;
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::config::MailConfig;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mail template error: {0}")]
    Template(#[from] handlebars::RenderError),
    #[error("mail provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError>;
}

/// Resend HTTP API.
pub struct ResendMailer {
    client: reqwest::Client,
    api_key: String,
}

impl ResendMailer {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        let resp = self
            .client
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&email)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        tracing::info!(to = ?email.to, subject = %email.subject, "email sent");
        Ok(())
    }
}

/// Used when no provider key is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        tracing::info!(to = ?email.to, subject = %email.subject, "email delivery disabled; message logged only");
        Ok(())
    }
}

pub fn from_config(cfg: &MailConfig) -> Arc<dyn Mailer> {
    match &cfg.resend_api_key {
        Some(key) => Arc::new(ResendMailer::new(key.clone())),
        None => Arc::new(LogMailer),
    }
}

#[derive(Debug, Clone)]
pub struct ClinicContact {
    pub clinic_name: String,
    pub contact_email: Option<String>,
    pub facebook_url: Option<String>,
}

const PENDING_TEMPLATE: &str = r#"<html><body>
<h2>{{clinic_name}}</h2>
<h3>Your application has been submitted successfully!</h3>
<p>Thank you for applying. We have received your application and will review it shortly.</p>
<p>Appointment: {{summary}}</p>
<p>Your appointment ticket is <strong>{{ticket}}</strong>. Use it with this email address to view, reschedule or cancel your appointment.</p>
{{#if has_contact}}<p>If you have any questions, please contact us via {{#if contact_email}}<a href="mailto:{{contact_email}}">{{contact_email}}</a>{{/if}}{{#if both_contacts}} or message us on {{/if}}{{#if facebook_url}}<a href="{{facebook_url}}">Facebook</a>{{/if}}.</p>{{/if}}
<p><em>*This is an automatically generated email* DO NOT REPLY</em></p>
</body></html>"#;

/// Sent right after an online booking lands in Pending.
pub fn pending_appointment_email(
    from: &str,
    clinic: &ClinicContact,
    to: &str,
    ticket: &str,
    summary: &str,
) -> Result<OutgoingEmail, MailError> {
    let data = json!({
        "clinic_name": clinic.clinic_name,
        "summary": summary,
        "ticket": ticket,
        "contact_email": clinic.contact_email,
        "facebook_url": clinic.facebook_url,
        "has_contact": clinic.contact_email.is_some() || clinic.facebook_url.is_some(),
        "both_contacts": clinic.contact_email.is_some() && clinic.facebook_url.is_some(),
    });

    // Handlebars escapes every {{value}} as HTML.
    let html = Handlebars::new().render_template(PENDING_TEMPLATE, &data)?;

    Ok(OutgoingEmail {
        from: from.to_string(),
        to: vec![to.to_string()],
        subject: "Appointment Application".to_string(),
        html,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clinic() -> ClinicContact {
        ClinicContact {
            clinic_name: "Lobodent Dental Clinic".into(),
            contact_email: Some("desk@clinic.test".into()),
            facebook_url: Some("https://www.facebook.com/clinic".into()),
        }
    }

    #[test]
    fn pending_email_carries_ticket_and_contacts() {
        let mail = pending_appointment_email(
            "Appointment@clinic.test",
            &clinic(),
            "maria@example.com",
            "APT-7KQ2M9XD",
            "Cleaning at Main Branch on 2026-10-20 10:00",
        )
        .unwrap();
        assert_eq!(mail.to, vec!["maria@example.com".to_string()]);
        assert_eq!(mail.subject, "Appointment Application");
        assert!(mail.html.contains("APT-7KQ2M9XD"));
        assert!(mail.html.contains("mailto:desk@clinic.test"));
        assert!(mail.html.contains("https://www.facebook.com/clinic"));
        assert!(mail.html.contains("DO NOT REPLY"));
    }

    #[test]
    fn pending_email_escapes_user_text() {
        let mail = pending_appointment_email(
            "a@b.co",
            &ClinicContact { clinic_name: "A&B <Dental>".into(), contact_email: None, facebook_url: None },
            "x@y.co",
            "APT-X",
            "<script>",
        )
        .unwrap();
        assert!(mail.html.contains("A&amp;B &lt;Dental&gt;"));
        assert!(!mail.html.contains("<script>"));
        assert!(!mail.html.contains("contact us via"));
    }

    #[test]
    fn pending_email_joins_contacts_only_when_both_exist() {
        let only_mail = ClinicContact {
            facebook_url: None,
            ..clinic()
        };
        let mail = pending_appointment_email("a@b.co", &only_mail, "x@y.co", "APT-1", "visit").unwrap();
        assert!(mail.html.contains("contact us via <a href=\"mailto:desk@clinic.test\">"));
        assert!(!mail.html.contains("message us on"));

        let both = pending_appointment_email("a@b.co", &clinic(), "x@y.co", "APT-1", "visit").unwrap();
        assert!(both.html.contains("</a> or message us on <a href="));
    }

    #[test]
    fn resend_payload_shape() {
        let mail = OutgoingEmail {
            from: "a@b.co".into(),
            to: vec!["c@d.co".into()],
            subject: "s".into(),
            html: "<p>h</p>".into(),
        };
        let v = serde_json::to_value(&mail).unwrap();
        assert_eq!(v["to"][0], "c@d.co");
        assert_eq!(v["html"], "<p>h</p>");
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let mailer = from_config(&MailConfig {
            resend_api_key: None,
            from_address: "a@b.co".into(),
        });
        let mail =
            pending_appointment_email("a@b.co", &clinic(), "x@y.co", "APT-1", "visit").unwrap();
        assert!(mailer.send(mail).await.is_ok());
    }
}
