use std::time::Duration;

use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use uuid::Uuid;

use crate::config::EmailConfig;
use crate::models::Media;

const SMTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailService {
    pub fn new(config: &EmailConfig) -> anyhow::Result<Self> {
        let mut builder = if config.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
                .port(config.smtp_port)
        } else if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
                .port(config.smtp_port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
                .port(config.smtp_port)
        };

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        let transport = builder.timeout(Some(SMTP_TIMEOUT)).build();
        let from: Mailbox = config.from.parse()?;

        Ok(Self { transport, from })
    }

    fn new_message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.from.email.domain())
    }

    /// Wraps inner HTML content in a consistent layout.
    fn wrap_html(content: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width,initial-scale=1">
  <title>sweeparr</title>
</head>
<body style="margin:0;padding:0;background-color:#f1f5f9;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,Helvetica,Arial,sans-serif">
  <table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="background-color:#f1f5f9;padding:40px 16px">
    <tr>
      <td align="center">
        <table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="max-width:560px">
          <tr>
            <td align="center" style="padding-bottom:24px">
              <p style="margin:0;font-size:20px;font-weight:700;color:#0f172a">sweeparr</p>
            </td>
          </tr>
          <tr>
            <td style="background:#ffffff;border-radius:12px;padding:32px;box-shadow:0 1px 3px rgba(0,0,0,0.08)">
              {content}
            </td>
          </tr>
          <tr>
            <td align="center" style="padding-top:20px">
              <p style="margin:0;font-size:12px;color:#94a3b8">Automated media retention notice</p>
            </td>
          </tr>
        </table>
      </td>
    </tr>
  </table>
</body>
</html>"#
        )
    }

    fn media_table(items: &[&Media]) -> String {
        let rows: String = items
            .iter()
            .map(|m| {
                let year = m.year.map(|y| format!(" ({y})")).unwrap_or_default();
                let due = m
                    .estimated_delete_at
                    .unwrap_or(m.default_delete_at)
                    .format("%Y-%m-%d");
                format!(
                    r#"<tr>
                      <td style="padding:8px 0;border-bottom:1px solid #e2e8f0;color:#0f172a">{}{year}</td>
                      <td style="padding:8px 0;border-bottom:1px solid #e2e8f0;color:#64748b;text-align:right">{due}</td>
                    </tr>"#,
                    m.title
                )
            })
            .collect();
        format!(
            r#"<table role="presentation" width="100%" cellpadding="0" cellspacing="0">
              <tr>
                <th style="text-align:left;padding-bottom:8px;color:#64748b;font-size:12px">TITLE</th>
                <th style="text-align:right;padding-bottom:8px;color:#64748b;font-size:12px">SCHEDULED</th>
              </tr>
              {rows}
            </table>"#
        )
    }

    /// Per-user summary of media picked up for deletion this run.
    pub async fn send_cleanup_summary(
        &self,
        to: &str,
        username: &str,
        items: &[&Media],
    ) -> anyhow::Result<()> {
        let content = format!(
            r#"<p style="margin:0 0 16px;color:#0f172a">Hi {username},</p>
            <p style="margin:0 0 20px;color:#334155">The following media you requested is scheduled
            for deletion. If you still want it around, file a keep request before the date shown.</p>
            {}"#,
            Self::media_table(items)
        );

        let message = Message::builder()
            .message_id(Some(self.new_message_id()))
            .from(self.from.clone())
            .to(to.parse()?)
            .subject("Media scheduled for deletion")
            .header(ContentType::TEXT_HTML)
            .body(Self::wrap_html(&content))?;

        self.transport.send(message).await?;
        Ok(())
    }
}
