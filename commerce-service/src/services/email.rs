use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use std::time::Duration;

use crate::config::SmtpConfig;

/// Outbound mail. Failures are logged by callers and never fail the
/// originating operation.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_verification_email(
        &self,
        to: &str,
        token: &str,
        base_url: &str,
    ) -> Result<(), anyhow::Error>;

    async fn send_password_reset_email(
        &self,
        to: &str,
        token: &str,
        base_url: &str,
    ) -> Result<(), anyhow::Error>;

    async fn send_password_changed_email(&self, to: &str) -> Result<(), anyhow::Error>;

    async fn send_new_device_alert(
        &self,
        to: &str,
        device_name: &str,
        ip: &str,
    ) -> Result<(), anyhow::Error>;

    async fn send_lockout_notice(&self, to: &str, minutes: u64) -> Result<(), anyhow::Error>;

    async fn send_order_confirmation(
        &self,
        to: &str,
        order_id: &str,
        total_minor: i64,
        currency: &str,
    ) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct SmtpEmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpEmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, anyhow::Error> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| anyhow::anyhow!("SMTP relay setup failed: {}", e))?
            .credentials(creds)
            .port(587)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "Email service initialized");

        Ok(Self {
            mailer,
            from_email: config.from_email.clone(),
        })
    }

    async fn send(
        &self,
        to: &str,
        subject: &str,
        plain_body: String,
        html_body: String,
    ) -> Result<(), anyhow::Error> {
        let email = Message::builder()
            .from(self.from_email.parse()?)
            .to(to.parse()?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )?;

        // SMTP transport is blocking; keep it off the async runtime.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email)).await?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to, subject = %subject, "Email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to, "Failed to send email");
                Err(anyhow::anyhow!("SMTP send failed: {}", e))
            }
        }
    }
}

#[async_trait]
impl EmailProvider for SmtpEmailService {
    async fn send_verification_email(
        &self,
        to: &str,
        token: &str,
        base_url: &str,
    ) -> Result<(), anyhow::Error> {
        let link = format!("{}/verify-email?token={}", base_url, token);
        let plain = format!(
            "Welcome! Please verify your email address by visiting:\n\n{}\n\nThis link expires in 24 hours.",
            link
        );
        let html = format!(
            "<html><body style=\"font-family: Arial, sans-serif;\">\
             <h2>Verify your email</h2>\
             <p>Thanks for registering. Click below to verify your address:</p>\
             <p><a href=\"{}\">Verify Email</a></p>\
             <p style=\"color:#666;font-size:12px;\">This link expires in 24 hours. If you didn't register, ignore this email.</p>\
             </body></html>",
            link
        );
        self.send(to, "Verify your email address", plain, html).await
    }

    async fn send_password_reset_email(
        &self,
        to: &str,
        token: &str,
        base_url: &str,
    ) -> Result<(), anyhow::Error> {
        let link = format!("{}/reset-password?token={}", base_url, token);
        let plain = format!(
            "We received a request to reset your password. Visit:\n\n{}\n\nThis link expires in 1 hour. If you didn't request it, ignore this email.",
            link
        );
        let html = format!(
            "<html><body style=\"font-family: Arial, sans-serif;\">\
             <h2>Password reset</h2>\
             <p>Click below to set a new password:</p>\
             <p><a href=\"{}\">Reset Password</a></p>\
             <p style=\"color:#666;font-size:12px;\">This link expires in 1 hour.</p>\
             </body></html>",
            link
        );
        self.send(to, "Reset your password", plain, html).await
    }

    async fn send_password_changed_email(&self, to: &str) -> Result<(), anyhow::Error> {
        let plain = "Your password was just changed. All active sessions have been signed out.\n\nIf this wasn't you, reset your password immediately and contact support.".to_string();
        let html = "<html><body style=\"font-family: Arial, sans-serif;\">\
             <h2>Password changed</h2>\
             <p>Your password was just changed and all active sessions were signed out.</p>\
             <p>If this wasn't you, reset your password immediately and contact support.</p>\
             </body></html>"
            .to_string();
        self.send(to, "Your password was changed", plain, html).await
    }

    async fn send_new_device_alert(
        &self,
        to: &str,
        device_name: &str,
        ip: &str,
    ) -> Result<(), anyhow::Error> {
        let plain = format!(
            "A sign-in to your account just happened from a device we haven't seen before.\n\nDevice: {}\nIP address: {}\n\nIf this was you, no action is needed. Otherwise change your password now.",
            device_name, ip
        );
        let html = format!(
            "<html><body style=\"font-family: Arial, sans-serif;\">\
             <h2>New sign-in to your account</h2>\
             <p>Device: <strong>{}</strong><br>IP address: <strong>{}</strong></p>\
             <p>If this wasn't you, change your password now.</p>\
             </body></html>",
            device_name, ip
        );
        self.send(to, "New device sign-in", plain, html).await
    }

    async fn send_lockout_notice(&self, to: &str, minutes: u64) -> Result<(), anyhow::Error> {
        let plain = format!(
            "Your account was temporarily locked after repeated failed sign-in attempts.\n\nYou can try again in about {} minutes. If this wasn't you, reset your password once the lock expires.",
            minutes
        );
        let html = format!(
            "<html><body style=\"font-family: Arial, sans-serif;\">\
             <h2>Account temporarily locked</h2>\
             <p>Repeated failed sign-in attempts locked your account for about {} minutes.</p>\
             <p>If this wasn't you, reset your password once the lock expires.</p>\
             </body></html>",
            minutes
        );
        self.send(to, "Account temporarily locked", plain, html).await
    }

    async fn send_order_confirmation(
        &self,
        to: &str,
        order_id: &str,
        total_minor: i64,
        currency: &str,
    ) -> Result<(), anyhow::Error> {
        let total = format!("{}.{:02} {}", total_minor / 100, total_minor % 100, currency);
        let plain = format!(
            "Thanks for your order!\n\nOrder: {}\nTotal: {}\n\nWe'll let you know when it ships.",
            order_id, total
        );
        let html = format!(
            "<html><body style=\"font-family: Arial, sans-serif;\">\
             <h2>Order confirmed</h2>\
             <p>Order <strong>{}</strong> — total <strong>{}</strong>.</p>\
             <p>We'll let you know when it ships.</p>\
             </body></html>",
            order_id, total
        );
        self.send(to, "Your order is confirmed", plain, html).await
    }
}

/// Test double that records what would have been sent.
#[derive(Default)]
pub struct MockEmailService {
    pub sent: std::sync::Mutex<Vec<(String, String)>>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, to: &str, kind: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), kind.to_string()));
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_verification_email(
        &self,
        to: &str,
        _token: &str,
        _base_url: &str,
    ) -> Result<(), anyhow::Error> {
        self.record(to, "verification");
        Ok(())
    }

    async fn send_password_reset_email(
        &self,
        to: &str,
        _token: &str,
        _base_url: &str,
    ) -> Result<(), anyhow::Error> {
        self.record(to, "password_reset");
        Ok(())
    }

    async fn send_password_changed_email(&self, to: &str) -> Result<(), anyhow::Error> {
        self.record(to, "password_changed");
        Ok(())
    }

    async fn send_new_device_alert(
        &self,
        to: &str,
        _device_name: &str,
        _ip: &str,
    ) -> Result<(), anyhow::Error> {
        self.record(to, "new_device");
        Ok(())
    }

    async fn send_lockout_notice(&self, to: &str, _minutes: u64) -> Result<(), anyhow::Error> {
        self.record(to, "lockout");
        Ok(())
    }

    async fn send_order_confirmation(
        &self,
        to: &str,
        _order_id: &str,
        _total_minor: i64,
        _currency: &str,
    ) -> Result<(), anyhow::Error> {
        self.record(to, "order_confirmation");
        Ok(())
    }
}
