use std::error::Error;

use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};

use crate::config::Config;

type MailResult = Result<(), Box<dyn Error + Send + Sync>>;

/// SMTP mailer for the OTP and account-recovery messages.
pub struct Mailer {
    smtp: SmtpTransport,
    from: String,
}

impl Mailer {
    pub fn new(config: &Config) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let creds = Credentials::new(config.smtp_user.clone(), config.smtp_password.clone());

        let tls_parameters = TlsParameters::new(config.smtp_host.clone())?;

        let smtp = SmtpTransport::relay(&config.smtp_host)?
            .credentials(creds)
            .port(config.smtp_port)
            .tls(Tls::Wrapper(tls_parameters))
            .build();

        Ok(Mailer {
            smtp,
            from: config.mail_from.clone(),
        })
    }

    fn send(&self, to_email: &str, subject: &str, body: String) -> MailResult {
        let email = Message::builder()
            .from(self.from.parse()?)
            .to(to_email.parse()?)
            .subject(subject)
            .body(body)?;

        self.smtp.send(&email)?;
        Ok(())
    }

    pub fn send_verification_otp(&self, to_email: &str, otp: &str) -> MailResult {
        self.send(
            to_email,
            "Email Verification OTP",
            format!("Your OTP for email verification is: {otp}"),
        )
    }

    pub fn send_password_reset_otp(&self, to_email: &str, otp: &str) -> MailResult {
        self.send(
            to_email,
            "Password Reset OTP",
            format!(
                "Your OTP for password reset is: {otp}\nThis code will expire in 1 hour.",
            ),
        )
    }

    pub fn send_username_recovery(&self, to_email: &str, username: &str) -> MailResult {
        self.send(
            to_email,
            "Your Username Recovery",
            format!("Your username is: {username}"),
        )
    }
}
