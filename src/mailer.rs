use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::PoolConfig;
use lettre::{Message, SmtpTransport, Transport};
use tracing::info;

use crate::config::SmtpConfig;

/// Outbound mail contract; the reset flow is the only caller.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// SMTP relay client over TLS.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &SmtpConfig) -> anyhow::Result<Self> {
        let tls = TlsParameters::builder(config.host.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build TLS parameters: {}", e))?;
        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| anyhow::anyhow!("failed to create SMTP transport: {}", e))?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .port(config.port)
            .tls(Tls::Required(tls))
            .pool_config(PoolConfig::new().max_size(1))
            .timeout(Some(std::time::Duration::from_secs(10)))
            .build();
        let from = config
            .from
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid from address: {}", e))?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(to
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid to address: {}", e))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        // lettre's SMTP transport is blocking; keep it off the runtime.
        let transport = self.transport.clone();
        let to = to.to_string();
        tokio::task::spawn_blocking(move || transport.send(&email)).await??;
        info!(%to, "email sent");
        Ok(())
    }
}

/// Stand-in when no SMTP relay is configured; every send fails, which the
/// reset flow reports as a delivery failure.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> anyhow::Result<()> {
        anyhow::bail!("smtp relay not configured")
    }
}
