use serde::Deserialize;

/// JWT signing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_days: i64,
}

/// SMTP relay used to deliver password reset codes.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

/// Argon2 work factor. Verification reads the parameters embedded in each
/// stored hash, so raising these later does not invalidate existing hashes.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordCost {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub smtp: Option<SmtpConfig>,
    pub reset_code_ttl_minutes: i64,
    pub password_cost: PasswordCost,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "medportal".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "medportal-users".into()),
            ttl_days: env_parse("JWT_TTL_DAYS", 30),
        };
        // The relay is optional; without it reset codes cannot be delivered.
        let smtp = match (
            std::env::var("SMTP_HOST"),
            std::env::var("SMTP_USERNAME"),
            std::env::var("SMTP_PASSWORD"),
        ) {
            (Ok(host), Ok(username), Ok(password)) => Some(SmtpConfig {
                port: env_parse("SMTP_PORT", 587),
                from: std::env::var("SMTP_FROM").unwrap_or_else(|_| username.clone()),
                host,
                username,
                password,
            }),
            _ => None,
        };
        Ok(Self {
            database_url,
            jwt,
            smtp,
            reset_code_ttl_minutes: env_parse("RESET_CODE_TTL_MINUTES", 15),
            password_cost: PasswordCost {
                memory_kib: env_parse("ARGON2_MEMORY_KIB", 19_456),
                iterations: env_parse("ARGON2_ITERATIONS", 2),
                parallelism: env_parse("ARGON2_PARALLELISM", 1),
            },
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
