use once_cell::sync::OnceCell;
use tracing::info;

static CONFIG: OnceCell<AuthConfig> = OnceCell::new();

/// Process-wide authentication configuration, read once from the environment.
///
/// Never reloaded per-request; see [`AuthConfig::init`].
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Dev-only: skip access-token signature verification entirely.
    pub skip_verify: bool,
    /// Issuers allowed to use HS256 (no `kid`) verification.
    pub hs256_issuers: Vec<String>,
    /// Shared secret for HS256 verification, if configured.
    pub pds_jwt_secret: Option<String>,
    /// Permits `http://` issuers (otherwise HTTPS is mandatory).
    pub is_dev_env: bool,
}

fn truthy(var: &str) -> bool {
    matches!(var.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl AuthConfig {
    fn from_env() -> Self {
        let skip_verify = std::env::var("AUTH_SKIP_VERIFY")
            .map(|v| truthy(&v))
            .unwrap_or(false);
        let hs256_issuers = std::env::var("HS256_ISSUERS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let pds_jwt_secret = std::env::var("PDS_JWT_SECRET").ok().filter(|s| !s.is_empty());
        let is_dev_env = std::env::var("IS_DEV_ENV").map(|v| truthy(&v)).unwrap_or(false);

        Self {
            skip_verify,
            hs256_issuers,
            pds_jwt_secret,
            is_dev_env,
        }
    }

    /// Whether `issuer` may use HS256 verification without a `kid`.
    pub fn allows_hs256_issuer(&self, issuer: &str) -> bool {
        self.hs256_issuers.iter().any(|i| i == issuer)
    }

    /// Load configuration from the environment exactly once and log the
    /// non-sensitive fields. Subsequent calls return the already-loaded value.
    pub fn init() -> &'static AuthConfig {
        CONFIG.get_or_init(|| {
            let cfg = Self::from_env();
            if cfg.skip_verify {
                tracing::warn!("AUTH_SKIP_VERIFY is enabled — signature verification is disabled");
            }
            info!(
                skip_verify = cfg.skip_verify,
                hs256_issuer_count = cfg.hs256_issuers.len(),
                jwt_secret_configured = cfg.pds_jwt_secret.is_some(),
                is_dev_env = cfg.is_dev_env,
                "auth config loaded"
            );
            cfg
        })
    }

    /// Access the process-wide configuration, initializing it from the
    /// environment on first use.
    pub fn get() -> &'static AuthConfig {
        CONFIG.get().unwrap_or_else(Self::init)
    }
}
