//! Authentication configuration.

/// Configuration for the authentication service.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// PEM-encoded Ed25519 private key for JWT signing.
    pub jwt_private_key_pem: String,
    /// PEM-encoded Ed25519 public key for JWT verification.
    pub jwt_public_key_pem: String,
    /// JWT issuer (`iss` claim).
    pub jwt_issuer: String,
    /// Access token lifetime in seconds (default: 900 = 15 minutes).
    pub access_token_lifetime_secs: u64,
    /// Refresh token lifetime in seconds (default: 2_592_000 = 30 days).
    pub refresh_token_lifetime_secs: u64,
    /// Optional pepper prepended to passwords before Argon2id hashing.
    pub pepper: Option<String>,
    /// Minimum password length for policy enforcement.
    pub min_password_length: usize,
    /// Argon2id memory cost in KiB.
    pub argon2_memory_kib: u32,
    /// Argon2id iteration count.
    pub argon2_iterations: u32,
    /// Argon2id lanes.
    pub argon2_parallelism: u32,
    /// Number of digits in a one-time code.
    pub otp_length: usize,
    /// One-time code lifetime in seconds (default: 600 = 10 minutes).
    pub otp_lifetime_secs: u64,
    /// Failed attempts tolerated before a challenge is invalidated.
    pub otp_max_attempts: u32,
    /// Require a `login` challenge when a login presents a device
    /// fingerprint that is not trusted yet.
    pub require_device_challenge: bool,
    /// Link a first-time social identity to an existing account with the
    /// same email address.
    pub social_link_by_email: bool,
    /// OAuth client id Google access tokens must be issued to.
    pub google_client_id: Option<String>,
    /// Facebook app that user access tokens must belong to.
    pub facebook_app_id: Option<String>,
    /// Secret of `facebook_app_id`, used for `debug_token` calls.
    pub facebook_app_secret: Option<String>,
    /// Audience expected in Apple identity tokens (the Services ID).
    pub apple_client_id: Option<String>,
    /// Timeout for calls to social provider endpoints.
    pub social_http_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_private_key_pem: String::new(),
            jwt_public_key_pem: String::new(),
            jwt_issuer: "keyhold".into(),
            access_token_lifetime_secs: 900,
            refresh_token_lifetime_secs: 2_592_000,
            pepper: None,
            min_password_length: 8,
            argon2_memory_kib: 19_456,
            argon2_iterations: 2,
            argon2_parallelism: 1,
            otp_length: 6,
            otp_lifetime_secs: 600,
            otp_max_attempts: 5,
            require_device_challenge: true,
            social_link_by_email: true,
            google_client_id: None,
            facebook_app_id: None,
            facebook_app_secret: None,
            apple_client_id: None,
            social_http_timeout_secs: 10,
        }
    }
}
