//! Authentication service — login, registration, recovery, social
//! sign-in, step-up and token lifecycle orchestration.
//!
//! Every flow is a single request/response. Pending step-up state lives
//! in stored one-time challenges keyed by `(user_id, purpose)`, never in
//! this struct.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use keyhold_core::events::{AuthEvent, EventBus, OtpDispatch, PromptData};
use keyhold_core::models::access::{OrganizationAccess, WarehouseAccess};
use keyhold_core::models::device::{RegisterDevice, TrustedDevice};
use keyhold_core::models::otp::OtpPurpose;
use keyhold_core::models::refresh_token::{CreateRefreshToken, RotationOutcome};
use keyhold_core::models::role::Role;
use keyhold_core::models::social::SocialProvider;
use keyhold_core::models::user::{CreateUser, UpdateUser, User, UserStatus};
use keyhold_core::repository::{AuthStore, OtpRepository};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::device::{DeviceRegistry, MAX_FINGERPRINT_LEN};
use crate::error::{AuthError, AuthResult};
use crate::otp::{OtpDelivery, OtpManager};
use crate::password::SecretHasher;
use crate::permission::PermissionResolver;
use crate::social::{SocialIdentityLinker, SocialProviderVerifier};
use crate::token::{IssuedToken, TokenClaims, TokenClass, TokenIssuer};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Client device presented with a login or registration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub fingerprint: String,
    pub name: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl DeviceInfo {
    fn validate(&self) -> AuthResult<()> {
        let fingerprint = self.fingerprint.trim();
        if fingerprint.is_empty() {
            return Err(AuthError::InvalidRequest(
                "device fingerprint is required".into(),
            ));
        }
        if fingerprint.len() > MAX_FINGERPRINT_LEN {
            return Err(AuthError::InvalidRequest(format!(
                "device fingerprint must be at most {MAX_FINGERPRINT_LEN} characters"
            )));
        }
        Ok(())
    }

    fn registration(self, user_id: Uuid) -> RegisterDevice {
        RegisterDevice {
            user_id,
            device_fingerprint: self.fingerprint,
            device_name: self.name,
            user_agent: self.user_agent,
            ip_address: self.ip_address,
        }
    }
}

/// Input for the login flow. Exactly one identifier field must be set.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginInput {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub email_or_phone: Option<String>,
    pub password: String,
    pub device: Option<DeviceInfo>,
}

impl core::fmt::Debug for LoginInput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoginInput")
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("email_or_phone", &self.email_or_phone)
            .field("password", &"<redacted>")
            .field("device", &self.device)
            .finish()
    }
}

/// Input for the registration flow.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
    pub email: String,
    pub phone: Option<String>,
    pub display_name: Option<String>,
    pub password: String,
    pub device: Option<DeviceInfo>,
}

impl core::fmt::Debug for RegisterInput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegisterInput")
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("display_name", &self.display_name)
            .field("password", &"<redacted>")
            .field("device", &self.device)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Tokens plus the authenticated user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOutput {
    pub success: bool,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialLoginOutput {
    #[serde(flatten)]
    pub auth: AuthOutput,
    pub is_new_user: bool,
}

/// Result of a refresh exchange.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// A step-up the client must answer with the delivered code.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChallenge {
    pub user_id: Uuid,
    pub challenge_id: Uuid,
    pub purpose: OtpPurpose,
    pub expires_at: DateTime<Utc>,
    pub delivery_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginOutcome {
    Authenticated(AuthOutput),
    ChallengeRequired(PendingChallenge),
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SuccessOutput {
    pub success: bool,
}

impl SuccessOutput {
    const OK: Self = Self { success: true };
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
    pub challenges: u64,
    pub refresh_tokens: u64,
}

// ---------------------------------------------------------------------------
// Identifier handling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Identifier {
    Email(String),
    Phone(String),
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn classify(raw: &str) -> AuthResult<Identifier> {
    let raw = raw.trim();
    if raw.is_empty() {
        Err(AuthError::InvalidRequest(
            "an email or phone identifier is required".into(),
        ))
    } else if raw.contains('@') {
        Ok(Identifier::Email(raw.to_lowercase()))
    } else {
        Ok(Identifier::Phone(raw.to_string()))
    }
}

impl LoginInput {
    fn identifier(&self) -> AuthResult<Identifier> {
        let fields = [
            present(&self.email).map(|e| Identifier::Email(e.to_lowercase())),
            present(&self.phone).map(|p| Identifier::Phone(p.to_string())),
            present(&self.email_or_phone).map(classify).transpose()?,
        ];
        let mut given = fields.into_iter().flatten();
        match (given.next(), given.next()) {
            (Some(identifier), None) => Ok(identifier),
            (None, _) => Err(AuthError::InvalidRequest(
                "an email or phone identifier is required".into(),
            )),
            (Some(_), Some(_)) => Err(AuthError::InvalidRequest(
                "provide exactly one identifier".into(),
            )),
        }
    }
}

fn validate_email(email: &str) -> AuthResult<()> {
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && domain.contains('.') && !email.contains(char::is_whitespace) =>
        {
            Ok(())
        }
        _ => Err(AuthError::InvalidRequest("a valid email is required".into())),
    }
}

fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{first}***@{domain}")
        }
        None => "***".into(),
    }
}

fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("***{tail}")
}

/// Where a code for `purpose` is sent, and the masked hint shown to the
/// client.
fn contact(user: &User, purpose: OtpPurpose) -> (Option<String>, Option<String>) {
    match purpose {
        OtpPurpose::PhoneVerification => {
            let hint = user.phone.as_deref().map(mask_phone);
            (user.phone.clone(), hint)
        }
        _ => (Some(user.email.clone()), Some(mask_email(&user.email))),
    }
}

/// Store a challenge and hand its code to delivery.
async fn send_challenge<R: OtpRepository>(
    otp: &OtpManager<R>,
    delivery: &dyn OtpDelivery,
    user: &User,
    purpose: OtpPurpose,
    device_fingerprint: Option<String>,
) -> AuthResult<PendingChallenge> {
    let (destination, hint) = contact(user, purpose);
    let issued = otp
        .issue(user.id, purpose, hint.clone(), device_fingerprint)
        .await?;
    delivery
        .deliver(OtpDispatch {
            user_id: user.id,
            purpose,
            code: issued.code,
            destination,
        })
        .await?;

    Ok(PendingChallenge {
        user_id: user.id,
        challenge_id: issued.challenge.id,
        purpose,
        expires_at: issued.challenge.expires_at,
        delivery_hint: hint,
    })
}

/// Signed tokens of a new rotation family, not yet stored.
struct MintedSession {
    access: IssuedToken,
    refresh: IssuedToken,
    record: CreateRefreshToken,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Authentication service.
///
/// Generic over the store so the auth layer has no dependency on any
/// particular persistence crate.
pub struct AuthService<S: AuthStore> {
    store: S,
    config: AuthConfig,
    hasher: SecretHasher,
    tokens: TokenIssuer,
    otp: OtpManager<S>,
    devices: DeviceRegistry<S>,
    permissions: PermissionResolver<S>,
    social: SocialIdentityLinker<S>,
    events: Arc<dyn EventBus>,
    delivery: Arc<dyn OtpDelivery>,
}

impl<S: AuthStore> AuthService<S> {
    /// Build the service and its components. Social sign-in starts with
    /// the default provider verifiers.
    pub fn new(
        store: S,
        config: AuthConfig,
        events: Arc<dyn EventBus>,
        delivery: Arc<dyn OtpDelivery>,
    ) -> AuthResult<Self> {
        if config.otp_length == 0 || config.otp_max_attempts == 0 {
            return Err(AuthError::Internal(
                "otp length and attempt ceiling must be positive".into(),
            ));
        }
        let social = SocialIdentityLinker::with_default_providers(store.clone(), &config)?;
        Ok(Self {
            hasher: SecretHasher::from_config(&config)?,
            tokens: TokenIssuer::from_config(&config)?,
            otp: OtpManager::new(store.clone(), &config),
            devices: DeviceRegistry::new(store.clone(), events.clone()),
            permissions: PermissionResolver::new(store.clone()),
            social,
            store,
            config,
            events,
            delivery,
        })
    }

    /// Replace or add the verifier for one provider.
    pub fn with_social_verifier(mut self, verifier: Arc<dyn SocialProviderVerifier>) -> Self {
        self.social = self.social.with_verifier(verifier);
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    fn publish(&self, event: AuthEvent) {
        let topic = event.topic();
        if let Err(e) = self.events.publish(event) {
            warn!(topic, error = %e, "event publish failed");
        }
    }

    async fn find_user(&self, identifier: &Identifier) -> AuthResult<Option<User>> {
        Ok(match identifier {
            Identifier::Email(email) => self.store.find_user_by_email(email).await?,
            Identifier::Phone(phone) => self.store.find_user_by_phone(phone).await?,
        })
    }

    fn ensure_active(user: &User) -> AuthResult<()> {
        match user.status {
            UserStatus::Active | UserStatus::PendingVerification => Ok(()),
            UserStatus::Suspended => Err(AuthError::AccountDisabled),
        }
    }

    fn check_password_policy(&self, password: &str) -> AuthResult<()> {
        if password.chars().count() < self.config.min_password_length {
            return Err(AuthError::InvalidRequest(format!(
                "password must be at least {} characters",
                self.config.min_password_length
            )));
        }
        Ok(())
    }

    /// Sign an access token and the first refresh token of a new family.
    fn mint_session(&self, user_id: Uuid) -> AuthResult<MintedSession> {
        let family_id = Uuid::new_v4();
        let refresh = self.tokens.issue_refresh(user_id, family_id)?;
        let access = self.tokens.issue_access(user_id)?;
        let record = CreateRefreshToken {
            token_id: refresh.token_id,
            user_id,
            family_id,
            issued_at: refresh.issued_at,
            expires_at: refresh.expires_at,
        };
        Ok(MintedSession {
            access,
            refresh,
            record,
        })
    }

    fn session_output(&self, user: User, minted: MintedSession) -> AuthOutput {
        AuthOutput {
            success: true,
            access_token: minted.access.token,
            refresh_token: minted.refresh.token,
            expires_in: self.tokens.access_lifetime_secs(),
            user,
        }
    }

    /// Issue a fresh rotation family: access token plus first refresh token.
    async fn issue_session(&self, user: User) -> AuthResult<AuthOutput> {
        let minted = self.mint_session(user.id)?;
        self.store.create_refresh_token(minted.record.clone()).await?;
        Ok(self.session_output(user, minted))
    }

    async fn issue_challenge(
        &self,
        user: &User,
        purpose: OtpPurpose,
        device_fingerprint: Option<String>,
    ) -> AuthResult<PendingChallenge> {
        send_challenge(
            &self.otp,
            self.delivery.as_ref(),
            user,
            purpose,
            device_fingerprint,
        )
        .await
    }

    /// Issue a challenge and announce it as an `auth:prompt`.
    async fn start_step_up(
        &self,
        user: &User,
        purpose: OtpPurpose,
        device_fingerprint: Option<String>,
    ) -> AuthResult<PendingChallenge> {
        let pending = self
            .issue_challenge(user, purpose, device_fingerprint.clone())
            .await?;
        self.publish(AuthEvent::AuthPrompt {
            user_id: user.id,
            prompt: PromptData {
                purpose,
                challenge_id: pending.challenge_id,
                expires_at: pending.expires_at,
                delivery_hint: pending.delivery_hint.clone(),
                device_fingerprint,
            },
        });
        Ok(pending)
    }

    // -----------------------------------------------------------------------
    // Login & registration
    // -----------------------------------------------------------------------

    /// Authenticate with one identifier and a password.
    ///
    /// Unknown accounts and wrong passwords fail identically. When a
    /// device is presented that the user does not trust yet, a `login`
    /// challenge is issued instead of tokens.
    pub async fn login(&self, input: LoginInput) -> AuthResult<LoginOutcome> {
        let identifier = input.identifier()?;
        if input.password.is_empty() {
            return Err(AuthError::InvalidRequest("password is required".into()));
        }
        if let Some(device) = &input.device {
            device.validate()?;
        }

        let user = self.find_user(&identifier).await?;
        let Some((user, hash)) =
            user.and_then(|u| u.password_hash.clone().map(|hash| (u, hash)))
        else {
            self.hasher.burn_blocking(input.password).await;
            warn!("login failed: invalid credentials");
            return Err(AuthError::Unauthorized);
        };

        if !self.hasher.verify_blocking(input.password, hash).await? {
            warn!(user_id = %user.id, "login failed: invalid credentials");
            return Err(AuthError::Unauthorized);
        }
        Self::ensure_active(&user)?;

        if let Some(device) = input.device {
            let trusted = self.devices.find_trusted(user.id, &device.fingerprint).await?;
            if trusted.is_none() && self.config.require_device_challenge {
                let pending = self
                    .start_step_up(
                        &user,
                        OtpPurpose::Login,
                        Some(device.fingerprint.trim().to_string()),
                    )
                    .await?;
                info!(user_id = %user.id, "login requires device challenge");
                return Ok(LoginOutcome::ChallengeRequired(pending));
            }
            self.devices.register(device.registration(user.id)).await?;
        }

        let user_id = user.id;
        let output = self.issue_session(user).await?;
        info!(%user_id, "user logged in");
        Ok(LoginOutcome::Authenticated(output))
    }

    /// Answer a `login` challenge: trusts the device and issues tokens. A
    /// challenge issued to a device must be answered with that device.
    pub async fn complete_login_challenge(
        &self,
        user_id: Uuid,
        code: &str,
        device: Option<DeviceInfo>,
    ) -> AuthResult<AuthOutput> {
        if let Some(device) = &device {
            device.validate()?;
        }
        let user = match self.store.get_user(user_id).await {
            Ok(user) => user,
            Err(keyhold_core::KeyholdError::NotFound { .. }) => return Err(AuthError::Expired),
            Err(e) => return Err(e.into()),
        };

        let fingerprint = device.as_ref().map(|d| d.fingerprint.trim());
        self.check_otp(user.id, OtpPurpose::Login, code, fingerprint)
            .await?;
        Self::ensure_active(&user)?;

        if let Some(device) = device {
            self.devices.register(device.registration(user.id)).await?;
        }
        let output = self.issue_session(user).await?;
        info!(%user_id, "login challenge completed");
        Ok(output)
    }

    /// Create an account and log it in. The account and its first session
    /// are stored together.
    pub async fn register(&self, input: RegisterInput) -> AuthResult<AuthOutput> {
        let email = input.email.trim().to_lowercase();
        validate_email(&email)?;
        self.check_password_policy(&input.password)?;
        if let Some(device) = &input.device {
            device.validate()?;
        }
        let phone = present(&input.phone).map(str::to_string);

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::AlreadyExists("user.email".into()));
        }
        if let Some(phone) = &phone {
            if self.store.find_user_by_phone(phone).await?.is_some() {
                return Err(AuthError::AlreadyExists("user.phone".into()));
            }
        }

        let display_name = present(&input.display_name)
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        let password_hash = self.hasher.hash_blocking(input.password).await?;

        let user_id = Uuid::new_v4();
        let minted = self.mint_session(user_id)?;
        let user = self
            .store
            .create_user_with_session(
                user_id,
                CreateUser {
                    email,
                    phone,
                    display_name,
                    password_hash: Some(password_hash),
                    status: UserStatus::PendingVerification,
                    email_verified: false,
                },
                minted.record.clone(),
            )
            .await?;
        info!(%user_id, "user registered");

        if let Some(device) = input.device {
            if let Err(e) = self.devices.register(device.registration(user_id)).await {
                warn!(%user_id, error = %e, "device not registered at sign-up");
            }
        }
        Ok(self.session_output(user, minted))
    }

    // -----------------------------------------------------------------------
    // Password recovery
    // -----------------------------------------------------------------------

    /// Start a password reset. Always reports success and costs the same
    /// whether or not the identifier matches an account: the code is
    /// stored and delivered after the response.
    pub async fn forgot_password(&self, identifier: &str) -> SuccessOutput {
        self.hasher.burn_blocking(identifier.to_string()).await;

        let Ok(identifier) = classify(identifier) else {
            return SuccessOutput::OK;
        };
        let user = match self.find_user(&identifier).await {
            Ok(Some(user)) if user.status != UserStatus::Suspended => user,
            Ok(_) => return SuccessOutput::OK,
            Err(e) => {
                warn!(error = %e, "password reset lookup failed");
                return SuccessOutput::OK;
            }
        };

        let otp = self.otp.clone();
        let delivery = Arc::clone(&self.delivery);
        tokio::spawn(async move {
            let purpose = OtpPurpose::PasswordReset;
            match send_challenge(&otp, delivery.as_ref(), &user, purpose, None).await {
                Ok(_) => debug!(user_id = %user.id, "password reset code issued"),
                Err(e) => warn!(user_id = %user.id, error = %e, "password reset code not issued"),
            }
        });
        SuccessOutput::OK
    }

    /// Finish a reset with the delivered code. An unknown identifier looks
    /// exactly like an account without a pending reset.
    pub async fn reset_password(
        &self,
        identifier: &str,
        code: &str,
        new_password: &str,
    ) -> AuthResult<SuccessOutput> {
        let identifier = classify(identifier)?;
        self.check_password_policy(new_password)?;

        let Some(user) = self.find_user(&identifier).await? else {
            return Err(AuthError::Expired);
        };
        self.verify_otp(user.id, OtpPurpose::PasswordReset, code)
            .await?;

        self.replace_password(user.id, new_password.to_string()).await?;
        info!(user_id = %user.id, "password reset");
        Ok(SuccessOutput::OK)
    }

    /// Change the password of a logged-in user.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<SuccessOutput> {
        self.check_password_policy(new_password)?;
        let user = self.store.get_user(user_id).await?;
        let Some(hash) = user.password_hash else {
            self.hasher.burn_blocking(current_password.to_string()).await;
            return Err(AuthError::Unauthorized);
        };
        if !self
            .hasher
            .verify_blocking(current_password.to_string(), hash)
            .await?
        {
            warn!(%user_id, "password change rejected: invalid credentials");
            return Err(AuthError::Unauthorized);
        }

        self.replace_password(user_id, new_password.to_string()).await?;
        info!(%user_id, "password changed");
        Ok(SuccessOutput::OK)
    }

    /// Swap the credential wholesale and end every session.
    async fn replace_password(&self, user_id: Uuid, new_password: String) -> AuthResult<()> {
        let hash = self.hasher.hash_blocking(new_password).await?;
        self.store
            .update_user(
                user_id,
                UpdateUser {
                    password_hash: Some(hash),
                    ..Default::default()
                },
            )
            .await?;
        let revoked = self.store.revoke_user_tokens(user_id, Utc::now()).await?;
        debug!(%user_id, revoked, "refresh tokens revoked after credential change");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Social sign-in
    // -----------------------------------------------------------------------

    pub async fn social_login(
        &self,
        provider: SocialProvider,
        provider_token: &str,
    ) -> AuthResult<SocialLoginOutput> {
        let profile = self
            .social
            .verify_provider_token(provider, provider_token)
            .await?;
        let resolution = self.social.resolve(&profile).await?;
        Self::ensure_active(&resolution.user)?;

        let user_id = resolution.user.id;
        let auth = self.issue_session(resolution.user).await?;
        info!(%user_id, %provider, is_new_user = resolution.is_new_user, "social login");
        Ok(SocialLoginOutput {
            auth,
            is_new_user: resolution.is_new_user,
        })
    }

    // -----------------------------------------------------------------------
    // Tokens
    // -----------------------------------------------------------------------

    /// Exchange a refresh token for a new pair.
    ///
    /// Each refresh token works once. Presenting one that was already
    /// rotated revokes every refresh token of the user.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let claims = self.tokens.verify(refresh_token, TokenClass::Refresh)?;
        let user_id = claims.user_id()?;
        let token_id = claims.token_id()?;
        let family_id = claims.family_id()?;

        let user = match self.store.get_user(user_id).await {
            Ok(user) => user,
            Err(keyhold_core::KeyholdError::NotFound { .. }) => {
                return Err(AuthError::Unauthorized);
            }
            Err(e) => return Err(e.into()),
        };
        Self::ensure_active(&user)?;

        let successor = self.tokens.issue_refresh(user_id, family_id)?;
        let now = Utc::now();
        let outcome = self
            .store
            .rotate_refresh_token(
                token_id,
                CreateRefreshToken {
                    token_id: successor.token_id,
                    user_id,
                    family_id,
                    issued_at: successor.issued_at,
                    expires_at: successor.expires_at,
                },
                now,
            )
            .await?;

        match outcome {
            RotationOutcome::Rotated(_) => {}
            RotationOutcome::Replayed { user_id, family_id } => {
                let revoked = self.store.revoke_user_tokens(user_id, now).await?;
                warn!(%user_id, "refresh token replay detected, all sessions revoked");
                self.publish(AuthEvent::TokenReplay {
                    user_id,
                    family_id,
                    revoked,
                });
                return Err(AuthError::ReplayDetected);
            }
            RotationOutcome::Revoked => {
                debug!(%user_id, "revoked refresh token presented");
                return Err(AuthError::Unauthorized);
            }
            RotationOutcome::Expired | RotationOutcome::NotFound => {
                return Err(AuthError::Unauthorized);
            }
        }

        let access = self.tokens.issue_access(user_id)?;
        info!(%user_id, "refresh token rotated");
        Ok(TokenPair {
            access_token: access.token,
            refresh_token: successor.token,
            expires_in: self.tokens.access_lifetime_secs(),
        })
    }

    /// End the session the refresh token belongs to. Repeating it is
    /// harmless.
    pub async fn logout(&self, refresh_token: &str) -> AuthResult<SuccessOutput> {
        let claims = self.tokens.verify(refresh_token, TokenClass::Refresh)?;
        let family_id = claims.family_id()?;
        let revoked = self
            .store
            .revoke_token_family(family_id, Utc::now())
            .await?;
        debug!(user_id = %claims.sub, revoked, "logged out");
        Ok(SuccessOutput::OK)
    }

    /// End every session of the user. Returns the number of tokens revoked.
    pub async fn logout_all(&self, user_id: Uuid) -> AuthResult<u64> {
        let revoked = self.store.revoke_user_tokens(user_id, Utc::now()).await?;
        info!(%user_id, revoked, "all sessions revoked");
        Ok(revoked)
    }

    /// Stateless access-token check for request middleware.
    pub fn validate_access_token(&self, token: &str) -> AuthResult<TokenClaims> {
        self.tokens.verify(token, TokenClass::Access)
    }

    // -----------------------------------------------------------------------
    // One-time codes
    // -----------------------------------------------------------------------

    /// Issue a step-up challenge, e.g. before approving a transaction.
    pub async fn request_step_up(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
    ) -> AuthResult<PendingChallenge> {
        let user = self.store.get_user(user_id).await?;
        Self::ensure_active(&user)?;
        self.start_step_up(&user, purpose, None).await
    }

    pub async fn verify_otp(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        code: &str,
    ) -> AuthResult<()> {
        self.check_otp(user_id, purpose, code, None).await
    }

    async fn check_otp(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        code: &str,
        device_fingerprint: Option<&str>,
    ) -> AuthResult<()> {
        if code.trim().is_empty() {
            return Err(AuthError::InvalidRequest("code is required".into()));
        }
        self.otp
            .verify(user_id, purpose, code, device_fingerprint)
            .await?
            .into_result()
    }

    /// Send a code proving control of the account's email or phone.
    pub async fn request_contact_verification(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
    ) -> AuthResult<PendingChallenge> {
        let user = self.store.get_user(user_id).await?;
        match purpose {
            OtpPurpose::EmailVerification => {}
            OtpPurpose::PhoneVerification if user.phone.is_some() => {}
            OtpPurpose::PhoneVerification => {
                return Err(AuthError::InvalidRequest("no phone number on file".into()));
            }
            other => {
                return Err(AuthError::InvalidRequest(format!(
                    "{other} is not a contact verification purpose"
                )));
            }
        }
        self.issue_challenge(&user, purpose, None).await
    }

    /// Confirm a contact with its code and mark it verified. Verifying the
    /// email activates a pending account.
    pub async fn confirm_contact_verification(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        code: &str,
    ) -> AuthResult<User> {
        let update = match purpose {
            OtpPurpose::EmailVerification => {
                let user = self.store.get_user(user_id).await?;
                UpdateUser {
                    email_verified: Some(true),
                    status: (user.status == UserStatus::PendingVerification)
                        .then_some(UserStatus::Active),
                    ..Default::default()
                }
            }
            OtpPurpose::PhoneVerification => UpdateUser {
                phone_verified: Some(true),
                ..Default::default()
            },
            other => {
                return Err(AuthError::InvalidRequest(format!(
                    "{other} is not a contact verification purpose"
                )));
            }
        };

        self.verify_otp(user_id, purpose, code).await?;
        let user = self.store.update_user(user_id, update).await?;
        info!(%user_id, %purpose, "contact verified");
        Ok(user)
    }

    // -----------------------------------------------------------------------
    // Devices
    // -----------------------------------------------------------------------

    pub async fn list_devices(&self, user_id: Uuid) -> AuthResult<Vec<TrustedDevice>> {
        self.devices.list(user_id).await
    }

    pub async fn register_device(
        &self,
        user_id: Uuid,
        device: DeviceInfo,
    ) -> AuthResult<TrustedDevice> {
        device.validate()?;
        self.devices.register(device.registration(user_id)).await
    }

    pub async fn revoke_device(&self, user_id: Uuid, device_id: Uuid) -> AuthResult<TrustedDevice> {
        self.devices.revoke(user_id, device_id).await
    }

    pub async fn revoke_all_devices(&self, user_id: Uuid) -> AuthResult<u64> {
        self.devices.revoke_all(user_id).await
    }

    // -----------------------------------------------------------------------
    // Authorization
    // -----------------------------------------------------------------------

    pub async fn check_permission(
        &self,
        user_id: Uuid,
        permission_code: &str,
        organization_id: Option<Uuid>,
        warehouse_id: Option<Uuid>,
    ) -> bool {
        self.permissions
            .can(user_id, permission_code, organization_id, warehouse_id)
            .await
    }

    pub async fn effective_permissions(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
    ) -> AuthResult<Vec<String>> {
        self.permissions
            .effective_permissions(user_id, organization_id)
            .await
    }

    pub async fn default_organization(
        &self,
        user_id: Uuid,
    ) -> AuthResult<Option<OrganizationAccess>> {
        self.permissions.default_organization(user_id).await
    }

    pub async fn default_warehouse(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
    ) -> AuthResult<Option<WarehouseAccess>> {
        self.permissions
            .default_warehouse(user_id, organization_id)
            .await
    }

    pub async fn create_role_from_template(
        &self,
        template_role_id: Uuid,
        name: &str,
        description: Option<String>,
    ) -> AuthResult<Role> {
        self.permissions
            .create_role_from_template(template_role_id, name, description)
            .await
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Drop expired challenges and refresh-token records.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> AuthResult<PurgeReport> {
        let report = PurgeReport {
            challenges: self.store.purge_expired_challenges(now).await?,
            refresh_tokens: self.store.purge_expired_refresh_tokens(now).await?,
        };
        debug!(
            challenges = report.challenges,
            refresh_tokens = report.refresh_tokens,
            "expired records purged"
        );
        Ok(report)
    }
}
