use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_password, verify_password};
use crate::auth::repo::{CredentialStore, NewUser, ProfileChanges, Role, User};
use crate::config::PasswordCost;
use crate::error::AuthError;
use crate::mailer::Mailer;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// 6-digit code sampled uniformly from 100000..=999999.
pub(crate) fn generate_reset_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

fn reset_email_body(code: &str, ttl_minutes: i64) -> String {
    format!(
        "You have requested to reset your password. Use the following code to reset your password:\n\
         \n\
         {code}\n\
         \n\
         This code will expire in {ttl_minutes} minutes.\n\
         If you didn't request this, please ignore this email.\n"
    )
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < 6 {
        return Err(AuthError::Validation(
            "Password must be at least 6 characters".into(),
        ));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), AuthError> {
    if name.is_empty() {
        return Err(AuthError::Validation("Please provide a name".into()));
    }
    if name.len() > 50 {
        return Err(AuthError::Validation(
            "Name cannot be more than 50 characters".into(),
        ));
    }
    Ok(())
}

pub struct RegisterInput {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<Role>,
}

/// Token plus the freshly loaded record, ready for projection to a client
/// view.
#[derive(Debug)]
pub struct AuthOutcome {
    pub token: String,
    pub user: User,
}

pub async fn register(
    store: &dyn CredentialStore,
    keys: &JwtKeys,
    cost: &PasswordCost,
    input: RegisterInput,
) -> Result<AuthOutcome, AuthError> {
    let name = input.name.trim().to_string();
    let email = normalize_email(&input.email);
    validate_name(&name)?;
    if !is_valid_email(&email) {
        return Err(AuthError::Validation("Please provide a valid email".into()));
    }
    validate_password(&input.password)?;

    if store.find_by_email(&email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(AuthError::DuplicateEmail);
    }

    // Hashing happens here and nowhere else on this path; the store only ever
    // sees the finished hash.
    let password_hash = hash_password(&input.password, cost)?;
    let user = store
        .insert(NewUser {
            name,
            email,
            password_hash,
            role: input.role.unwrap_or_default(),
        })
        .await?;
    let token = keys.sign(user.id)?;
    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(AuthOutcome { token, user })
}

/// The two failure cases carry distinct messages ("Incorrect email" vs
/// "Incorrect password"); the reset endpoint deliberately does not make this
/// distinction.
pub async fn login(
    store: &dyn CredentialStore,
    keys: &JwtKeys,
    email: &str,
    password: &str,
) -> Result<AuthOutcome, AuthError> {
    let email = normalize_email(email);
    let Some(user) = store.find_by_email(&email).await? else {
        warn!(%email, "login unknown email");
        return Err(AuthError::IncorrectEmail);
    };
    if !verify_password(password, &user.password_hash)? {
        warn!(%email, user_id = %user.id, "login invalid password");
        return Err(AuthError::IncorrectPassword);
    }
    let token = keys.sign(user.id)?;
    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(AuthOutcome { token, user })
}

pub async fn change_password(
    store: &dyn CredentialStore,
    cost: &PasswordCost,
    user_id: Uuid,
    current_password: &str,
    new_password: &str,
) -> Result<(), AuthError> {
    let user = store
        .find_by_id(user_id)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    if !verify_password(current_password, &user.password_hash)? {
        return Err(AuthError::CurrentPasswordIncorrect);
    }
    validate_password(new_password)?;
    let password_hash = hash_password(new_password, cost)?;
    store.set_password(user.id, &password_hash).await?;
    info!(user_id = %user.id, "password changed");
    Ok(())
}

/// Step one of the reset flow. Resolves successfully whether or not the email
/// is registered, so this endpoint cannot be used to enumerate accounts. A
/// request while a code is already pending overwrites it. A delivery failure
/// is reported but does not roll back the stored code.
pub async fn request_password_reset(
    store: &dyn CredentialStore,
    mailer: &dyn Mailer,
    ttl_minutes: i64,
    email: &str,
) -> Result<(), AuthError> {
    let email = normalize_email(email);
    let Some(user) = store.find_by_email(&email).await? else {
        return Ok(());
    };

    let code = generate_reset_code();
    let expiry = OffsetDateTime::now_utc() + TimeDuration::minutes(ttl_minutes);
    store.set_reset_code(user.id, &code, expiry).await?;
    info!(user_id = %user.id, "reset code stored");

    if let Err(e) = mailer
        .send(
            &user.email,
            "Password Reset Code",
            &reset_email_body(&code, ttl_minutes),
        )
        .await
    {
        warn!(user_id = %user.id, error = %e, "reset code delivery failed");
        return Err(AuthError::NotificationFailed);
    }
    Ok(())
}

/// Step two of the reset flow. Expiry is evaluated lazily here; an expired
/// code stays on the record until a fresh request overwrites it. The final
/// write is conditional on the code still being present, so of two concurrent
/// verifications exactly one succeeds.
pub async fn verify_reset_code(
    store: &dyn CredentialStore,
    cost: &PasswordCost,
    email: &str,
    code: &str,
    new_password: &str,
) -> Result<(), AuthError> {
    let email = normalize_email(email);
    let user = store
        .find_by_email(&email)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    let (stored_code, expiry) = match (&user.reset_code, user.reset_code_expiry) {
        (Some(code), Some(expiry)) => (code.as_str(), expiry),
        _ => return Err(AuthError::NoResetRequested),
    };
    if expiry < OffsetDateTime::now_utc() {
        return Err(AuthError::ResetCodeExpired);
    }
    if stored_code != code {
        return Err(AuthError::InvalidResetCode);
    }
    validate_password(new_password)?;

    let password_hash = hash_password(new_password, cost)?;
    if !store.consume_reset_code(user.id, code, &password_hash).await? {
        // lost the race: the code was consumed between the read and the write
        return Err(AuthError::NoResetRequested);
    }
    info!(user_id = %user.id, "password reset completed");
    Ok(())
}

pub async fn get_profile(store: &dyn CredentialStore, user_id: Uuid) -> Result<User, AuthError> {
    store
        .find_by_id(user_id)
        .await?
        .ok_or(AuthError::UserNotFound)
}

pub async fn update_profile(
    store: &dyn CredentialStore,
    user_id: Uuid,
    mut changes: ProfileChanges,
) -> Result<User, AuthError> {
    if let Some(name) = &changes.name {
        let name = name.trim().to_string();
        validate_name(&name)?;
        changes.name = Some(name);
    }
    if let Some(email) = &changes.email {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AuthError::Validation("Please provide a valid email".into()));
        }
        changes.email = Some(email);
    }
    let user = store
        .update_profile(user_id, changes)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    info!(user_id = %user.id, "profile updated");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::test_cost;
    use crate::auth::repo::MemoryStore;
    use crate::config::JwtConfig;
    use crate::mailer::testing::RecordingMailer;

    fn keys() -> JwtKeys {
        JwtKeys::new(&JwtConfig {
            secret: "test-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            ttl_days: 30,
        })
    }

    fn alice() -> RegisterInput {
        RegisterInput {
            name: "Alice".into(),
            email: "a@x.com".into(),
            password: "secret1".into(),
            role: None,
        }
    }

    async fn registered_store() -> MemoryStore {
        let store = MemoryStore::default();
        register(&store, &keys(), &test_cost(), alice())
            .await
            .expect("register");
        store
    }

    #[test]
    fn reset_codes_are_six_digits_in_range() {
        for _ in 0..100 {
            let code = generate_reset_code();
            assert_eq!(code.len(), 6);
            let n: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&n));
        }
    }

    #[tokio::test]
    async fn register_issues_a_verifiable_token() {
        let store = MemoryStore::default();
        let outcome = register(&store, &keys(), &test_cost(), alice())
            .await
            .expect("register");
        assert_eq!(outcome.user.role, Role::Patient);
        let claims = keys().verify(&outcome.token).expect("verify token");
        assert_eq!(claims.sub, outcome.user.id);
        // the embedded id resolves back to the record
        let found = store.find_by_id(claims.sub).await.unwrap().unwrap();
        assert_eq!(found.email, "a@x.com");
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email_any_case() {
        let store = registered_store().await;
        let err = register(
            &store,
            &keys(),
            &test_cost(),
            RegisterInput {
                name: "Imposter".into(),
                email: "A@X.COM".into(),
                password: "secret2".into(),
                role: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateEmail));
        let first = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(first.name, "Alice");
    }

    #[tokio::test]
    async fn register_validates_inputs() {
        let store = MemoryStore::default();
        let long_name = "x".repeat(51);
        let cases = [
            ("", "a@x.com", "secret1"),
            (long_name.as_str(), "a@x.com", "secret1"),
            ("Alice", "not-an-email", "secret1"),
            ("Alice", "a@x.com", "short"),
        ];
        for (name, email, password) in cases {
            let err = register(
                &store,
                &keys(),
                &test_cost(),
                RegisterInput {
                    name: name.into(),
                    email: email.into(),
                    password: password.into(),
                    role: None,
                },
            )
            .await
            .unwrap_err();
            assert!(matches!(err, AuthError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn login_distinguishes_email_and_password_failures() {
        let store = registered_store().await;

        let outcome = login(&store, &keys(), "a@x.com", "secret1").await.unwrap();
        assert!(keys().verify(&outcome.token).is_ok());

        let err = login(&store, &keys(), "a@x.com", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::IncorrectPassword));

        let err = login(&store, &keys(), "nobody@x.com", "x").await.unwrap_err();
        assert!(matches!(err, AuthError::IncorrectEmail));
    }

    #[tokio::test]
    async fn change_password_invalidates_the_old_plaintext() {
        let store = registered_store().await;
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();

        let err = change_password(&store, &test_cost(), user.id, "wrong", "secret2")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CurrentPasswordIncorrect));

        change_password(&store, &test_cost(), user.id, "secret1", "secret2")
            .await
            .expect("change password");

        let err = login(&store, &keys(), "a@x.com", "secret1").await.unwrap_err();
        assert!(matches!(err, AuthError::IncorrectPassword));
        login(&store, &keys(), "a@x.com", "secret2").await.unwrap();
    }

    #[tokio::test]
    async fn change_password_unknown_user() {
        let store = MemoryStore::default();
        let err = change_password(&store, &test_cost(), Uuid::new_v4(), "a", "secret2")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));
    }

    #[tokio::test]
    async fn reset_request_acknowledges_unknown_emails() {
        let store = MemoryStore::default();
        let mailer = RecordingMailer::default();
        request_password_reset(&store, &mailer, 15, "nobody@x.com")
            .await
            .expect("generic acknowledgment");
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_flow_succeeds_exactly_once() {
        let store = registered_store().await;
        let mailer = RecordingMailer::default();
        request_password_reset(&store, &mailer, 15, "a@x.com")
            .await
            .expect("request");

        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        let code = user.reset_code.clone().expect("code pending");
        assert!(user.reset_code_expiry.is_some());

        // the delivered body carries the stored code
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "a@x.com");
        assert!(sent[0].2.contains(&code));
        drop(sent);

        verify_reset_code(&store, &test_cost(), "a@x.com", &code, "fresh-pass")
            .await
            .expect("verify");
        login(&store, &keys(), "a@x.com", "fresh-pass").await.unwrap();

        // replaying the same code finds no reset pending
        let err = verify_reset_code(&store, &test_cost(), "a@x.com", &code, "other-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NoResetRequested));
    }

    #[tokio::test]
    async fn verify_rejects_wrong_code_and_keeps_the_hash() {
        let store = registered_store().await;
        let mailer = RecordingMailer::default();
        request_password_reset(&store, &mailer, 15, "a@x.com")
            .await
            .unwrap();

        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        let code = user.reset_code.clone().unwrap();
        let wrong = if code == "123456" { "654321" } else { "123456" };

        let err = verify_reset_code(&store, &test_cost(), "a@x.com", wrong, "fresh-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidResetCode));
        // old password still logs in, code still pending
        login(&store, &keys(), "a@x.com", "secret1").await.unwrap();
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(user.reset_code.as_deref(), Some(code.as_str()));
    }

    #[tokio::test]
    async fn verify_rejects_expired_code_even_when_correct() {
        let store = registered_store().await;
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        let past = OffsetDateTime::now_utc() - TimeDuration::minutes(1);
        store.set_reset_code(user.id, "123456", past).await.unwrap();

        let err = verify_reset_code(&store, &test_cost(), "a@x.com", "123456", "fresh-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ResetCodeExpired));
        // expiry is lazy: the stale code stays until a new request overwrites it
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(user.reset_code.as_deref(), Some("123456"));
    }

    #[tokio::test]
    async fn verify_without_a_pending_reset() {
        let store = registered_store().await;
        let err = verify_reset_code(&store, &test_cost(), "a@x.com", "123456", "fresh-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NoResetRequested));

        let err = verify_reset_code(&store, &test_cost(), "ghost@x.com", "123456", "fresh-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));
    }

    #[tokio::test]
    async fn a_second_request_overwrites_the_pending_code() {
        let store = registered_store().await;
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        let expiry = OffsetDateTime::now_utc() + TimeDuration::minutes(15);
        store.set_reset_code(user.id, "111111", expiry).await.unwrap();

        let mailer = RecordingMailer::default();
        request_password_reset(&store, &mailer, 15, "a@x.com")
            .await
            .unwrap();
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        let fresh = user.reset_code.clone().unwrap();

        // the superseded code no longer verifies (unless the sampler repeated it)
        if fresh != "111111" {
            let err = verify_reset_code(&store, &test_cost(), "a@x.com", "111111", "fresh-pass")
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidResetCode));
        }
        verify_reset_code(&store, &test_cost(), "a@x.com", &fresh, "fresh-pass")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_verifications_have_exactly_one_winner() {
        let store = registered_store().await;
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        let expiry = OffsetDateTime::now_utc() + TimeDuration::minutes(15);
        store.set_reset_code(user.id, "222222", expiry).await.unwrap();

        let cost = test_cost();
        let (a, b) = tokio::join!(
            verify_reset_code(&store, &cost, "a@x.com", "222222", "winner-pass"),
            verify_reset_code(&store, &cost, "a@x.com", "222222", "loser-pass"),
        );
        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        for result in [a, b] {
            if let Err(e) = result {
                assert!(matches!(
                    e,
                    AuthError::NoResetRequested | AuthError::InvalidResetCode
                ));
            }
        }
    }

    #[tokio::test]
    async fn delivery_failure_keeps_the_stored_code() {
        let store = registered_store().await;
        let mailer = RecordingMailer::failing();
        let err = request_password_reset(&store, &mailer, 15, "a@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotificationFailed));
        // the code persisted despite the failed send
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        let code = user.reset_code.clone().expect("code still pending");
        verify_reset_code(&store, &test_cost(), "a@x.com", &code, "fresh-pass")
            .await
            .expect("code remains usable");
    }

    #[tokio::test]
    async fn profile_update_validates_and_merges() {
        let store = registered_store().await;
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();

        let err = update_profile(
            &store,
            user.id,
            ProfileChanges {
                email: Some("broken".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        let updated = update_profile(
            &store,
            user.id,
            ProfileChanges {
                phone: Some("555-0100".into()),
                email: Some("  Alice@X.com ".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.email, "alice@x.com");
        assert_eq!(updated.phone.as_deref(), Some("555-0100"));
        assert_eq!(updated.name, "Alice");
    }
}
