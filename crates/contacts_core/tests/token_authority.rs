use chrono::{Duration, TimeZone, Utc};
use contacts_core::{AuthError, ManualClock, Settings, TokenAuthority, MAX_PASSWORD_BYTES};
use std::sync::Arc;

fn settings() -> Settings {
    Settings {
        secret_key: "integration-secret".to_string(),
        bcrypt_cost: 4,
        ..Settings::default()
    }
}

fn authority() -> (TokenAuthority, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ));
    let authority = TokenAuthority::with_clock(&settings(), clock.clone()).unwrap();
    (authority, clock)
}

#[test]
fn access_token_round_trips_subject() {
    let (authority, _clock) = authority();
    let token = authority.issue_access_token("alice@example.com", None).unwrap();
    assert_eq!(
        authority.verify_access_token(&token).unwrap(),
        "alice@example.com"
    );
}

#[test]
fn scopes_are_not_interchangeable() {
    let (authority, _clock) = authority();
    let access = authority.issue_access_token("a@example.com", None).unwrap();
    let refresh = authority.issue_refresh_token("a@example.com", None).unwrap();
    let email = authority.issue_email_token("a@example.com").unwrap();

    assert!(authority.verify_refresh_token(&refresh).is_ok());
    assert!(authority.verify_email_token(&email).is_ok());

    assert_eq!(
        authority.verify_access_token(&refresh),
        Err(AuthError::Unauthorized("invalid scope for token"))
    );
    assert_eq!(
        authority.verify_refresh_token(&access),
        Err(AuthError::Unauthorized("invalid scope for token"))
    );
    assert!(authority.verify_access_token(&email).unwrap_err().is_unauthorized());
    assert!(authority.verify_refresh_token(&email).unwrap_err().is_unauthorized());
    assert_eq!(
        authority.verify_email_token(&access),
        Err(AuthError::UnprocessableToken("invalid scope for token"))
    );
    assert_eq!(
        authority.verify_email_token(&refresh),
        Err(AuthError::UnprocessableToken("invalid scope for token"))
    );
}

#[test]
fn expired_tokens_fail_with_their_family_kind() {
    let (authority, clock) = authority();
    let access = authority.issue_access_token("a@example.com", None).unwrap();
    let refresh = authority.issue_refresh_token("a@example.com", None).unwrap();
    let email = authority.issue_email_token("a@example.com").unwrap();

    clock.advance(Duration::minutes(150));
    assert_eq!(
        authority.verify_access_token(&access),
        Err(AuthError::Unauthorized("token expired"))
    );
    assert!(authority.verify_refresh_token(&refresh).is_ok());

    clock.advance(Duration::days(7));
    assert_eq!(
        authority.verify_refresh_token(&refresh),
        Err(AuthError::Unauthorized("token expired"))
    );
    assert_eq!(
        authority.verify_email_token(&email),
        Err(AuthError::UnprocessableToken("token expired"))
    );
}

#[test]
fn tokens_from_another_secret_are_rejected() {
    let (authority, _clock) = authority();
    let foreign = TokenAuthority::new(&Settings {
        secret_key: "someone-else".to_string(),
        ..settings()
    })
    .unwrap();

    let token = foreign.issue_access_token("a@example.com", None).unwrap();
    assert_eq!(
        authority.verify_access_token(&token),
        Err(AuthError::Unauthorized("signature mismatch"))
    );
    let email = foreign.issue_email_token("a@example.com").unwrap();
    assert_eq!(
        authority.verify_email_token(&email),
        Err(AuthError::UnprocessableToken("signature mismatch"))
    );
}

#[test]
fn email_token_verifies_repeatedly_until_expiry() {
    let (authority, _clock) = authority();
    let token = authority.issue_email_token("a@example.com").unwrap();
    assert_eq!(authority.verify_email_token(&token).unwrap(), "a@example.com");
    assert_eq!(authority.verify_email_token(&token).unwrap(), "a@example.com");
}

#[test]
fn password_hashes_are_salted_and_verifiable() {
    let (authority, _clock) = authority();
    let first = authority.hash_password("s3cret-pass").unwrap();
    let second = authority.hash_password("s3cret-pass").unwrap();

    assert_ne!(first, second);
    assert!(first.starts_with("$2"));
    assert!(authority.verify_password("s3cret-pass", &first));
    assert!(authority.verify_password("s3cret-pass", &second));
    assert!(!authority.verify_password("wrong-pass", &first));
    assert!(!authority.verify_password("s3cret-pass", "not-a-bcrypt-hash"));
}

#[test]
fn oversized_lifetimes_fail_construction() {
    let mut oversized = settings();
    oversized.refresh_token_ttl_days = i64::MAX;
    assert!(TokenAuthority::new(&oversized).is_err());

    let mut oversized = settings();
    oversized.access_token_ttl_minutes = i64::MAX / 2;
    assert!(TokenAuthority::new(&oversized).is_err());
}

#[test]
fn authority_refuses_passwords_bcrypt_would_truncate() {
    let (authority, _clock) = authority();
    let at_limit = "p".repeat(MAX_PASSWORD_BYTES);
    let hash = authority.hash_password(&at_limit).unwrap();

    let longer = format!("{at_limit}-suffix");
    assert!(matches!(
        authority.hash_password(&longer),
        Err(AuthError::Hashing(_))
    ));
    assert!(!authority.verify_password(&longer, &hash));
}

#[test]
fn resolve_principal_composes_verification_and_lookup() {
    let (authority, _clock) = authority();
    let token = authority.issue_access_token("a@example.com", None).unwrap();

    let found: Result<String, AuthError> = authority.resolve_principal(&token, |subject| {
        Ok(Some(format!("principal:{subject}")))
    });
    assert_eq!(found.unwrap(), "principal:a@example.com");

    let missing: Result<String, AuthError> = authority.resolve_principal(&token, |_| Ok(None));
    assert_eq!(missing, Err(AuthError::Unauthorized("unknown principal")));

    let mut looked_up = false;
    let refresh = authority.issue_refresh_token("a@example.com", None).unwrap();
    let rejected: Result<String, AuthError> = authority.resolve_principal(&refresh, |_| {
        looked_up = true;
        Ok(None)
    });
    assert!(rejected.unwrap_err().is_unauthorized());
    assert!(!looked_up);
}

#[test]
fn lookup_transport_errors_propagate_unchanged() {
    #[derive(Debug, PartialEq)]
    enum LookupError {
        Auth(AuthError),
        StoreDown,
    }

    impl From<AuthError> for LookupError {
        fn from(value: AuthError) -> Self {
            Self::Auth(value)
        }
    }

    let (authority, _clock) = authority();
    let token = authority.issue_access_token("a@example.com", None).unwrap();

    let result: Result<(), LookupError> =
        authority.resolve_principal(&token, |_| Err(LookupError::StoreDown));
    assert_eq!(result, Err(LookupError::StoreDown));

    let result: Result<(), LookupError> =
        authority.resolve_principal("garbage", |_| Err(LookupError::StoreDown));
    assert!(matches!(result, Err(LookupError::Auth(AuthError::Unauthorized(_)))));
}
