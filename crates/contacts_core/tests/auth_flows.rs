use chrono::{Duration, TimeZone, Utc};
use contacts_core::{
    AuthError, AuthService, AuthServiceError, ConfirmOutcome, ManualClock, RequestEmailOutcome,
    SessionError, SessionManager, Settings, SignupRequest, SqliteUserRepository, TokenAuthority,
    User, UserRepository,
};
use std::sync::Arc;
use tempfile::TempDir;

const PASSWORD: &str = "correct-horse";

struct Harness {
    _dir: TempDir,
    service: AuthService,
    clock: Arc<ManualClock>,
}

fn harness(require_confirmed_email: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        database_url: format!("sqlite://{}", dir.path().join("contacts.db").display()),
        secret_key: "flow-secret".to_string(),
        bcrypt_cost: 4,
        require_confirmed_email,
        ..Settings::default()
    };
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));
    let tokens = TokenAuthority::with_clock(&settings, clock.clone()).unwrap();
    let sessions = SessionManager::new(&settings).unwrap();
    let service = AuthService::new(sessions, Arc::new(tokens), require_confirmed_email);
    Harness {
        _dir: dir,
        service,
        clock,
    }
}

fn signup(service: &AuthService, email: &str) -> (User, String) {
    let outcome = service
        .signup(&SignupRequest {
            username: "alice".to_string(),
            email: email.to_string(),
            password: PASSWORD.to_string(),
        })
        .unwrap();
    (outcome.user, outcome.email_token)
}

fn stored_user(service: &AuthService, email: &str) -> User {
    service
        .sessions()
        .with_session(|session| -> Result<_, AuthServiceError> {
            Ok(SqliteUserRepository::new(session).get_user_by_email(email)?)
        })
        .unwrap()
        .expect("user should exist")
}

#[test]
fn login_access_token_resolves_the_same_principal() {
    let h = harness(false);
    let (created, _) = signup(&h.service, "alice@example.com");

    let pair = h.service.login("alice@example.com", PASSWORD).unwrap();
    assert_eq!(pair.token_type, "bearer");

    let resolved = h.service.current_user(&pair.access_token).unwrap();
    assert_eq!(resolved.id, created.id);
    assert_eq!(resolved.email, "alice@example.com");

    let header = format!("Bearer {}", pair.access_token);
    let from_header = h.service.current_user_from_header(&header).unwrap();
    assert_eq!(from_header.id, created.id);

    let stored = stored_user(&h.service, "alice@example.com");
    assert_eq!(stored.refresh_token.as_deref(), Some(pair.refresh_token.as_str()));
}

#[test]
fn wrong_password_is_unauthorized_and_stores_nothing() {
    let h = harness(false);
    signup(&h.service, "alice@example.com");

    let err = h.service.login("alice@example.com", "not-the-password").unwrap_err();
    assert!(err.is_unauthorized());
    assert!(stored_user(&h.service, "alice@example.com").refresh_token.is_none());

    let err = h.service.login("nobody@example.com", PASSWORD).unwrap_err();
    assert!(err.is_unauthorized());
}

#[test]
fn signup_rejects_duplicates_and_bad_input() {
    let h = harness(false);
    signup(&h.service, "alice@example.com");

    let duplicate = h.service.signup(&SignupRequest {
        username: "other".to_string(),
        email: " ALICE@example.com".to_string(),
        password: PASSWORD.to_string(),
    });
    assert!(matches!(duplicate, Err(AuthServiceError::EmailTaken(_))));

    let short_password = h.service.signup(&SignupRequest {
        username: "bob".to_string(),
        email: "bob@example.com".to_string(),
        password: "123".to_string(),
    });
    assert!(matches!(short_password, Err(AuthServiceError::InvalidInput(_))));

    let bad_email = h.service.signup(&SignupRequest {
        username: "bob".to_string(),
        email: "bob-at-example".to_string(),
        password: PASSWORD.to_string(),
    });
    assert!(matches!(bad_email, Err(AuthServiceError::InvalidInput(_))));
}

#[test]
fn email_token_confirms_and_is_not_single_use() {
    let h = harness(false);
    let (_, email_token) = signup(&h.service, "alice@example.com");

    assert_eq!(
        h.service.confirm_email(&email_token).unwrap(),
        ConfirmOutcome::Confirmed
    );
    assert_eq!(
        h.service.confirm_email(&email_token).unwrap(),
        ConfirmOutcome::AlreadyConfirmed
    );
    assert!(stored_user(&h.service, "alice@example.com").confirmed);
}

#[test]
fn bad_email_tokens_are_unprocessable() {
    let h = harness(false);
    let (_, email_token) = signup(&h.service, "alice@example.com");
    let pair = h.service.login("alice@example.com", PASSWORD).unwrap();

    let err = h.service.confirm_email(&pair.access_token).unwrap_err();
    assert!(matches!(
        err,
        AuthServiceError::Auth(AuthError::UnprocessableToken(_))
    ));

    h.clock.advance(Duration::days(8));
    let err = h.service.confirm_email(&email_token).unwrap_err();
    assert!(matches!(
        err,
        AuthServiceError::Auth(AuthError::UnprocessableToken("token expired"))
    ));
}

#[test]
fn request_email_issues_tokens_only_for_unconfirmed_accounts() {
    let h = harness(false);
    signup(&h.service, "alice@example.com");

    let token = match h.service.request_email("alice@example.com").unwrap() {
        RequestEmailOutcome::Issued { email_token } => email_token,
        other => panic!("expected a token, got {other:?}"),
    };
    assert_eq!(
        h.service.confirm_email(&token).unwrap(),
        ConfirmOutcome::Confirmed
    );

    assert_eq!(
        h.service.request_email("alice@example.com").unwrap(),
        RequestEmailOutcome::AlreadyConfirmed
    );
    assert_eq!(
        h.service.request_email("nobody@example.com").unwrap(),
        RequestEmailOutcome::NoAccount
    );
}

#[test]
fn refresh_rotates_the_stored_token() {
    let h = harness(false);
    signup(&h.service, "alice@example.com");
    let first = h.service.login("alice@example.com", PASSWORD).unwrap();

    h.clock.advance(Duration::minutes(1));
    let second = h.service.refresh(&first.refresh_token).unwrap();
    assert_ne!(second.refresh_token, first.refresh_token);
    assert_eq!(
        stored_user(&h.service, "alice@example.com").refresh_token,
        Some(second.refresh_token.clone())
    );
    assert!(h.service.current_user(&second.access_token).is_ok());

    // Access tokens cannot be used to refresh.
    assert!(h.service.refresh(&first.access_token).unwrap_err().is_unauthorized());
}

#[test]
fn expired_access_token_no_longer_resolves() {
    let h = harness(false);
    signup(&h.service, "alice@example.com");
    let pair = h.service.login("alice@example.com", PASSWORD).unwrap();

    h.clock.advance(Duration::minutes(150));
    assert!(h.service.current_user(&pair.access_token).unwrap_err().is_unauthorized());
}

#[test]
fn unconfirmed_login_is_refused_when_confirmation_is_required() {
    let h = harness(true);
    let (_, email_token) = signup(&h.service, "alice@example.com");

    let err = h.service.login("alice@example.com", PASSWORD).unwrap_err();
    assert!(matches!(err, AuthServiceError::EmailNotConfirmed));

    h.service.confirm_email(&email_token).unwrap();
    assert!(h.service.login("alice@example.com", PASSWORD).is_ok());
}

#[test]
fn avatar_update_applies_to_token_owner() {
    let h = harness(false);
    signup(&h.service, "alice@example.com");
    let pair = h.service.login("alice@example.com", PASSWORD).unwrap();

    let user = h
        .service
        .update_avatar(&pair.access_token, "https://cdn.example.com/alice.png")
        .unwrap();
    assert_eq!(user.avatar.as_deref(), Some("https://cdn.example.com/alice.png"));

    let err = h.service.update_avatar(&pair.access_token, "  ").unwrap_err();
    assert!(matches!(err, AuthServiceError::InvalidInput(_)));
}

#[test]
fn uninitialized_store_surfaces_unavailable() {
    let settings = Settings {
        secret_key: "flow-secret".to_string(),
        bcrypt_cost: 4,
        ..Settings::default()
    };
    let service = AuthService::from_settings(&settings).unwrap();
    assert!(!service.sessions().is_initialized());

    let err = service.login("alice@example.com", PASSWORD).unwrap_err();
    assert!(matches!(
        err,
        AuthServiceError::Session(SessionError::Unavailable(_))
    ));
}
