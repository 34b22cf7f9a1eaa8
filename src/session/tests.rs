use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::testing::{FakeApi, RecordingNavigator, test_config};
use super::*;
use crate::store::MemoryBackend;
use crate::types::TokenPair;

fn session_with(config: SessionConfig, api: FakeApi) -> (Session, RecordingNavigator) {
    let navigator = RecordingNavigator::default();
    let session = Session::builder(config)
        .with_session_api(api)
        .with_navigator(navigator.clone())
        .build()
        .unwrap();
    (session, navigator)
}

fn fake_session(api: FakeApi) -> (Session, RecordingNavigator) {
    session_with(test_config(), api)
}

fn credentials() -> Credentials {
    Credentials::new("manager@tabla.ma", "secret")
}

fn count(session: &Session, topic: Topic) -> (Arc<AtomicUsize>, Subscription) {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let sub = session.subscribe(topic, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (seen, sub)
}

#[tokio::test]
async fn login_then_logout_round_trip() {
    let api = FakeApi::new();
    let (session, nav) = fake_session(api.clone());
    let (events, _sub) = count(&session, Topic::SessionChanged);

    session.login(&credentials()).await.unwrap();

    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(session.record().tokens(), Some(&TokenPair::new("a1", "r1")));
    assert_eq!(session.get_permissions(), vec!["view_menu".to_string()]);
    assert!(session.check().authenticated);
    assert!(session.scheduler().is_running());
    assert_eq!(events.load(Ordering::SeqCst), 1);

    session.logout().await;

    assert_eq!(api.logout_calls(), 1);
    assert_eq!(session.state(), SessionState::LoggedOut);
    assert!(!session.record().authenticated());
    assert!(session.get_permissions().is_empty());
    assert!(!session.scheduler().is_running());
    assert_eq!(events.load(Ordering::SeqCst), 2);
    assert_eq!(nav.redirects(), vec!["/sign-in?reason=logged_out".to_string()]);
}

#[tokio::test]
async fn rejected_login_leaves_session_logged_out() {
    let api = FakeApi::new().rejecting_login();
    let (session, nav) = fake_session(api.clone());
    let (events, _sub) = count(&session, Topic::SessionChanged);

    let err = session.login(&credentials()).await.unwrap_err();

    assert!(matches!(err, Error::CredentialRejected(_)));
    assert_eq!(session.state(), SessionState::LoggedOut);
    assert!(!session.record().authenticated());
    assert!(!session.scheduler().is_running());
    assert_eq!(events.load(Ordering::SeqCst), 0);
    assert!(nav.redirects().is_empty());

    // A new login cycle may begin right away.
    let (session, _nav) = fake_session(FakeApi::new());
    session.login(&credentials()).await.unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn login_while_authenticated_is_refused() {
    let api = FakeApi::new();
    let (session, _nav) = fake_session(api.clone());
    session.login(&credentials()).await.unwrap();

    let err = session.login(&credentials()).await.unwrap_err();

    assert!(matches!(err, Error::InvalidState(_)));
    assert_eq!(api.login_calls(), 1);
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn logout_endpoint_failure_still_clears_locally() {
    let api = FakeApi::new().failing_logout();
    let (session, nav) = fake_session(api.clone());
    session.login(&credentials()).await.unwrap();
    session.set_tenant(Some(TenantId::from("12".to_string()))).unwrap();

    session.logout().await;

    assert_eq!(api.logout_calls(), 1);
    let record = session.record();
    assert!(!record.authenticated());
    assert!(record.tenant_id().is_none());
    assert_eq!(nav.redirects().len(), 1);
}

#[tokio::test]
async fn logout_without_session_is_quiet() {
    let api = FakeApi::new();
    let (session, nav) = fake_session(api.clone());
    let (events, _sub) = count(&session, Topic::SessionChanged);

    session.logout().await;

    assert_eq!(api.logout_calls(), 0);
    assert_eq!(session.state(), SessionState::LoggedOut);
    assert_eq!(events.load(Ordering::SeqCst), 0);
    assert!(nav.redirects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn no_refresh_after_logout() {
    let period = Duration::from_secs(300);
    let api = FakeApi::new();
    let (session, _nav) = session_with(test_config().with_refresh_interval(period), api.clone());

    session.login(&credentials()).await.unwrap();
    tokio::time::sleep(period + Duration::from_secs(1)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(api.refresh_calls(), 1);

    session.logout().await;
    tokio::time::sleep(period * 10).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert_eq!(api.refresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn refresh_after_relogin_ignores_the_cancelled_tick() {
    let period = Duration::from_secs(300);
    let api = FakeApi::new().with_refresh_delay(Duration::from_secs(10));
    let (session, _nav) = session_with(test_config().with_refresh_interval(period), api.clone());

    session.login(&credentials()).await.unwrap();
    tokio::time::sleep(period + Duration::from_secs(1)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    // The tick's exchange is still waiting on the backend.
    assert_eq!(api.refresh_calls(), 1);

    session.logout().await;
    session.login(&credentials()).await.unwrap();

    assert_eq!(session.refresh().await, Ok(()));
    assert_eq!(api.refresh_calls(), 2);
    assert_eq!(session.record().tokens(), Some(&TokenPair::new("a3", "r3")));
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn logout_cancels_pending_login() {
    let api = FakeApi::new().with_login_delay(Duration::from_secs(5));
    let (session, nav) = fake_session(api.clone());
    let (events, _sub) = count(&session, Topic::SessionChanged);

    let creds = credentials();
    let (login, ()) = tokio::join!(session.login(&creds), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(session.state(), SessionState::Authenticating);
        session.logout().await;
    });

    assert!(matches!(login, Err(Error::InvalidState(_))));
    assert_eq!(session.state(), SessionState::LoggedOut);
    assert!(!session.record().authenticated());
    assert!(session.record().tokens().is_none());
    assert!(!session.scheduler().is_running());
    assert_eq!(api.logout_calls(), 0);
    assert_eq!(events.load(Ordering::SeqCst), 0);
    assert!(nav.redirects().is_empty());

    session.login(&credentials()).await.unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[test]
fn check_reports_redirect_when_logged_out() {
    let (session, _nav) = fake_session(FakeApi::new());

    assert_eq!(
        session.check(),
        CheckOutcome {
            authenticated: false,
            redirect_to: Some("/sign-in?reason=not_authenticated".to_string()),
        }
    );
}

#[tokio::test]
async fn manual_refresh_rotates_pair() {
    let api = FakeApi::new();
    let (session, _nav) = fake_session(api.clone());
    session.login(&credentials()).await.unwrap();

    session.refresh().await.unwrap();

    assert_eq!(session.record().tokens(), Some(&TokenPair::new("a2", "r2")));
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn manager_login_allows_everything() {
    let (session, _nav) = fake_session(FakeApi::new().manager());
    assert!(!session.can("reservation", "delete"));

    session.login(&credentials()).await.unwrap();

    assert!(session.can("reservation", "delete"));
    assert!(session.access_control().can("menu", "create"));
}

#[tokio::test]
async fn tenant_switch_is_persisted_and_broadcast() {
    let (session, _nav) = fake_session(FakeApi::new());
    let (tenant_events, _t) = count(&session, Topic::TenantChanged);
    let (auth_events, _a) = count(&session, Topic::SessionChanged);

    session.set_tenant(Some(TenantId::from("7".to_string()))).unwrap();
    assert_eq!(session.record().tenant_id(), Some(&TenantId::from("7".to_string())));

    session.set_tenant(None).unwrap();
    assert!(session.record().tenant_id().is_none());

    assert_eq!(tenant_events.load(Ordering::SeqCst), 2);
    assert_eq!(auth_events.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn restored_session_resumes_timer() {
    let backend = MemoryBackend::new();
    backend.insert(crate::store::KEY_AUTHENTICATED, "true");
    backend.insert(crate::store::KEY_ACCESS, "a1");
    backend.insert(crate::store::KEY_REFRESH, "r1");
    let store = SessionStore::load(backend).unwrap();

    let session = Session::builder(test_config())
        .with_store(store)
        .with_session_api(FakeApi::new())
        .with_navigator(RecordingNavigator::default())
        .build()
        .unwrap();

    assert_eq!(session.state(), SessionState::Authenticated);
    assert!(!session.scheduler().is_running());
    session.resume();
    assert!(session.scheduler().is_running());

    drop(session);
}

#[tokio::test]
async fn identity_fetch_updates_cached_permissions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/bo/restaurants/users/me/"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 4,
            "email": "host@tabla.ma",
            "is_manager": false,
            "permissions": ["view_reservation", "add_reservation"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = SessionConfig::new(server.uri().parse().unwrap());
    let (session, _nav) = session_with(config, FakeApi::new());
    let (events, _sub) = count(&session, Topic::SessionChanged);
    session.login(&credentials()).await.unwrap();
    assert!(!session.can("reservation", "create"));

    let identity = session.get_identity().await.unwrap();

    assert_eq!(identity.profile.get("email").and_then(|v| v.as_str()), Some("host@tabla.ma"));
    assert!(session.can("reservation", "create"));
    assert!(!session.can("menu", "view"));
    assert_eq!(
        session.get_permissions(),
        vec!["add_reservation".to_string(), "view_reservation".to_string()]
    );
    // Only login broadcast.
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn identity_requires_session() {
    let (session, _nav) = fake_session(FakeApi::new());
    assert!(matches!(
        session.get_identity().await,
        Err(Error::NotAuthenticated)
    ));
}

#[tokio::test]
async fn identity_arriving_after_logout_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/bo/restaurants/users/me/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "id": 4,
                    "is_manager": true,
                    "permissions": ["view_reservation"]
                }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = SessionConfig::new(server.uri().parse().unwrap());
    let (session, _nav) = session_with(config, FakeApi::new());
    session.login(&credentials()).await.unwrap();

    let (identity, ()) = tokio::join!(session.get_identity(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.logout().await;
    });

    assert!(identity.unwrap().is_manager);
    assert_eq!(session.state(), SessionState::LoggedOut);
    let record = session.record();
    assert!(!record.authenticated());
    assert!(!record.is_manager());
    assert!(record.permissions().is_none());
    assert!(!session.can("reservation", "view"));
}
