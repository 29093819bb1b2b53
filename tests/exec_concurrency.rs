#![cfg(unix)]

mod support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use kubebind::config::User;
use kubebind::credentials::{CacheState, CredentialCache, CredentialError, ExecPluginRunner};
use kubebind::query::Query;
use kubebind::Client;
use secrecy::ExposeSecret;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FAR_FUTURE: &str = "2099-01-01T00:00:00Z";
const LONG_AGO: &str = "2000-01-01T00:00:00Z";

#[tokio::test]
async fn concurrent_gets_run_the_plugin_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let counter = dir.path().join("runs");
    let cache = CredentialCache::new(ExecPluginRunner::new(support::counting_plugin(
        &counter, None, "shared", FAR_FUTURE, "0.3",
    )));

    let results = join_all((0..12).map(|_| cache.get())).await;

    for result in results {
        assert_eq!(result?.token().expose_secret(), "shared");
    }
    assert_eq!(support::run_count(&counter), 1);
    assert_eq!(cache.state(), CacheState::Ready);

    // Still fresh, so no further runs.
    cache.get().await?;
    assert_eq!(support::run_count(&counter), 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_share_one_credential() -> Result<()> {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir()?;
    let counter = dir.path().join("runs");

    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/default/pods"))
        .and(header("authorization", "Bearer from-plugin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})))
        .expect(8)
        .mount(&server)
        .await;

    let context = support::context(
        &server.uri(),
        User {
            exec: Some(support::counting_plugin(
                &counter,
                None,
                "from-plugin",
                FAR_FUTURE,
                "0.3",
            )),
            ..Default::default()
        },
    );
    let client = Arc::new(Client::from_context(&context)?);

    let tasks = (0..8).map(|_| {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.query(&Query::pod("")).await })
    });
    for result in join_all(tasks).await {
        result??;
    }

    assert_eq!(support::run_count(&counter), 1);
    Ok(())
}

#[tokio::test]
async fn failed_run_is_shared_then_retried() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let counter = dir.path().join("runs");
    let gate = dir.path().join("logged-in");
    let cache = CredentialCache::new(ExecPluginRunner::new(support::counting_plugin(
        &counter,
        Some(&gate),
        "after-login",
        FAR_FUTURE,
        "0.2",
    )));

    let results = join_all((0..4).map(|_| cache.get())).await;
    for result in results {
        match result {
            Err(CredentialError::Exec(err)) => {
                assert!(err.to_string().contains("access denied"), "{err}")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
    assert_eq!(support::run_count(&counter), 1);
    assert_eq!(cache.state(), CacheState::Idle);

    std::fs::write(&gate, "")?;
    let credential = cache.get().await?;
    assert_eq!(credential.token().expose_secret(), "after-login");
    assert_eq!(support::run_count(&counter), 2);
    Ok(())
}

#[tokio::test]
async fn expired_credential_is_refreshed_on_next_use() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let counter = dir.path().join("runs");
    let cache = CredentialCache::new(ExecPluginRunner::new(support::counting_plugin(
        &counter, None, "short-lived", LONG_AGO, "0",
    )));

    cache.get().await?;
    cache.get().await?;
    assert_eq!(support::run_count(&counter), 2);
    Ok(())
}

#[tokio::test]
async fn timed_out_caller_does_not_cancel_refresh() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let counter = dir.path().join("runs");
    let cache = CredentialCache::new(ExecPluginRunner::new(support::counting_plugin(
        &counter, None, "slow", FAR_FUTURE, "0.5",
    )));

    assert!(matches!(
        cache.get_timeout(Duration::from_millis(50)).await,
        Err(CredentialError::Timeout(_))
    ));

    let credential = cache.get().await?;
    assert_eq!(credential.token().expose_secret(), "slow");
    assert_eq!(support::run_count(&counter), 1);
    Ok(())
}
