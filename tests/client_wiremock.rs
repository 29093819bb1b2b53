mod support;

use anyhow::Result;
use kubebind::client::ClientError;
use kubebind::config::{Cluster, User};
use kubebind::query::{FieldPath, Query};
use kubebind::transport::TransportError;
use kubebind::Client;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pod_list() -> serde_json::Value {
    json!({
        "kind": "PodList",
        "apiVersion": "v1",
        "items": [
            {"metadata": {"name": "web-0", "namespace": "apps"}},
            {"metadata": {"name": "web-1", "namespace": "apps"}}
        ]
    })
}

#[cfg(unix)]
#[tokio::test]
async fn exec_context_sends_plugin_token() -> Result<()> {
    let server = MockServer::start().await;
    let ca = support::self_signed("cluster.local")?;
    let dir = tempfile::tempdir()?;
    let counter = dir.path().join("runs");

    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/apps/pods"))
        .and(header("authorization", "Bearer exec-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(pod_list()))
        .expect(2)
        .mount(&server)
        .await;

    let context = kubebind::ResolvedContext::new(
        "test",
        Cluster {
            server: server.uri(),
            certificate_authority_data: Some(support::b64(&ca.cert_pem)),
            ..Default::default()
        },
        User {
            exec: Some(support::counting_plugin(
                &counter,
                None,
                "exec-token",
                "2099-01-01T00:00:00Z",
                "0",
            )),
            ..Default::default()
        },
    );

    let client = Client::from_context(&context)?;
    let result = client.query(&Query::pod("").namespace("apps")).await?;

    let names = result
        .extract(&FieldPath::strings("$.items[*].metadata.name")?)?
        .into_strings();
    assert_eq!(names, Some(vec!["web-0".to_string(), "web-1".to_string()]));

    assert_eq!(support::run_count(&counter), 1);

    // The second request reuses the cached credential.
    client.query(&Query::pod("").namespace("apps")).await?;
    assert_eq!(support::run_count(&counter), 1);

    Ok(())
}

#[tokio::test]
async fn static_token_context_sends_token() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/nodes/worker-1"))
        .and(header("authorization", "Bearer static-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"kind": "Node", "metadata": {"name": "worker-1"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let context = support::context(
        &server.uri(),
        User {
            token: Some("static-token".to_string()),
            ..Default::default()
        },
    );
    let client = Client::from_context(&context)?;
    let result = client.query(&Query::node("worker-1")).await?;

    assert_eq!(
        result
            .extract(&FieldPath::string("$.metadata.name")?)?
            .as_str(),
        Some("worker-1")
    );
    Ok(())
}

#[tokio::test]
async fn anonymous_context_sends_no_authorization() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/default/pods"))
        .respond_with(ResponseTemplate::new(200).set_body_json(pod_list()))
        .mount(&server)
        .await;

    let client = Client::from_context(&support::context(&server.uri(), User::default()))?;
    client.query(&Query::pod("")).await?;

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("authorization"));
    Ok(())
}

#[tokio::test]
async fn non_success_status_is_reported_with_body() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/default/pods/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"reason":"NotFound"}"#))
        .mount(&server)
        .await;

    let client = Client::from_context(&support::context(&server.uri(), User::default()))?;

    match client.query(&Query::pod("missing")).await {
        Err(ClientError::Status { status, body }) => {
            assert_eq!(status.as_u16(), 404);
            assert!(body.contains("NotFound"));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // execute hands back the response regardless of status.
    let response = client.execute(&Query::pod("missing")).await?;
    assert_eq!(response.status().as_u16(), 404);
    Ok(())
}

#[tokio::test]
async fn label_selector_and_watch_reach_the_server() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/apis/apps/v1/namespaces/shop/deployments"))
        .and(query_param("labelSelector", "app=web,tier=frontend"))
        .and(query_param("watch", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "{\"type\":\"ADDED\",\"object\":{}}\n{\"type\":\"MODIFIED\",\"object\":{}}\n",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::from_context(&support::context(&server.uri(), User::default()))?;
    let query = Query::deployment("")
        .namespace("shop")
        .label("app", "web")
        .label("tier", "frontend")
        .watch();

    let response = client.stream(&query).await?;
    let body = response.text().await?;
    let events: Vec<serde_json::Value> = body
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(events.len(), 2);
    assert_eq!(events[1]["type"], "MODIFIED");
    Ok(())
}

#[tokio::test]
async fn eviction_posts_policy_body() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/namespaces/apps/pods/web-0/eviction"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"status": "Success"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::from_context(&support::context(&server.uri(), User::default()))?;
    client
        .query(&Query::eviction("web-0").namespace("apps"))
        .await?;

    let requests = server.received_requests().await.unwrap_or_default();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body)?;
    assert_eq!(body["apiVersion"], "policy/v1");
    assert_eq!(body["metadata"]["name"], "web-0");
    assert_eq!(body["metadata"]["namespace"], "apps");
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn failing_plugin_sends_no_request() -> Result<()> {
    let server = MockServer::start().await;

    let context = support::context(
        &server.uri(),
        User {
            exec: Some(kubebind::config::ExecConfig {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), "echo 'token expired' >&2; exit 1".to_string()],
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    let client = Client::from_context(&context)?;

    let err = client.query(&Query::pod("")).await.unwrap_err();
    assert!(
        matches!(
            err,
            ClientError::Transport(TransportError::Credential(_))
        ),
        "unexpected error: {err:?}"
    );
    assert!(err.to_string().contains("token expired"));

    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.is_empty(), "expected no HTTP requests");
    Ok(())
}

#[tokio::test]
async fn kubeconfig_file_drives_the_client() -> Result<()> {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir()?;
    let ca = support::self_signed("cluster.local")?;
    let config_path = support::write_kubeconfig(
        dir.path(),
        &server.uri(),
        &support::b64(&ca.cert_pem),
        "file-token",
    )?;

    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/apps/pods"))
        .and(header("authorization", "Bearer file-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(pod_list()))
        .expect(1)
        .mount(&server)
        .await;

    let config = kubebind::Config::load(&config_path)?;
    let resolved = config.resolve_current()?;
    assert_eq!(resolved.namespace(), Some("apps"));

    let client = Client::from_kubeconfig(Some(&config_path), None)?;
    let result = client
        .query(&Query::pod("").namespace(resolved.namespace().unwrap_or_default()))
        .await?;
    assert_eq!(
        result.extract(&FieldPath::string("$.kind")?)?.as_str(),
        Some("PodList")
    );
    Ok(())
}

#[tokio::test]
async fn unknown_context_fails_before_connecting() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config_path = support::write_kubeconfig(dir.path(), "http://127.0.0.1:1", "", "t")?;

    assert!(matches!(
        Client::from_kubeconfig(Some(&config_path), Some("prod")),
        Err(ClientError::Lookup(_))
    ));
    Ok(())
}
