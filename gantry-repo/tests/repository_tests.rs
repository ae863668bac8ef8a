use gantry_repo::repository::{PluginRepository, RepositoryClient};
use gantry_repo::verifier::compute_hash;
use gantry_repo::RepoError;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn server_with_versions(body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plugins/panel-x/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_resolve_prefers_platform_package() {
    let server = server_with_versions(json!({
        "items": [
            { "version": "1.0.0", "packages": { "any": { "sha256": "aa", "downloadUrl": "http://x/1.tar.gz" } } },
            { "version": "2.0.0", "packages": {
                "linux-amd64": { "sha256": "bb", "downloadUrl": "http://x/2-linux.tar.gz" },
                "any": { "sha256": "cc", "downloadUrl": "http://x/2-any.tar.gz" }
            } }
        ]
    }))
    .await;

    let client = RepositoryClient::new(server.uri())
        .unwrap()
        .with_platform("linux-amd64");
    let resolved = client.resolve("panel-x", None, "10.0.0").await.unwrap();
    assert_eq!(resolved.version, "2.0.0");
    assert_eq!(resolved.sha256, "bb");

    let other = RepositoryClient::new(server.uri())
        .unwrap()
        .with_platform("windows-arm64");
    let resolved = other.resolve("panel-x", Some("2.0.0"), "10.0.0").await.unwrap();
    assert_eq!(resolved.download_url, "http://x/2-any.tar.gz");
}

#[tokio::test]
async fn test_missing_plugin_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plugins/ghost/versions"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = RepositoryClient::new(server.uri()).unwrap();
    let err = client.resolve("ghost", None, "10.0.0").await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound(id) if id == "ghost"));
}

#[tokio::test]
async fn test_no_package_for_platform() {
    let server = server_with_versions(json!({
        "items": [{ "version": "1.0.0", "packages": {
            "darwin-arm64": { "sha256": "aa", "downloadUrl": "http://x/1.tar.gz" }
        } }]
    }))
    .await;

    let client = RepositoryClient::new(server.uri())
        .unwrap()
        .with_platform("linux-amd64");
    let err = client.resolve("panel-x", None, "10.0.0").await.unwrap_err();
    assert!(matches!(err, RepoError::NoPackage { .. }));
}

#[tokio::test]
async fn test_download_verifies_checksum() {
    let server = MockServer::start().await;
    let archive = b"pretend this is a tarball".to_vec();
    Mock::given(method("GET"))
        .and(path("/files/panel-x.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive.clone()))
        .mount(&server)
        .await;

    let client = RepositoryClient::new(server.uri()).unwrap();
    let mut resolved = gantry_repo::ResolvedPlugin {
        id: "panel-x".into(),
        version: "1.0.0".into(),
        download_url: format!("{}/files/panel-x.tar.gz", server.uri()),
        sha256: compute_hash(&archive),
    };
    assert_eq!(client.download(&resolved).await.unwrap(), archive);

    resolved.sha256 = "0".repeat(64);
    let err = client.download(&resolved).await.unwrap_err();
    assert!(matches!(err, RepoError::HashMismatch { .. }));
}
