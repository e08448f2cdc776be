//! End-to-end acquisition tests.
//!
//! A wiremock server plays the npm registry or a static file host. Mocks
//! that must be hit a fixed number of times use `expect`, which wiremock
//! verifies when the server is dropped.

use std::io::Write;

use base64::Engine;
use capsule_fetch::location::SourceHandle;
use capsule_fetch::manifest::Shasum;
use capsule_fetch::{
    AcquireOptions, Artifact, FetchConfig, FetchError, ManifestVerifier, SourceLocation,
    ValidationFailureReason, acquire,
};
use capsule_telemetry::{LogConfig, setup_logging};
use serde_json::{Value, json};
use sha2::{Digest, Sha512};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NAME: &str = "example-snap";
const SOURCE: &[u8] = b"module.exports.onRpcRequest = async () => 'pong';\n";
const ICON: &[u8] = b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>";

fn init_logging() {
    // Only the first test to get here installs the subscriber.
    let _ = setup_logging(&LogConfig::new("debug"));
}

fn descriptor(version: &str) -> Value {
    json!({
        "name": NAME,
        "version": version,
        "repository": { "type": "git", "url": "https://github.com/example/snap.git" },
        "main": "dist/bundle.js"
    })
}

fn manifest(version: &str, source: &[u8]) -> Value {
    json!({
        "version": version,
        "proposedName": "Example Snap",
        "repository": { "type": "git", "url": "https://github.com/example/snap.git" },
        "source": {
            "shasum": Shasum::of(source),
            "location": { "npm": {
                "filePath": "dist/bundle.js",
                "iconPath": "images/icon.svg",
                "packageName": NAME,
                "registry": "https://registry.npmjs.org"
            } }
        },
        "manifestVersion": "0.1"
    })
}

fn tarball(version: &str) -> Vec<u8> {
    let files: [(&str, Vec<u8>); 5] = [
        ("package/README.md", b"# Example".to_vec()),
        ("package/package.json", serde_json::to_vec(&descriptor(version)).unwrap()),
        ("package/dist/bundle.js", SOURCE.to_vec()),
        ("package/images/icon.svg", ICON.to_vec()),
        (
            "package/snap.manifest.json",
            serde_json::to_vec(&manifest(version, SOURCE)).unwrap(),
        ),
    ];

    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in &files {
        let mut header = tar::Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, data.as_slice()).unwrap();
    }
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&builder.into_inner().unwrap()).unwrap();
    encoder.finish().unwrap()
}

fn sri(data: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(Sha512::digest(data));
    format!("sha512-{b64}")
}

fn tarball_path(version: &str) -> String {
    format!("/{NAME}/-/{NAME}-{version}.tgz")
}

/// Registry metadata whose tarball URLs point at the public registry; the
/// client must rewrite them onto the mock server.
fn metadata(versions: &[(&str, Option<String>)]) -> Value {
    let mut entries = serde_json::Map::new();
    for (version, integrity) in versions {
        let mut dist = json!({
            "tarball": format!("https://registry.npmjs.org{}", tarball_path(version)),
        });
        if let Some(integrity) = integrity {
            dist["integrity"] = json!(integrity);
        }
        entries.insert(
            (*version).to_string(),
            json!({ "version": version, "dist": dist }),
        );
    }
    json!({ "name": NAME, "dist-tags": { "latest": "1.0.0" }, "versions": entries })
}

fn options(server: &MockServer) -> AcquireOptions {
    AcquireOptions::new(FetchConfig::default().with_registry(server.uri()))
}

async fn mount_metadata(server: &MockServer, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/{NAME}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_tarball(server: &MockServer, version: &str, body: Vec<u8>, hits: u64) {
    Mock::given(method("GET"))
        .and(path(tarball_path(version)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .expect(hits)
        .mount(server)
        .await;
}

#[tokio::test]
async fn npm_resolves_highest_stable_and_verifies() {
    init_logging();
    let server = MockServer::start().await;
    let stable = tarball("1.1.0");
    mount_metadata(
        &server,
        metadata(&[
            ("1.0.0", None),
            ("1.1.0", Some(sri(&stable))),
            ("2.0.0-beta.1", None),
        ]),
    )
    .await;
    mount_tarball(&server, "1.1.0", stable, 1).await;

    let verified = acquire(&format!("npm:{NAME}"), &options(&server).with_range("^1.0.0"))
        .await
        .unwrap();

    assert_eq!(verified.descriptor.version, "1.1.0");
    assert_eq!(verified.manifest.version, "1.1.0");
    assert_eq!(verified.bundle.source_bundle.unwrap().data, SOURCE);
    assert_eq!(verified.bundle.icon.unwrap().data, ICON);
}

#[tokio::test]
async fn npm_falls_back_to_prerelease() {
    let server = MockServer::start().await;
    mount_metadata(&server, metadata(&[("1.0.0", None), ("2.0.0-beta.1", None)])).await;
    mount_tarball(&server, "2.0.0-beta.1", tarball("2.0.0-beta.1"), 1).await;

    let verified = acquire(&format!("npm:{NAME}"), &options(&server).with_range(">=1.5.0"))
        .await
        .unwrap();
    assert_eq!(verified.manifest.version, "2.0.0-beta.1");
}

#[tokio::test]
async fn npm_dist_tag_selects_tagged_version() {
    let server = MockServer::start().await;
    mount_metadata(&server, metadata(&[("1.0.0", None), ("1.1.0", None)])).await;
    mount_tarball(&server, "1.0.0", tarball("1.0.0"), 1).await;

    let verified = acquire(&format!("npm:{NAME}"), &options(&server).with_range("latest"))
        .await
        .unwrap();
    assert_eq!(verified.manifest.version, "1.0.0");
}

#[tokio::test]
async fn npm_unmatched_range_fails_before_download() {
    let server = MockServer::start().await;
    mount_metadata(&server, metadata(&[("1.0.0", None)])).await;
    mount_tarball(&server, "1.0.0", tarball("1.0.0"), 0).await;

    let err = acquire(&format!("npm:{NAME}"), &options(&server).with_range(">=3"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, FetchError::VersionNotFound { ref range, .. } if range == ">=3"),
        "got: {err}"
    );
}

#[tokio::test]
async fn npm_integrity_mismatch_is_fatal() {
    let server = MockServer::start().await;
    mount_metadata(&server, metadata(&[("1.0.0", Some(sri(b"something else")))])).await;
    mount_tarball(&server, "1.0.0", tarball("1.0.0"), 1).await;

    let err = acquire(&format!("npm:{NAME}"), &options(&server))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::IntegrityMismatch { .. }), "got: {err}");
}

#[tokio::test]
async fn npm_oversized_tarball_is_rejected() {
    let server = MockServer::start().await;
    mount_metadata(&server, metadata(&[("1.0.0", None)])).await;
    mount_tarball(&server, "1.0.0", vec![0u8; 16_384], 1).await;

    let config = FetchConfig::default()
        .with_registry(server.uri())
        .with_max_tarball_size(4_096);
    let err = acquire(&format!("npm:{NAME}"), &AcquireOptions::new(config))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::PackageTooLarge { .. }), "got: {err}");
}

#[tokio::test]
async fn npm_registry_error_names_the_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/{NAME}")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = acquire(&format!("npm:{NAME}"), &options(&server))
        .await
        .unwrap_err();
    assert!(
        matches!(err, FetchError::Transport { artifact: Artifact::RegistryMetadata, .. }),
        "got: {err}"
    );
    assert!(err.to_string().starts_with("registry metadata:"));
}

#[tokio::test]
async fn npm_redirect_off_origin_is_blocked() {
    let server = MockServer::start().await;
    mount_metadata(&server, metadata(&[("1.0.0", None)])).await;
    Mock::given(method("GET"))
        .and(path(tarball_path("1.0.0")))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", "http://evil.example/x.tgz"),
        )
        .mount(&server)
        .await;

    let err = acquire(&format!("npm:{NAME}"), &options(&server))
        .await
        .unwrap_err();
    assert!(
        matches!(err, FetchError::RedirectBlocked { artifact: Artifact::Tarball, .. }),
        "got: {err}"
    );
}

#[tokio::test]
async fn npm_handle_serves_files_from_memory() {
    let server = MockServer::start().await;
    mount_metadata(&server, metadata(&[("1.0.0", None)])).await;
    mount_tarball(&server, "1.0.0", tarball("1.0.0"), 1).await;

    let config = FetchConfig::default().with_registry(server.uri());
    let location = SourceLocation::parse(&format!("npm:{NAME}"), &config).unwrap();
    let handle = SourceHandle::resolve(location, "*", &config).await.unwrap();

    let manifest = handle.manifest().await.unwrap();
    assert_eq!(manifest.path, "snap.manifest.json");
    let descriptor = handle.fetch("./package.json").await.unwrap();
    assert_eq!(descriptor.path, "package.json");
    handle.fetch("dist/bundle.js").await.unwrap();

    let err = handle.fetch("README.md").await.unwrap_err();
    assert!(matches!(err, FetchError::MissingFile { .. }));
}

async fn mount_static(server: &MockServer, root: &str, manifest: &Value) {
    let files: [(&str, Vec<u8>); 4] = [
        ("snap.manifest.json", serde_json::to_vec(manifest).unwrap()),
        ("package.json", serde_json::to_vec(&descriptor("1.0.0")).unwrap()),
        ("dist/bundle.js", SOURCE.to_vec()),
        ("images/icon.svg", ICON.to_vec()),
    ];
    for (file, body) in files {
        Mock::given(method("GET"))
            .and(path(format!("{root}/{file}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .expect(1)
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn http_location_fetches_each_file_once() {
    let server = MockServer::start().await;
    mount_static(&server, "/snap", &manifest("1.0.0", SOURCE)).await;

    let config = FetchConfig::default();
    let location = SourceLocation::parse(&format!("{}/snap", server.uri()), &config).unwrap();
    let handle = SourceHandle::resolve(location, "*", &config).await.unwrap();

    let first = handle.fetch("dist/bundle.js").await.unwrap();
    let second = handle.fetch("./dist/bundle.js").await.unwrap();
    assert_eq!(first, second);
    handle.manifest().await.unwrap();

    let bundle = handle.bundle().await.unwrap();
    let verified = ManifestVerifier::default().validate(bundle).unwrap();
    assert_eq!(verified.descriptor.name, NAME);
}

#[tokio::test]
async fn local_location_acquires_from_loopback() {
    let server = MockServer::start().await;
    mount_static(&server, "", &manifest("1.0.0", SOURCE)).await;

    let verified = acquire(&format!("local:{}", server.uri()), &AcquireOptions::default())
        .await
        .unwrap();
    assert_eq!(verified.manifest.package_name(), NAME);
}

#[tokio::test]
async fn stale_manifest_fails_validation_then_repairs() {
    let server = MockServer::start().await;
    mount_static(&server, "/pkg", &manifest("0.9.0", b"older build")).await;

    let config = FetchConfig::default();
    let location = SourceLocation::parse(&format!("{}/pkg", server.uri()), &config).unwrap();
    let handle = SourceHandle::resolve(location, "*", &config).await.unwrap();
    let bundle = handle.bundle().await.unwrap();

    let verifier = ManifestVerifier::default();
    let err = verifier.validate(bundle.clone()).unwrap_err();
    assert_eq!(
        err.failure_reasons(),
        [
            ValidationFailureReason::VersionMismatch,
            ValidationFailureReason::ShasumMismatch
        ]
    );

    let outcome = verifier.check_and_repair(bundle, false).unwrap();
    assert!(outcome.fixed);
    assert_eq!(outcome.errors.len(), 2);
    assert_eq!(outcome.verified.manifest.version, "1.0.0");
}

#[tokio::test]
async fn local_location_rejects_remote_host_without_network() {
    let err = acquire("local:http://example.com:8080", &AcquireOptions::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, FetchError::NonLoopbackHost { ref host } if host == "example.com"),
        "got: {err}"
    );
}

#[tokio::test]
async fn unknown_protocol_is_unsupported() {
    let err = acquire("ipfs://bafybeigdyrzt", &AcquireOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::UnsupportedProtocol { ref scheme, .. } if scheme == "ipfs"));
}
