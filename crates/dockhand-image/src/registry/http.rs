//! OCI distribution API client.
//!
//! Resolves a reference to its manifest over HTTP(S), following
//! anonymous bearer-token challenges and multi-platform indexes, and
//! classifies every failure for the manager.

use async_trait::async_trait;
use dockhand_common::config::DockhandConfig;
use dockhand_common::constants::{DEFAULT_REGISTRY, DOCKER_HUB_API_HOST};
use dockhand_common::error::DockhandError;
use dockhand_common::types::Digest;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Response, StatusCode};
use serde::Deserialize;

use super::{FetchedImage, RegistryClient};
use crate::error::{ImageError, Result};
use crate::hash;
use crate::reference::ImageReference;

const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

const CONTENT_DIGEST: &str = "docker-content-digest";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

impl Manifest {
    fn is_index(&self) -> bool {
        matches!(
            self.media_type.as_deref(),
            Some(OCI_INDEX | DOCKER_MANIFEST_LIST)
        ) || (self.config.is_none() && !self.manifests.is_empty())
    }

    /// Config plus layer sizes, or `None` if the total does not fit a `u64`.
    fn image_size(&self) -> Option<u64> {
        let config = self.config.as_ref().map_or(0, |c| c.size);
        self.layers
            .iter()
            .try_fold(config, |total, layer| total.checked_add(layer.size))
    }
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    architecture: String,
    os: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Raw manifest bytes plus what the registry said about them.
struct ManifestResponse {
    body: Vec<u8>,
    digest: Option<Digest>,
}

/// Registry client speaking the OCI distribution protocol.
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    http: reqwest::Client,
    config: DockhandConfig,
}

impl HttpRegistryClient {
    /// Builds a client from the workspace configuration.
    ///
    /// # Errors
    ///
    /// Returns `DockhandError::Config` if the HTTP client cannot be built.
    pub fn new(config: &DockhandConfig) -> dockhand_common::error::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("dockhand/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DockhandError::Config {
                message: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    fn base_url(&self, registry: &str) -> String {
        let host = if registry == DEFAULT_REGISTRY {
            DOCKER_HUB_API_HOST
        } else {
            registry
        };
        let scheme = if self.config.is_insecure(registry) {
            "http"
        } else {
            "https"
        };
        format!("{scheme}://{host}")
    }

    /// Fetches one manifest, answering a bearer challenge once if needed.
    async fn get_manifest(
        &self,
        reference: &ImageReference,
        target: &str,
    ) -> Result<ManifestResponse> {
        let url = format!(
            "{}/v2/{}/manifests/{target}",
            self.base_url(reference.registry()),
            reference.repository()
        );
        tracing::debug!(url = %url, "requesting manifest");

        let mut response = self.send(reference, &url, None).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(challenge) = bearer_challenge(response.headers()) {
                let token = self.token(reference, &challenge).await?;
                response = self.send(reference, &url, Some(&token)).await?;
            }
        }

        check_status(reference, response.status())?;
        let digest = response
            .headers()
            .get(CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Digest>().ok());
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport(reference, &e))?;
        Ok(ManifestResponse {
            body: body.to_vec(),
            digest,
        })
    }

    async fn send(
        &self,
        reference: &ImageReference,
        url: &str,
        token: Option<&str>,
    ) -> Result<Response> {
        let accept = [OCI_INDEX, OCI_MANIFEST, DOCKER_MANIFEST_LIST, DOCKER_MANIFEST].join(", ");
        let mut request = self.http.get(url).header(ACCEPT, accept);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        request
            .send()
            .await
            .map_err(|e| classify_transport(reference, &e))
    }

    /// Obtains an anonymous pull token from the challenge's realm.
    async fn token(&self, reference: &ImageReference, challenge: &Challenge) -> Result<String> {
        let scope = format!("repository:{}:pull", reference.repository());
        let mut params = vec![("scope", scope.as_str())];
        if let Some(service) = challenge.service.as_deref() {
            params.push(("service", service));
        }
        let url = reqwest::Url::parse_with_params(&challenge.realm, &params).map_err(|e| {
            ImageError::Registry {
                reference: reference.to_string(),
                message: format!("invalid token realm {}: {e}", challenge.realm),
                transient: false,
            }
        })?;
        tracing::debug!(realm = %challenge.realm, scope = %scope, "requesting registry token");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport(reference, &e))?;
        if !response.status().is_success() {
            return Err(ImageError::AccessDenied {
                reference: reference.to_string(),
                message: format!("token endpoint returned {}", response.status()),
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport(reference, &e))?;
        let parsed: TokenResponse =
            serde_json::from_slice(&body).map_err(|e| ImageError::Registry {
                reference: reference.to_string(),
                message: format!("malformed token response: {e}"),
                transient: false,
            })?;
        parsed
            .token
            .or(parsed.access_token)
            .ok_or_else(|| ImageError::AccessDenied {
                reference: reference.to_string(),
                message: "token endpoint returned no token".into(),
            })
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn fetch_image(&self, reference: &ImageReference) -> Result<FetchedImage> {
        if self.config.offline {
            return Err(ImageError::RegistryUnreachable {
                host: reference.registry().to_string(),
                message: "offline mode".into(),
            });
        }

        let top = self.get_manifest(reference, &reference.target_str()).await?;
        let digest = verified_digest(reference, &top, reference.digest())?;
        let manifest = parse_manifest(reference, &top.body)?;

        let manifest = if manifest.is_index() {
            let child = select_platform(&manifest, host_platform()).ok_or_else(|| {
                ImageError::Registry {
                    reference: reference.to_string(),
                    message: format!("no manifest for platform linux/{}", host_platform()),
                    transient: false,
                }
            })?;
            tracing::debug!(reference = %reference, child = %child, "resolved platform manifest");
            let response = self.get_manifest(reference, &child.to_string()).await?;
            let _ = verified_digest(reference, &response, Some(&child))?;
            parse_manifest(reference, &response.body)?
        } else {
            manifest
        };

        let size_bytes = manifest.image_size().ok_or_else(|| ImageError::Registry {
            reference: reference.to_string(),
            message: "manifest size overflows".into(),
            transient: false,
        })?;
        tracing::info!(reference = %reference, digest = %digest, size = size_bytes, "resolved image");
        Ok(FetchedImage { digest, size_bytes })
    }
}

/// Picks the response digest, checking it against the requested one.
fn verified_digest(
    reference: &ImageReference,
    response: &ManifestResponse,
    expected: Option<&Digest>,
) -> Result<Digest> {
    let computed = hash::digest_bytes(&response.body);
    if let Some(expected) = expected {
        if !hash::matches(&response.body, expected) {
            return Err(ImageError::Registry {
                reference: reference.to_string(),
                message: format!("manifest digest mismatch: expected {expected}, got {computed}"),
                transient: false,
            });
        }
    }
    Ok(response.digest.clone().unwrap_or(computed))
}

fn parse_manifest(reference: &ImageReference, body: &[u8]) -> Result<Manifest> {
    serde_json::from_slice(body).map_err(|e| ImageError::Registry {
        reference: reference.to_string(),
        message: format!("malformed manifest: {e}"),
        transient: false,
    })
}

/// Architecture name used by image indexes for this host.
fn host_platform() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

fn select_platform(index: &Manifest, architecture: &str) -> Option<Digest> {
    index
        .manifests
        .iter()
        .find(|m| {
            m.platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == architecture)
        })
        .and_then(|m| m.digest.as_deref())
        .and_then(|d| d.parse().ok())
}

fn check_status(reference: &ImageReference, status: StatusCode) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let reference = reference.to_string();
    Err(match status {
        StatusCode::NOT_FOUND => ImageError::ImageNotFound { reference },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ImageError::AccessDenied {
            reference,
            message: status.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => ImageError::Registry {
            reference,
            message: status.to_string(),
            transient: true,
        },
        s => ImageError::Registry {
            reference,
            message: s.to_string(),
            transient: s.is_server_error(),
        },
    })
}

fn classify_transport(reference: &ImageReference, err: &reqwest::Error) -> ImageError {
    if err.is_connect() || err.is_timeout() {
        ImageError::RegistryUnreachable {
            host: reference.registry().to_string(),
            message: err.to_string(),
        }
    } else {
        ImageError::Registry {
            reference: reference.to_string(),
            message: err.to_string(),
            transient: true,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Challenge {
    realm: String,
    service: Option<String>,
}

fn bearer_challenge(headers: &HeaderMap) -> Option<Challenge> {
    let value = headers.get(WWW_AUTHENTICATE)?.to_str().ok()?;
    parse_challenge(value)
}

/// Parses `Bearer realm="…",service="…",scope="…"`.
fn parse_challenge(value: &str) -> Option<Challenge> {
    let (scheme, params) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut realm = None;
    let mut service = None;
    let mut rest = params.trim();
    while !rest.is_empty() {
        let (key, after) = rest.split_once('=')?;
        let (val, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            after.split_once(',').map_or((after, ""), |(v, r)| (v, r))
        };
        match key.trim() {
            "realm" => realm = Some(val.to_string()),
            "service" => service = Some(val.to_string()),
            _ => {}
        }
        rest = remainder.trim_start_matches(',').trim();
    }

    Some(Challenge {
        realm: realm?,
        service,
    })
}

#[cfg(test)]
mod tests {
    use std::fmt::Write as _;
    use std::net::SocketAddr;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    const MANIFEST: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": { "digest": "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "size": 1000 },
        "layers": [
            { "digest": "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", "size": 2000 },
            { "digest": "sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc", "size": 3000 }
        ]
    }"#;

    fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut out = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n",
            body.len()
        );
        for (name, value) in headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        out.push_str("\r\n");
        out.push_str(body);
        out
    }

    async fn serve(responses: Vec<String>) -> (SocketAddr, JoinHandle<Vec<String>>) {
        serve_with(|_| responses).await
    }

    /// Serves one canned response per connection, returning the requests seen.
    async fn serve_with(
        build: impl FnOnce(SocketAddr) -> Vec<String>,
    ) -> (SocketAddr, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let responses = build(addr);
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for response in responses {
                let (mut socket, _) = listener.accept().await.expect("accept");
                let mut buf = vec![0_u8; 16 * 1024];
                let mut read = 0;
                loop {
                    let n = socket.read(&mut buf[read..]).await.expect("read");
                    read += n;
                    if n == 0 || buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                requests.push(String::from_utf8_lossy(&buf[..read]).into_owned());
                socket.write_all(response.as_bytes()).await.expect("write");
                let _ = socket.shutdown().await;
            }
            requests
        });
        (addr, handle)
    }

    fn client(insecure: Vec<String>, offline: bool) -> HttpRegistryClient {
        let config = DockhandConfig {
            request_timeout_secs: 5,
            insecure_registries: insecure,
            offline,
            ..DockhandConfig::default()
        };
        HttpRegistryClient::new(&config).expect("client")
    }

    fn client_for(addr: SocketAddr) -> HttpRegistryClient {
        client(vec![addr.to_string()], false)
    }

    fn reference_at(addr: SocketAddr, path: &str) -> ImageReference {
        format!("{addr}/{path}").parse().expect("reference")
    }

    #[tokio::test]
    async fn connection_refused_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let err = client_for(addr)
            .fetch_image(&reference_at(addr, "foo/fooimage"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::RegistryUnreachable { .. }), "{err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_manifest_is_image_not_found() {
        let (addr, server) = serve(vec![http_response("404 Not Found", &[], "")]).await;

        let err = client_for(addr)
            .fetch_image(&reference_at(addr, "google_containers/not_exist"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::ImageNotFound { .. }), "{err:?}");

        let requests = server.await.expect("server");
        assert!(requests[0].starts_with("GET /v2/google_containers/not_exist/manifests/latest "));
    }

    #[tokio::test]
    async fn served_manifest_reports_digest_and_size() {
        let digest = hash::digest_bytes(MANIFEST.as_bytes()).to_string();
        let (addr, _server) = serve(vec![http_response(
            "200 OK",
            &[("Content-Type", OCI_MANIFEST), ("Docker-Content-Digest", digest.as_str())],
            MANIFEST,
        )])
        .await;

        let fetched = client_for(addr)
            .fetch_image(&reference_at(addr, "team/app:v1"))
            .await
            .expect("fetch");
        assert_eq!(fetched.size_bytes, 6000);
        assert_eq!(fetched.digest.to_string(), digest);
    }

    #[tokio::test]
    async fn oversized_manifest_is_a_terminal_registry_error() {
        let manifest = r#"{
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": { "size": 1 },
            "layers": [ { "size": 18446744073709551615 } ]
        }"#;
        let (addr, _server) = serve(vec![http_response("200 OK", &[], manifest)]).await;

        let err = client_for(addr)
            .fetch_image(&reference_at(addr, "team/huge:v1"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, ImageError::Registry { transient: false, ref message, .. } if message.contains("overflows")),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn bearer_challenge_is_answered_once() {
        let (addr, server) = serve_with(|addr| {
            let challenge = format!(r#"Bearer realm="http://{addr}/token",service="test-registry""#);
            vec![
                http_response("401 Unauthorized", &[("WWW-Authenticate", challenge.as_str())], ""),
                http_response("200 OK", &[], r#"{"token":"s3cret"}"#),
                http_response("200 OK", &[], MANIFEST),
            ]
        })
        .await;

        let fetched = client_for(addr)
            .fetch_image(&reference_at(addr, "team/private"))
            .await
            .expect("fetch");
        assert_eq!(fetched.size_bytes, 6000);

        let requests = server.await.expect("server");
        assert!(requests[1].starts_with("GET /token?"));
        assert!(requests[1].contains("scope=repository%3Ateam%2Fprivate%3Apull"));
        assert!(requests[1].contains("service=test-registry"));
        assert!(requests[2].to_ascii_lowercase().contains("authorization: bearer s3cret"));
    }

    #[tokio::test]
    async fn rejected_token_request_is_access_denied() {
        let (addr, _server) = serve_with(|addr| {
            let challenge = format!(r#"Bearer realm="http://{addr}/token""#);
            vec![
                http_response("401 Unauthorized", &[("WWW-Authenticate", challenge.as_str())], ""),
                http_response("403 Forbidden", &[], ""),
            ]
        })
        .await;

        let err = client_for(addr)
            .fetch_image(&reference_at(addr, "team/private"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::AccessDenied { .. }), "{err:?}");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let (addr, _server) = serve(vec![http_response("503 Service Unavailable", &[], "")]).await;

        let err = client_for(addr)
            .fetch_image(&reference_at(addr, "team/app"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Registry { transient: true, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn index_is_resolved_to_host_platform() {
        let child = hash::digest_bytes(MANIFEST.as_bytes());
        let index = format!(
            r#"{{
                "schemaVersion": 2,
                "mediaType": "{OCI_INDEX}",
                "manifests": [
                    {{ "digest": "{child}", "size": 500, "platform": {{ "architecture": "{}", "os": "linux" }} }},
                    {{ "digest": "sha256:{}", "size": 500, "platform": {{ "architecture": "mips", "os": "linux" }} }}
                ]
            }}"#,
            host_platform(),
            "d".repeat(64),
        );
        let (addr, server) = serve(vec![
            http_response("200 OK", &[], &index),
            http_response("200 OK", &[], MANIFEST),
        ])
        .await;

        let fetched = client_for(addr)
            .fetch_image(&reference_at(addr, "team/multi"))
            .await
            .expect("fetch");
        assert_eq!(fetched.size_bytes, 6000);
        assert_eq!(fetched.digest, hash::digest_bytes(index.as_bytes()));

        let requests = server.await.expect("server");
        assert!(requests[1].starts_with(&format!("GET /v2/team/multi/manifests/{child} ")));
    }

    #[tokio::test]
    async fn offline_mode_never_touches_the_network() {
        let err = client(Vec::new(), true)
            .fetch_image(&"foo.com/foo/fooimage".parse().expect("reference"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::RegistryUnreachable { .. }));
    }

    #[test]
    fn parse_docker_hub_challenge() {
        let challenge = parse_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull,push""#,
        )
        .expect("challenge");
        assert_eq!(
            challenge,
            Challenge {
                realm: "https://auth.docker.io/token".into(),
                service: Some("registry.docker.io".into()),
            }
        );
    }

    #[test]
    fn basic_challenge_is_ignored() {
        assert!(parse_challenge(r#"Basic realm="registry""#).is_none());
    }

    #[test]
    fn docker_hub_uses_api_host() {
        let hub = client(Vec::new(), false);
        assert_eq!(hub.base_url("docker.io"), "https://registry-1.docker.io");
        assert_eq!(hub.base_url("gcr.io"), "https://gcr.io");
    }
}
