//! Source ingest: handshake parsing, authentication, and the loop that
//! pumps a source's body into its mount's ring buffer.
//!
//! Protocol acceptance is Icecast-compatible: the legacy `SOURCE` method
//! and `PUT`, both with HTTP Basic credentials (any username; Icecast
//! clients conventionally send `source`). The handshake's `ice-*` headers
//! seed the mount metadata.

use std::fmt::Display;
use std::sync::Arc;

use axum::http::HeaderMap;
use base64::prelude::*;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::config::{Config, MountConfig};
use crate::error::{CastError, CastResult};
use crate::mount::{Mount, MountMetadata, SourceAttachment};
use crate::protocol_constants::PROBE_WINDOW_SIZE;
use crate::stream::mp3;

/// A parsed source handshake.
#[derive(Debug, Clone)]
pub struct SourceHandshake {
    /// Target mount path.
    pub mount_path: String,
    /// Declared stream MIME type (required).
    pub content_type: String,
    /// `ice-name` station name.
    pub name: Option<String>,
    /// `ice-genre`.
    pub genre: Option<String>,
    /// `ice-description`.
    pub description: Option<String>,
    /// `ice-url` homepage.
    pub url: Option<String>,
    /// `ice-bitrate` in kbps.
    pub bitrate: Option<u32>,
    /// `ice-public` directory opt-in.
    pub public: bool,
    /// Password from Basic credentials, if any.
    pub password: Option<String>,
    /// Source client user-agent.
    pub user_agent: Option<String>,
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl SourceHandshake {
    /// Parses a handshake from the request path and headers.
    ///
    /// A missing `Content-Type` is a malformed handshake: without it no
    /// listener response could ever be labeled.
    pub fn parse(mount_path: &str, headers: &HeaderMap) -> CastResult<Self> {
        if !mount_path.starts_with('/') || mount_path.len() < 2 {
            return Err(CastError::BadHandshake(format!(
                "invalid mount path {:?}",
                mount_path
            )));
        }
        let content_type = header_str(headers, "content-type")
            .ok_or_else(|| CastError::BadHandshake("missing Content-Type".to_string()))?;

        Ok(Self {
            mount_path: mount_path.to_string(),
            content_type,
            name: header_str(headers, "ice-name"),
            genre: header_str(headers, "ice-genre"),
            description: header_str(headers, "ice-description"),
            url: header_str(headers, "ice-url"),
            bitrate: header_str(headers, "ice-bitrate").and_then(|v| v.parse().ok()),
            public: header_str(headers, "ice-public").as_deref() == Some("1"),
            password: basic_password(headers),
            user_agent: header_str(headers, "user-agent"),
        })
    }

    /// Builds the mount metadata snapshot this handshake implies,
    /// falling back to the mount's configured station fields.
    pub fn metadata(&self, mount_config: &MountConfig) -> MountMetadata {
        MountMetadata {
            content_type: self.content_type.clone(),
            name: self.name.clone().or_else(|| mount_config.name.clone()),
            genre: self.genre.clone().or_else(|| mount_config.genre.clone()),
            description: self
                .description
                .clone()
                .or_else(|| mount_config.description.clone()),
            url: self.url.clone(),
            bitrate: self.bitrate.or(mount_config.bitrate),
            public: self.public || mount_config.public,
            stream_title: None,
        }
    }
}

/// Extracts the password from an `Authorization: Basic` header.
///
/// Any username is accepted; the password is everything after the first
/// colon of the decoded credentials.
pub fn basic_password(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ").or_else(|| value.strip_prefix("basic "))?;
    let decoded = BASE64_STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (_, password) = credentials.split_once(':')?;
    Some(password.to_string())
}

/// Checks the supplied password against the mount's effective password.
pub fn authenticate(
    config: &Config,
    mount_config: &MountConfig,
    supplied: Option<&str>,
    mount_path: &str,
) -> CastResult<()> {
    let expected = config.source_password_for(mount_config);
    if supplied == Some(expected) {
        Ok(())
    } else {
        Err(CastError::AuthFailed(mount_path.to_string()))
    }
}

/// Accumulates the first window of an MP3 ingest and probes it for the
/// stream's framing once, reporting the header it confirmed.
struct BitrateProbe {
    buf: Vec<u8>,
    done: bool,
}

impl BitrateProbe {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(PROBE_WINDOW_SIZE),
            done: false,
        }
    }

    /// Feeds ingest bytes; returns a header when the probe concludes.
    fn feed(&mut self, chunk: &[u8]) -> Option<mp3::FrameHeader> {
        if self.done {
            return None;
        }
        let room = PROBE_WINDOW_SIZE - self.buf.len();
        self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if self.buf.len() < PROBE_WINDOW_SIZE {
            return None;
        }
        self.done = true;
        let header = mp3::probe(&self.buf);
        self.buf = Vec::new();
        header
    }
}

/// Pumps the source body into the mount's ring buffer until EOF, a read
/// error, or an admin kill, then detaches the source.
///
/// Source-side network pauses throttle naturally through TCP flow control;
/// nothing here ever blocks on listeners.
pub async fn run_ingest<S, E>(mount: Arc<Mount>, attachment: SourceAttachment, body: S)
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut body = body;
    let needs_probe = mount.sync_mode() == crate::ring::SyncMode::Mp3
        && mount.metadata().bitrate.is_none();
    let mut probe = needs_probe.then(BitrateProbe::new);
    let mut total: u64 = 0;

    loop {
        tokio::select! {
            _ = attachment.cancel.cancelled() => {
                log::info!("[Source] Ingest on {} cancelled by admin", mount.path);
                break;
            }
            frame = body.next() => match frame {
                Some(Ok(bytes)) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    total += bytes.len() as u64;
                    attachment.writer.write(&bytes);
                    if let Some(active_probe) = probe.as_mut() {
                        if let Some(header) = active_probe.feed(&bytes) {
                            log::info!(
                                "[Source] Probed {} as {} kbps, {} Hz",
                                mount.path,
                                header.bitrate_kbps,
                                header.sample_rate
                            );
                            mount.set_metadata(
                                mount.metadata().with_probed_bitrate(header.bitrate_kbps),
                            );
                            probe = None;
                        } else if active_probe.done {
                            probe = None;
                        }
                    }
                }
                Some(Err(e)) => {
                    log::info!("[Source] Read error on {}: {}", mount.path, e);
                    break;
                }
                None => {
                    log::info!("[Source] EOF on {} after {} bytes", mount.path, total);
                    break;
                }
            }
        }
    }

    mount.detach_source(attachment.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::convert::Infallible;

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                axum::http::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", BASE64_STANDARD.encode(format!("{}:{}", user, pass)))
    }

    #[test]
    fn handshake_requires_content_type() {
        let err = SourceHandshake::parse("/live", &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, CastError::BadHandshake(_)));
    }

    #[test]
    fn handshake_rejects_bare_root_path() {
        let headers = headers_with(&[("content-type", "audio/mpeg")]);
        assert!(SourceHandshake::parse("/", &headers).is_err());
        assert!(SourceHandshake::parse("live", &headers).is_err());
    }

    #[test]
    fn handshake_collects_ice_headers() {
        let headers = headers_with(&[
            ("content-type", "audio/mpeg"),
            ("ice-name", "Night FM"),
            ("ice-genre", "ambient"),
            ("ice-bitrate", "192"),
            ("ice-public", "1"),
            ("user-agent", "butt/0.1.40"),
        ]);
        let handshake = SourceHandshake::parse("/night", &headers).unwrap();
        assert_eq!(handshake.content_type, "audio/mpeg");
        assert_eq!(handshake.name.as_deref(), Some("Night FM"));
        assert_eq!(handshake.genre.as_deref(), Some("ambient"));
        assert_eq!(handshake.bitrate, Some(192));
        assert!(handshake.public);
        assert_eq!(handshake.user_agent.as_deref(), Some("butt/0.1.40"));
    }

    #[test]
    fn handshake_metadata_falls_back_to_mount_config() {
        let headers = headers_with(&[("content-type", "audio/mpeg")]);
        let handshake = SourceHandshake::parse("/live", &headers).unwrap();
        let mount_config = MountConfig {
            name: Some("Configured".to_string()),
            bitrate: Some(128),
            ..Default::default()
        };
        let metadata = handshake.metadata(&mount_config);
        assert_eq!(metadata.name.as_deref(), Some("Configured"));
        assert_eq!(metadata.bitrate, Some(128));
    }

    #[test]
    fn basic_password_accepts_any_username() {
        let headers = headers_with(&[("authorization", &basic("source", "s3cret"))]);
        assert_eq!(basic_password(&headers).as_deref(), Some("s3cret"));

        let headers = headers_with(&[("authorization", &basic("dj", "s3cret"))]);
        assert_eq!(basic_password(&headers).as_deref(), Some("s3cret"));
    }

    #[test]
    fn basic_password_handles_colons_in_password() {
        let headers = headers_with(&[("authorization", &basic("source", "a:b:c"))]);
        assert_eq!(basic_password(&headers).as_deref(), Some("a:b:c"));
    }

    #[test]
    fn malformed_authorization_yields_none() {
        assert!(basic_password(&HeaderMap::new()).is_none());
        let headers = headers_with(&[("authorization", "Bearer token")]);
        assert!(basic_password(&headers).is_none());
        let headers = headers_with(&[("authorization", "Basic !!!not-base64!!!")]);
        assert!(basic_password(&headers).is_none());
    }

    #[test]
    fn authentication_prefers_mount_password() {
        let config = Config {
            source_password: "global".to_string(),
            ..Default::default()
        };
        let mount_config = MountConfig {
            source_password: Some("local".to_string()),
            ..Default::default()
        };
        assert!(authenticate(&config, &mount_config, Some("local"), "/live").is_ok());
        assert!(authenticate(&config, &mount_config, Some("global"), "/live").is_err());
        assert!(authenticate(&config, &MountConfig::default(), Some("global"), "/live").is_ok());
        assert!(authenticate(&config, &MountConfig::default(), None, "/live").is_err());
    }

    fn test_mount(content_type: &str) -> (Arc<Mount>, SourceAttachment) {
        let mount = Arc::new(Mount::new(
            "/live".to_string(),
            MountConfig::default(),
            1024 * 1024,
            64 * 1024,
        ));
        let attachment = mount
            .attach_source(
                "198.51.100.1".parse().unwrap(),
                None,
                MountMetadata {
                    content_type: content_type.to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
        (mount, attachment)
    }

    #[tokio::test]
    async fn ingest_writes_body_and_detaches_on_eof() {
        let (mount, attachment) = test_mount("application/ogg");
        let chunks: Vec<Result<Bytes, Infallible>> = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let body = futures::stream::iter(chunks);

        run_ingest(Arc::clone(&mount), attachment, Box::pin(body)).await;

        assert!(!mount.has_source());
        let reader = mount.reader();
        assert_eq!(reader.write_pos(), 11);
        let mut dst = [0u8; 11];
        let outcome = reader.read_from(0, &mut dst);
        assert_eq!(outcome.len, 11);
        assert_eq!(&dst, b"hello world");
    }

    #[tokio::test]
    async fn ingest_stops_on_body_error() {
        let (mount, attachment) = test_mount("application/ogg");
        let chunks: Vec<Result<Bytes, &str>> =
            vec![Ok(Bytes::from_static(b"data")), Err("connection reset")];
        let body = futures::stream::iter(chunks);

        run_ingest(Arc::clone(&mount), attachment, Box::pin(body)).await;

        assert!(!mount.has_source());
        assert_eq!(mount.reader().write_pos(), 4);
    }

    #[tokio::test]
    async fn ingest_probes_mp3_bitrate() {
        let (mount, attachment) = test_mount("audio/mpeg");
        assert!(mount.metadata().bitrate.is_none());

        // One window of back-to-back 128 kbps MPEG1 Layer III frames.
        let header = [0xFFu8, 0xFB, 0x90, 0x64];
        let frame_len = mp3::parse_frame_header(&header).unwrap().frame_len();
        let mut data = Vec::new();
        while data.len() < PROBE_WINDOW_SIZE + frame_len {
            data.extend_from_slice(&header);
            data.resize(data.len() + frame_len - header.len(), 0xAA);
        }
        let chunks: Vec<Result<Bytes, Infallible>> = data
            .chunks(4096)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        run_ingest(
            Arc::clone(&mount),
            attachment,
            Box::pin(futures::stream::iter(chunks)),
        )
        .await;

        assert_eq!(mount.metadata().bitrate, Some(128));
    }

    #[tokio::test]
    async fn declared_bitrate_suppresses_the_probe() {
        let mount = Arc::new(Mount::new(
            "/live".to_string(),
            MountConfig::default(),
            1024 * 1024,
            64 * 1024,
        ));
        let attachment = mount
            .attach_source(
                "198.51.100.1".parse().unwrap(),
                None,
                MountMetadata {
                    content_type: "audio/mpeg".to_string(),
                    bitrate: Some(320),
                    ..Default::default()
                },
            )
            .unwrap();

        let data = vec![0x00u8; PROBE_WINDOW_SIZE * 2];
        let chunks: Vec<Result<Bytes, Infallible>> = data
            .chunks(4096)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        run_ingest(
            Arc::clone(&mount),
            attachment,
            Box::pin(futures::stream::iter(chunks)),
        )
        .await;

        assert_eq!(mount.metadata().bitrate, Some(320));
    }

    #[tokio::test]
    async fn admin_kill_stops_the_ingest() {
        let (mount, attachment) = test_mount("application/ogg");
        let cancel = attachment.cancel.clone();

        // An endless body: the loop must exit via the token, not EOF.
        let body = futures::stream::unfold(0u64, |n| async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Some((Ok::<Bytes, Infallible>(Bytes::from_static(&[0u8; 64])), n + 1))
        });

        let mount_for_ingest = Arc::clone(&mount);
        let ingest = tokio::spawn(async move {
            run_ingest(mount_for_ingest, attachment, Box::pin(body)).await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), ingest)
            .await
            .expect("ingest must stop after cancellation")
            .unwrap();
        assert!(!mount.has_source());
    }
}
