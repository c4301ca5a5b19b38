//! Resolution of content descriptors to file bytes

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use futures_util::StreamExt;
use std::net::IpAddr;
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Write buffer for remote downloads; caps memory held per download.
pub const DOWNLOAD_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Standard alphabet, padding optional.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Where the bytes of a virtual file come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// Inline `data:` URI
    DataUri(String),
    /// `http:` or `https:` URL to download
    Url(String),
    /// Base64 encoded content
    Base64(String),
}

impl ContentSource {
    /// Classify a descriptor by its prefix.
    pub fn parse(descriptor: &str) -> Self {
        if descriptor.starts_with("data:") {
            ContentSource::DataUri(descriptor.to_string())
        } else if descriptor.starts_with("http:") || descriptor.starts_with("https:") {
            ContentSource::Url(descriptor.to_string())
        } else {
            ContentSource::Base64(descriptor.to_string())
        }
    }

    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ContentSource::DataUri(_) => "data URI",
            ContentSource::Url(_) => "URL",
            ContentSource::Base64(_) => "base64",
        }
    }
}

/// Resolve `source` and write its bytes to `dest`, returning the byte count.
pub async fn write_source(
    source: &ContentSource,
    dest: &Path,
    config: &ServerConfig,
) -> Result<u64> {
    match source {
        ContentSource::DataUri(uri) => {
            let data = decode_data_uri(uri)?;
            tokio::fs::write(dest, &data).await?;
            Ok(data.len() as u64)
        }
        ContentSource::Url(url) => download_url(url, dest, config).await,
        ContentSource::Base64(encoded) => {
            let data = decode_base64(encoded.as_bytes())?;
            tokio::fs::write(dest, &data).await?;
            Ok(data.len() as u64)
        }
    }
}

/// Decode base64 data, ignoring ASCII whitespace.
pub fn decode_base64(encoded: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = encoded
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    Ok(BASE64.decode(cleaned)?)
}

/// Decode a `data:[<mediatype>][;base64],<payload>` URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| Error::SourceResolution {
            reason: "Not a data URI".to_string(),
        })?;

    let (header, payload) = rest.split_once(',').ok_or_else(|| Error::SourceResolution {
        reason: "Data URI has no ',' separator".to_string(),
    })?;

    let payload = urlencoding::decode_binary(payload.as_bytes());
    let is_base64 = header
        .rsplit(';')
        .next()
        .is_some_and(|param| param.trim().eq_ignore_ascii_case("base64"));

    if is_base64 {
        decode_base64(&payload)
    } else {
        Ok(payload.into_owned())
    }
}

/// Addresses a download must never reach when private URLs are blocked:
/// loopback, private, link-local, CGNAT, broadcast and unspecified, in either
/// family.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (a == 100 && (64..128).contains(&b))
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}

/// Refuse `url` if its host is, or resolves to, a private address.
async fn ensure_public_host(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url).map_err(|e| Error::SourceResolution {
        reason: format!("Invalid URL {url}: {e}"),
    })?;

    let addrs: Vec<IpAddr> = match parsed.host() {
        Some(url::Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
        Some(url::Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
        Some(url::Host::Domain(domain)) => {
            let port = parsed.port_or_known_default().unwrap_or(80);
            tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| Error::SourceResolution {
                    reason: format!("Cannot resolve {domain}: {e}"),
                })?
                .map(|addr| addr.ip())
                .collect()
        }
        None => {
            return Err(Error::SourceResolution {
                reason: format!("URL has no host: {url}"),
            })
        }
    };

    if addrs.into_iter().any(is_private_ip) {
        return Err(Error::SsrfBlocked {
            url: url.to_string(),
        });
    }
    Ok(())
}

/// Stream a URL to `dest` with download size limits and optional SSRF protection
pub async fn download_url(url: &str, dest: &Path, config: &ServerConfig) -> Result<u64> {
    let mut builder = reqwest::Client::builder().timeout(config.fetch_timeout);
    if !config.allow_private_urls {
        ensure_public_host(url).await?;
        // A redirect could land on an address that was never checked.
        builder = builder.redirect(reqwest::redirect::Policy::none());
    }
    let client = builder.build()?;

    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(Error::SourceResolution {
            reason: format!("HTTP request failed with status: {}", response.status()),
        });
    }

    let max_download_bytes = config.max_download_bytes;

    // Check Content-Length header for early rejection
    if let Some(content_length) = response.content_length() {
        if content_length > max_download_bytes {
            return Err(Error::DownloadTooLarge {
                size: content_length,
                max_size: max_download_bytes,
            });
        }
    }

    let file = tokio::fs::File::create(dest).await?;
    let mut writer = BufWriter::with_capacity(DOWNLOAD_CHUNK_SIZE, file);

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        if written > max_download_bytes {
            return Err(Error::DownloadTooLarge {
                size: written,
                max_size: max_download_bytes,
            });
        }
        writer.write_all(&chunk).await?;
    }
    writer.flush().await?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_by_prefix() {
        assert!(matches!(
            ContentSource::parse("data:text/plain,hi"),
            ContentSource::DataUri(_)
        ));
        assert!(matches!(
            ContentSource::parse("http://example.com/a.md"),
            ContentSource::Url(_)
        ));
        assert!(matches!(
            ContentSource::parse("https://example.com/a.md"),
            ContentSource::Url(_)
        ));
        assert_eq!(
            ContentSource::parse("IyBUaXRsZQ=="),
            ContentSource::Base64("IyBUaXRsZQ==".to_string())
        );
        // Prefix match is exact, like the scheme check
        assert!(matches!(
            ContentSource::parse("ftp://example.com/a.md"),
            ContentSource::Base64(_)
        ));
    }

    #[test]
    fn test_decode_base64() {
        assert_eq!(decode_base64(b"IyBUaXRsZQ==").unwrap(), b"# Title");
        assert_eq!(decode_base64(b"IyBUaXRsZQ").unwrap(), b"# Title");
        assert_eq!(decode_base64(b"IyBU\naXRs\r\nZQ==").unwrap(), b"# Title");
        assert_eq!(decode_base64(b"").unwrap(), b"");
    }

    #[test]
    fn test_decode_base64_invalid() {
        let result = decode_base64(b"not valid base64!!!");
        assert!(matches!(result, Err(Error::Base64Decode(_))));
    }

    #[test]
    fn test_decode_data_uri_base64() {
        let data = decode_data_uri("data:text/markdown;base64,IyBUaXRsZQ==").unwrap();
        assert_eq!(data, b"# Title");
    }

    #[test]
    fn test_decode_data_uri_percent_encoded() {
        let data = decode_data_uri("data:text/plain;charset=utf-8,Hello%2C%20World").unwrap();
        assert_eq!(data, b"Hello, World");

        let data = decode_data_uri("data:,%00%FF").unwrap();
        assert_eq!(data, vec![0x00, 0xFF]);
    }

    #[test]
    fn test_decode_data_uri_without_separator() {
        let result = decode_data_uri("data:text/plain;base64");
        assert!(matches!(result, Err(Error::SourceResolution { .. })));
    }

    #[test]
    fn test_decode_data_uri_bad_base64() {
        let result = decode_data_uri("data:;base64,!!!");
        assert!(matches!(result, Err(Error::Base64Decode(_))));
    }

    #[tokio::test]
    async fn test_download_url_streams_to_file() {
        let server = MockServer::start().await;
        let body = vec![b'x'; 64 * 1024];
        Mock::given(method("GET"))
            .and(path("/doc.md"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("doc.md");
        let url = format!("{}/doc.md", server.uri());

        let written = download_url(&url, &dest, &ServerConfig::default())
            .await
            .unwrap();
        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
    }

    #[tokio::test]
    async fn test_download_url_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/missing", server.uri());
        let result = download_url(&url, &dir.path().join("x"), &ServerConfig::default()).await;
        assert!(matches!(result, Err(Error::SourceResolution { .. })));
    }

    #[tokio::test]
    async fn test_download_url_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
            .mount(&server)
            .await;

        let config = ServerConfig {
            max_download_bytes: 1024,
            ..ServerConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/big", server.uri());
        let result = download_url(&url, &dir.path().join("big"), &config).await;
        assert!(matches!(result, Err(Error::DownloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_download_url_blocks_private_address() {
        let server = MockServer::start().await;
        let config = ServerConfig {
            allow_private_urls: false,
            ..ServerConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/doc.md", server.uri());
        let result = download_url(&url, &dir.path().join("doc.md"), &config).await;
        assert!(matches!(result, Err(Error::SsrfBlocked { .. })));
    }

    #[tokio::test]
    async fn test_write_source_base64() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.md");
        let source = ContentSource::parse("IyBUaXRsZQ==");

        let written = write_source(&source, &dest, &ServerConfig::default())
            .await
            .unwrap();
        assert_eq!(written, 7);
        assert_eq!(std::fs::read(&dest).unwrap(), b"# Title");
    }

    #[test]
    fn test_is_private_ip() {
        for ip in [
            "127.0.0.2",
            "10.0.0.1",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "100.64.0.1",
            "0.0.0.0",
            "::1",
            "fd00::1",
            "fe80::1",
            "::ffff:10.0.0.1",
        ] {
            assert!(is_private_ip(ip.parse().unwrap()), "{ip}");
        }
        for ip in ["8.8.8.8", "100.128.0.1", "2001:db8::1", "::ffff:1.1.1.1"] {
            assert!(!is_private_ip(ip.parse().unwrap()), "{ip}");
        }
    }

    #[tokio::test]
    async fn test_ensure_public_host_literal_addresses() {
        assert!(matches!(
            ensure_public_host("http://[::1]:8080/a.md").await,
            Err(Error::SsrfBlocked { .. })
        ));
        assert!(ensure_public_host("https://1.1.1.1/a.md").await.is_ok());
    }
}
