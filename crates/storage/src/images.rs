//! Product image relocation.
//!
//! Downloads an externally hosted image and re-uploads it to the configured
//! object storage so product rows point at storage we control.
//!
//! Image URLs come from uploaded rows, so fetches only reach public addresses
//! (unless the host is allow-listed) and bodies are capped at a fixed size.

use std::error::Error as StdError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tracing::{debug, warn};
use url::{Host, Url};

use crate::backend::{ObjectStorage, StoredObject};
use crate::error::StorageError;

const MAX_REDIRECTS: usize = 5;

/// Limits applied to every image download.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub max_bytes: u64,
    /// Hosts that may resolve to private or loopback addresses.
    pub allowed_hosts: Vec<String>,
}

pub struct ImageRelocator {
    storage: Arc<ObjectStorage>,
    client: reqwest::Client,
    folder: String,
    max_bytes: u64,
    allowed_hosts: Arc<Vec<String>>,
}

impl ImageRelocator {
    pub fn new(
        storage: Arc<ObjectStorage>,
        folder: impl Into<String>,
        policy: FetchPolicy,
    ) -> Result<Self, StorageError> {
        let allowed_hosts = Arc::new(policy.allowed_hosts);

        let redirect_hosts = allowed_hosts.clone();
        let redirect = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            match check_literal_host(attempt.url(), &redirect_hosts) {
                Ok(()) => attempt.follow(),
                Err(reason) => attempt.error(reason),
            }
        });

        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .redirect(redirect)
            .dns_resolver(Arc::new(PublicResolver {
                allowed_hosts: allowed_hosts.clone(),
            }))
            .build()?;

        Ok(Self {
            storage,
            client,
            folder: folder.into(),
            max_bytes: policy.max_bytes,
            allowed_hosts,
        })
    }

    /// Fetch `source` and store it under `<folder>/<uuid>-<file name>`.
    pub async fn relocate(&self, source: &str) -> Result<StoredObject, StorageError> {
        let url = Url::parse(source)
            .map_err(|e| StorageError::Other(format!("invalid image url {source}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(StorageError::Other(format!(
                "unsupported image url scheme: {}",
                url.scheme()
            )));
        }
        check_literal_host(&url, &self.allowed_hosts).map_err(StorageError::Blocked)?;

        let mut response = self.client.get(url.clone()).send().await?.error_for_status()?;
        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(StorageError::TooLarge { limit: self.max_bytes });
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(StorageError::TooLarge { limit: self.max_bytes });
            }
            body.extend_from_slice(&chunk);
        }

        let stored = self
            .storage
            .upload(&self.folder, &file_name_from_url(&url), body.freeze())
            .await?;
        debug!(source, key = %stored.key, "image relocated");
        Ok(stored)
    }

    /// Best-effort removal of a previously relocated image.
    pub async fn discard(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            warn!(key, error = %e, "failed to delete relocated image");
        }
    }
}

/// Whether an image reference is a downloadable `http(s)` URL.
pub fn is_remote_url(value: &str) -> bool {
    Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
        .unwrap_or(false)
}

fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("image")
        .to_string()
}

fn is_allowed(host: &str, allowed_hosts: &[String]) -> bool {
    allowed_hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
}

/// Reject IP-literal hosts that are not public. Domain names are checked by
/// [`PublicResolver`] once they resolve.
fn check_literal_host(url: &Url, allowed_hosts: &[String]) -> Result<(), String> {
    let ip = match url.host() {
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip),
        Some(Host::Domain(_)) => return Ok(()),
        None => return Err("image url has no host".to_string()),
    };
    let host = url.host_str().unwrap_or_default().trim_matches(|c| c == '[' || c == ']');
    if is_public_ip(ip) || is_allowed(host, allowed_hosts) {
        Ok(())
    } else {
        Err(format!("image host {ip} is not a public address"))
    }
}

/// Resolves through the system resolver and drops non-public addresses, so a
/// domain pointing at loopback or a metadata service is never connected to.
struct PublicResolver {
    allowed_hosts: Arc<Vec<String>>,
}

impl Resolve for PublicResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_public(name.as_str().to_string(), self.allowed_hosts.clone()))
    }
}

async fn resolve_public(
    host: String,
    allowed_hosts: Arc<Vec<String>>,
) -> Result<Addrs, Box<dyn StdError + Send + Sync>> {
    let exempt = is_allowed(&host, &allowed_hosts);
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
        .await?
        .filter(|addr| exempt || is_public_ip(addr.ip()))
        .collect();
    if addrs.is_empty() {
        return Err(format!("image host {host} does not resolve to a public address").into());
    }
    Ok(Box::new(addrs.into_iter()))
}

fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(v4),
            None => is_public_v6(v6),
        },
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b & 0xfe) == 18)
        // 240.0.0.0/4 reserved
        || a >= 240)
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8))
}
