//! Multicast device discovery.
//!
//! One-shot, time-bounded probe that finds CastLink devices on the local
//! network:
//!
//! 1. Bind an ephemeral UDP socket and multicast a single search probe
//!    naming the CastLink service type.
//! 2. Until the overall timeout elapses, collect every reply that carries
//!    a descriptor `LOCATION` header. The first reply per source address
//!    wins; later duplicates are dropped.
//! 3. Fetch each unique descriptor document over HTTP, each fetch bounded
//!    by its own short timeout so one slow responder cannot starve the
//!    rest.
//! 4. Accept a device only if the descriptor body contains the CastLink
//!    vendor marker; extract the friendly name when present.
//!
//! "Nothing found" is an empty result, never an error; only socket-level
//! failures raise [`DiscoveryError`]. The probe socket is closed
//! unconditionally when the collection window ends.
//!
//! # How multicast discovery works (for beginners)
//!
//! The client does not know any device addresses up front, so it sends one
//! UDP datagram to a well-known *multicast group* (`239.255.255.250:1900`)
//! that every interested device has joined. Each device answers with a
//! unicast datagram back to the probe socket's ephemeral port, carrying
//! the URL of a descriptor document. The descriptor is what tells us
//! whether the responder is actually a CastLink device — the multicast
//! group is shared with every other UPnP-style service on the network.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant, SystemTime};

use futures_util::future::join_all;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The probe socket could not be bound.
    #[error("failed to bind discovery socket: {0}")]
    Bind(#[source] std::io::Error),

    /// The search probe could not be sent.
    #[error("failed to send discovery probe to {addr}: {source}")]
    Probe {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The descriptor HTTP client could not be constructed.
    #[error("failed to build descriptor fetch client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Standard multicast group and port for service discovery probes.
pub const DISCOVERY_MULTICAST_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250)), 1900);

/// Configuration for the discovery probe.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Service type named in the search probe.
    pub service_type: String,
    /// Marker string a descriptor body must contain to be accepted.
    pub vendor_marker: String,
    /// Multicast group the probe is sent to.
    pub multicast_addr: SocketAddr,
    /// Maximum seconds devices may delay their reply (the probe's `MX`).
    pub max_reply_delay_secs: u8,
    /// Per-device descriptor fetch timeout, independent of the overall
    /// discovery timeout.
    pub fetch_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: "urn:castlink-org:service:cast-control:1".to_string(),
            vendor_marker: "CastLink".to_string(),
            multicast_addr: DISCOVERY_MULTICAST_ADDR,
            max_reply_delay_secs: 2,
            fetch_timeout: Duration::from_secs(2),
        }
    }
}

/// A device found by one discovery run.
///
/// Not persisted; superseded by the next run.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredDevice {
    /// Address the reply came from.
    pub address: IpAddr,
    /// `<friendlyName>` from the descriptor, if present.
    pub friendly_name: Option<String>,
    /// Descriptor URL used during discovery (not retained afterwards).
    pub descriptor_location: String,
    /// When this run saw the device.
    pub discovered_at: SystemTime,
}

/// Runs one discovery probe and collects replies until `overall_timeout`
/// elapses.
///
/// Returns the accumulated set — possibly empty — sorted in arrival order.
///
/// # Errors
///
/// Returns [`DiscoveryError`] only for socket-level failures; zero
/// responders is a successful empty result.
pub async fn discover(
    config: &DiscoveryConfig,
    overall_timeout: Duration,
) -> Result<Vec<DiscoveredDevice>, DiscoveryError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(DiscoveryError::Bind)?;

    let probe = format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\r\n",
        config.multicast_addr, config.max_reply_delay_secs, config.service_type
    );
    socket
        .send_to(probe.as_bytes(), config.multicast_addr)
        .await
        .map_err(|source| DiscoveryError::Probe { addr: config.multicast_addr, source })?;

    debug!(service_type = %config.service_type, "discovery probe sent");

    // ── Collection window ─────────────────────────────────────────────────────
    //
    // First reply per source address wins. Candidates are only recorded
    // here; descriptor fetches happen after the window closes so a slow
    // HTTP responder never eats into the listening time.
    let deadline = Instant::now() + overall_timeout;
    let mut seen: HashSet<IpAddr> = HashSet::new();
    let mut candidates: Vec<(IpAddr, String)> = Vec::new();
    let mut buf = vec![0u8; 2048];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let (len, src) = match timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                warn!("discovery recv error: {e}");
                continue;
            }
            Err(_) => break, // window closed
        };

        let reply = String::from_utf8_lossy(&buf[..len]);
        let Some(location) = header_value(&reply, "location") else {
            debug!(%src, "reply without LOCATION header (ignored)");
            continue;
        };
        if seen.insert(src.ip()) {
            debug!(%src, %location, "discovery reply");
            candidates.push((src.ip(), location));
        } else {
            debug!(%src, "duplicate reply (ignored)");
        }
    }
    // Probe socket closed here, replies or not.
    drop(socket);

    // ── Descriptor verification ───────────────────────────────────────────────
    let http = reqwest::Client::builder()
        .timeout(config.fetch_timeout)
        .build()
        .map_err(DiscoveryError::HttpClient)?;

    let fetches = candidates.into_iter().map(|(address, location)| {
        let http = http.clone();
        let marker = config.vendor_marker.clone();
        async move { verify_candidate(&http, address, location, &marker).await }
    });
    let devices: Vec<DiscoveredDevice> = join_all(fetches).await.into_iter().flatten().collect();

    info!(count = devices.len(), "discovery finished");
    Ok(devices)
}

/// Fetches one candidate's descriptor and applies the vendor filter.
///
/// Any fetch failure just drops the candidate — a device that cannot serve
/// its descriptor within the fetch timeout is treated as not present.
async fn verify_candidate(
    http: &reqwest::Client,
    address: IpAddr,
    location: String,
    vendor_marker: &str,
) -> Option<DiscoveredDevice> {
    let body = match http.get(&location).send().await {
        Ok(response) => match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(%address, "descriptor body unreadable: {e}");
                return None;
            }
        },
        Err(e) => {
            debug!(%address, %location, "descriptor fetch failed: {e}");
            return None;
        }
    };

    if !body.contains(vendor_marker) {
        debug!(%address, "descriptor without vendor marker (ignored)");
        return None;
    }

    Some(DiscoveredDevice {
        address,
        friendly_name: extract_tag(&body, "friendlyName"),
        descriptor_location: location,
        discovered_at: SystemTime::now(),
    })
}

// ── Reply parsing helpers ─────────────────────────────────────────────────────

/// Returns the value of a `Name: value` header line, case-insensitively.
fn header_value(reply: &str, name: &str) -> Option<String> {
    for line in reply.lines() {
        let Some((key, value)) = line.split_once(':') else { continue };
        if key.trim().eq_ignore_ascii_case(name) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Returns the trimmed text content of the first `<tag>...</tag>` element.
fn extract_tag(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    let text = body[start..end].trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
