//! Broker address handling and transport selection for the MQTT bridge.
//!
//! The bridge talks to one broker. Its address comes from
//! `mqtt.broker_addr` in the config and is parsed into an `MqttEndpoint`.
//! TLS is switched on by an `mqtts://`/`ssl://` scheme or `--mqtt-use-tls`,
//! and certificate files are read once at startup into `TlsMaterials`.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::MqttOptions;
use rumqttc::Transport;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// A parsed broker address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    /// Hostname or IP literal, without IPv6 brackets.
    pub host: String,
    pub port: u16,
    /// Set by a TLS scheme or forced on by the caller.
    pub use_tls: bool,
}

impl MqttEndpoint {
    /// Connection options for this broker: 60 s keep-alive, clean start,
    /// optional username/password, and the transport picked by `tls`.
    pub fn options(
        &self,
        client_id: &str,
        credentials: Option<(&str, &str)>,
        tls: &TlsMaterials,
    ) -> Result<MqttOptions> {
        let mut options = MqttOptions::new(client_id, &self.host, self.port);
        options.set_keep_alive(KEEP_ALIVE).set_clean_start(true);
        if let Some((user, password)) = credentials {
            options.set_credentials(user, password);
        }
        options.set_transport(tls.build_transport(self)?);
        Ok(options)
    }
}

/// PEM material for TLS brokers.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    /// CA bundle to trust. `None` means the platform roots.
    pub ca: Option<Vec<u8>>,
    /// Client certificate and key, always supplied as a pair.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read MQTT {} '{}'", what, path.display()))
}

impl TlsMaterials {
    /// Read the CA and client pair from disk. A certificate without its key,
    /// or a key without its certificate, is rejected before any file is read.
    pub fn load(
        ca_path: Option<&Path>,
        client_cert_path: Option<&Path>,
        client_key_path: Option<&Path>,
    ) -> Result<Self> {
        let pair = match (client_cert_path, client_key_path) {
            (Some(cert), Some(key)) => Some((cert, key)),
            (None, None) => None,
            (Some(_), None) => return Err(anyhow!("MQTT client certificate provided without key")),
            (None, Some(_)) => return Err(anyhow!("MQTT client key provided without certificate")),
        };

        let ca = match ca_path {
            Some(path) => Some(read_pem(path, "TLS CA")?),
            None => None,
        };
        let client_auth = match pair {
            Some((cert, key)) => Some((read_pem(cert, "client cert")?, read_pem(key, "client key")?)),
            None => None,
        };
        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }

    /// Plain TCP for non-TLS endpoints, rustls otherwise.
    ///
    /// Certificate files on a plain endpoint are a configuration mistake and
    /// fail loudly rather than being ignored. Client auth needs an explicit CA.
    pub fn build_transport(&self, endpoint: &MqttEndpoint) -> Result<Transport> {
        match (endpoint.use_tls, &self.ca) {
            (false, _) if self.is_configured() => Err(anyhow!(
                "MQTT TLS material provided but TLS is disabled (use mqtts:// or --mqtt-use-tls)"
            )),
            (false, _) => Ok(Transport::tcp()),
            (true, Some(ca)) => Ok(Transport::tls(ca.clone(), self.client_auth.clone(), None)),
            (true, None) if self.client_auth.is_some() => Err(anyhow!(
                "MQTT TLS CA certificate is required when using client certificates"
            )),
            (true, None) => Ok(Transport::tls_with_default_config()),
        }
    }
}

/// Parse `host:port`, `[v6]:port`, or a `mqtt://`, `tcp://`, `mqtts://`,
/// `ssl://` URL. `tls_override` turns TLS on for schemeless addresses too.
pub fn parse_mqtt_endpoint(addr: &str, tls_override: bool) -> Result<MqttEndpoint> {
    let trimmed = addr.trim();
    let (scheme_tls, authority) = match trimmed.split_once("://") {
        None => (false, trimmed),
        Some(("mqtt" | "tcp", rest)) => (false, rest),
        Some(("mqtts" | "ssl", rest)) => (true, rest),
        Some((other, _)) => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
    };

    let (host, port) = split_host_port(authority)
        .with_context(|| format!("invalid MQTT broker address {}", addr))?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    Ok(MqttEndpoint {
        host: host.to_string(),
        port,
        use_tls: tls_override || scheme_tls,
    })
}

// The port is mandatory; the bridge never guesses 1883 vs 8883.
fn split_host_port(authority: &str) -> Result<(&str, u16)> {
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| anyhow!("unclosed '[' in IPv6 host"))?;
        (host, tail.strip_prefix(':').unwrap_or_default())
    } else {
        authority.rsplit_once(':').unwrap_or((authority, ""))
    };
    if port.is_empty() {
        return Err(anyhow!("missing port"));
    }
    let port = port
        .parse::<u16>()
        .with_context(|| format!("bad port '{}'", port))?;
    Ok((host, port))
}

/// Only loopback brokers are accepted unless the operator opts out.
pub fn validate_loopback_addr(endpoint: &MqttEndpoint, original: &str) -> Result<()> {
    let loopback = endpoint.host == "localhost"
        || endpoint
            .host
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback());
    if loopback {
        return Ok(());
    }
    Err(anyhow!(
        "MQTT broker must be loopback: {} (use --allow-remote-mqtt to override)",
        original
    ))
}
