//! Transfer and connection settings

use crate::error::{Result, TransferError};
use crate::writer::{CompressionMethod, DEFAULT_COMPRESSION_LEVEL};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Output buffer between the archive writer and the destination (1 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Bound on TCP dial plus SSH handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on each blocking SFTP operation once connected
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_SFTP_PORT: u16 = 22;

pub const ENV_SFTP_USERNAME: &str = "AT_SFTP_USERNAME";
pub const ENV_SFTP_PASSWORD: &str = "AT_SFTP_PASSWORD";

/// Archive container to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveType {
    #[default]
    Zip,
}

impl FromStr for ArchiveType {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "zip" => Ok(ArchiveType::Zip),
            other => Err(TransferError::Config(format!(
                "invalid archive type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveType::Zip => f.write_str("zip"),
        }
    }
}

/// Settings for one archive transfer
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub archive_type: ArchiveType,
    pub compression_method: CompressionMethod,
    pub compression_level: u32,
    /// Capacity of the write buffer in front of the destination
    pub buffer_size: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            archive_type: ArchiveType::Zip,
            compression_method: CompressionMethod::Deflate,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl TransferOptions {
    /// Reject combinations no archive can be built from
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(TransferError::Config(
                "buffer size must be greater than zero".to_string(),
            ));
        }
        match self.compression_method {
            CompressionMethod::Deflate if self.compression_level > 9 => {
                Err(TransferError::Config(format!(
                    "deflate level must be 0-9, got {}",
                    self.compression_level
                )))
            }
            #[cfg(feature = "zstd-support")]
            CompressionMethod::Zstd if !(1..=21).contains(&self.compression_level) => {
                Err(TransferError::Config(format!(
                    "zstd level must be 1-21, got {}",
                    self.compression_level
                )))
            }
            _ => Ok(()),
        }
    }
}

/// How the server's host key is checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Require a matching entry in an OpenSSH `known_hosts` file
    KnownHosts(PathBuf),
    /// Accept any host key. This trusts the network path to the server.
    AcceptAny,
}

impl HostKeyPolicy {
    /// `~/.ssh/known_hosts`
    pub fn default_known_hosts() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            TransferError::Config("cannot determine home directory for known_hosts".to_string())
        })?;
        Ok(HostKeyPolicy::KnownHosts(
            home.join(".ssh").join("known_hosts"),
        ))
    }
}

/// Everything needed to open an authenticated SFTP session
#[derive(Clone)]
pub struct RemoteConfig {
    /// `host`, `host:port`, `[v6addr]` or `[v6addr]:port`
    pub address: String,
    pub username: String,
    pub password: String,
    pub host_key_policy: HostKeyPolicy,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl RemoteConfig {
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        host_key_policy: HostKeyPolicy,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password: password.into(),
            host_key_policy,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(TransferError::Config(format!(
                "SFTP username is required (flag or {})",
                ENV_SFTP_USERNAME
            )));
        }
        if self.password.is_empty() {
            return Err(TransferError::Config(format!(
                "SFTP password is required (flag or {})",
                ENV_SFTP_PASSWORD
            )));
        }
        parse_address(&self.address).map(|_| ())
    }
}

// Keep the password out of logs
impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host_key_policy", &self.host_key_policy)
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

/// Split a server address into host and port, defaulting the port to 22.
///
/// Accepts `host`, `host:port`, `[v6]`, `[v6]:port` and a bare IPv6 literal.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    let invalid = |why: &str| {
        TransferError::Config(format!("invalid or unsupported address {:?}: {}", address, why))
    };

    let address = address.trim();
    if address.is_empty() {
        return Err(invalid("empty"));
    }

    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| invalid("missing ']'"))?;
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port = match tail {
            "" => DEFAULT_SFTP_PORT,
            _ => {
                let port = tail
                    .strip_prefix(':')
                    .ok_or_else(|| invalid("unexpected text after ']'"))?;
                port.parse().map_err(|_| invalid("bad port"))?
            }
        };
        return Ok((host.to_string(), port));
    }

    match address.matches(':').count() {
        0 => Ok((address.to_string(), DEFAULT_SFTP_PORT)),
        1 => {
            let (host, port) = address.split_once(':').ok_or_else(|| invalid("bad port"))?;
            if host.is_empty() {
                return Err(invalid("empty host"));
            }
            let port = port.parse().map_err(|_| invalid("bad port"))?;
            Ok((host.to_string(), port))
        }
        // bare IPv6 literal
        _ => Ok((address.to_string(), DEFAULT_SFTP_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_zip_archive_type() {
        assert_eq!("zip".parse::<ArchiveType>().unwrap(), ArchiveType::Zip);
        let err = "tar.gz".parse::<ArchiveType>().unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));
        assert!(err.to_string().contains("tar.gz"));
    }

    #[test]
    fn addresses() {
        assert_eq!(parse_address("example.com").unwrap(), ("example.com".into(), 22));
        assert_eq!(parse_address("10.0.0.5:2222").unwrap(), ("10.0.0.5".into(), 2222));
        assert_eq!(parse_address("[::1]").unwrap(), ("::1".into(), 22));
        assert_eq!(parse_address("[fe80::1]:2200").unwrap(), ("fe80::1".into(), 2200));
        assert_eq!(parse_address("fe80::1").unwrap(), ("fe80::1".into(), 22));

        assert!(parse_address("").is_err());
        assert!(parse_address("host:").is_err());
        assert!(parse_address("host:99999").is_err());
        assert!(parse_address(":22").is_err());
        assert!(parse_address("[::1").is_err());
        assert!(parse_address("[::1]x").is_err());
    }

    #[test]
    fn option_validation() {
        assert!(TransferOptions::default().validate().is_ok());

        let zero_buffer = TransferOptions {
            buffer_size: 0,
            ..Default::default()
        };
        assert!(zero_buffer.validate().is_err());

        let bad_level = TransferOptions {
            compression_level: 12,
            ..Default::default()
        };
        assert!(bad_level.validate().is_err());
    }

    #[test]
    fn remote_config_requires_credentials_and_hides_password() {
        let mut cfg = RemoteConfig::new("host", "", "secret", HostKeyPolicy::AcceptAny);
        assert!(cfg.validate().is_err());
        cfg.username = "alice".into();
        assert!(cfg.validate().is_ok());
        assert!(!format!("{:?}", cfg).contains("secret"));
    }
}
