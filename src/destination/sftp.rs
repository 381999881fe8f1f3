//! SFTP destination over an SSH session.
//!
//! [`SftpClient::connect`] performs the whole session setup before any
//! archive work starts:
//!
//! 1. resolve and dial the server (bounded by `connect_timeout`)
//! 2. SSH handshake (same bound)
//! 3. host key check according to [`HostKeyPolicy`]
//! 4. password authentication
//! 5. start the `sftp` subsystem
//!
//! After that every blocking SFTP call is bounded by `io_timeout`, so a stalled
//! server fails the transfer instead of hanging it.
//!
//! A cancellation token handed to [`SftpClient::set_cancellation`] is checked
//! before every write to a remote file, so a cancelled transfer stops issuing
//! writes at once instead of draining its buffer to the server.
//!
//! Remote files are opened with `WRITE | CREAT | EXCL | TRUNC`. SFTPv3 servers
//! usually answer an exclusive-create conflict with a generic failure, so a
//! failed open is followed by a `stat` to tell "already exists" apart from
//! other errors.

use super::{Destination, DestinationFactory};
use crate::config::{parse_address, HostKeyPolicy, RemoteConfig};
use crate::error::{Result, TransferError};
use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, OpenFlags, OpenType, Session, Sftp};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// SSH_FX_FILE_ALREADY_EXISTS (SFTPv5+)
const SFTP_FILE_ALREADY_EXISTS: i32 = 11;

/// Authenticated SSH session with an open SFTP channel
pub struct SftpClient {
    session: Session,
    sftp: Sftp,
    address: String,
    cancel: Option<CancellationToken>,
}

/// A file created on the server
pub struct SftpFile {
    file: ssh2::File,
    path: String,
    cancel: Option<CancellationToken>,
}

impl SftpClient {
    /// Connect, verify the host, authenticate and start SFTP.
    ///
    /// Every failure up to a usable SFTP channel is reported as
    /// [`TransferError::Connect`].
    pub fn connect(config: &RemoteConfig) -> Result<Self> {
        config.validate()?;
        let (host, port) = parse_address(&config.address)?;
        let address = if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        let connect_err = |message: String| TransferError::Connect {
            address: address.clone(),
            message,
        };

        let addrs: Vec<SocketAddr> = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| connect_err(format!("failed to resolve host: {}", e)))?
            .collect();
        let tcp = dial(&addrs, config.connect_timeout)
            .map_err(|e| connect_err(format!("failed to dial for ssh: {}", e)))?;

        let mut session =
            Session::new().map_err(|e| connect_err(format!("failed to create session: {}", e)))?;
        session.set_timeout(timeout_millis(config.connect_timeout));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| connect_err(format!("failed to create ssh connection: {}", e)))?;

        verify_host_key(&session, &host, port, &config.host_key_policy)
            .map_err(|m| connect_err(m))?;

        session
            .userauth_password(&config.username, &config.password)
            .map_err(|e| connect_err(format!("authentication failed: {}", e)))?;
        if !session.authenticated() {
            return Err(connect_err("authentication failed".to_string()));
        }

        let sftp = session
            .sftp()
            .map_err(|e| connect_err(format!("failed to start sftp subsystem: {}", e)))?;
        session.set_timeout(timeout_millis(config.io_timeout));

        tracing::debug!(%address, user = %config.username, "sftp session established");
        Ok(Self {
            session,
            sftp,
            address,
            cancel: None,
        })
    }

    /// Server address as `host:port`
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Fail writes to files created from now on once `cancel` fires
    pub fn set_cancellation(&mut self, cancel: CancellationToken) {
        self.cancel = Some(cancel);
    }

    /// Create `path` on the server; fails if it already exists
    pub fn create_file(&self, path: &str) -> Result<SftpFile> {
        let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::EXCLUSIVE | OpenFlags::TRUNCATE;
        let remote = Path::new(path);
        match self.sftp.open_mode(remote, flags, 0o644, OpenType::File) {
            Ok(file) => {
                tracing::debug!(path, address = %self.address, "created remote destination");
                Ok(SftpFile {
                    file,
                    path: path.to_string(),
                    cancel: self.cancel.clone(),
                })
            }
            Err(e) if is_already_exists(&e) || self.sftp.stat(remote).is_ok() => {
                Err(TransferError::AlreadyExists(path.to_string()))
            }
            Err(e) => Err(TransferError::Ssh(e)),
        }
    }

    /// Shut down the SFTP channel and disconnect the SSH session
    pub fn close(self) -> Result<()> {
        drop(self.sftp);
        self.session
            .disconnect(None, "transfer finished", None)
            .map_err(TransferError::Ssh)
    }
}

impl DestinationFactory for SftpClient {
    fn create_exclusive(&mut self, path: &str) -> Result<Box<dyn Destination>> {
        Ok(Box::new(self.create_file(path)?))
    }
}

impl Write for SftpFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ensure_not_cancelled(self.cancel.as_ref())?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        ensure_not_cancelled(self.cancel.as_ref())?;
        self.file.flush()
    }
}

impl Destination for SftpFile {
    fn close(mut self: Box<Self>) -> Result<()> {
        tracing::trace!(path = %self.path, "closing remote destination");
        self.file
            .close()
            .map_err(|e| TransferError::Close(io::Error::from(e)))
    }
}

fn ensure_not_cancelled(cancel: Option<&CancellationToken>) -> io::Result<()> {
    match cancel {
        Some(token) if token.is_cancelled() => {
            Err(io::Error::new(io::ErrorKind::Other, "transfer cancelled"))
        }
        _ => Ok(()),
    }
}

fn is_already_exists(e: &ssh2::Error) -> bool {
    matches!(e.code(), ErrorCode::SFTP(SFTP_FILE_ALREADY_EXISTS))
}

fn timeout_millis(timeout: Duration) -> u32 {
    timeout.as_millis().min(u32::MAX as u128) as u32
}

fn dial(addrs: &[SocketAddr], timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
    for addr in addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

fn verify_host_key(
    session: &Session,
    host: &str,
    port: u16,
    policy: &HostKeyPolicy,
) -> std::result::Result<(), String> {
    let path = match policy {
        HostKeyPolicy::AcceptAny => {
            tracing::warn!(
                host,
                port,
                "host key verification disabled: accepting any server key"
            );
            return Ok(());
        }
        HostKeyPolicy::KnownHosts(path) => path,
    };

    let (key, _) = session
        .host_key()
        .ok_or_else(|| "server sent no host key".to_string())?;
    let mut known = session
        .known_hosts()
        .map_err(|e| format!("failed to init known hosts: {}", e))?;
    known
        .read_file(path, KnownHostFileKind::OpenSSH)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

    match known.check_port(host, port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(format!(
            "host key for {} does not match {}",
            host,
            path.display()
        )),
        CheckResult::NotFound => Err(format!("host {} not found in {}", host, path.display())),
        CheckResult::Failure => Err("host key check failed".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn config(address: String) -> RemoteConfig {
        let mut cfg = RemoteConfig::new(address, "user", "pass", HostKeyPolicy::AcceptAny);
        cfg.connect_timeout = Duration::from_secs(1);
        cfg
    }

    #[test]
    fn already_exists_status_code() {
        let exists = ssh2::Error::new(ErrorCode::SFTP(SFTP_FILE_ALREADY_EXISTS), "exists");
        let failure = ssh2::Error::new(ErrorCode::SFTP(4), "failure");
        assert!(is_already_exists(&exists));
        assert!(!is_already_exists(&failure));
    }

    #[test]
    fn writes_stop_once_cancelled() {
        let token = CancellationToken::new();
        assert!(ensure_not_cancelled(None).is_ok());
        assert!(ensure_not_cancelled(Some(&token)).is_ok());

        token.cancel();
        let err = ensure_not_cancelled(Some(&token)).unwrap_err();
        // must not be Interrupted, which write_all would retry forever
        assert_ne!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[test]
    fn refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        match SftpClient::connect(&config(format!("127.0.0.1:{}", port))) {
            Err(TransferError::Connect { address, .. }) => {
                assert_eq!(address, format!("127.0.0.1:{}", port))
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("connected to a closed port"),
        }
    }

    #[test]
    fn non_ssh_server_fails_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
            }
        });

        let err = SftpClient::connect(&config(format!("127.0.0.1:{}", port)))
            .err()
            .expect("handshake with a non-ssh server succeeded");
        assert!(matches!(err, TransferError::Connect { .. }), "{}", err);
        server.join().unwrap();
    }

    #[test]
    fn missing_credentials_fail_before_dialing() {
        let mut cfg = config("127.0.0.1:1".to_string());
        cfg.password.clear();
        let err = SftpClient::connect(&cfg).err().unwrap();
        assert!(matches!(err, TransferError::Config(_)));
    }
}
