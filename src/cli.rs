use arch_transfer::config::{
    ArchiveType, HostKeyPolicy, RemoteConfig, TransferOptions, DEFAULT_BUFFER_SIZE,
    ENV_SFTP_PASSWORD, ENV_SFTP_USERNAME,
};
use arch_transfer::{CompressionMethod, Result};
use clap::builder::NonEmptyStringValueParser;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

const ABOUT: &str = "Transfer files and directories as archive.";
const LONG_ABOUT: &str = "Transfer files and directories as a zip archive to a local file or \
                          a remote SFTP server without creating an intermediate file.";

#[derive(Parser, Debug)]
#[command(name = "arch-transfer", version, about = ABOUT, long_about = LONG_ABOUT)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write the archive to a new local file.
    Local(ArchiveArgs),

    /// Write the archive to a new file on an SFTP server.
    #[command(alias = "remote")]
    Sftp(SftpArgs),
}

#[derive(Args, Debug)]
pub struct ArchiveArgs {
    /// Source directory or file to archive.
    #[arg(short, long, value_parser = NonEmptyStringValueParser::new())]
    pub source: String,

    /// Destination archive file. Must not exist yet.
    #[arg(short, long, value_parser = NonEmptyStringValueParser::new())]
    pub destination: String,

    /// Archive type.
    #[arg(short = 't', long = "type", default_value_t = ArchiveType::Zip)]
    pub archive_type: ArchiveType,

    /// Compression method for file entries (deflate or stored).
    #[arg(long, default_value = "deflate")]
    pub compression: CompressionMethod,

    /// Compression level (0-9 for deflate).
    #[arg(long, default_value_t = 6)]
    pub level: u32,

    /// `[ADVANCED]` Size in bytes of the write buffer in front of the destination.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE, hide = true)]
    pub buffer_size: usize,
}

impl ArchiveArgs {
    pub fn source_path(&self) -> PathBuf {
        PathBuf::from(&self.source)
    }

    pub fn options(&self) -> Result<TransferOptions> {
        let options = TransferOptions {
            archive_type: self.archive_type,
            compression_method: self.compression,
            compression_level: self.level,
            buffer_size: self.buffer_size,
        };
        options.validate()?;
        Ok(options)
    }
}

#[derive(Args, Debug)]
pub struct SftpArgs {
    #[command(flatten)]
    pub archive: ArchiveArgs,

    /// SFTP server address e.g. IP[:PORT].
    #[arg(short, long, value_parser = NonEmptyStringValueParser::new())]
    pub address: String,

    /// SFTP username.
    #[arg(short, long, env = ENV_SFTP_USERNAME, value_parser = NonEmptyStringValueParser::new())]
    pub username: String,

    /// SFTP password.
    #[arg(short, long, env = ENV_SFTP_PASSWORD, hide_env_values = true,
          value_parser = NonEmptyStringValueParser::new())]
    pub password: String,

    /// known_hosts file used to verify the server. [default: ~/.ssh/known_hosts]
    #[arg(long, value_name = "PATH")]
    pub known_hosts: Option<PathBuf>,

    /// Skip host key verification and trust whatever server answers.
    #[arg(long, conflicts_with = "known_hosts")]
    pub insecure_accept_any_host_key: bool,

    /// Seconds allowed for dialing and the SSH handshake.
    #[arg(long, default_value_t = 30, value_name = "SECONDS")]
    pub connect_timeout: u64,

    /// Seconds allowed for each SFTP operation once connected.
    #[arg(long, default_value_t = 30, value_name = "SECONDS")]
    pub io_timeout: u64,
}

impl SftpArgs {
    pub fn remote_config(&self) -> Result<RemoteConfig> {
        let policy = if self.insecure_accept_any_host_key {
            HostKeyPolicy::AcceptAny
        } else if let Some(path) = &self.known_hosts {
            HostKeyPolicy::KnownHosts(path.clone())
        } else {
            HostKeyPolicy::default_known_hosts()?
        };

        let mut config = RemoteConfig::new(&self.address, &self.username, &self.password, policy);
        config.connect_timeout = Duration::from_secs(self.connect_timeout);
        config.io_timeout = Duration::from_secs(self.io_timeout);
        config.validate()?;
        Ok(config)
    }
}
