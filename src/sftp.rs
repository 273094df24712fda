use crate::client::{ClientError, DirectoryEntry, ScannerClient, is_junk_name};
use crate::config::ConnectionConfig;

use chrono::DateTime;
use ssh2::{Session, Sftp};
use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Secured binding to the scanner's image store over SFTP.
///
/// Unlike the FTP server, SFTP reports a real per-entry modification time,
/// so recency ordering needs no synthesis.
pub struct SftpClient {
    hostname: String,
    port: u16,
    username: String,
    password: String,
    private_key: Option<PathBuf>,
    base_dir: String,
    sftp: Option<Sftp>,
    session: Option<Session>,
}

impl SftpClient {
    /// Build a client and attempt the initial connection; a refused
    /// connection leaves the client disconnected, same as [`FtpClient`].
    ///
    /// [`FtpClient`]: crate::ftp::FtpClient
    pub fn new(config: &ConnectionConfig) -> Self {
        let mut client = Self {
            hostname: config.hostname.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            private_key: config.private_key.clone(),
            base_dir: config.base_dir.clone(),
            sftp: None,
            session: None,
        };
        if let Err(err) = client.connect() {
            warn!(error = %err, "could not connect to SFTP server");
        }
        client
    }

    pub fn is_connected(&self) -> bool {
        self.sftp.is_some()
    }

    fn connect(&mut self) -> Result<(), ClientError> {
        let tcp = TcpStream::connect((self.hostname.as_str(), self.port))?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        match &self.private_key {
            Some(key) => session.userauth_pubkey_file(&self.username, None, key, None)?,
            None => session.userauth_password(&self.username, &self.password)?,
        }
        self.sftp = Some(session.sftp()?);
        self.session = Some(session);
        Ok(())
    }
}

impl ScannerClient for SftpClient {
    fn reconnect(&mut self) -> Result<(), ClientError> {
        // A cheap stat of the store root probes whether the session is
        // still usable.
        let alive = self
            .sftp
            .as_ref()
            .is_some_and(|sftp| sftp.stat(Path::new(&self.base_dir)).is_ok());
        if alive {
            return Ok(());
        }
        debug!("SFTP session not alive, connecting");
        self.connect()
    }

    fn list_dir(&mut self, path: &str) -> Result<Vec<DirectoryEntry>, ClientError> {
        self.reconnect()?;
        let sftp = self.sftp.as_ref().ok_or(ClientError::Disconnected)?;
        let mut entries: Vec<DirectoryEntry> = sftp
            .readdir(Path::new(path))?
            .into_iter()
            .filter_map(|(entry_path, stat)| {
                let name = entry_path.file_name()?.to_str()?.to_string();
                if is_junk_name(&name) {
                    return None;
                }
                let recency = DateTime::from_timestamp(stat.mtime.unwrap_or(0) as i64, 0)?;
                Some(DirectoryEntry {
                    recency: recency.naive_utc(),
                    size: stat.size.unwrap_or(0),
                    name,
                })
            })
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn retrieve_file(&mut self, path: &str) -> Result<Vec<u8>, ClientError> {
        self.reconnect()?;
        let sftp = self.sftp.as_ref().ok_or(ClientError::Disconnected)?;
        let mut file = sftp.open(Path::new(path))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn base_dir(&self) -> &str {
        &self.base_dir
    }

    fn close(&mut self) {
        self.sftp = None;
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "shutting down", None);
        }
    }
}

impl Drop for SftpClient {
    fn drop(&mut self) {
        self.close();
    }
}
