use crate::client::{ClientError, DirectoryEntry, ScannerClient, parse_unix_listing};
use crate::config::ConnectionConfig;

use suppaftp::FtpStream;
use tracing::{debug, warn};

/// Legacy plaintext binding to the scanner's image store.
///
/// The server reports listings as UNIX `ls` lines with minute-resolution
/// timestamps, so recency ordering is synthesized (see
/// [`parse_unix_listing`]).
pub struct FtpClient {
    hostname: String,
    port: u16,
    username: String,
    password: String,
    base_dir: String,
    ftp: Option<FtpStream>,
}

impl FtpClient {
    /// Build a client and attempt the initial connection. A refused
    /// connection leaves the client disconnected rather than failing, so
    /// the pipeline can come up before the scanner does; every operation
    /// retries through [`ScannerClient::reconnect`].
    pub fn new(config: &ConnectionConfig) -> Self {
        let mut client = Self {
            hostname: config.hostname.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            base_dir: config.base_dir.clone(),
            ftp: None,
        };
        if let Err(err) = client.connect() {
            warn!(error = %err, "could not connect to FTP server");
        }
        client
    }

    pub fn is_connected(&self) -> bool {
        self.ftp.is_some()
    }

    fn connect(&mut self) -> Result<(), ClientError> {
        let mut stream = FtpStream::connect((self.hostname.as_str(), self.port))?;
        stream.login(&self.username, &self.password)?;
        self.ftp = Some(stream);
        Ok(())
    }
}

impl ScannerClient for FtpClient {
    fn reconnect(&mut self) -> Result<(), ClientError> {
        // NOOP probes whether the control session timed out server-side.
        let alive = self.ftp.as_mut().is_some_and(|s| s.noop().is_ok());
        if alive {
            return Ok(());
        }
        debug!("FTP session not alive, connecting");
        self.connect()
    }

    fn list_dir(&mut self, path: &str) -> Result<Vec<DirectoryEntry>, ClientError> {
        self.reconnect()?;
        let stream = self.ftp.as_mut().ok_or(ClientError::Disconnected)?;
        let lines = stream.list(Some(path))?;
        Ok(parse_unix_listing(&lines))
    }

    fn retrieve_file(&mut self, path: &str) -> Result<Vec<u8>, ClientError> {
        self.reconnect()?;
        let stream = self.ftp.as_mut().ok_or(ClientError::Disconnected)?;
        Ok(stream.retr_as_buffer(path)?.into_inner())
    }

    fn base_dir(&self) -> &str {
        &self.base_dir
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.ftp.take() {
            let _ = stream.quit();
        }
    }
}

impl Drop for FtpClient {
    fn drop(&mut self) {
        self.close();
    }
}
