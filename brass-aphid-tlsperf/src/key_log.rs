use std::{
    fs::{File, OpenOptions},
    io::{LineWriter, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::error::Error;

/// One line of a `--keylog` file, parsed back to check what OpenSSL wrote.
///
/// https://nss-crypto.org/reference/security/nss/legacy/key_log_format/index.html
#[derive(Debug)]
pub struct NssLog {
    /// e.g. "CLIENT_HANDSHAKE_TRAFFIC_SECRET"
    pub label: String,
    pub client_random: Vec<u8>,
    pub secret: Vec<u8>,
}

impl NssLog {
    pub fn from_log_line(log_line: &str) -> anyhow::Result<Self> {
        let parts: Vec<&str> = log_line.split_whitespace().collect();
        if parts.len() != 3 {
            anyhow::bail!("unacceptable line {log_line}");
        }

        Ok(Self {
            label: parts[0].to_string(),
            client_random: hex::decode(parts[1])?,
            secret: hex::decode(parts[2])?,
        })
    }
}

/// Appends key log lines to a file.
///
/// The handle is cloned into the OpenSSL keylog callback, which may be invoked
/// by any session sharing the context.
#[derive(Debug, Clone)]
pub struct KeyLogFile {
    path: PathBuf,
    writer: Arc<Mutex<LineWriter<File>>>,
}

impl KeyLogFile {
    pub fn create(path: &Path) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::config_io(format!("unable to open key log {}", path.display()), e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Arc::new(Mutex::new(LineWriter::new(file))),
        })
    }

    /// Write failures are logged and otherwise ignored.
    pub fn append(&self, line: &str) {
        let mut writer = match self.writer.lock() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(writer, "{line}") {
            tracing::warn!("failed to write key log to {}: {e}", self.path.display());
        }
    }
}
