//! CDR destinations: a TCP collector or a rotating file.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use omnipcx_protocol::CdrRecord;

use super::{Link, TcpLink};

/// Where call detail records are delivered.
#[allow(async_fn_in_trait)]
pub trait CdrSink {
    async fn connect(&mut self) -> io::Result<()>;

    /// Bytes written for one record.
    fn serialize_cdr(&self, record: &CdrRecord) -> Bytes {
        record.serialize()
    }

    async fn send_cdr(&mut self, record: &CdrRecord) -> io::Result<()>;

    /// Publish accumulated output where that applies. Called once per loop
    /// iteration, so it must be cheap when there is nothing to do.
    async fn rotate(&mut self) -> io::Result<()>;

    async fn close(&mut self);
}

/// CDR collector reached over TCP.
#[derive(Debug)]
pub struct CdrCollector {
    link: TcpLink,
}

impl CdrCollector {
    pub fn new(link: TcpLink) -> Self {
        Self { link }
    }
}

impl CdrSink for CdrCollector {
    async fn connect(&mut self) -> io::Result<()> {
        self.link.connect().await
    }

    async fn send_cdr(&mut self, record: &CdrRecord) -> io::Result<()> {
        let line = self.serialize_cdr(record);
        self.link.write_bytes(&line).await
    }

    async fn rotate(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn close(&mut self) {
        self.link.close().await
    }
}

/// CDRs appended to `<path>` and published as `<path>.1` once the consumer
/// has picked up the previous batch.
///
/// A consumer takes ownership of `<path>.1` by moving or deleting it; the
/// next rotation then publishes whatever accumulated in `<path>`.
#[derive(Debug)]
pub struct CdrFile {
    temp_path: PathBuf,
    published_path: PathBuf,
}

impl CdrFile {
    /// Create the sink, creating the parent directory when missing.
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let temp_path = path.into();
        if let Some(parent) = temp_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                warn!("Directory {:?} doesn't exist. Creating it", parent);
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut published_name = temp_path.clone().into_os_string();
        published_name.push(".1");

        Ok(Self {
            temp_path,
            published_path: PathBuf::from(published_name),
        })
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn published_path(&self) -> &Path {
        &self.published_path
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

impl CdrSink for CdrFile {
    async fn connect(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn send_cdr(&mut self, record: &CdrRecord) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.temp_path)
            .await?;
        file.write_all(&self.serialize_cdr(record)).await?;
        file.flush().await
    }

    async fn rotate(&mut self) -> io::Result<()> {
        if is_file(&self.published_path).await || !is_file(&self.temp_path).await {
            return Ok(());
        }
        info!(
            "Publishing CDR file {:?} as {:?}",
            self.temp_path, self.published_path
        );
        fs::rename(&self.temp_path, &self.published_path).await
    }

    async fn close(&mut self) {
        debug!("CDR file sink {:?} closed", self.temp_path);
    }
}

/// The configured CDR destination.
#[derive(Debug)]
pub enum CdrLink {
    Collector(CdrCollector),
    File(CdrFile),
}

impl CdrSink for CdrLink {
    async fn connect(&mut self) -> io::Result<()> {
        match self {
            CdrLink::Collector(sink) => sink.connect().await,
            CdrLink::File(sink) => sink.connect().await,
        }
    }

    async fn send_cdr(&mut self, record: &CdrRecord) -> io::Result<()> {
        match self {
            CdrLink::Collector(sink) => sink.send_cdr(record).await,
            CdrLink::File(sink) => sink.send_cdr(record).await,
        }
    }

    async fn rotate(&mut self) -> io::Result<()> {
        match self {
            CdrLink::Collector(sink) => sink.rotate().await,
            CdrLink::File(sink) => sink.rotate().await,
        }
    }

    async fn close(&mut self) {
        match self {
            CdrLink::Collector(sink) => sink.close().await,
            CdrLink::File(sink) => sink.close().await,
        }
    }
}
