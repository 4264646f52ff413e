//! A store that keeps its dataset in memory and persists a compressed
//! snapshot of it to disk after every successful write.
use super::memory::MemoryStore;
use super::{Dataset, Reader, StoreError, Writer};
use crate::types::{
    Application, Blockchain, LoadBalancer, Redirect, UpdateApplication, UpdateFirstDateSurpassed,
    UpdateLoadBalancer,
};
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Snapshot encoding: the whole dataset as bincode inside a zstd frame.
struct SnapshotCodec {
    level: i32,
    config: bincode::config::Configuration,
}

impl SnapshotCodec {
    fn new(level: i32) -> Self {
        SnapshotCodec {
            level,
            config: bincode::config::standard(),
        }
    }

    fn encode<W: Write>(&self, writer: W, dataset: &Dataset) -> Result<usize, StoreError> {
        let mut encoder = zstd::stream::write::Encoder::new(writer, self.level)?;
        let size = bincode::serde::encode_into_std_write(dataset, &mut encoder, self.config)?;
        encoder.finish()?.flush()?;
        Ok(size)
    }

    fn decode<R: Read>(&self, reader: R) -> Result<Dataset, StoreError> {
        let mut decoder = zstd::stream::read::Decoder::new(reader)?;
        Ok(bincode::serde::decode_from_std_read(&mut decoder, self.config)?)
    }
}

pub struct FilesystemStore {
    path: PathBuf,
    codec: SnapshotCodec,
    inner: MemoryStore,
    // Serializes snapshot writes so an older dataset never overwrites a newer one
    flush_lock: Mutex<()>,
}

impl FilesystemStore {
    /// Opens the snapshot at `base_dir/filename`. A missing file starts an
    /// empty dataset.
    pub fn open(base_dir: &str, filename: &str) -> Result<Self, StoreError> {
        let path = Path::new(base_dir).join(filename);
        let codec = SnapshotCodec::new(1);

        let dataset = match File::open(&path) {
            Ok(file) => codec.decode(io::BufReader::new(file))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Dataset::default(),
            Err(err) => return Err(err.into()),
        };

        Ok(FilesystemStore {
            path,
            codec,
            inner: MemoryStore::new(dataset),
            flush_lock: Mutex::new(()),
        })
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let _guard = self.flush_lock.lock().await;
        let dataset = self.inner.snapshot().await;

        // Write next to the target and rename, so a crash never leaves a torn snapshot
        let tmp_path = self.path.with_extension("tmp");
        let file = File::create(&tmp_path)?;
        let size = self.codec.encode(io::BufWriter::new(file), &dataset)?;
        fs::rename(&tmp_path, &self.path)?;

        tracing::debug!(path = ?self.path, bytes = size, "Stored dataset snapshot");
        Ok(())
    }
}

#[async_trait]
impl Reader for FilesystemStore {
    async fn read_dataset(&self) -> Result<Dataset, StoreError> {
        self.inner.read_dataset().await
    }
}

#[async_trait]
impl Writer for FilesystemStore {
    async fn write_application(&self, app: Application) -> Result<Application, StoreError> {
        let app = self.inner.write_application(app).await?;
        self.flush().await?;
        Ok(app)
    }

    async fn update_application(
        &self,
        id: &str,
        update: &UpdateApplication,
    ) -> Result<(), StoreError> {
        self.inner.update_application(id, update).await?;
        self.flush().await
    }

    async fn update_first_date_surpassed(
        &self,
        update: &UpdateFirstDateSurpassed,
    ) -> Result<(), StoreError> {
        self.inner.update_first_date_surpassed(update).await?;
        self.flush().await
    }

    async fn remove_application(&self, id: &str) -> Result<(), StoreError> {
        self.inner.remove_application(id).await?;
        self.flush().await
    }

    async fn write_load_balancer(&self, lb: LoadBalancer) -> Result<LoadBalancer, StoreError> {
        let lb = self.inner.write_load_balancer(lb).await?;
        self.flush().await?;
        Ok(lb)
    }

    async fn update_load_balancer(
        &self,
        id: &str,
        update: &UpdateLoadBalancer,
    ) -> Result<(), StoreError> {
        self.inner.update_load_balancer(id, update).await?;
        self.flush().await
    }

    async fn remove_load_balancer(&self, id: &str) -> Result<(), StoreError> {
        self.inner.remove_load_balancer(id).await?;
        self.flush().await
    }

    async fn write_blockchain(&self, blockchain: Blockchain) -> Result<Blockchain, StoreError> {
        let blockchain = self.inner.write_blockchain(blockchain).await?;
        self.flush().await?;
        Ok(blockchain)
    }

    async fn activate_blockchain(&self, id: &str, active: bool) -> Result<(), StoreError> {
        self.inner.activate_blockchain(id, active).await?;
        self.flush().await
    }

    async fn write_redirect(&self, redirect: Redirect) -> Result<Redirect, StoreError> {
        let redirect = self.inner.write_redirect(redirect).await?;
        self.flush().await?;
        Ok(redirect)
    }
}
