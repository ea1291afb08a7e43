//! Import and export of data container contents

use super::archive;
use crate::container::{builder, ContainerManager};
use crate::definition::Definition;
use crate::error::{BerthError, Result};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, SyncIoBridge};
use tracing::{debug, info, warn};

const PIPE_CAPACITY: usize = 64 * 1024;

fn is_broken_pipe(err: &BerthError) -> bool {
    matches!(err, BerthError::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe)
}

/// Moves files between host directories and data containers
#[derive(Clone)]
pub struct DataTransfer {
    manager: ContainerManager,
}

impl DataTransfer {
    pub fn new(manager: ContainerManager) -> Self {
        Self { manager }
    }

    /// Copy the host directory `src` to `dest` inside the data container of
    /// `def`, creating the data container if needed, then hand the copied
    /// tree to the container user.
    pub async fn import(&self, def: &Definition, src: &Path, dest: &str) -> Result<()> {
        let op = &def.operation;
        self.manager.ensure_data_container(def).await?;

        info!(
            "Importing {} into {}:{}",
            src.display(),
            op.data_container_name,
            dest
        );
        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        let source = src.to_path_buf();
        let prefix = dest.to_string();
        let packer = tokio::task::spawn_blocking(move || {
            // Dropping the bridge closes the pipe and ends the upload.
            archive::pack_dir(&source, &prefix, SyncIoBridge::new(writer)).map(drop)
        });

        let chunks = ReaderStream::new(reader)
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(BerthError::from));
        let upload = self
            .manager
            .runtime()
            .upload_archive(&op.data_container_name, "/", Box::pin(chunks));

        let (packed, uploaded) = tokio::join!(packer, upload);
        let packed =
            packed.map_err(|e| BerthError::Transfer(format!("archive task failed: {}", e)))?;
        match (packed, uploaded) {
            (Ok(()), uploaded) => uploaded?,
            // The upload went away first; its error is the cause.
            (Err(e), Err(upload)) if is_broken_pipe(&e) => return Err(upload),
            (Err(e), _) => return Err(e),
        }

        let settings = self.manager.settings();
        let mut chown = op.clone();
        chown.interactive = false;
        chown.args = vec![
            "chown".to_string(),
            "-R".to_string(),
            settings.container_user.clone(),
            dest.to_string(),
        ];
        let spec = builder::volumes_from_spec(&chown, settings, None);
        self.manager.run_data(&spec).await?;
        Ok(())
    }

    /// Copy `src` from the data container of `def` into the host directory
    /// `dest`.
    ///
    /// The download is unpacked into a temporary directory while it streams.
    /// The archive's top-level directory, named after the last component of
    /// `src`, is hoisted away before the contents move into `dest`. If the
    /// move fails the temporary directory is kept for inspection.
    pub async fn export(&self, def: &Definition, src: &str, dest: &Path) -> Result<()> {
        let op = &def.operation;
        if !self.manager.exists(&op.data_container_name).await? {
            return Err(BerthError::ContainerNotFound(op.data_container_name.clone()));
        }
        self.confirm_overwrite(dest)?;

        info!(
            "Exporting {}:{} to {}",
            op.data_container_name,
            src,
            dest.display()
        );
        let mut download = self
            .manager
            .runtime()
            .download_archive(&op.data_container_name, src)
            .await?;

        let temp = tempfile::tempdir()?;
        let (reader, mut writer) = tokio::io::duplex(PIPE_CAPACITY);

        let producer = tokio::spawn(async move {
            while let Some(chunk) = download.next().await {
                writer.write_all(&chunk?).await?;
            }
            writer.shutdown().await?;
            Ok::<_, BerthError>(())
        });

        let bridge = SyncIoBridge::new(reader);
        let target = temp.path().to_path_buf();
        let consumer = tokio::task::spawn_blocking(move || archive::unpack(bridge, &target));

        let (produced, consumed) = tokio::join!(producer, consumer);
        produced.map_err(|e| BerthError::Transfer(format!("download task failed: {}", e)))??;
        consumed.map_err(|e| BerthError::Transfer(format!("unpack task failed: {}", e)))??;

        if let Some(wrapper) = Path::new(src).file_name().and_then(|n| n.to_str()) {
            archive::hoist(temp.path(), wrapper)?;
        }

        if let Err(e) = archive::move_contents(temp.path(), dest) {
            let kept: PathBuf = temp.keep();
            warn!("Export incomplete; remaining files left in {}", kept.display());
            return Err(e);
        }
        debug!("Export to {} complete", dest.display());
        Ok(())
    }

    fn confirm_overwrite(&self, dest: &Path) -> Result<()> {
        let occupied = dest.is_dir()
            && std::fs::read_dir(dest)?.next().is_some();
        if !occupied || self.manager.settings().overwrite_approve {
            return Ok(());
        }

        let question = format!("{} is not empty. Overwrite files in it?", dest.display());
        if self.manager.confirm().confirm(&question)? {
            Ok(())
        } else {
            Err(BerthError::Declined(format!("exporting into {}", dest.display())))
        }
    }
}
