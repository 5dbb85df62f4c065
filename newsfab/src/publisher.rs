use crate::render::{ByteStream, StreamError};
use crate::types::PublishError;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

impl From<StreamError> for PublishError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Upstream(e) => PublishError::Upstream(e),
            StreamError::Incomplete => PublishError::Incomplete,
        }
    }
}

/// Writes rendered output to its destination.
///
/// With a destination path, output lands in a temp file next to it and is renamed
/// into place only once the whole stream arrived; readers of the path see either the
/// previous file or the new one. Without a destination, output goes to stdout as it
/// arrives.
#[derive(Debug, Clone)]
pub struct Publisher {
    destination: Option<PathBuf>,
}

impl Publisher {
    pub fn new(destination: Option<PathBuf>) -> Self {
        Self { destination }
    }

    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    /// Consumes `stream`, returning the number of bytes published.
    pub async fn publish(&self, stream: ByteStream) -> Result<u64, PublishError> {
        match &self.destination {
            Some(path) => write_atomic(stream, path).await,
            None => write_through(stream, tokio::io::stdout()).await,
        }
    }
}

/// Copies `stream` into `out` verbatim. No atomicity.
pub async fn write_through<W>(mut stream: ByteStream, mut out: W) -> Result<u64, PublishError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    loop {
        match stream.next_chunk().await {
            Ok(Some(chunk)) => {
                out.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            Ok(None) => break,
            Err(e) => {
                let _ = out.flush().await;
                return Err(e.into());
            }
        }
    }
    out.flush().await?;
    Ok(written)
}

/// Streams into a temp file beside `destination`, then renames it over `destination`.
///
/// Any failure before the rename drops the temp file, which deletes it.
pub async fn write_atomic(stream: ByteStream, destination: &Path) -> Result<u64, PublishError> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let temp = tempfile::Builder::new()
        .prefix(".newsfab-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    debug!("Writing output to {}", temp.path().display());

    let mut file = tokio::fs::File::from_std(temp.as_file().try_clone()?);
    let written = write_through(stream, &mut file).await?;
    file.sync_all().await?;
    drop(file);

    apply_permissions(temp.path(), destination).await?;
    temp.persist(destination)?;

    info!("Wrote output file: {} ({} bytes)", destination.display(), written);
    Ok(written)
}

// Temp files are created 0600; keep the mode of the file being replaced, or use
// 0644 for a new one.
#[cfg(unix)]
async fn apply_permissions(temp: &Path, destination: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = match tokio::fs::metadata(destination).await {
        Ok(meta) => meta.permissions().mode() & 0o7777,
        Err(_) => 0o644,
    };
    tokio::fs::set_permissions(temp, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn apply_permissions(_temp: &Path, _destination: &Path) -> std::io::Result<()> {
    Ok(())
}
