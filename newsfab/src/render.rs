use crate::aggregator::Snapshot;
use crate::traits::Renderer;
use crate::types::{RenderError, TemplateError};
use chrono::DateTime;
use minijinja::{AutoEscape, Environment};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error};

enum Frame {
    Chunk(Vec<u8>),
    End,
    Abort(RenderError),
}

/// Frames buffered between producer and consumer before writes block.
pub const STREAM_CAPACITY: usize = 16;

/// Rendered bytes in flight from a renderer to the publisher.
///
/// The producer must close the stream explicitly; a stream whose producer went
/// away without calling [`ByteSink::finish`] reads as incomplete.
pub struct ByteStream {
    rx: mpsc::Receiver<Frame>,
    done: bool,
}

/// Producing half of a [`ByteStream`].
///
/// Writes block while [`STREAM_CAPACITY`] frames are waiting, so a full sink must
/// only be written from a blocking thread.
pub struct ByteSink {
    tx: mpsc::Sender<Frame>,
}

#[derive(Debug)]
pub enum StreamError {
    Upstream(RenderError),
    Incomplete,
}

impl ByteStream {
    pub fn channel() -> (ByteSink, ByteStream) {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        (ByteSink { tx }, ByteStream { rx, done: false })
    }

    /// A complete stream holding `bytes`.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let (sink, stream) = Self::channel();
        // Two frames into an empty channel: never blocks, and the receiver is alive.
        let _ = sink.send(Frame::Chunk(bytes.into()));
        sink.finish();
        stream
    }

    /// Next chunk, `Ok(None)` once the producer finished cleanly.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Frame::Chunk(bytes)) => Ok(Some(bytes)),
            Some(Frame::End) => {
                self.done = true;
                Ok(None)
            }
            Some(Frame::Abort(e)) => {
                self.done = true;
                Err(StreamError::Upstream(e))
            }
            None => {
                self.done = true;
                Err(StreamError::Incomplete)
            }
        }
    }

    /// Reads the rest of the stream into memory.
    pub async fn collect(mut self) -> Result<Vec<u8>, StreamError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

impl ByteSink {
    /// Marks the stream complete.
    pub fn finish(self) {
        let _ = self.send(Frame::End);
    }

    /// Fails the stream; the consumer sees `error` instead of an end marker.
    pub fn abort(self, error: RenderError) {
        let _ = self.send(Frame::Abort(error));
    }

    // Only waits when the channel is full.
    fn send(&self, frame: Frame) -> io::Result<()> {
        let closed = || io::Error::new(io::ErrorKind::BrokenPipe, "byte stream consumer closed");
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => self.tx.blocking_send(frame).map_err(|_| closed()),
            Err(TrySendError::Closed(_)) => Err(closed()),
        }
    }
}

impl Write for ByteSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.send(Frame::Chunk(buf.to_vec()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `renderer` on a blocking thread and returns its output as a stream.
///
/// The publisher can consume the stream while rendering is still in progress.
pub fn render_stream(renderer: Arc<dyn Renderer>, snapshot: Arc<Snapshot>) -> ByteStream {
    let (sink, stream) = ByteStream::channel();

    tokio::task::spawn_blocking(move || {
        let mut out = BufWriter::with_capacity(64 * 1024, sink);
        let result = renderer
            .render(&snapshot, &mut out)
            .and_then(|()| out.flush().map_err(|e| RenderError(e.to_string())));

        let sink = match out.into_inner() {
            Ok(sink) => sink,
            Err(e) => {
                // Buffered bytes could not be delivered; dropping the sink makes the
                // stream read as incomplete.
                error!("Failed to flush rendered output: {}", e.error());
                return;
            }
        };

        match result {
            Ok(()) => sink.finish(),
            Err(e) => {
                error!("Render failed: {}", e);
                sink.abort(e);
            }
        }
    });

    stream
}

const TEMPLATE_NAME_FALLBACK: &str = "template";

/// Renders snapshots through a Jinja-style template compiled once at startup.
///
/// The template sees `feeds`, `records` and `generated_at`. HTML escaping is on
/// unless the template file name ends in `.txt`. Timestamps can be formatted with
/// the `datefmt` filter, e.g. `{{ record.timestamp | datefmt("%Y-%m-%d") }}`.
pub struct TemplateRenderer {
    env: Environment<'static>,
    name: String,
}

impl TemplateRenderer {
    pub fn from_file(path: &Path) -> Result<Self, TemplateError> {
        let source = std::fs::read_to_string(path).map_err(|e| TemplateError::Read {
            path: PathBuf::from(path),
            source: e,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| TEMPLATE_NAME_FALLBACK.to_string());
        Self::from_source(name, source)
    }

    pub fn from_source(
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self, TemplateError> {
        let name = name.into();
        let mut env = Environment::new();
        env.set_auto_escape_callback(|name| {
            if name.ends_with(".txt") {
                AutoEscape::None
            } else {
                AutoEscape::Html
            }
        });
        env.add_filter("datefmt", datefmt);
        env.add_template_owned(name.clone(), source.into())
            .map_err(|e| TemplateError::Syntax {
                name: name.clone(),
                message: format!("{:#}", e),
            })?;

        debug!("Compiled template {}", name);
        Ok(Self { env, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Renderer for TemplateRenderer {
    fn render(&self, snapshot: &Snapshot, out: &mut dyn Write) -> Result<(), RenderError> {
        let template = self.env.get_template(&self.name)?;
        template.render_to_write(snapshot, out)?;
        Ok(())
    }
}

/// `datefmt` template filter: formats an RFC 3339 timestamp with a strftime pattern.
/// Missing timestamps render as an empty string.
fn datefmt(value: Option<String>, format: Option<String>) -> Result<String, minijinja::Error> {
    let Some(value) = value else {
        return Ok(String::new());
    };
    let parsed = DateTime::parse_from_rfc3339(&value).map_err(|e| {
        minijinja::Error::new(
            minijinja::ErrorKind::InvalidOperation,
            format!("not a timestamp: {} ({})", value, e),
        )
    })?;
    let format = format.as_deref().unwrap_or("%Y-%m-%d %H:%M");

    // `to_string` would panic on an invalid pattern.
    let mut out = String::new();
    std::fmt::write(&mut out, format_args!("{}", parsed.format(format))).map_err(|_| {
        minijinja::Error::new(
            minijinja::ErrorKind::InvalidOperation,
            format!("invalid date format {:?}", format),
        )
    })?;
    Ok(out)
}
