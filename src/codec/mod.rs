//! Codec readers: decompose byte sources into acknowledged message parts.
//!
//! A codec string such as `gzip/csv` or `lines/multipart` describes a chain:
//! any number of byte-stream transforms, exactly one leaf reader that emits
//! parts, and any number of part wrappers after it. Each emitted batch of
//! parts carries an acknowledgment handle; once every part derived from the
//! source has been acked the source acknowledgment fires, exactly once, with
//! the first error observed or with success.

mod readers;

pub use readers::MultipartReader;

use crate::message::Part;
use anyhow::{Context, Result, anyhow};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// A cloneable cancellation token passed to `next`, `close` and ack
/// deliveries.
#[derive(Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(anyhow!("context was cancelled"))
        } else {
            Ok(())
        }
    }
}

/// Error payload carried through acknowledgments. Shared so fan-out acks can
/// deliver one failure to several upstream handles.
pub type AckError = Arc<anyhow::Error>;

/// The acknowledgment a consumer of a source hands to the codec stack. Fired
/// at most once over the reader's lifetime.
pub struct SourceAck(Box<dyn FnOnce(&Interrupt, Option<AckError>) -> Result<()> + Send>);

impl SourceAck {
    pub fn new(f: impl FnOnce(&Interrupt, Option<AckError>) -> Result<()> + Send + 'static) -> Self {
        SourceAck(Box::new(f))
    }

    pub(crate) fn fire(self, cx: &Interrupt, err: Option<AckError>) -> Result<()> {
        (self.0)(cx, err)
    }
}

/// The acknowledgment handle attached to a batch of emitted parts. Consumed
/// on use, so each batch is acked at most once.
pub struct PartAck(Box<dyn FnOnce(&Interrupt, Option<AckError>) -> Result<()> + Send>);

impl PartAck {
    pub(crate) fn new(
        f: impl FnOnce(&Interrupt, Option<AckError>) -> Result<()> + Send + 'static,
    ) -> Self {
        PartAck(Box::new(f))
    }

    /// Deliver the acknowledgment. An error routes to the source ack
    /// immediately; success counts down the pending parts.
    pub fn ack(self, cx: &Interrupt, err: Option<AckError>) -> Result<()> {
        (self.0)(cx, err)
    }
}

/// A stateful codec reader. `next` returns `Ok(None)` at end of stream; any
/// error is terminal for the reader. At most one `next` call may be in
/// flight at a time, but ack handles may be fired from other threads.
pub trait Reader: Send {
    fn next(&mut self, cx: &Interrupt) -> Result<Option<(Vec<Part>, PartAck)>>;
    fn close(&mut self, cx: &Interrupt) -> Result<()>;
}

/// The byte source a reader chain consumes. Dropping it releases the
/// underlying resource.
pub type ByteSource = Box<dyn Read + Send>;

/// Configuration shared by all reader codecs.
#[derive(Clone, Copy, Debug)]
pub struct ReaderConfig {
    /// Upper bound on the buffer used when scanning for line or delimiter
    /// tokens.
    pub max_scan_token_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            max_scan_token_size: 64 * 1024,
        }
    }
}

/// Creates a reader from a path hint, a byte source, and the source ack to
/// fire once the source is fully consumed. The path can be empty and is
/// usually ignored, but drives the `auto` codec.
pub type ReaderConstructor =
    Box<dyn Fn(&str, ByteSource, SourceAck) -> Result<Box<dyn Reader>> + Send + Sync>;

type ByteTransformCtor = Box<dyn Fn(&str, ByteSource) -> Result<ByteSource> + Send + Sync>;
type PartWrapperCtor = Box<dyn Fn(&str, Box<dyn Reader>) -> Result<Box<dyn Reader>> + Send + Sync>;

fn byte_transform(token: &str, _conf: ReaderConfig) -> Option<ByteTransformCtor> {
    if token == "gzip" {
        return Some(Box::new(|_, src| {
            Ok(Box::new(GzDecoder::new(src)) as ByteSource)
        }));
    }
    None
}

fn part_wrapper(token: &str, _conf: ReaderConfig) -> Option<PartWrapperCtor> {
    if token == "multipart" {
        return Some(Box::new(|_, inner| {
            Ok(Box::new(MultipartReader::new(inner)) as Box<dyn Reader>)
        }));
    }
    None
}

fn leaf_reader(token: &str, conf: ReaderConfig) -> Result<Option<ReaderConstructor>> {
    match token {
        "all-bytes" => {
            return Ok(Some(Box::new(|_, src, ack| {
                Ok(Box::new(readers::AllBytesReader::new(src, ack)) as Box<dyn Reader>)
            })));
        }
        "lines" => {
            return Ok(Some(Box::new(move |_, src, ack| {
                Ok(Box::new(readers::ScanReader::lines(conf, src, ack)) as Box<dyn Reader>)
            })));
        }
        "csv" => {
            return Ok(Some(Box::new(|_, src, ack| {
                Ok(Box::new(readers::CsvReader::new(src, ack)?) as Box<dyn Reader>)
            })));
        }
        "tar" => {
            return Ok(Some(Box::new(|_, src, ack| {
                Ok(Box::new(readers::TarReader::new(src, ack)?) as Box<dyn Reader>)
            })));
        }
        _ => {}
    }
    if let Some(delim) = token.strip_prefix("delim:") {
        if delim.is_empty() {
            return Err(anyhow!("custom delimiter codec requires a non-empty delimiter"));
        }
        let delim = delim.as_bytes().to_vec();
        return Ok(Some(Box::new(move |_, src, ack| {
            Ok(
                Box::new(readers::ScanReader::delim(conf, src, delim.clone(), ack))
                    as Box<dyn Reader>,
            )
        })));
    }
    if let Some(size) = token.strip_prefix("chunker:") {
        let chunk_size: u64 = size
            .parse()
            .map_err(|e| anyhow!("invalid chunk size for chunker codec: {e}"))?;
        return Ok(Some(Box::new(move |_, src, ack| {
            Ok(Box::new(readers::ChunkerReader::new(src, chunk_size, ack)) as Box<dyn Reader>)
        })));
    }
    Ok(None)
}

fn chain_byte_transforms(first: ByteTransformCtor, second: ByteTransformCtor) -> ByteTransformCtor {
    Box::new(move |path, src| {
        let inner = first(path, src)?;
        // A failed successor drops (and thereby closes) the inner source.
        second(path, inner)
    })
}

fn chain_bytes_into_leaf(
    transforms: ByteTransformCtor,
    leaf: ReaderConstructor,
) -> ReaderConstructor {
    Box::new(move |path, src, ack| {
        let inner = transforms(path, src)?;
        leaf(path, inner, ack)
    })
}

fn chain_leaf_into_wrapper(
    leaf: ReaderConstructor,
    wrapper: PartWrapperCtor,
) -> ReaderConstructor {
    Box::new(move |path, src, ack| {
        let inner = leaf(path, src, ack)?;
        wrapper(path, inner)
    })
}

fn chained_reader(codec: &str, conf: ReaderConfig) -> Result<ReaderConstructor> {
    let tokens: Vec<&str> = codec.split('/').collect();

    let mut transforms: Option<ByteTransformCtor> = None;
    let mut leaf: Option<ReaderConstructor> = None;

    for (i, token) in tokens.iter().enumerate() {
        if let Some(transform) = byte_transform(token, conf) {
            if leaf.is_some() {
                return Err(anyhow!(
                    "unable to follow codec '{}' with '{}'",
                    tokens[i - 1],
                    token
                ));
            }
            transforms = Some(match transforms.take() {
                Some(prev) => chain_byte_transforms(prev, transform),
                None => transform,
            });
            continue;
        }
        if let Some(ctor) = leaf_reader(token, conf)? {
            if leaf.is_some() {
                return Err(anyhow!(
                    "unable to follow codec '{}' with '{}'",
                    tokens[i - 1],
                    token
                ));
            }
            leaf = Some(match transforms.take() {
                Some(t) => chain_bytes_into_leaf(t, ctor),
                None => ctor,
            });
            continue;
        }
        let Some(wrapper) = part_wrapper(token, conf) else {
            return Err(anyhow!("codec was not recognised: {token}"));
        };
        let Some(prev) = leaf.take() else {
            return Err(anyhow!(
                "codec '{token}' must be preceded by a structured codec"
            ));
        };
        leaf = Some(chain_leaf_into_wrapper(prev, wrapper));
    }

    leaf.ok_or_else(|| anyhow!("codec was not recognised: {codec}"))
}

fn convert_deprecated(codec: &str) -> &str {
    match codec {
        "csv-gzip" => "gzip/csv",
        "tar-gzip" => "gzip/tar",
        other => other,
    }
}

/// Resolve a codec string into a reader constructor.
pub fn reader_constructor(codec: &str, conf: ReaderConfig) -> Result<ReaderConstructor> {
    let codec = convert_deprecated(codec);
    if codec == "auto" {
        return Ok(auto_constructor(conf));
    }
    debug!(codec, "resolving codec chain");
    chained_reader(codec, conf)
}

fn codec_for_path(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    if lower.ends_with(".csv.gz") || lower.ends_with(".csv.gzip") {
        return "gzip/csv";
    }
    if lower.ends_with(".tgz") || lower.ends_with(".tar.gz") || lower.ends_with(".tar.gzip") {
        return "gzip/tar";
    }
    match Path::new(&lower).extension().and_then(|e| e.to_str()) {
        Some("csv") => "csv",
        Some("tar") => "tar",
        _ => "all-bytes",
    }
}

fn auto_constructor(conf: ReaderConfig) -> ReaderConstructor {
    Box::new(move |path, src, ack| {
        let codec = codec_for_path(path);
        debug!(path, codec, "inferred codec from path");
        let ctor = reader_constructor(codec, conf)
            .with_context(|| format!("failed to infer codec for '{path}'"))?;
        ctor(path, src, ack)
    })
}

/// Construct a reader over a byte source directly from a codec string.
pub fn new_reader(
    codec: &str,
    path: &str,
    source: ByteSource,
    conf: ReaderConfig,
    ack: SourceAck,
) -> Result<Box<dyn Reader>> {
    let ctor = reader_constructor(codec, conf)?;
    ctor(path, source, ack)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_detection_prefers_compound_extensions() {
        assert_eq!(codec_for_path("input.csv"), "csv");
        assert_eq!(codec_for_path("input.csv.gz"), "gzip/csv");
        assert_eq!(codec_for_path("input.csv.gzip"), "gzip/csv");
        assert_eq!(codec_for_path("archive.tar"), "tar");
        assert_eq!(codec_for_path("archive.tgz"), "gzip/tar");
        assert_eq!(codec_for_path("archive.tar.gz"), "gzip/tar");
        assert_eq!(codec_for_path("archive.tar.gzip"), "gzip/tar");
        assert_eq!(codec_for_path("whatever.bin"), "all-bytes");
        assert_eq!(codec_for_path("no_extension"), "all-bytes");
    }

    #[test]
    fn deprecated_aliases_normalise() {
        assert_eq!(convert_deprecated("csv-gzip"), "gzip/csv");
        assert_eq!(convert_deprecated("tar-gzip"), "gzip/tar");
        assert_eq!(convert_deprecated("lines"), "lines");
    }
}
