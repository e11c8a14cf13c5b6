//! Leaf codec readers, the multipart wrapper, and the shared acknowledgment
//! bookkeeping.

use super::{AckError, ByteSource, Interrupt, PartAck, Reader, ReaderConfig, SourceAck};
use crate::message::Part;
use crate::value::Value;
use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Fan-in bookkeeping between emitted parts and the single source ack.
///
/// Every emitted part registers itself and decrements on ack. When the
/// reader observes end of stream it marks itself finished; the source ack
/// fires with success once pending hits zero afterwards. Any part acked with
/// an error fires the source ack immediately with that error. The `Option`
/// around the source ack is the once-guard: whoever takes it fires, later
/// calls are no-ops.
pub(crate) struct AckRegister {
    inner: Mutex<AckState>,
}

struct AckState {
    pending: usize,
    finished: bool,
    source: Option<SourceAck>,
}

impl AckRegister {
    pub(crate) fn new(source: SourceAck) -> Arc<Self> {
        Arc::new(AckRegister {
            inner: Mutex::new(AckState {
                pending: 0,
                finished: false,
                source: Some(source),
            }),
        })
    }

    fn track(&self) {
        self.inner.lock().unwrap().pending += 1;
    }

    fn finish(&self) {
        self.inner.lock().unwrap().finished = true;
    }

    fn fire(&self, cx: &Interrupt, err: Option<AckError>) -> Result<()> {
        let source = self.inner.lock().unwrap().source.take();
        match source {
            Some(ack) => ack.fire(cx, err),
            None => Ok(()),
        }
    }

    /// Record a read failure: the source ack fires with the error, and an
    /// equivalent error is handed back for the `next` caller.
    fn fail(&self, cx: &Interrupt, err: anyhow::Error) -> anyhow::Error {
        let shared: AckError = Arc::new(err);
        let _ = self.fire(cx, Some(Arc::clone(&shared)));
        anyhow!(shared)
    }

    /// The ack handle for one emitted batch of parts.
    fn part_ack(reg: &Arc<Self>) -> PartAck {
        reg.track();
        let reg = Arc::clone(reg);
        PartAck::new(move |cx, err| {
            let fire_ok = {
                let mut state = reg.inner.lock().unwrap();
                state.pending -= 1;
                state.pending == 0 && state.finished
            };
            if cx.is_cancelled() {
                return reg.fire(cx, Some(Arc::new(anyhow!("context was cancelled"))));
            }
            if err.is_some() {
                return reg.fire(cx, err);
            }
            if fire_ok {
                return reg.fire(cx, None);
            }
            Ok(())
        })
    }

    /// Shutdown semantics: a close before end of stream fires the source ack
    /// with a shutdown error; a close with nothing outstanding fires it with
    /// success. The once-guard makes whichever applies the only delivery.
    fn close(&self, cx: &Interrupt) -> Result<()> {
        let (finished, pending) = {
            let state = self.inner.lock().unwrap();
            (state.finished, state.pending)
        };
        if !finished {
            let _ = self.fire(cx, Some(Arc::new(anyhow!("service shutting down"))));
        }
        if pending == 0 {
            let _ = self.fire(cx, None);
        }
        Ok(())
    }
}

/// `all-bytes`: the entire stream as one part.
pub(crate) struct AllBytesReader {
    src: Option<ByteSource>,
    acks: Arc<AckRegister>,
    consumed: bool,
}

impl AllBytesReader {
    pub(crate) fn new(src: ByteSource, ack: SourceAck) -> Self {
        AllBytesReader {
            src: Some(src),
            acks: AckRegister::new(ack),
            consumed: false,
        }
    }
}

impl Reader for AllBytesReader {
    fn next(&mut self, cx: &Interrupt) -> Result<Option<(Vec<Part>, PartAck)>> {
        cx.check()?;
        if self.consumed {
            return Ok(None);
        }
        self.consumed = true;
        let mut buf = Vec::new();
        let Some(src) = self.src.as_mut() else {
            return Ok(None);
        };
        if let Err(e) = src.read_to_end(&mut buf) {
            return Err(self.acks.fail(cx, e.into()));
        }
        self.acks.finish();
        Ok(Some((vec![Part::new(buf)], AckRegister::part_ack(&self.acks))))
    }

    fn close(&mut self, cx: &Interrupt) -> Result<()> {
        if !self.consumed {
            self.acks.finish();
            let _ = self
                .acks
                .fire(cx, Some(Arc::new(anyhow!("service shutting down"))));
        }
        self.src = None;
        Ok(())
    }
}

// Buffered scanning for a literal multi-byte delimiter, bounded by the
// configured max token size. A trailing unterminated segment is emitted; an
// empty trailing segment is not.
struct TokenScanner {
    src: ByteSource,
    delim: Vec<u8>,
    buf: Vec<u8>,
    eof: bool,
    max_token: usize,
}

impl TokenScanner {
    fn new(conf: ReaderConfig, src: ByteSource, delim: Vec<u8>) -> Self {
        TokenScanner {
            src,
            delim,
            buf: Vec::new(),
            eof: false,
            max_token: conf.max_scan_token_size,
        }
    }

    fn find_delim(&self) -> Option<usize> {
        if self.buf.len() < self.delim.len() {
            return None;
        }
        self.buf
            .windows(self.delim.len())
            .position(|w| w == self.delim.as_slice())
    }

    fn next_token(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(i) = self.find_delim() {
                let token = self.buf[..i].to_vec();
                self.buf.drain(..i + self.delim.len());
                return Ok(Some(token));
            }
            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.buf)));
            }
            if self.buf.len() > self.max_token {
                return Err(anyhow!("scan token exceeds maximum size"));
            }
            let mut chunk = [0u8; 8192];
            let n = self.src.read(&mut chunk).context("read byte source")?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

/// `lines` and `delim:<s>`: one part per delimited segment.
pub(crate) struct ScanReader {
    scanner: TokenScanner,
    acks: Arc<AckRegister>,
    trim_cr: bool,
}

impl ScanReader {
    pub(crate) fn lines(conf: ReaderConfig, src: ByteSource, ack: SourceAck) -> Self {
        ScanReader {
            scanner: TokenScanner::new(conf, src, b"\n".to_vec()),
            acks: AckRegister::new(ack),
            trim_cr: true,
        }
    }

    pub(crate) fn delim(
        conf: ReaderConfig,
        src: ByteSource,
        delim: Vec<u8>,
        ack: SourceAck,
    ) -> Self {
        ScanReader {
            scanner: TokenScanner::new(conf, src, delim),
            acks: AckRegister::new(ack),
            trim_cr: false,
        }
    }
}

impl Reader for ScanReader {
    fn next(&mut self, cx: &Interrupt) -> Result<Option<(Vec<Part>, PartAck)>> {
        cx.check()?;
        match self.scanner.next_token() {
            Ok(Some(mut token)) => {
                if self.trim_cr && token.last() == Some(&b'\r') {
                    token.pop();
                }
                Ok(Some((vec![Part::new(token)], AckRegister::part_ack(&self.acks))))
            }
            Ok(None) => {
                self.acks.finish();
                Ok(None)
            }
            Err(e) => Err(self.acks.fail(cx, e)),
        }
    }

    fn close(&mut self, cx: &Interrupt) -> Result<()> {
        self.acks.close(cx)
    }
}

/// `chunker:<n>`: fixed-size parts, with a possibly smaller final part.
pub(crate) struct ChunkerReader {
    src: ByteSource,
    chunk_size: usize,
    acks: Arc<AckRegister>,
    finished: bool,
}

impl ChunkerReader {
    pub(crate) fn new(src: ByteSource, chunk_size: u64, ack: SourceAck) -> Self {
        ChunkerReader {
            src,
            chunk_size: chunk_size.max(1) as usize,
            acks: AckRegister::new(ack),
            finished: false,
        }
    }
}

impl Reader for ChunkerReader {
    fn next(&mut self, cx: &Interrupt) -> Result<Option<(Vec<Part>, PartAck)>> {
        cx.check()?;
        if self.finished {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            match self.src.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.finished = true;
                    self.acks.finish();
                    break;
                }
                Ok(n) => filled += n,
                Err(e) => return Err(self.acks.fail(cx, e.into())),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some((vec![Part::new(buf)], AckRegister::part_ack(&self.acks))))
    }

    fn close(&mut self, cx: &Interrupt) -> Result<()> {
        self.acks.close(cx)
    }
}

/// `csv`: the first record is a header row; every following record becomes a
/// structured part mapping header names to field values.
pub(crate) struct CsvReader {
    records: csv::StringRecordsIntoIter<ByteSource>,
    headers: Vec<String>,
    acks: Arc<AckRegister>,
}

impl CsvReader {
    pub(crate) fn new(src: ByteSource, ack: SourceAck) -> Result<Self> {
        let reader = csv::ReaderBuilder::new().has_headers(false).from_reader(src);
        let mut records = reader.into_records();
        let headers = records
            .next()
            .transpose()
            .context("read csv header row")?
            .ok_or_else(|| anyhow!("csv stream ended before a header row"))?;
        Ok(CsvReader {
            records,
            headers: headers.iter().map(str::to_owned).collect(),
            acks: AckRegister::new(ack),
        })
    }
}

impl Reader for CsvReader {
    fn next(&mut self, cx: &Interrupt) -> Result<Option<(Vec<Part>, PartAck)>> {
        cx.check()?;
        match self.records.next() {
            None => {
                self.acks.finish();
                Ok(None)
            }
            Some(Err(e)) => Err(self.acks.fail(cx, e.into())),
            Some(Ok(record)) => {
                let mut fields = HashMap::with_capacity(self.headers.len());
                for (i, field) in record.iter().enumerate() {
                    let header = match self.headers.get(i) {
                        Some(h) => h.clone(),
                        None => i.to_string(),
                    };
                    fields.insert(header, Value::String(field.to_owned()));
                }
                let part = Part::from_structured(Value::Object(fields));
                Ok(Some((vec![part], AckRegister::part_ack(&self.acks))))
            }
        }
    }

    fn close(&mut self, cx: &Interrupt) -> Result<()> {
        self.acks.close(cx)
    }
}

/// `tar`: one part per regular file entry of the archive.
pub(crate) struct TarReader {
    entries: std::vec::IntoIter<Vec<u8>>,
    acks: Arc<AckRegister>,
}

impl TarReader {
    pub(crate) fn new(src: ByteSource, ack: SourceAck) -> Result<Self> {
        let mut archive = tar::Archive::new(src);
        let mut contents = Vec::new();
        for entry in archive.entries().context("read tar entries")? {
            let mut entry = entry.context("read tar entry")?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).context("read tar entry bytes")?;
            contents.push(buf);
        }
        debug!(entries = contents.len(), "tar archive read");
        Ok(TarReader {
            entries: contents.into_iter(),
            acks: AckRegister::new(ack),
        })
    }
}

impl Reader for TarReader {
    fn next(&mut self, cx: &Interrupt) -> Result<Option<(Vec<Part>, PartAck)>> {
        cx.check()?;
        match self.entries.next() {
            Some(content) => Ok(Some((vec![Part::new(content)], AckRegister::part_ack(&self.acks)))),
            None => {
                self.acks.finish();
                Ok(None)
            }
        }
    }

    fn close(&mut self, cx: &Interrupt) -> Result<()> {
        self.acks.close(cx)
    }
}

/// `multipart`: batch consecutive upstream parts until an empty part marks
/// the batch boundary. Empty parts are acked immediately and never surface.
pub struct MultipartReader {
    child: Box<dyn Reader>,
}

impl MultipartReader {
    pub fn new(child: Box<dyn Reader>) -> Self {
        MultipartReader { child }
    }
}

fn is_empty_batch(parts: &[Part]) -> bool {
    match parts {
        [] => true,
        [only] => only.as_bytes().is_empty(),
        _ => false,
    }
}

impl Reader for MultipartReader {
    fn next(&mut self, cx: &Interrupt) -> Result<Option<(Vec<Part>, PartAck)>> {
        let mut parts: Vec<Part> = Vec::new();
        let mut acks: Vec<PartAck> = Vec::new();

        let combined = |acks: Vec<PartAck>| {
            PartAck::new(move |cx: &Interrupt, err: Option<AckError>| {
                for ack in acks {
                    let _ = ack.ack(cx, err.clone());
                }
                Ok(())
            })
        };

        loop {
            match self.child.next(cx)? {
                None => {
                    if parts.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some((parts, combined(acks))));
                }
                Some((new_parts, ack)) => {
                    if is_empty_batch(&new_parts) {
                        // Empty parts mark the batch boundary and never
                        // surface downstream.
                        let _ = ack.ack(cx, None);
                        if !parts.is_empty() {
                            return Ok(Some((parts, combined(acks))));
                        }
                    } else {
                        parts.extend(new_parts);
                        acks.push(ack);
                    }
                }
            }
        }
    }

    fn close(&mut self, cx: &Interrupt) -> Result<()> {
        self.child.close(cx)
    }
}
