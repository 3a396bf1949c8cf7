use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Local;

type Prefix = Arc<dyn Fn() -> String + Send + Sync>;

struct Inner<W> {
    sink: W,
    pending: Vec<u8>,
}

/// Reassembles arbitrary chunks into lines and forwards each complete line
/// to the sink as `<prefix><line>\n`.
///
/// Lines end at `\n`, `\r` or `\r\n`. The prefix is evaluated per emitted
/// line. A trailing partial line stays buffered until more data completes
/// it or [`PrefixWriter::finish`] is called. Clones share the same buffer.
pub struct PrefixWriter<W> {
    inner: Arc<Mutex<Inner<W>>>,
    prefix: Prefix,
}

impl<W> Clone for PrefixWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            prefix: Arc::clone(&self.prefix),
        }
    }
}

impl<W: Write> PrefixWriter<W> {
    pub fn new<F>(sink: W, prefix: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                sink,
                pending: Vec::new(),
            })),
            prefix: Arc::new(prefix),
        }
    }

    /// Emits whatever is buffered (minus trailing line breaks) as a final
    /// line and clears the buffer.
    pub fn finish(&self) -> io::Result<()> {
        let mut inner = self.lock();
        let end: usize = inner
            .pending
            .iter()
            .rposition(|b| *b != b'\n' && *b != b'\r')
            .map_or(0, |pos| pos + 1);

        let rest: Vec<u8> = inner.pending[..end].to_vec();
        inner.pending.clear();
        if rest.is_empty() {
            return Ok(());
        }

        let line = (self.prefix)();
        emit(&mut inner.sink, &line, &rest)?;
        inner.sink.flush()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<W>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write> Write for PrefixWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.lock();
        let inner: &mut Inner<W> = &mut guard;
        inner.pending.extend_from_slice(buf);

        let mut consumed: usize = 0;
        let mut result: io::Result<()> = Ok(());
        while let Some(offset) = inner.pending[consumed..]
            .iter()
            .position(|b| *b == b'\n' || *b == b'\r')
        {
            let end: usize = consumed + offset;
            let mut next: usize = end + 1;
            if inner.pending[end] == b'\r' && inner.pending.get(next) == Some(&b'\n') {
                next += 1;
            }

            let line: &[u8] = &inner.pending[consumed..end];
            if !line.is_empty() {
                let prefix = (self.prefix)();
                if let Err(e) = emit(&mut inner.sink, &prefix, line)
                    && result.is_ok()
                {
                    result = Err(e);
                }
            }
            consumed = next;
        }
        inner.pending.drain(..consumed);

        result.map(|()| buf.len())
    }

    /// Flushes the sink only; partial lines stay buffered.
    fn flush(&mut self) -> io::Result<()> {
        self.lock().sink.flush()
    }
}

fn emit<W: Write>(sink: &mut W, prefix: &str, line: &[u8]) -> io::Result<()> {
    let mut out: Vec<u8> = Vec::with_capacity(prefix.len() + line.len() + 1);
    out.extend_from_slice(prefix.as_bytes());
    out.extend_from_slice(line);
    out.push(b'\n');
    sink.write_all(&out)
}

/// `HH:MM:SS  apex  tool  stream  ` prefix evaluated at emission time.
pub fn time_prefix(apex: &str, tool: &str, stream: &str) -> impl Fn() -> String + Send + Sync + 'static {
    let apex: String = apex.to_string();
    let tool: String = tool.to_string();
    let stream: String = stream.to_string();
    move || {
        format!(
            "{}  {:<8}  {:<12}  {:<6}  ",
            Local::now().format("%H:%M:%S"),
            apex,
            tool,
            stream
        )
    }
}
