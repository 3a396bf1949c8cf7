use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use console::Term;

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Cloneable, thread-safe handle to the output the run renders into.
///
/// Every [`Console::emit`] call reaches the sink as one uninterrupted write,
/// so table repaints and streamed tool lines never tear each other.
#[derive(Clone)]
pub struct Console {
    sink: Sink,
    is_term: bool,
    width: Option<usize>,
}

impl Console {
    /// Process stdout, with terminal detection and width.
    pub fn stdout() -> Self {
        let term: Term = Term::stdout();
        let is_term: bool = term.is_term();
        let width: Option<usize> = if is_term {
            term.size_checked().map(|(_rows, cols)| cols as usize)
        } else {
            None
        };

        Self {
            sink: Arc::new(Mutex::new(Box::new(io::stdout()))),
            is_term,
            width,
        }
    }

    pub fn new<W>(writer: W, is_term: bool) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
            is_term,
            width: None,
        }
    }

    /// In-memory console for tests and log capture.
    pub fn capture(is_term: bool) -> (Self, Captured) {
        let captured = Captured::default();
        (Self::new(captured.clone(), is_term), captured)
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = Some(width);
        self
    }

    pub fn is_term(&self) -> bool {
        self.is_term
    }

    pub fn width(&self) -> Option<usize> {
        self.width
    }

    /// Writes `bytes` as one unit and flushes.
    pub fn emit(&self, bytes: &[u8]) -> io::Result<()> {
        let mut sink = self.lock();
        sink.write_all(bytes)?;
        sink.flush()
    }

    pub fn line(&self, line: &str) -> io::Result<()> {
        let mut buf: Vec<u8> = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.emit(&buf)
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("is_term", &self.is_term)
            .field("width", &self.width)
            .finish_non_exhaustive()
    }
}

impl Write for Console {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.lock().write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}

/// Shared byte buffer behind [`Console::capture`].
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(String::from).collect()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
