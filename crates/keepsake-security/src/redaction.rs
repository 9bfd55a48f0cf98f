use std::io::{self, Write};
use std::sync::LazyLock;

use regex::Regex;
use tracing_subscriber::fmt::MakeWriter;

/// Writer that scrubs API keys and bearer tokens before bytes reach the
/// underlying sink.
pub struct RedactingWriter<W> {
    inner: W,
}

impl<W> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl RedactingWriter<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl RedactingWriter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let original = String::from_utf8_lossy(buf);
        let redacted = redact_secrets(&original);
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> MakeWriter<'a> for RedactingWriter<io::Stderr> {
    type Writer = RedactingWriter<io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::stderr()
    }
}

impl<'a> MakeWriter<'a> for RedactingWriter<io::Stdout> {
    type Writer = RedactingWriter<io::Stdout>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::stdout()
    }
}

static SECRET_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
          sk-ant-api\S{10,}                       # Anthropic API keys
        | sk-(?:proj-)?[A-Za-z0-9_\-]{20,}        # OpenAI keys
        | Bearer\s+[A-Za-z0-9._\-]{16,}           # Authorization headers
        "#,
    )
    .expect("redaction regex should compile")
});

static KEY_VALUE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(api[_-]?key"?\s*[:=]\s*"?)([^\s"&,]{8,})"#)
        .expect("key/value redaction regex should compile")
});

/// Replace known secret shapes with `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    let pass = SECRET_PATTERNS.replace_all(input, "[REDACTED]");
    KEY_VALUE_PATTERN
        .replace_all(&pass, "${1}[REDACTED]")
        .into_owned()
}
