use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use tracing::Metadata;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriter;

pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_NOISE_FILTER: &str = "ort=error,tool_stderr=error";
pub const DEFAULT_LOG_RETENTION_FILES: usize = 14;
pub const DEFAULT_LOG_DIR_NAME: &str = "logs";
pub const DEFAULT_LOG_FILE_PREFIX: &str = "frametween";
pub const DEFAULT_LOG_FILE_SUFFIX: &str = "log";
pub const REDACTION_PLACEHOLDER: &str = "***REDACTED***";

/// Targets that are quiet on the console but kept at `debug` in the file.
const TOOL_DEBUG_TARGETS: [&str; 1] = ["tool_stderr"];

const SENSITIVE_KEYS: [&str; 10] = [
    "token",
    "access_token",
    "key",
    "api_key",
    "apikey",
    "password",
    "secret",
    "signature",
    "x-goog-signature",
    "authorization",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingInitOptions {
    pub data_dir: Option<PathBuf>,
    pub verbose: u8,
    pub cli_log_filter: Option<String>,
    pub rust_log_env: Option<String>,
    pub default_log_filter: String,
    pub noise_filter: String,
    pub retention_files: usize,
}

impl Default for LoggingInitOptions {
    fn default() -> Self {
        Self {
            data_dir: None,
            verbose: 0,
            cli_log_filter: None,
            rust_log_env: None,
            default_log_filter: DEFAULT_LOG_FILTER.to_string(),
            noise_filter: DEFAULT_NOISE_FILTER.to_string(),
            retention_files: DEFAULT_LOG_RETENTION_FILES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingFilterPlan {
    pub user_filter: String,
    pub console_filter: String,
    pub file_filter: String,
}

#[derive(Debug)]
pub struct LoggingInitPlan {
    pub filters: LoggingFilterPlan,
    pub file_sink: FileSinkPlan,
}

#[derive(Debug)]
pub enum FileSinkPlan {
    Ready {
        log_dir: PathBuf,
        appender: RollingFileAppender,
    },
    /// Console-only logging; `reason` is reported once the subscriber is up.
    Fallback {
        attempted_log_dir: Option<PathBuf>,
        reason: String,
    },
}

impl FileSinkPlan {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn log_dir(&self) -> Option<&PathBuf> {
        match self {
            Self::Ready { log_dir, .. } => Some(log_dir),
            Self::Fallback {
                attempted_log_dir, ..
            } => attempted_log_dir.as_ref(),
        }
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            Self::Ready { .. } => None,
            Self::Fallback { reason, .. } => Some(reason.as_str()),
        }
    }
}

pub fn compose_logging_init_plan(options: &LoggingInitOptions) -> LoggingInitPlan {
    LoggingInitPlan {
        filters: compose_logging_filters(options),
        file_sink: build_file_sink_plan(options),
    }
}

pub fn build_file_sink_plan(options: &LoggingInitOptions) -> FileSinkPlan {
    let retention_files = if options.retention_files == 0 {
        DEFAULT_LOG_RETENTION_FILES
    } else {
        options.retention_files
    };

    let Some(data_dir) = options.data_dir.as_deref() else {
        return FileSinkPlan::Fallback {
            attempted_log_dir: None,
            reason: "file sink disabled: data_dir is not configured".to_string(),
        };
    };

    let log_dir = data_dir.join(DEFAULT_LOG_DIR_NAME);
    if let Err(error) = fs::create_dir_all(&log_dir) {
        return FileSinkPlan::Fallback {
            attempted_log_dir: Some(log_dir),
            reason: format!("failed to create log directory: {error}"),
        };
    }

    let built = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(DEFAULT_LOG_FILE_PREFIX)
        .filename_suffix(DEFAULT_LOG_FILE_SUFFIX)
        .max_log_files(retention_files)
        .build(&log_dir);

    match built {
        Ok(appender) => FileSinkPlan::Ready { log_dir, appender },
        Err(error) => FileSinkPlan::Fallback {
            attempted_log_dir: Some(log_dir),
            reason: format!("failed to initialize rolling file sink: {error}"),
        },
    }
}

/// Filter precedence: `--log-filter` > `-v`/`-vv` > `RUST_LOG` > default.
/// The noise filter only applies when nothing was chosen explicitly.
pub fn compose_logging_filters(options: &LoggingInitOptions) -> LoggingFilterPlan {
    let user_filter = if let Some(filter) = options.cli_log_filter.as_deref() {
        filter.to_string()
    } else if options.verbose >= 2 {
        "trace".to_string()
    } else if options.verbose == 1 {
        "debug".to_string()
    } else if let Some(filter) = options.rust_log_env.as_deref() {
        filter.to_string()
    } else {
        options.default_log_filter.clone()
    };

    let implicit = options.cli_log_filter.is_none()
        && options.verbose == 0
        && !options.noise_filter.trim().is_empty();

    if !implicit {
        return LoggingFilterPlan {
            console_filter: user_filter.clone(),
            file_filter: user_filter.clone(),
            user_filter,
        };
    }

    LoggingFilterPlan {
        console_filter: format!("{},{user_filter}", options.noise_filter),
        file_filter: format!("{},{user_filter}", file_noise_filter(&options.noise_filter)),
        user_filter,
    }
}

/// Same directives as `noise`, with every tool stderr target at `debug`.
fn file_noise_filter(noise: &str) -> String {
    let mut directives: Vec<String> = noise
        .split(',')
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .filter(|directive| {
            let target = directive
                .split_once('=')
                .map_or(*directive, |(t, _)| t.trim());
            !TOOL_DEBUG_TARGETS.contains(&target)
        })
        .map(str::to_string)
        .collect();
    directives.extend(TOOL_DEBUG_TARGETS.iter().map(|t| format!("{t}=debug")));
    directives.join(",")
}

/// Wraps a [`MakeWriter`] so every complete line is passed through
/// [`redact_sensitive_text`] before reaching the sink.
#[derive(Debug)]
pub struct RedactingMakeWriter<M> {
    inner: M,
}

impl<M> RedactingMakeWriter<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M> MakeWriter<'a> for RedactingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new(self.inner.make_writer())
    }

    fn make_writer_for(&'a self, metadata: &Metadata<'_>) -> Self::Writer {
        RedactingWriter::new(self.inner.make_writer_for(metadata))
    }
}

#[derive(Debug)]
pub struct RedactingWriter<W: Write> {
    inner: W,
    pending: Vec<u8>,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: Vec::new(),
        }
    }

    fn emit(&mut self, upto: usize) -> io::Result<()> {
        let chunk: Vec<u8> = self.pending.drain(..upto).collect();
        let redacted = redact_sensitive_text(&String::from_utf8_lossy(&chunk));
        self.inner.write_all(redacted.as_bytes())
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            self.emit(newline + 1)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            self.emit(self.pending.len())?;
        }
        self.inner.flush()
    }
}

impl<W: Write> Drop for RedactingWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Mask URL userinfo and the values of credential-like `key=value` or
/// `key: value` assignments.
pub fn redact_sensitive_text(input: &str) -> String {
    redact_assignments(&redact_userinfo(input))
}

fn redact_userinfo(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(scheme_end) = rest.find("://") {
        let authority_start = scheme_end + 3;
        let authority = &rest[authority_start..];
        let authority_len = authority
            .find(|c: char| {
                c.is_whitespace() || matches!(c, '/' | '?' | '#' | '"' | '\'' | '<' | '>')
            })
            .unwrap_or(authority.len());

        out.push_str(&rest[..authority_start]);
        match authority[..authority_len].rfind('@') {
            Some(at) if at > 0 => {
                out.push_str(REDACTION_PLACEHOLDER);
                out.push_str(&authority[at..authority_len]);
            }
            _ => out.push_str(&authority[..authority_len]),
        }
        rest = &authority[authority_len..];
    }

    out.push_str(rest);
    out
}

fn redact_assignments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(sep) = rest.find(['=', ':']) {
        let head = &rest[..sep];
        let key_start = head
            .char_indices()
            .rev()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
            .map_or(0, |(i, c)| i + c.len_utf8());
        let key = &head[key_start..];

        out.push_str(&rest[..=sep]);
        let after = &rest[sep + 1..];

        if is_sensitive_key(key) {
            let value = after.trim_start();
            out.push_str(&after[..after.len() - value.len()]);
            let value_len = value
                .find(|c: char| {
                    c.is_whitespace() || matches!(c, '&' | ',' | ';' | '"' | '\'' | ')' | ']' | '}')
                })
                .unwrap_or(value.len());
            if value_len > 0 {
                out.push_str(REDACTION_PLACEHOLDER);
            }
            rest = &value[value_len..];
        } else {
            rest = after;
        }
    }

    out.push_str(rest);
    out
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.contains(&key.as_str())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn options() -> LoggingInitOptions {
        LoggingInitOptions::default()
    }

    #[test]
    fn cli_log_filter_overrides_everything() {
        let plan = compose_logging_filters(&LoggingInitOptions {
            verbose: 2,
            cli_log_filter: Some("frametween_core=trace".to_string()),
            rust_log_env: Some("warn".to_string()),
            ..options()
        });
        assert_eq!(plan.user_filter, "frametween_core=trace");
        assert_eq!(plan.console_filter, "frametween_core=trace");
        assert_eq!(plan.file_filter, "frametween_core=trace");
    }

    #[test]
    fn verbosity_maps_to_debug_and_trace() {
        let debug = compose_logging_filters(&LoggingInitOptions {
            verbose: 1,
            rust_log_env: Some("warn".to_string()),
            ..options()
        });
        assert_eq!(debug.console_filter, "debug");

        let trace = compose_logging_filters(&LoggingInitOptions {
            verbose: 3,
            ..options()
        });
        assert_eq!(trace.console_filter, "trace");
    }

    #[test]
    fn implicit_selection_adds_noise_filter() {
        let plan = compose_logging_filters(&LoggingInitOptions {
            rust_log_env: Some("warn".to_string()),
            ..options()
        });
        assert_eq!(plan.user_filter, "warn");
        assert_eq!(plan.console_filter, "ort=error,tool_stderr=error,warn");
        assert_eq!(plan.file_filter, "ort=error,tool_stderr=debug,warn");
    }

    #[test]
    fn file_filter_always_keeps_tool_stderr_at_debug() {
        let plan = compose_logging_filters(&LoggingInitOptions {
            noise_filter: "ort=error".to_string(),
            ..options()
        });
        assert_eq!(plan.console_filter, "ort=error,info");
        assert_eq!(plan.file_filter, "ort=error,tool_stderr=debug,info");
    }

    #[test]
    fn redacts_url_credentials_and_assignments() {
        let raw =
            "fetching https://user:pw@weights.example.com/a.onnx?token=abc123&x=1 api_key: xyz";
        let redacted = redact_sensitive_text(raw);
        assert_eq!(
            redacted,
            "fetching https://***REDACTED***@weights.example.com/a.onnx?token=***REDACTED***&x=1 api_key: ***REDACTED***"
        );
    }

    #[test]
    fn leaves_plain_text_untouched() {
        let raw = "stage=extracted frames=120 dest=/data/models/film_net.onnx";
        assert_eq!(redact_sensitive_text(raw), raw);
    }

    #[test]
    fn redacting_writer_handles_split_writes() {
        let mut sink = Vec::new();
        {
            let mut writer = RedactingWriter::new(&mut sink);
            writer
                .write_all(b"url=https://a.example.com/x?sig")
                .expect("write");
            writer.write_all(b"nature=1 secret=hun").expect("write");
            writer.write_all(b"ter2\nnext line").expect("write");
        }
        let text = String::from_utf8(sink).expect("utf8");
        assert_eq!(
            text,
            "url=https://a.example.com/x?signature=***REDACTED*** secret=***REDACTED***\nnext line"
        );
    }

    #[test]
    fn file_sink_lives_under_data_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = build_file_sink_plan(&LoggingInitOptions {
            data_dir: Some(temp.path().to_path_buf()),
            ..options()
        });
        assert!(plan.is_ready(), "{:?}", plan.fallback_reason());
        assert_eq!(
            plan.log_dir().map(PathBuf::as_path),
            Some(temp.path().join("logs").as_path())
        );
    }

    #[test]
    fn file_sink_falls_back_without_data_dir() {
        let plan = build_file_sink_plan(&options());
        assert!(!plan.is_ready());
        assert_eq!(plan.log_dir(), None);
    }

    #[test]
    fn file_sink_falls_back_when_log_dir_is_blocked() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker: &Path = &temp.path().join("not-a-dir");
        fs::write(blocker, b"file").expect("blocker");

        let plan = build_file_sink_plan(&LoggingInitOptions {
            data_dir: Some(blocker.to_path_buf()),
            ..options()
        });
        assert!(!plan.is_ready());
        assert!(plan
            .fallback_reason()
            .is_some_and(|reason| reason.contains("failed to create log directory")));
    }
}
