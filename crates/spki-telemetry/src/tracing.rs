//! Installs the global tracing subscriber of the spki binaries.
//!
//! Two outputs are supported, each with its own level filter:
//!
//! - Human readable (or JSON) events on stderr, so stdout stays free for
//!   command output.
//! - JSON events in rolling log files, written by a background worker.
//!
//! The level of each output defaults to a value chosen by the binary and can
//! be overridden with an environment variable using the [`EnvFilter`] syntax,
//! for example `CONSOLE_LOG_LEVEL=spki_store=debug,info`.
use std::path::PathBuf;

use snafu::{ResultExt as _, Snafu};
use tracing::{level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{InitError, RollingFileAppender, Rotation},
};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize the rolling log file appender"))]
    InitRollingFileAppender { source: InitError },

    #[snafu(display("unable to set the global default subscriber"))]
    SetGlobalDefaultSubscriber { source: SetGlobalDefaultError },
}

/// A default level which an environment variable may override.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelOverride {
    pub environment_variable: &'static str,
    pub default_level: LevelFilter,
}

impl LevelOverride {
    pub fn new(environment_variable: &'static str, default_level: LevelFilter) -> Self {
        Self {
            environment_variable,
            default_level,
        }
    }

    fn env_filter(self) -> EnvFilter {
        EnvFilter::builder()
            .with_env_var(self.environment_variable)
            .with_default_directive(self.default_level.into())
            .from_env_lossy()
    }
}

#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "PascalCase")]
pub enum ConsoleFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsoleOutput {
    pub level: LevelOverride,
    pub format: ConsoleFormat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileOutput {
    pub level: LevelOverride,
    pub directory: PathBuf,
    pub rotation_period: RotationPeriod,

    /// Older files are deleted once this many exist. Keeps all files if unset.
    pub max_log_files: Option<usize>,
}

/// The configured tracing outputs.
///
/// Calling [`Tracing::init`] installs the subscriber and returns the instance
/// again, which then acts as a guard: as long as it is alive file events are
/// written, dropping it flushes the remaining ones. Bind it to a named
/// variable, `let _ = ...` drops it right away.
///
/// ```
/// use spki_telemetry::tracing::{TelemetryOptions, Tracing};
/// use tracing::level_filters::LevelFilter;
///
/// let _tracing_guard =
///     Tracing::pre_configured("spki", LevelFilter::INFO, TelemetryOptions::default())
///         .init()
///         .expect("failed to initialize tracing");
///
/// tracing::info!("ready");
/// ```
pub struct Tracing {
    service_name: &'static str,
    console: Option<ConsoleOutput>,
    file: Option<FileOutput>,

    file_log_guard: Option<WorkerGuard>,
}

impl Tracing {
    /// Overrides the console level.
    pub const CONSOLE_LOG_LEVEL: &str = "CONSOLE_LOG_LEVEL";
    /// Overrides the file level.
    pub const FILE_LOG_LEVEL: &str = "FILE_LOG_LEVEL";
    /// Log files are named `<service name>.<timestamp>.<suffix>`.
    pub const FILE_LOG_SUFFIX: &str = "tracing-rs.json";

    /// Creates an instance without any output.
    pub fn new(service_name: &'static str) -> Self {
        Self {
            service_name,
            console: None,
            file: None,
            file_log_guard: None,
        }
    }

    pub fn with_console_output(mut self, console: impl Into<Option<ConsoleOutput>>) -> Self {
        self.console = console.into();
        self
    }

    pub fn with_file_output(mut self, file: impl Into<Option<FileOutput>>) -> Self {
        self.file = file.into();
        self
    }

    /// Console output unless disabled, plus file output if a directory is set.
    /// Both start at `default_level`.
    pub fn pre_configured(
        service_name: &'static str,
        default_level: LevelFilter,
        options: TelemetryOptions,
    ) -> Self {
        let console = (!options.console_log_disabled).then(|| ConsoleOutput {
            level: LevelOverride::new(Self::CONSOLE_LOG_LEVEL, default_level),
            format: options.console_log_format.unwrap_or_default(),
        });
        let file = options.file_log_directory.map(|directory| FileOutput {
            level: LevelOverride::new(Self::FILE_LOG_LEVEL, default_level),
            directory,
            rotation_period: options.file_log_rotation_period.unwrap_or_default(),
            max_log_files: options.file_log_max_files,
        });

        Self::new(service_name)
            .with_console_output(console)
            .with_file_output(file)
    }

    pub fn init(mut self) -> Result<Self> {
        let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

        if let Some(console) = &self.console {
            let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            let layer = match console.format {
                ConsoleFormat::Plain => layer.with_filter(console.level.env_filter()).boxed(),
                ConsoleFormat::Json => layer
                    .json()
                    .with_filter(console.level.env_filter())
                    .boxed(),
            };
            layers.push(layer);
        }

        if let Some(file) = &self.file {
            let mut appender = RollingFileAppender::builder()
                .rotation(file.rotation_period.into())
                .filename_prefix(self.service_name)
                .filename_suffix(Self::FILE_LOG_SUFFIX);
            if let Some(max_log_files) = file.max_log_files {
                appender = appender.max_log_files(max_log_files);
            }
            let appender = appender
                .build(&file.directory)
                .context(InitRollingFileAppenderSnafu)?;

            let (writer, guard) = tracing_appender::non_blocking(appender);
            self.file_log_guard = Some(guard);

            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_filter(file.level.env_filter())
                    .boxed(),
            );
        }

        if !layers.is_empty() {
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers))
                .context(SetGlobalDefaultSubscriberSnafu)?;
        }

        Ok(self)
    }
}

impl Drop for Tracing {
    fn drop(&mut self) {
        if self.file_log_guard.is_some() {
            tracing::debug!(
                service.name = self.service_name,
                "flushing file logs and shutting down the writer"
            );
        }
    }
}

/// Telemetry command line arguments, flattened into the binaries' CLIs when
/// the `clap` feature is enabled.
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TelemetryOptions {
    /// Disable console logs.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub console_log_disabled: bool,

    /// Format of the console logs.
    #[cfg_attr(feature = "clap", arg(long, env, value_name = "FORMAT"))]
    pub console_log_format: Option<ConsoleFormat>,

    /// Enable logging to files located in the specified DIRECTORY.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, value_name = "DIRECTORY", group = "file_log")
    )]
    pub file_log_directory: Option<PathBuf>,

    /// Time PERIOD after which log files are rolled over.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, value_name = "PERIOD", requires = "file_log")
    )]
    pub file_log_rotation_period: Option<RotationPeriod>,

    /// Maximum NUMBER of log files to keep, older ones are deleted.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, value_name = "NUMBER", requires = "file_log")
    )]
    pub file_log_max_files: Option<usize>,
}

#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "PascalCase")]
pub enum RotationPeriod {
    Minutely,
    Hourly,
    Daily,

    #[default]
    Never,
}

impl From<RotationPeriod> for Rotation {
    fn from(value: RotationPeriod) -> Self {
        match value {
            RotationPeriod::Minutely => Self::MINUTELY,
            RotationPeriod::Hourly => Self::HOURLY,
            RotationPeriod::Daily => Self::DAILY,
            RotationPeriod::Never => Self::NEVER,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[test]
    fn nothing_enabled_by_default() {
        let tracing = Tracing::new("spki");

        assert!(tracing.console.is_none());
        assert!(tracing.file.is_none());
    }

    #[rstest]
    #[case(false, true)]
    #[case(true, false)]
    fn console_output(#[case] disabled: bool, #[case] enabled: bool) {
        let tracing = Tracing::pre_configured("spki", LevelFilter::INFO, TelemetryOptions {
            console_log_disabled: disabled,
            ..TelemetryOptions::default()
        });

        assert_eq!(tracing.console.is_some(), enabled);
        assert!(tracing.file.is_none());
    }

    #[rstest]
    #[case(None, ConsoleFormat::Plain)]
    #[case(Some(ConsoleFormat::Plain), ConsoleFormat::Plain)]
    #[case(Some(ConsoleFormat::Json), ConsoleFormat::Json)]
    fn console_format(#[case] requested: Option<ConsoleFormat>, #[case] expected: ConsoleFormat) {
        let tracing = Tracing::pre_configured("spki", LevelFilter::INFO, TelemetryOptions {
            console_log_format: requested,
            ..TelemetryOptions::default()
        });

        assert_eq!(tracing.console.as_ref().unwrap().format, expected);
    }

    #[test]
    fn file_output() {
        let tracing = Tracing::pre_configured("spki", LevelFilter::WARN, TelemetryOptions {
            console_log_disabled: true,
            file_log_directory: Some(PathBuf::from("/var/log/spki")),
            file_log_rotation_period: Some(RotationPeriod::Daily),
            file_log_max_files: Some(7),
            ..TelemetryOptions::default()
        });

        assert!(tracing.console.is_none());
        assert_eq!(
            tracing.file,
            Some(FileOutput {
                level: LevelOverride::new(Tracing::FILE_LOG_LEVEL, LevelFilter::WARN),
                directory: PathBuf::from("/var/log/spki"),
                rotation_period: RotationPeriod::Daily,
                max_log_files: Some(7),
            })
        );
    }

    #[test]
    fn later_outputs_replace_earlier_ones() {
        let tracing = Tracing::new("spki")
            .with_console_output(ConsoleOutput {
                level: LevelOverride::new("A", LevelFilter::TRACE),
                format: ConsoleFormat::Plain,
            })
            .with_console_output(ConsoleOutput {
                level: LevelOverride::new("B", LevelFilter::DEBUG),
                format: ConsoleFormat::Json,
            });

        let console = tracing.console.as_ref().unwrap();
        assert_eq!(console.level.environment_variable, "B");
        assert_eq!(console.format, ConsoleFormat::Json);
    }

    #[rstest]
    #[case("Minutely", RotationPeriod::Minutely)]
    #[case("Hourly", RotationPeriod::Hourly)]
    #[case("Never", RotationPeriod::Never)]
    fn parse_rotation_period(#[case] input: &str, #[case] expected: RotationPeriod) {
        assert_eq!(RotationPeriod::from_str(input).unwrap(), expected);
    }

    #[test]
    fn parse_console_format() {
        assert_eq!(ConsoleFormat::from_str("Json").unwrap(), ConsoleFormat::Json);
        assert_eq!(ConsoleFormat::Plain.to_string(), "Plain");
    }
}
