use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};

use crate::classifier::ClassifierSettings;
use crate::rate::RateSettings;
use crate::retry::RetryPolicy;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko)";
const PASS_PAUSE: Duration = Duration::from_secs(10);
const REST_PATHS: [&str; 3] = ["/wp-json/", "/wp-json/wp/v2/types", "/wp-json/wp/v2/posts?per_page=1"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Short delays, a single retry
    Simple,
    /// Longer delays and timeouts, more retries
    Robust,
    /// A simple pass followed by a robust pass into a second table
    Sequential,
}

/// File locations shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct Paths {
    /// Candidate domains, first column
    #[arg(short, long, env = "CRAWLER_INPUT_PATH", default_value = "acuity_idns.csv")]
    pub input: PathBuf,

    /// Result table (appended to, never rewritten)
    #[arg(short, long, env = "CRAWLER_RESULT_PATH", default_value = "wordpress_idns.csv")]
    pub output: PathBuf,

    /// Field delimiter of the input table
    #[arg(long, env = "CRAWLER_DELIMITER", default_value_t = ',')]
    pub delimiter: char,
}

impl Paths {
    pub fn delimiter_byte(&self) -> Result<u8> {
        if !self.delimiter.is_ascii() {
            bail!("delimiter must be a single ASCII character, got {:?}", self.delimiter);
        }
        Ok(self.delimiter as u8)
    }
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub paths: Paths,

    #[arg(short, long, env = "CRAWLER_MODE", value_enum, default_value_t = Mode::Simple)]
    pub mode: Mode,

    /// Base delay between requests, seconds (default: by mode)
    #[arg(long, env = "CRAWLER_REQUEST_DELAY_SECONDS")]
    pub request_delay: Option<f64>,

    /// Retries per request after the first attempt (default: by mode)
    #[arg(long, env = "CRAWLER_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Upper bound for retry and rate-limit backoff, seconds (default: by mode)
    #[arg(long, env = "CRAWLER_BACKOFF_CEILING_SECONDS")]
    pub backoff_ceiling: Option<f64>,

    /// Per-attempt request timeout, seconds (default: by mode)
    #[arg(long, env = "CRAWLER_TIMEOUT_SECONDS")]
    pub timeout: Option<f64>,

    #[arg(long, env = "CRAWLER_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Skip the REST API check when the homepage shows no marker
    #[arg(long, env = "CRAWLER_NO_REST_PROBE")]
    pub no_rest_probe: bool,

    /// Subdomain prefixes tried when the bare domain shows no WordPress,
    /// comma separated, empty for none (default: by mode)
    #[arg(long, env = "CRAWLER_HOST_PREFIXES", value_delimiter = ',')]
    pub prefixes: Option<Vec<String>>,

    /// Log a progress line every N processed domains
    #[arg(long, default_value_t = 25)]
    pub progress_every: usize,
}

/// Retry and pacing numbers for one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuning {
    pub request_delay: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub backoff_ceiling: Duration,
    pub timeout: Duration,
    pub jitter: Duration,
    pub prefixes: &'static [&'static str],
}

impl Tuning {
    pub fn simple() -> Self {
        Self {
            request_delay: Duration::from_secs(2),
            max_retries: 1,
            retry_backoff: Duration::from_secs(2),
            backoff_ceiling: Duration::from_secs(12),
            timeout: Duration::from_secs(30),
            jitter: Duration::ZERO,
            prefixes: &["www."],
        }
    }

    pub fn robust() -> Self {
        Self {
            request_delay: Duration::from_secs(3),
            max_retries: 3,
            retry_backoff: Duration::from_secs(10),
            backoff_ceiling: Duration::from_secs(60),
            timeout: Duration::from_secs(45),
            jitter: Duration::from_secs(2),
            prefixes: &["www.", "blog.", "news."],
        }
    }
}

#[derive(Debug, Clone)]
pub struct PassSettings {
    pub name: &'static str,
    pub result_path: PathBuf,
    pub classifier: ClassifierSettings,
    pub rate: RateSettings,
}

/// Everything a run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub input_path: PathBuf,
    pub delimiter: u8,
    pub progress_every: usize,
    pub passes: Vec<PassSettings>,
    pub pass_pause: Duration,
}

impl RunArgs {
    pub fn settings(&self) -> Result<Settings> {
        let output = &self.paths.output;
        let passes = match self.mode {
            Mode::Simple => vec![self.pass("simple", Tuning::simple(), output.clone())?],
            Mode::Robust => vec![self.pass("robust", Tuning::robust(), output.clone())?],
            Mode::Sequential => vec![
                self.pass("simple", Tuning::simple(), output.clone())?,
                self.pass("robust", Tuning::robust(), second_pass_path(output))?,
            ],
        };

        Ok(Settings {
            input_path: self.paths.input.clone(),
            delimiter: self.paths.delimiter_byte()?,
            progress_every: self.progress_every.max(1),
            passes,
            pass_pause: PASS_PAUSE,
        })
    }

    fn pass(&self, name: &'static str, mut tuning: Tuning, result_path: PathBuf) -> Result<PassSettings> {
        if let Some(secs) = self.request_delay {
            tuning.request_delay = seconds(secs, "request delay")?;
        }
        if let Some(n) = self.max_retries {
            tuning.max_retries = n;
        }
        if let Some(secs) = self.backoff_ceiling {
            tuning.backoff_ceiling = seconds(secs, "backoff ceiling")?;
        }
        if let Some(secs) = self.timeout {
            tuning.timeout = seconds(secs, "timeout")?;
        }
        let prefixes = match &self.prefixes {
            Some(list) => list
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            None => tuning.prefixes.iter().map(|p| p.to_string()).collect(),
        };

        Ok(PassSettings {
            name,
            result_path,
            classifier: ClassifierSettings {
                retry: RetryPolicy {
                    max_retries: tuning.max_retries,
                    initial_backoff: tuning.retry_backoff.min(tuning.backoff_ceiling),
                    multiplier: 2.0,
                    max_backoff: tuning.backoff_ceiling,
                    timeout: tuning.timeout,
                },
                user_agent: self.user_agent.clone(),
                schemes: vec!["https".into(), "http".into()],
                prefixes,
                probe_rest_api: !self.no_rest_probe,
                rest_paths: REST_PATHS.iter().map(|p| p.to_string()).collect(),
            },
            rate: RateSettings {
                base: tuning.request_delay,
                ceiling: tuning.backoff_ceiling,
                jitter: tuning.jitter,
                ..RateSettings::default()
            },
        })
    }
}

fn seconds(secs: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("invalid {what}: {secs}"))
}

/// `out/wordpress_idns.csv` -> `out/wordpress_idns.robust.csv`
pub fn second_pass_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.robust.{}", stem, ext.to_string_lossy()),
        None => format!("{}.robust", stem),
    };
    path.with_file_name(name)
}
