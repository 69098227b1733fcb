use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::classifier::{Classify, HttpClassifier};
use crate::config::Settings;
use crate::domain::Candidate;
use crate::error::CrawlError;
use crate::input;
use crate::progress;
use crate::rate::{RateController, RateSettings};
use crate::record::{Detection, ProcessedRecord};
use crate::shutdown::Shutdown;
use crate::writer::ResultWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Completed,
    Interrupted,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub state: LoopState,
    pub candidates: usize,
    pub skipped: usize,
    pub processed: usize,
    pub yes: usize,
    pub no: usize,
    pub unknown: usize,
    pub elapsed: Duration,
}

impl CrawlReport {
    fn new(candidates: usize) -> Self {
        Self {
            state: LoopState::Idle,
            candidates,
            skipped: 0,
            processed: 0,
            yes: 0,
            no: 0,
            unknown: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn count(&mut self, detection: Detection) {
        self.processed += 1;
        match detection {
            Detection::Yes => self.yes += 1,
            Detection::No => self.no += 1,
            Detection::Unknown => self.unknown += 1,
        }
    }
}

impl fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed ({} WordPress, {} not, {} unknown), {} skipped of {} in {:.1}s",
            self.processed,
            self.yes,
            self.no,
            self.unknown,
            self.skipped,
            self.candidates,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Sequential crawl over one result table.
///
/// Per candidate: wait, classify, append, remember. A row is on disk before
/// the loop looks at the next candidate, so stopping anywhere is resumable.
pub struct Crawler<C> {
    classifier: C,
    rate: RateController,
    writer: ResultWriter,
    skip: HashSet<String>,
    shutdown: Shutdown,
    progress: ProgressBar,
    progress_every: usize,
    state: LoopState,
}

impl<C: Classify> Crawler<C> {
    /// Load the skip-set and open the table for appending.
    pub fn open(
        result_path: &Path,
        classifier: C,
        rate: RateSettings,
        shutdown: Shutdown,
    ) -> Result<Self, CrawlError> {
        let skip = progress::load_processed(result_path)?;
        let writer = ResultWriter::open(result_path)?;
        Ok(Self {
            classifier,
            rate: RateController::new(rate),
            writer,
            skip,
            shutdown,
            progress: ProgressBar::hidden(),
            progress_every: 25,
            state: LoopState::Idle,
        })
    }

    pub fn with_progress_bar(mut self, pb: ProgressBar) -> Self {
        self.progress = pb;
        self
    }

    pub fn with_progress_every(mut self, n: usize) -> Self {
        self.progress_every = n.max(1);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> LoopState {
        self.state
    }

    pub async fn run(&mut self, candidates: &[Candidate]) -> Result<CrawlReport, CrawlError> {
        let start = Instant::now();
        let mut report = CrawlReport::new(candidates.len());
        self.state = LoopState::Running;

        let input_keys: HashSet<&str> = candidates.iter().map(Candidate::key).collect();
        let foreign = self.skip.iter().filter(|k| !input_keys.contains(k.as_str())).count();
        if foreign > 0 {
            warn!(
                "{} domains in {} are not in the input list",
                foreign,
                self.writer.path().display()
            );
        }
        let remaining = input_keys.iter().filter(|k| !self.skip.contains(**k)).count();
        info!(
            "{} candidates, {} already processed, {} remaining",
            candidates.len(),
            input_keys.len() - remaining,
            remaining
        );
        self.progress.set_length(remaining as u64);

        for candidate in candidates {
            if self.skip.contains(candidate.key()) {
                report.skipped += 1;
                continue;
            }

            let stop = self.shutdown.is_triggered()
                || tokio::select! {
                    biased;
                    _ = self.shutdown.triggered() => true,
                    _ = self.rate.wait() => false,
                };
            if stop {
                self.state = LoopState::Interrupted;
                break;
            }

            info!("Processing {}/{}: {}", report.processed + 1, remaining, candidate);
            let verdict = self.classifier.classify(candidate).await;
            let record = ProcessedRecord::new(candidate.raw(), verdict.detection, &verdict.metadata);
            if let Err(e) = self.writer.append(&record) {
                self.state = LoopState::Fatal;
                self.progress.abandon();
                return Err(e);
            }
            self.skip.insert(candidate.key().to_string());

            if verdict.rate_limited {
                self.rate.on_rate_limited();
            } else if verdict.detection != Detection::Unknown {
                self.rate.on_success();
            }

            match verdict.detection {
                Detection::Yes => info!("WordPress found: {}", candidate),
                Detection::No => {}
                Detection::Unknown => warn!(
                    "No verdict for {}: {}",
                    candidate,
                    verdict.metadata.get("error").and_then(|e| e.as_str()).unwrap_or("unknown")
                ),
            }
            report.count(verdict.detection);
            self.progress.inc(1);

            if report.processed % self.progress_every == 0 {
                let mins = start.elapsed().as_secs_f64() / 60.0;
                info!(
                    "Progress: {}/{} processed, {} WordPress sites found, {:.1}/min, delay {:.1}s",
                    report.processed,
                    remaining,
                    report.yes,
                    report.processed as f64 / mins.max(f64::EPSILON),
                    self.rate.current_delay().as_secs_f64()
                );
            }
        }

        if self.state == LoopState::Running {
            self.state = LoopState::Completed;
        }
        self.progress.finish_and_clear();
        report.state = self.state;
        report.elapsed = start.elapsed();
        Ok(report)
    }
}

fn progress_bar(show: bool) -> Result<ProgressBar> {
    if !show {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

/// Load the input once, then run every configured pass in order.
/// Returns the state of the last pass that ran.
pub async fn execute(settings: &Settings, mut shutdown: Shutdown, show_progress: bool) -> Result<LoopState> {
    let candidates = input::load_candidates(&settings.input_path, settings.delimiter)?;

    let mut state = LoopState::Idle;
    for (i, pass) in settings.passes.iter().enumerate() {
        if i > 0 {
            info!("Pausing {}s before the {} pass", settings.pass_pause.as_secs(), pass.name);
            let stopped = tokio::select! {
                _ = shutdown.triggered() => true,
                _ = tokio::time::sleep(settings.pass_pause) => false,
            };
            if stopped {
                return Ok(LoopState::Interrupted);
            }
        }

        info!("Starting {} pass into {}", pass.name, pass.result_path.display());
        let classifier =
            HttpClassifier::new(pass.classifier.clone()).context("Failed to build HTTP client")?;
        let mut crawler = Crawler::open(&pass.result_path, classifier, pass.rate.clone(), shutdown.clone())?
            .with_progress_bar(progress_bar(show_progress)?)
            .with_progress_every(settings.progress_every);

        let report = crawler.run(&candidates).await?;
        info!("{} pass {:?}: {}", pass.name, report.state, report);
        state = report.state;
        if state != LoopState::Completed {
            break;
        }
    }
    Ok(state)
}
