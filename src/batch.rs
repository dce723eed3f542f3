use tokio::sync::watch;
use tracing::{info, warn};

use crate::indexing::Indexer;

/// Telegram rejects messages longer than this many characters.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

pub const NO_URLS_MESSAGE: &str = "❌ No URLs provided.";

/// Result of one publish call. Every URL of a batch yields exactly one of these.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Submitted {
        url: String,
        response: serde_json::Value,
    },
    Failed {
        url: String,
        error: String,
    },
}

/// Outcomes of a batch plus the URLs left untouched after cancellation.
#[derive(Debug, Default)]
pub struct BatchRun {
    pub outcomes: Vec<SubmitOutcome>,
    pub skipped: usize,
}

/// Trim each line and drop blanks. Everything else, duplicates and
/// malformed URLs included, is passed through.
pub fn parse_url_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn submit_one(indexer: &dyn Indexer, url: &str) -> SubmitOutcome {
    match indexer.publish(url).await {
        Ok(response) => SubmitOutcome::Submitted {
            url: url.to_string(),
            response,
        },
        Err(e) => {
            warn!("Submission failed for {}: {:#}", url, e);
            SubmitOutcome::Failed {
                url: url.to_string(),
                error: format!("{:#}", e),
            }
        }
    }
}

/// Submit every URL in order, one at a time.
pub async fn submit_batch(indexer: &dyn Indexer, urls: &[String]) -> Vec<SubmitOutcome> {
    let mut outcomes = Vec::with_capacity(urls.len());
    for url in urls {
        outcomes.push(submit_one(indexer, url).await);
    }
    outcomes
}

/// Like [`submit_batch`], but checks `cancel` before each URL and stops once it
/// reads `true`.
pub async fn submit_batch_until(
    indexer: &dyn Indexer,
    urls: &[String],
    cancel: &watch::Receiver<bool>,
) -> BatchRun {
    let mut run = BatchRun {
        outcomes: Vec::with_capacity(urls.len()),
        skipped: 0,
    };
    for (i, url) in urls.iter().enumerate() {
        if *cancel.borrow() {
            run.skipped = urls.len() - i;
            info!("Batch cancelled, {} URL(s) skipped", run.skipped);
            break;
        }
        run.outcomes.push(submit_one(indexer, url).await);
    }
    run
}

/// Aggregated view of a batch, ready to be rendered as one chat message.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub submitted: usize,
    pub errors: Vec<String>,
    pub skipped: usize,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: &[SubmitOutcome]) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            match outcome {
                SubmitOutcome::Submitted { .. } => report.submitted += 1,
                SubmitOutcome::Failed { url, error } => {
                    report.errors.push(format!("❌ {} – {}", url, error));
                }
            }
        }
        report
    }

    pub fn from_run(run: &BatchRun) -> Self {
        Self {
            skipped: run.skipped,
            ..Self::from_outcomes(&run.outcomes)
        }
    }

    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        if self.submitted > 0 {
            lines.push(format!(
                "✅ Successfully submitted {} URL(s).",
                self.submitted
            ));
        }
        if self.skipped > 0 {
            lines.push(format!(
                "⚠️ Stopped early, {} URL(s) not submitted.",
                self.skipped
            ));
        }
        lines.extend(self.errors.iter().cloned());

        if lines.is_empty() {
            return NO_URLS_MESSAGE.to_string();
        }
        truncate_message(&lines.join("\n"), TELEGRAM_MESSAGE_LIMIT)
    }
}

/// Cut `text` to at most `max_chars` characters, never inside a character.
pub fn truncate_message(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
