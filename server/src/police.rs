//! Per-identity abuse scoring with exponential decay
//!
//! Every action a client takes adds a cost to the score kept for its
//! identity (normally the network address). Scores halve every `halflife`,
//! so bursts are forgiven while sustained abuse climbs past the threshold.
//! An arrested identity is refused regardless of score until pardoned.

use crate::error::ChatError;
use log::{debug, info};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

pub const DEFAULT_HALFLIFE: Duration = Duration::from_secs(30);
pub const DEFAULT_THRESHOLD: f64 = 15.0;

/// Abuse state tracked for one identity
#[derive(Debug, Clone)]
pub struct Record {
    /// Score as of `last_update`
    pub score: f64,
    pub last_update: Instant,
    pub arrested: bool,
}

impl Record {
    fn new(now: Instant) -> Self {
        Self {
            score: 0.0,
            last_update: now,
            arrested: false,
        }
    }
}

/// Rate limiter keyed by client identity
#[derive(Debug)]
pub struct Police {
    records: HashMap<String, Record>,
    halflife: Duration,
    threshold: f64,
}

impl Default for Police {
    fn default() -> Self {
        Self::new(DEFAULT_HALFLIFE, DEFAULT_THRESHOLD)
    }
}

impl Police {
    pub fn new(halflife: Duration, threshold: f64) -> Self {
        Self {
            records: HashMap::new(),
            halflife,
            threshold,
        }
    }

    fn search(&mut self, id: &str, now: Instant) -> &mut Record {
        self.records
            .entry(id.to_string())
            .or_insert_with(|| Record::new(now))
    }

    /// Scores an action and returns whether it is allowed.
    pub fn check(&mut self, id: &str, cost: f64) -> bool {
        self.check_at(id, cost, Instant::now())
    }

    /// Like [`Police::check`] with an explicit clock reading.
    ///
    /// Arrested identities are refused without touching their score.
    /// Otherwise the stored score decays to `now`, `cost` is added, and the
    /// action is allowed while the result stays below the threshold.
    pub fn check_at(&mut self, id: &str, cost: f64, now: Instant) -> bool {
        let halflife = self.halflife.as_secs_f64();
        let threshold = self.threshold;
        let record = self.search(id, now);
        if record.arrested {
            return false;
        }

        let elapsed = now.saturating_duration_since(record.last_update).as_secs_f64();
        record.score *= 2f64.powf(-elapsed / halflife);
        record.score += cost;
        record.last_update = now;

        record.score < threshold
    }

    /// Blocks an identity until it is pardoned.
    pub fn arrest(&mut self, id: &str) {
        self.search(id, Instant::now()).arrested = true;
    }

    /// Lifts an arrest. The score is left as it was.
    pub fn pardon(&mut self, id: &str) {
        self.search(id, Instant::now()).arrested = false;
    }

    pub fn is_arrested(&self, id: &str) -> bool {
        self.records.get(id).is_some_and(|record| record.arrested)
    }

    pub fn record(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    /// Arrests every identity listed in `text`, one per line.
    ///
    /// Blank lines and lines starting with `#` are skipped. Returns the
    /// number of identities arrested.
    pub fn import_blocklist(&mut self, text: &str) -> usize {
        let mut count = 0;
        for id in text.lines() {
            if id.is_empty() || id.starts_with('#') {
                continue;
            }
            self.arrest(id);
            count += 1;
        }
        count
    }

    /// Imports the jail file at `path`. A missing file arrests nobody.
    pub fn load_jail(&mut self, path: impl AsRef<Path>) -> Result<usize, ChatError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No jail file at {}", path.display());
                return Ok(0);
            }
            Err(source) => {
                return Err(ChatError::Io {
                    target: path.display().to_string(),
                    source,
                })
            }
        };

        let count = self.import_blocklist(&text);
        info!("Loaded jail '{}' ({} identities)", path.display(), count);
        Ok(count)
    }
}
