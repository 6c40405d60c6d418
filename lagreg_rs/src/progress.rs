use tracing::info;

const DEFAULT_LOG_EVERY: usize = 100;

/// Counts files as the loader works through them and logs a progress line
/// every `log_every` files.
#[derive(Debug)]
pub struct LoadProgress {
    total: usize,
    loaded: usize,
    skipped: usize,
    log_every: usize,
}

impl LoadProgress {
    pub fn new(total: usize) -> Self {
        Self::with_log_every(total, DEFAULT_LOG_EVERY)
    }

    pub fn with_log_every(total: usize, log_every: usize) -> Self {
        Self {
            total,
            loaded: 0,
            skipped: 0,
            log_every: log_every.max(1),
        }
    }

    pub fn processed(&self) -> usize {
        self.loaded + self.skipped
    }

    pub fn loaded(&self) -> usize {
        self.loaded
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn record_loaded(&mut self) -> bool {
        self.loaded += 1;
        self.maybe_log()
    }

    pub fn record_skipped(&mut self) -> bool {
        self.skipped += 1;
        self.maybe_log()
    }

    /// Returns true when a progress line was emitted.
    fn maybe_log(&self) -> bool {
        let processed = self.processed();
        if processed % self.log_every != 0 || processed == self.total {
            return false;
        }
        info!(
            processed,
            total = self.total,
            loaded = self.loaded,
            skipped = self.skipped,
            "Processing ticker files"
        );
        true
    }

    pub fn finish(&self) {
        info!(
            total = self.total,
            loaded = self.loaded,
            skipped = self.skipped,
            "Finished reading ticker files"
        );
    }
}
