// Completion barrier for a batch of inference requests.
//
// The tracker is created with the number of requests up front. Every request
// ends in exactly one `complete` (reply from the service, success or error)
// or `fail_local` (never sent, e.g. unreadable file). When the last one
// lands, the `finally` closure runs once and `wait` returns.
//
// Pending count, statistics, start times and the output sink all sit behind
// one mutex, so lines from concurrent completions never interleave.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{mpsc, Mutex};
use std::time::{Duration, Instant};

use indicatif::ProgressBar;

use crate::error::{ClassinetError, Result};

pub type Sink = Box<dyn Write + Send>;
pub type Finally = Box<dyn FnOnce(&BatchSummary, &mut dyn Write) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total_files: usize,
    /// Requests that reached the service.
    pub real_files: usize,
    pub total_latency_ms: u128,
    pub elapsed: Duration,
}

impl BatchSummary {
    /// Mean latency over real files; 0 when none reached the service.
    pub fn average_latency_ms(&self) -> u128 {
        self.total_latency_ms / (self.real_files.max(1) as u128)
    }

    pub fn rate_per_sec(&self) -> u128 {
        1000 * self.total_files as u128 / self.elapsed.as_millis().max(1)
    }

    /// The two statistics lines printed at the end of a batch.
    pub fn report(&self) -> String {
        format!(
            "total time: {}ms; number of files: {}; rate: {} images/sec;\naverage latency on real files: {}ms;\n",
            self.elapsed.as_millis(),
            self.total_files,
            self.rate_per_sec(),
            self.average_latency_ms()
        )
    }
}

/// One result line: `[latency: <ms>ms; ]file: <path>; <result>`.
pub fn format_line(id: &str, result: &Result<String>, latency: Option<u128>) -> String {
    let mut line = String::new();
    if let Some(ms) = latency {
        line.push_str(&format!("latency: {}ms; ", ms));
    }
    line.push_str(&format!("file: {};", id));
    match result {
        Ok(inference) => line.push_str(&format!(" {}\n", inference.trim_end())),
        Err(e) => line.push_str(&format!(" error: {};\n", e)),
    }
    line
}

struct BatchState {
    pending: usize,
    real_files: usize,
    total_latency_ms: u128,
    in_progress: HashMap<String, Instant>,
    sink: Sink,
    finally: Option<Finally>,
    done: Option<mpsc::SyncSender<BatchSummary>>,
}

pub struct BatchTracker {
    total: usize,
    started: Instant,
    show_latency: bool,
    progress: Option<ProgressBar>,
    state: Mutex<BatchState>,
    done_rx: Mutex<Option<mpsc::Receiver<BatchSummary>>>,
}

impl BatchTracker {
    /// Tracker for `total` requests. With `total == 0` the batch is already
    /// finished and `finally` runs immediately.
    pub fn new(total: usize, sink: Sink, show_latency: bool, finally: Finally) -> Self {
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let tracker = BatchTracker {
            total,
            started: Instant::now(),
            show_latency,
            progress: None,
            state: Mutex::new(BatchState {
                pending: total,
                real_files: 0,
                total_latency_ms: 0,
                in_progress: HashMap::new(),
                sink,
                finally: Some(finally),
                done: Some(done_tx),
            }),
            done_rx: Mutex::new(Some(done_rx)),
        };
        if total == 0 {
            if let Ok(mut state) = tracker.state.lock() {
                tracker.finish(&mut state);
            }
        }
        tracker
    }

    /// Tick `progress` on every completion. Lines are written with the bar
    /// hidden.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Record the start time of request `id`.
    pub fn begin(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock()?;
        state.in_progress.insert(id.to_string(), Instant::now());
        Ok(())
    }

    /// The service answered request `id`.
    pub fn complete(&self, id: &str, result: Result<String>) -> Result<()> {
        let mut state = self.state.lock()?;
        let started = state.in_progress.remove(id).unwrap_or_else(|| {
            log::warn!("Completion for {} without a recorded start", id);
            self.started
        });
        let latency = started.elapsed().as_millis();
        state.real_files += 1;
        state.total_latency_ms += latency;

        let line = format_line(id, &result, self.show_latency.then_some(latency));
        self.write_and_count(&mut state, &line);
        Ok(())
    }

    /// Request `id` was never sent. Counted, but kept out of the latency
    /// statistics.
    pub fn fail_local(&self, id: &str, reason: &str) -> Result<()> {
        let mut state = self.state.lock()?;
        state.in_progress.remove(id);
        let line = format!(
            "{}file: {}; error: {};\n",
            if self.show_latency { "latency: 0ms; " } else { "" },
            id,
            reason
        );
        self.write_and_count(&mut state, &line);
        Ok(())
    }

    /// Block until every request has completed.
    pub fn wait(&self) -> Result<BatchSummary> {
        let rx = self
            .done_rx
            .lock()?
            .take()
            .ok_or_else(|| ClassinetError::Service("batch already awaited".into()))?;
        rx.recv()
            .map_err(|_| ClassinetError::Service("batch ended without completing".into()))
    }

    fn write_and_count(&self, state: &mut BatchState, line: &str) {
        let sink = &mut state.sink;
        let written = match &self.progress {
            Some(progress) => progress.suspend(|| sink.write_all(line.as_bytes())),
            None => sink.write_all(line.as_bytes()),
        };
        if let Err(e) = written.and_then(|_| sink.flush()) {
            log::warn!("Unable to write result line: {}", e);
        }
        if let Some(progress) = &self.progress {
            progress.inc(1);
        }

        match state.pending {
            0 => log::warn!("Completion received after the batch finished"),
            1 => {
                state.pending = 0;
                self.finish(state);
            }
            _ => state.pending -= 1,
        }
    }

    fn finish(&self, state: &mut BatchState) {
        let summary = BatchSummary {
            total_files: self.total,
            real_files: state.real_files,
            total_latency_ms: state.total_latency_ms,
            elapsed: self.started.elapsed(),
        };
        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }
        if let Some(finally) = state.finally.take() {
            finally(&summary, &mut state.sink);
        }
        if let Some(done) = state.done.take() {
            let _ = done.send(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn format_line_variants() {
        assert_eq!(
            format_line("a.jpg", &Ok("0 0.5 0.5 0.1 0.1\n".into()), None),
            "file: a.jpg; 0 0.5 0.5 0.1 0.1\n"
        );
        assert_eq!(
            format_line("a.jpg", &Err(ClassinetError::Service("down".into())), Some(12)),
            "latency: 12ms; file: a.jpg; error: Service error: down;\n"
        );
    }

    #[test]
    fn average_never_divides_by_zero() {
        let summary = BatchSummary {
            total_files: 3,
            real_files: 0,
            total_latency_ms: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(summary.average_latency_ms(), 0);
        assert_eq!(summary.rate_per_sec(), 3000);
    }

    #[test]
    fn local_failures_are_counted_but_not_timed() {
        let buffer = Buffer::default();
        let tracker = BatchTracker::new(
            2,
            Box::new(buffer.clone()),
            true,
            Box::new(|_: &BatchSummary, _: &mut dyn Write| {}),
        );
        tracker.fail_local("missing.jpg", "unable to read file").unwrap();
        tracker.begin("b.jpg").unwrap();
        tracker.complete("b.jpg", Ok("ok".into())).unwrap();
        let summary = tracker.wait().unwrap();
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.real_files, 1);
        assert!(buffer
            .text()
            .starts_with("latency: 0ms; file: missing.jpg; error: unable to read file;\n"));
    }

    #[test]
    fn empty_batch_finishes_immediately() {
        let fired = Arc::new(Mutex::new(0));
        let counter = fired.clone();
        let tracker = BatchTracker::new(
            0,
            Box::new(Buffer::default()),
            false,
            Box::new(move |_: &BatchSummary, _: &mut dyn Write| *counter.lock().unwrap() += 1),
        );
        assert_eq!(tracker.wait().unwrap().total_files, 0);
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[test]
    fn wait_only_once() {
        let tracker = BatchTracker::new(
            0,
            Box::new(Buffer::default()),
            false,
            Box::new(|_: &BatchSummary, _: &mut dyn Write| {}),
        );
        tracker.wait().unwrap();
        assert!(tracker.wait().is_err());
    }
}
