//! Blocking until an expression becomes true.

use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::KarlResult;
use crate::expression::CompiledExpression;
use crate::record::Record;
use crate::settings::WaitSettings;

use super::KnowledgeBase;

fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok()
}

impl KnowledgeBase {
    /// Compiles `text` and waits for it; see [`KnowledgeBase::wait_compiled`].
    pub fn wait(&self, text: &str, settings: &WaitSettings) -> KarlResult<Record> {
        let compiled = self.compile(text)?;
        self.wait_compiled(&compiled, settings)
    }

    /// Re-evaluates `expression` until its result is non-zero as an integer
    /// or `max_wait_time` runs out, and returns the last result.
    ///
    /// Each evaluation runs under the context lock and sends the resulting
    /// modifications before releasing it. Between evaluations the caller
    /// either sleeps until the next polling epoch (`poll_frequency > 0`,
    /// epochs advance by a fixed interval from the start) or blocks until the
    /// context changes. The deadline is checked before each suspension, so a
    /// polling wait can overrun `max_wait_time` by up to one interval. A
    /// timeout is not an error: the falsy last value is returned.
    pub fn wait_compiled(&self, expression: &CompiledExpression, settings: &WaitSettings) -> KarlResult<Record> {
        let start = Instant::now();
        let deadline = seconds(settings.max_wait_time).and_then(|limit| start.checked_add(limit));
        let poll = seconds(settings.poll_frequency).filter(|interval| !interval.is_zero());
        let mut next_epoch = start + poll.unwrap_or_default();

        self.pre_print(&settings.eval);

        let mut guard = self.lock();
        let mut last = guard.evaluate(expression, &settings.eval.update)?;
        self.flush(&mut guard, &settings.eval);

        let mut iterations = 1u64;
        while last.to_integer() == 0 && deadline.map_or(true, |deadline| Instant::now() < deadline) {
            guard = match poll {
                Some(interval) => {
                    drop(guard);
                    let now = Instant::now();
                    if next_epoch > now {
                        thread::sleep(next_epoch - now);
                    }
                    next_epoch += interval;
                    self.lock()
                }
                None => guard.wait_for_change(deadline),
            };
            last = guard.evaluate(expression, &settings.eval.update)?;
            self.flush(&mut guard, &settings.eval);
            iterations += 1;
        }
        drop(guard);

        if last.to_integer() == 0 {
            debug!(
                expression = %expression.source(),
                iterations,
                elapsed_ms = start.elapsed().as_millis(),
                "wait timed out"
            );
        } else {
            debug!(expression = %expression.source(), iterations, "wait satisfied");
        }

        self.post_print(&settings.eval);
        Ok(last)
    }
}
