//! Before/after context filter
//!
//! [`ContextWindow`] reproduces grep's `-B`/`-A` behavior over a stream of
//! decoded lines: a bounded ring of candidate before-context lines, and a
//! countdown of after-context lines following each match. The caller drives
//! it line by line:
//!
//! ```
//! use dlt_decoder::context::ContextWindow;
//!
//! let mut window = ContextWindow::new(2, 1, |line: &String| line.contains("ERROR"));
//! let mut output = Vec::new();
//! for line in ["a", "b", "ERROR x", "c", "d"].map(String::from) {
//!     if window.check(&line) {
//!         output.extend(window.take_before_context());
//!         output.push(line);
//!     } else if window.is_after_context() {
//!         output.push(line);
//!     }
//! }
//! assert_eq!(output, ["a", "b", "ERROR x", "c"].map(String::from));
//! ```

use std::collections::VecDeque;

/// Stateful match filter with before/after context windows.
///
/// A `before` or `after` size of zero disables that half of the window.
/// One instance per line stream; state carries across calls.
pub struct ContextWindow<T> {
    predicate: Box<dyn FnMut(&T) -> bool + Send>,
    before: usize,
    after: usize,
    buffer: VecDeque<T>,
    after_remaining: usize,
}

impl<T: Clone> ContextWindow<T> {
    pub fn new<F>(before: usize, after: usize, predicate: F) -> Self
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        Self {
            predicate: Box::new(predicate),
            before,
            after,
            buffer: VecDeque::with_capacity(before),
            after_remaining: 0,
        }
    }

    /// Examines one line. Returns true when it matches; the caller should
    /// then drain [`take_before_context`](Self::take_before_context) and
    /// report the line itself.
    ///
    /// A non-matching line inside an active after-window is never buffered
    /// as before-context, so it cannot be reported twice. On a match the
    /// after countdown resets to the configured size; overlapping matches
    /// never accumulate.
    pub fn check(&mut self, line: &T) -> bool {
        if (self.predicate)(line) {
            self.after_remaining = self.after;
            return true;
        }
        if self.after_remaining == 0 && self.before > 0 {
            if self.buffer.len() == self.before {
                self.buffer.pop_front();
            }
            self.buffer.push_back(line.clone());
        }
        false
    }

    /// Drains the buffered before-context, oldest first. Valid immediately
    /// after [`check`](Self::check) returned true.
    pub fn take_before_context(&mut self) -> Vec<T> {
        self.buffer.drain(..).collect()
    }

    /// True while the line just checked falls inside the after-window of an
    /// earlier match. Each call for a non-matching line consumes one slot.
    pub fn is_after_context(&mut self) -> bool {
        if self.after_remaining > 0 {
            self.after_remaining -= 1;
            true
        } else {
            false
        }
    }
}

impl<T> std::fmt::Debug for ContextWindow<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextWindow")
            .field("before", &self.before)
            .field("after", &self.after)
            .field("buffered", &self.buffer.len())
            .field("after_remaining", &self.after_remaining)
            .finish()
    }
}
