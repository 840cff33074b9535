//! Ordered, delay-gated test queue.
//!
//! Ordering is by `priority` (lower first), stable on ties. Delays count
//! down while queued but never reorder the queue; only the head is checked
//! for eligibility, so a due test behind a not-yet-due head waits its turn.

use std::collections::VecDeque;
use std::fmt;

use crate::checks::Test;

/// A queued test: ordering key, countdown delay and payload.
pub struct ScheduledTest {
    priority: u32,
    delay: i64,
    test: Box<dyn Test>,
}

impl ScheduledTest {
    pub fn new(priority: u32, delay: i64, test: Box<dyn Test>) -> Self {
        Self {
            priority,
            delay,
            test,
        }
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Seconds until eligible. Zero or negative means due.
    pub fn delay(&self) -> i64 {
        self.delay
    }

    pub fn is_due(&self) -> bool {
        self.delay <= 0
    }

    pub fn name(&self) -> &str {
        self.test.name()
    }

    pub fn test_mut(&mut self) -> &mut dyn Test {
        self.test.as_mut()
    }
}

impl fmt::Debug for ScheduledTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTest")
            .field("name", &self.name())
            .field("priority", &self.priority)
            .field("delay", &self.delay)
            .finish()
    }
}

/// One or more tests submitted together.
#[derive(Debug, Default)]
pub struct TestBatch(Vec<ScheduledTest>);

impl From<ScheduledTest> for TestBatch {
    fn from(test: ScheduledTest) -> Self {
        TestBatch(vec![test])
    }
}

impl From<Vec<ScheduledTest>> for TestBatch {
    fn from(tests: Vec<ScheduledTest>) -> Self {
        TestBatch(tests)
    }
}

impl IntoIterator for TestBatch {
    type Item = ScheduledTest;
    type IntoIter = std::vec::IntoIter<ScheduledTest>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[derive(Debug, Default)]
pub struct TestQueue {
    items: VecDeque<ScheduledTest>,
}

impl TestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append and re-sort by priority. `sort_by_key` is stable, so equal
    /// priorities keep insertion order.
    pub fn add(&mut self, batch: impl Into<TestBatch>) {
        let batch: TestBatch = batch.into();
        self.items.extend(batch);
        self.items.make_contiguous().sort_by_key(|t| t.priority);
    }

    pub fn decrement_all(&mut self, elapsed: i64) {
        if elapsed == 0 {
            return;
        }
        for item in &mut self.items {
            item.delay = item.delay.saturating_sub(elapsed);
        }
    }

    /// The head, if and only if it is due.
    pub fn peek_due(&self) -> Option<&ScheduledTest> {
        self.items.front().filter(|t| t.is_due())
    }

    /// Remove the head. Callers check [`peek_due`](Self::peek_due) first.
    pub fn pop(&mut self) -> Option<ScheduledTest> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduledTest> {
        self.items.iter()
    }
}
