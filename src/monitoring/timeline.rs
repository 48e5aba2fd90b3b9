//! Execution Timeline
//!
//! Records when each experiment of a pipeline run started and finished,
//! for the end-of-run report.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Started,
    Completed,
    Failed,
}

impl EventType {
    fn is_end(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// Experiment namespace
    pub target: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Start/end events of every experiment in a pipeline run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn add_event(&mut self, target: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            target: target.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// `(start, end)` offsets in milliseconds of each finished target,
    /// ordered by start.
    pub fn spans(&self) -> Vec<(String, u128, u128)> {
        let mut starts: HashMap<&str, u128> = HashMap::new();
        let mut spans = Vec::new();

        for event in &self.events {
            let offset = event.timestamp.duration_since(self.start_time).as_millis();
            if event.event_type.is_end() {
                if let Some(start) = starts.remove(event.target.as_str()) {
                    spans.push((event.target.clone(), start, offset));
                }
            } else {
                starts.insert(&event.target, offset);
            }
        }

        spans.sort_by_key(|(_, start, _)| *start);
        spans
    }

    /// Durations in milliseconds of finished targets.
    pub fn durations(&self) -> HashMap<String, u128> {
        self.spans()
            .into_iter()
            .map(|(target, start, end)| (target, end - start))
            .collect()
    }

    /// Names of targets whose last event is a failure.
    pub fn failed(&self) -> Vec<&str> {
        let mut last: Vec<(&str, EventType)> = Vec::new();
        for event in &self.events {
            match last.iter_mut().find(|(t, _)| *t == event.target) {
                Some(slot) => slot.1 = event.event_type,
                None => last.push((&event.target, event.event_type)),
            }
        }
        last.into_iter()
            .filter(|(_, e)| *e == EventType::Failed)
            .map(|(t, _)| t)
            .collect()
    }

    /// ASCII chart with one bar per experiment, 50 columns wide.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");
        let spans = self.spans();
        let total = spans.iter().map(|(_, _, end)| *end).max().unwrap_or(0);
        if total == 0 {
            return output;
        }

        let scale = 50.0 / total as f64;
        let width = spans.iter().map(|(t, _, _)| t.len()).max().unwrap_or(0).min(32);
        for (target, start, end) in &spans {
            let offset = (*start as f64 * scale) as usize;
            let length = ((end - start) as f64 * scale).max(1.0) as usize;
            output.push_str(&format!(
                "{} |{}{}| ({} ms)\n",
                truncate(target, width),
                " ".repeat(offset),
                "#".repeat(length),
                end - start
            ));
        }
        output.push_str(&format!("\nTotal: {} ms\n", total));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or shortens `s` to exactly `width` characters.
fn truncate(s: &str, width: usize) -> String {
    let count = s.chars().count();
    if count <= width {
        format!("{:width$}", s, width = width)
    } else if width <= 3 {
        s.chars().take(width).collect()
    } else {
        let head: String = s.chars().take(width - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_spans_and_durations() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("a.w.one", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("a.w.one", EventType::Completed);

        let durations = timeline.durations();
        assert!(durations["a.w.one"] >= 20);
        assert_eq!(timeline.spans().len(), 1);
    }

    #[test]
    fn test_unfinished_target_has_no_span() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("a.w.one", EventType::Started);
        assert!(timeline.durations().is_empty());
    }

    #[test]
    fn test_failed_targets() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("one", EventType::Started);
        timeline.add_event("two", EventType::Started);
        timeline.add_event("one", EventType::Completed);
        timeline.add_event("two", EventType::Failed);

        assert_eq!(timeline.failed(), vec!["two"]);
        assert_eq!(timeline.events().len(), 4);
    }

    #[test]
    fn test_gantt_chart() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("first", EventType::Started);
        thread::sleep(Duration::from_millis(10));
        timeline.add_event("first", EventType::Completed);
        timeline.add_event("second", EventType::Started);
        thread::sleep(Duration::from_millis(10));
        timeline.add_event("second", EventType::Failed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("first"));
        assert!(chart.contains("second"));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_empty_chart_has_header() {
        assert!(ExecutionTimeline::default().gantt_chart().contains("Timeline"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc  ");
        assert_eq!(truncate("abcdefgh", 6), "abc...");
    }
}
