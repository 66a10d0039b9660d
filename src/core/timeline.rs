//! Per-worker timeline of events for the run report

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CategoryType {
    /// System resources (CPU, memory, network)
    SysMonitor,
    /// Anything else, e.g. values recorded by stages
    Custom,
}

/// Named event series; categories order by name first
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub kind: CategoryType,
}

impl Category {
    pub fn sys(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CategoryType::SysMonitor,
        }
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CategoryType::Custom,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A timeline event; timestamps and durations are in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A sample in a series of changing values
    Value { timestamp: u64, value: f64 },
    /// A one-off marker
    Text { timestamp: u64, text: String },
    /// Something that lasted for a while
    Interval {
        timestamp: u64,
        description: String,
        duration: u64,
    },
}

impl Event {
    pub fn value(value: f64) -> Self {
        Event::Value {
            timestamp: now_millis(),
            value,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Event::Text {
            timestamp: now_millis(),
            text: text.into(),
        }
    }

    pub fn interval(timestamp: u64, description: impl Into<String>, duration: u64) -> Self {
        Event::Interval {
            timestamp,
            description: description.into(),
            duration,
        }
    }

    pub fn started(&self) -> u64 {
        match self {
            Event::Value { timestamp, .. }
            | Event::Text { timestamp, .. }
            | Event::Interval { timestamp, .. } => *timestamp,
        }
    }

    pub fn ended(&self) -> u64 {
        match self {
            Event::Interval {
                timestamp, duration, ..
            } => timestamp.saturating_add(*duration),
            _ => self.started(),
        }
    }
}

#[derive(Default)]
struct Ledger {
    events: BTreeMap<Category, Vec<Event>>,
    first_timestamp: Option<u64>,
    last_timestamp: Option<u64>,
}

/// Append-only event ledger of one worker
///
/// All access goes through a single mutex, so stressors on any thread may
/// add events concurrently.
pub struct Timeline {
    worker_index: usize,
    inner: Mutex<Ledger>,
}

impl Timeline {
    pub fn new(worker_index: usize) -> Self {
        Self {
            worker_index,
            inner: Mutex::new(Ledger::default()),
        }
    }

    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    pub fn add_event(&self, category: Category, event: Event) {
        let mut ledger = self.inner.lock();
        let (started, ended) = (event.started(), event.ended());
        ledger.first_timestamp = Some(ledger.first_timestamp.map_or(started, |t| t.min(started)));
        ledger.last_timestamp = Some(ledger.last_timestamp.map_or(ended, |t| t.max(ended)));
        ledger.events.entry(category).or_default().push(event);
    }

    pub fn categories(&self) -> Vec<Category> {
        self.inner.lock().events.keys().cloned().collect()
    }

    pub fn events(&self, category: &Category) -> Vec<Event> {
        self.inner
            .lock()
            .events
            .get(category)
            .cloned()
            .unwrap_or_default()
    }

    /// Earliest event start; `None` while the timeline is empty
    pub fn first_timestamp(&self) -> Option<u64> {
        self.inner.lock().first_timestamp
    }

    /// Latest event end; `None` while the timeline is empty
    pub fn last_timestamp(&self) -> Option<u64> {
        self.inner.lock().last_timestamp
    }

    pub fn snapshot(&self) -> TimelineSnapshot {
        let ledger = self.inner.lock();
        TimelineSnapshot {
            worker_index: self.worker_index,
            first_timestamp: ledger.first_timestamp,
            last_timestamp: ledger.last_timestamp,
            categories: ledger
                .events
                .iter()
                .map(|(category, events)| CategoryEvents {
                    category: category.clone(),
                    events: events.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEvents {
    pub category: Category,
    pub events: Vec<Event>,
}

/// Serializable copy of a worker's timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSnapshot {
    pub worker_index: usize,
    pub first_timestamp: Option<u64>,
    pub last_timestamp: Option<u64>,
    pub categories: Vec<CategoryEvents>,
}

impl TimelineSnapshot {
    pub fn events(&self, category: &Category) -> &[Event] {
        self.categories
            .iter()
            .find(|c| &c.category == category)
            .map(|c| c.events.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_and_last_timestamp() {
        let timeline = Timeline::new(0);
        assert_eq!(timeline.first_timestamp(), None);

        let throughput = Category::custom("Throughput");
        let stages = Category::custom("Stages");
        timeline.add_event(throughput.clone(), Event::Value { timestamp: 100, value: 1.5 });
        timeline.add_event(stages.clone(), Event::interval(200, "StrongCounterTest", 50));

        assert_eq!(timeline.first_timestamp(), Some(100));
        assert_eq!(timeline.last_timestamp(), Some(250));
        assert_eq!(timeline.categories(), vec![stages.clone(), throughput.clone()]);
        assert_eq!(timeline.events(&stages).len(), 1);
    }

    #[test]
    fn test_interval_end_saturates() {
        let event = Event::interval(u64::MAX - 10, "Unbounded", 100);
        assert_eq!(event.started(), u64::MAX - 10);
        assert_eq!(event.ended(), u64::MAX);
    }

    #[test]
    fn test_categories_order_by_name() {
        let mut categories = vec![
            Category::sys("cpu"),
            Category::custom("Stages"),
            Category::custom("Alpha"),
        ];
        categories.sort();
        let names: Vec<_> = categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Stages", "cpu"]);
    }

    #[test]
    fn test_concurrent_appends() {
        let timeline = Arc::new(Timeline::new(3));
        let category = Category::custom("Markers");
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let timeline = timeline.clone();
                let category = category.clone();
                std::thread::spawn(move || {
                    for j in 0..100u64 {
                        timeline.add_event(
                            category.clone(),
                            Event::Text {
                                timestamp: 1_000 + i * 100 + j,
                                text: format!("{}-{}", i, j),
                            },
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(timeline.events(&category).len(), 800);
        assert_eq!(timeline.first_timestamp(), Some(1_000));
        assert_eq!(timeline.last_timestamp(), Some(1_799));
    }

    #[test]
    fn test_snapshot_round_trips_through_json() {
        let timeline = Timeline::new(1);
        let category = Category::custom("Stages");
        timeline.add_event(category.clone(), Event::interval(10, "ServiceStart", 5));
        let snapshot = timeline.snapshot();

        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: TimelineSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.events(&category).len(), 1);
        assert_eq!(decoded.last_timestamp, Some(15));
    }
}
