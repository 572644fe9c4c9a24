//! Registry of object classes seen since startup.
//!
use serde::Serialize;

/// Source of the time of day recorded for newly seen objects.
pub trait Clock: Send {
    fn time_of_day(&self) -> String;
}

/// Local wall clock, formatted as `HH:MM:SS`.
pub struct LocalClock;

impl Clock for LocalClock {
    fn time_of_day(&self) -> String {
        chrono::Local::now().format("%H:%M:%S").to_string()
    }
}

/// Class label together with the time it was first detected.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SeenObject {
    pub label: String,
    pub first_seen: String,
}

impl SeenObject {
    /// Line shown in the detected-objects list.
    pub fn display_line(&self) -> String {
        format!("{} - first detected at {}", self.label, self.first_seen)
    }
}

/// Insertion-ordered set of seen labels. Entries are never updated or removed.
#[derive(Debug, Default)]
pub struct SeenObjects {
    entries: Vec<SeenObject>,
}

impl SeenObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `label` if it was not seen before. Returns whether an entry was added.
    pub fn record(&mut self, label: &str, clock: &dyn Clock) -> bool {
        if self.contains(label) {
            return false;
        }

        self.entries.push(SeenObject {
            label: label.to_owned(),
            first_seen: clock.time_of_day(),
        });
        true
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.iter().any(|entry| entry.label == label)
    }

    pub fn entries(&self) -> &[SeenObject] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Full list as displayed, one line per entry in order of first detection.
    pub fn display_lines(&self) -> Vec<String> {
        self.entries.iter().map(SeenObject::display_line).collect()
    }
}

#[cfg(test)]
mod test {

    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Clock ticking one second per reading, starting at 12:00:00.
    #[derive(Default)]
    struct TickingClock {
        seconds: AtomicU32,
    }

    impl Clock for TickingClock {
        fn time_of_day(&self) -> String {
            let seconds = self.seconds.fetch_add(1, Ordering::Relaxed);
            format!("12:00:{seconds:02}")
        }
    }

    #[test]
    fn same_label_is_recorded_once() {
        let clock = TickingClock::default();
        let mut seen = SeenObjects::new();

        assert!(seen.record("person", &clock));
        assert!(!seen.record("person", &clock));

        assert_eq!(seen.len(), 1);
        assert_eq!(seen.entries()[0].first_seen, "12:00:00");
    }

    #[test]
    fn distinct_labels_keep_their_own_times() {
        let clock = TickingClock::default();
        let mut seen = SeenObjects::new();

        seen.record("person", &clock);
        seen.record("cup", &clock);
        seen.record("person", &clock);

        assert_eq!(
            seen.display_lines(),
            vec![
                "person - first detected at 12:00:00".to_owned(),
                "cup - first detected at 12:00:01".to_owned(),
            ]
        );
    }

    #[test]
    fn local_clock_formats_time_of_day() {
        let time = LocalClock.time_of_day();
        let parts: Vec<_> = time.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|part| part.len() == 2));
    }
}
