//! Hardware event codes and per-code event grouping

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

/// TTL code to event label table, passed explicitly to whoever needs it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCodeMap {
    labels: BTreeMap<u16, String>,
    ignored: BTreeSet<u16>,
}

impl EventCodeMap {
    pub fn new(labels: BTreeMap<u16, String>) -> Self {
        Self {
            labels,
            ignored: BTreeSet::new(),
        }
    }

    /// Build from exported `(code, name)` entries. Renames override (or add)
    /// labels; codes in `skip` are dropped silently wherever they appear.
    pub fn from_entries<I>(entries: I, renames: &BTreeMap<u16, String>, skip: &[u16]) -> Self
    where
        I: IntoIterator<Item = (u16, String)>,
    {
        let mut labels: BTreeMap<u16, String> = entries.into_iter().collect();
        for (code, name) in renames {
            labels.insert(*code, name.clone());
        }
        let ignored: BTreeSet<u16> = skip.iter().copied().collect();
        labels.retain(|code, _| !ignored.contains(code));
        Self { labels, ignored }
    }

    pub fn label(&self, code: u16) -> Option<&str> {
        self.labels.get(&code).map(String::as_str)
    }

    pub fn is_ignored(&self, code: u16) -> bool {
        self.ignored.contains(&code)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &str)> {
        self.labels.iter().map(|(code, label)| (*code, label.as_str()))
    }
}

/// All occurrences of one labelled code, in trial order
#[derive(Debug, Clone, PartialEq)]
pub struct EventSeries {
    pub code: u16,
    pub label: String,
    pub times: Vec<f64>,
}

impl EventSeries {
    pub fn description(&self) -> String {
        format!("The event times for code '{}'.", self.code)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedEvents {
    pub series: Vec<EventSeries>,
    /// Codes seen in the recording but absent from the map
    pub skipped_codes: Vec<u16>,
}

impl GroupedEvents {
    pub fn event_count(&self) -> usize {
        self.series.iter().map(|s| s.times.len()).sum()
    }
}

/// Group per-trial event times by code. Unknown codes are skipped with a
/// warning and listed in `skipped_codes`.
pub fn group_events(
    map: &EventCodeMap,
    codes_per_trial: &[Vec<u16>],
    times_per_trial: &[Vec<f64>],
) -> GroupedEvents {
    let mut by_code: BTreeMap<u16, Vec<f64>> = BTreeMap::new();
    for (codes, times) in codes_per_trial.iter().zip(times_per_trial) {
        for (&code, &time) in codes.iter().zip(times) {
            by_code.entry(code).or_default().push(time);
        }
    }

    let mut grouped = GroupedEvents::default();
    for (code, times) in by_code {
        if map.is_ignored(code) {
            debug!("Dropping {} events with ignored code {}", times.len(), code);
            continue;
        }
        match map.label(code) {
            Some(label) => grouped.series.push(EventSeries {
                code,
                label: label.to_string(),
                times,
            }),
            None => {
                warn!(
                    "Event code '{}' not found in the event mapping. {} events will not be added",
                    code,
                    times.len()
                );
                grouped.skipped_codes.push(code);
            }
        }
    }
    grouped
}
