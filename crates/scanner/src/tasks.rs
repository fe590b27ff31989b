//! Trigger candidates from Obsidian Tasks style checkbox annotations.
//!
//! Both the dataview form (`[due:: 2024-05-01]`) and the emoji form
//! (`📅 2024-05-01`) are understood.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone};
use regex::Regex;
use vaultbell_config::TasksConfig;

use crate::recurrence::localize;

const CHECKBOX: &str = "- [ ] ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskDateKind {
    Start,
    Scheduled,
    Due,
}

impl TaskDateKind {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "start" | "🛫" => Some(Self::Start),
            "scheduled" | "⏳" => Some(Self::Scheduled),
            "due" | "📅" => Some(Self::Due),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Start => 0,
            Self::Scheduled => 1,
            Self::Due => 2,
        }
    }

    /// Time of day configured for this kind.
    pub fn time_of_day(self, config: &TasksConfig) -> NaiveTime {
        match self {
            Self::Start => config.start_time,
            Self::Scheduled => config.scheduled_time,
            Self::Due => config.due_time,
        }
    }
}

fn date_annotation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\[(start|scheduled|due)::\s*(\d{4}-\d{2}-\d{2})\]|(🛫|⏳|📅)\s*(\d{4}-\d{2}-\d{2})",
        )
        .expect("task date regex must compile")
    })
}

/// Whether task annotations are honoured for notes in `directory`.
pub fn task_scan_applies(config: &TasksConfig, directory: &str) -> bool {
    config.enabled
        && (config.restricted_subdirectory.is_empty()
            || directory.contains(&config.restricted_subdirectory))
}

/// Dated annotations on one line, first occurrence of each kind only.
///
/// A kind whose first date is not a real calendar date still uses up its
/// slot on that line.
pub fn line_annotations(line: &str) -> Vec<(TaskDateKind, NaiveDate)> {
    let Some(start) = line.find(CHECKBOX) else {
        return Vec::new();
    };
    let rest = &line[start + CHECKBOX.len()..];

    let mut taken = [false; 3];
    let mut found = Vec::new();
    for caps in date_annotation_regex().captures_iter(rest) {
        let (Some(token), Some(date)) = (caps.get(1).or(caps.get(3)), caps.get(2).or(caps.get(4)))
        else {
            continue;
        };
        let Some(kind) = TaskDateKind::from_token(token.as_str()) else {
            continue;
        };
        if std::mem::replace(&mut taken[kind.index()], true) {
            continue;
        }
        if let Ok(date) = NaiveDate::parse_from_str(date.as_str(), "%Y-%m-%d") {
            found.push((kind, date));
        }
    }
    found
}

/// Lazily yields, per task line, the soonest annotated instant strictly after
/// `now`.  Lines without such an instant yield nothing.
pub fn task_triggers<'a, Tz: TimeZone + 'a>(
    text: &'a str,
    config: &'a TasksConfig,
    now: &'a DateTime<Tz>,
) -> impl Iterator<Item = DateTime<Tz>> + 'a {
    let tz = now.timezone();
    text.lines().filter_map(move |line| {
        line_annotations(line)
            .into_iter()
            .filter_map(|(kind, date)| localize(&tz, date.and_time(kind.time_of_day(config))))
            .filter(|candidate| candidate > now)
            .min()
    })
}

/// Earliest task-derived trigger in the note, if any.
pub fn earliest_task_trigger<Tz: TimeZone>(
    text: &str,
    config: &TasksConfig,
    now: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    task_triggers(text, config, now).min()
}
