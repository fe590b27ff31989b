//! Picks the single trigger a note fires at.

use chrono::{DateTime, TimeZone, Utc};

use crate::frontmatter::Frontmatter;
use crate::recurrence::resolve;

/// Reminder fields stored on a [`FileEntry`](crate::FileEntry).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteReminder {
    pub triggers_at: Option<DateTime<Utc>>,
    pub repeats: Option<String>,
    pub stop_on: Option<DateTime<Utc>>,
}

/// Combine frontmatter and task-derived triggers for one note.
///
/// A task trigger always wins and is single-shot, so it clears the rule and
/// stop date.  Otherwise `remind at` goes through the recurrence resolver and
/// the frontmatter rule and stop date are kept as written.
pub fn select_trigger<Tz: TimeZone>(
    frontmatter: Option<&Frontmatter<Tz>>,
    task_trigger: Option<DateTime<Tz>>,
    now: &DateTime<Tz>,
) -> NoteReminder {
    if let Some(task) = task_trigger {
        return NoteReminder {
            triggers_at: Some(task.with_timezone(&Utc)),
            repeats: None,
            stop_on: None,
        };
    }

    let Some(fm) = frontmatter else {
        return NoteReminder::default();
    };

    let triggers_at = fm.remind_at.as_ref().and_then(|anchor| {
        resolve(anchor, fm.repeats.as_deref(), fm.stop_on.as_ref(), now)
    });

    NoteReminder {
        triggers_at: triggers_at.map(|t| t.with_timezone(&Utc)),
        repeats: fm.repeats.clone(),
        stop_on: fm.stop_on.as_ref().map(|t| t.with_timezone(&Utc)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontmatter::parse_frontmatter;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn task_trigger_wins_and_clears_recurrence() {
        let now = at(2024, 4, 1, 0);
        let fm = parse_frontmatter(
            "---\nremind at: 2024-04-01 06:00\nrepeats: every 1 day\nstop on: 2024-05-01\n---\n",
            &Utc,
        )
        .unwrap();

        let chosen = select_trigger(Some(&fm), Some(at(2024, 4, 3, 9)), &now);
        assert_eq!(
            chosen,
            NoteReminder {
                triggers_at: Some(at(2024, 4, 3, 9)),
                repeats: None,
                stop_on: None,
            }
        );
    }

    #[test]
    fn frontmatter_trigger_keeps_rule_and_stop() {
        let now = at(2024, 4, 10, 12);
        let fm = parse_frontmatter(
            "---\nremind at: 2024-04-01 06:00\nrepeats: every 1 day\nstop on: 2024-05-01\n---\n",
            &Utc,
        )
        .unwrap();

        let chosen = select_trigger(Some(&fm), None, &now);
        assert_eq!(chosen.triggers_at, Some(at(2024, 4, 11, 6)));
        assert_eq!(chosen.repeats.as_deref(), Some("every 1 day"));
        assert_eq!(chosen.stop_on, Some(at(2024, 5, 1, 0)));
    }

    #[test]
    fn expired_single_shot_keeps_no_trigger() {
        let now = at(2024, 1, 1, 0);
        let fm = parse_frontmatter(
            "---\nremind at: 2023-01-01\nrepeats: every 1 month\nstop on: 2023-06-01\n---\n",
            &Utc,
        )
        .unwrap();

        let chosen = select_trigger(Some(&fm), None, &now);
        assert_eq!(chosen.triggers_at, None);
        assert_eq!(chosen.repeats.as_deref(), Some("every 1 month"));
    }

    #[test]
    fn nothing_to_select() {
        let now = at(2024, 1, 1, 0);
        assert_eq!(select_trigger(None, None, &now), NoteReminder::default());
    }
}
