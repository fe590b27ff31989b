//! Recurrence rules and next-trigger resolution.
//!
//! Two rule shapes are understood:
//!
//! | Shape                                   | Example                          |
//! |-----------------------------------------|----------------------------------|
//! | `every <N> <unit>[s] [on <weekday>]`    | `every 2 weeks on mo`            |
//! | `on the <ordinal> day of each month`    | `on the last day of each month`  |
//!
//! Units are `minute`, `hour`, `day` and `week`.  Ordinals are `first`,
//! `last`, or a number between 1 and 28 with any suffix (`15th`).  Anything
//! else parses as [`RecurrenceRule::Unrecognized`] and never repeats.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Weekday};

/// Highest day-of-month accepted for numeric ordinals; every month has it.
pub const MAX_MONTH_ORDINAL: u32 = 28;

/// Weekday prefixes indexed from Sunday, matching how the weekday
/// adjustment counts days.
const WEEKDAY_PREFIXES: [&str; 7] = ["su", "mo", "tu", "we", "th", "fr", "sa"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeUnit {
    pub fn seconds(self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 60 * 60,
            Self::Day => 24 * 60 * 60,
            Self::Week => 7 * 24 * 60 * 60,
        }
    }

    /// Parse a unit name, singular or plural.
    pub fn from_label(s: &str) -> Option<Self> {
        match s.strip_suffix('s').unwrap_or(s) {
            "minute" => Some(Self::Minute),
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthDay {
    /// A fixed day of the month, `1..=28`.
    Nth(u32),
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceRule {
    Every {
        n: u32,
        unit: TimeUnit,
        weekday: Option<Weekday>,
    },
    MonthlyOrdinal {
        day: MonthDay,
    },
    Unrecognized,
}

impl RecurrenceRule {
    pub fn parse(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered.split_whitespace().collect();
        let parsed = match tokens.first().copied() {
            Some("every") => parse_every(&tokens),
            Some("on") => parse_monthly(&tokens),
            _ => None,
        };
        parsed.unwrap_or(Self::Unrecognized)
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized)
    }
}

fn parse_every(tokens: &[&str]) -> Option<RecurrenceRule> {
    let n = tokens.get(1)?.parse::<u32>().ok().filter(|n| *n >= 1)?;
    let unit = TimeUnit::from_label(tokens.get(2)?)?;
    let weekday = match (unit, tokens.get(3), tokens.get(4)) {
        (TimeUnit::Week, Some(&"on"), Some(day)) => weekday_from_prefix(day),
        _ => None,
    };
    Some(RecurrenceRule::Every { n, unit, weekday })
}

fn parse_monthly(tokens: &[&str]) -> Option<RecurrenceRule> {
    if tokens.get(1) != Some(&"the") {
        return None;
    }
    let last = tokens.last()?;
    if last.strip_suffix('s').unwrap_or(last) != "month" {
        return None;
    }
    let day = match *tokens.get(2)? {
        "first" => MonthDay::Nth(1),
        "last" => MonthDay::Last,
        ordinal => {
            let digits: String = ordinal.chars().take_while(char::is_ascii_digit).collect();
            let n = digits.parse::<u32>().ok()?;
            if !(1..=MAX_MONTH_ORDINAL).contains(&n) {
                return None;
            }
            MonthDay::Nth(n)
        }
    };
    Some(RecurrenceRule::MonthlyOrdinal { day })
}

fn weekday_from_prefix(token: &str) -> Option<Weekday> {
    let prefix: String = token.chars().take(2).collect();
    let idx = WEEKDAY_PREFIXES.iter().position(|p| *p == prefix)?;
    Some(weekday_from_sunday_index(idx as u32))
}

fn weekday_from_sunday_index(idx: u32) -> Weekday {
    match idx {
        0 => Weekday::Sun,
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        _ => Weekday::Sat,
    }
}

/// Next instant a reminder anchored at `anchor` should fire.
///
/// A future anchor is returned as-is; a past anchor without a rule has
/// expired.  Any result on or after `stop_at` is dropped.
pub fn resolve<Tz: TimeZone>(
    anchor: &DateTime<Tz>,
    rule: Option<&str>,
    stop_at: Option<&DateTime<Tz>>,
    now: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    let candidate = if anchor > now {
        anchor.clone()
    } else {
        let rule = RecurrenceRule::parse(rule?);
        next_occurrence(&rule, anchor, now)?
    };

    match stop_at {
        Some(stop) if candidate >= *stop => None,
        _ => Some(candidate),
    }
}

/// First occurrence of `rule` strictly after `now`, for an anchor that is
/// not in the future.
pub fn next_occurrence<Tz: TimeZone>(
    rule: &RecurrenceRule,
    anchor: &DateTime<Tz>,
    now: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    match *rule {
        RecurrenceRule::Every { n, unit, weekday } => next_every(anchor, now, n, unit, weekday),
        RecurrenceRule::MonthlyOrdinal { day } => next_monthly(anchor, now, day),
        RecurrenceRule::Unrecognized => None,
    }
}

fn next_every<Tz: TimeZone>(
    anchor: &DateTime<Tz>,
    now: &DateTime<Tz>,
    n: u32,
    unit: TimeUnit,
    weekday: Option<Weekday>,
) -> Option<DateTime<Tz>> {
    let period = i64::from(n).checked_mul(unit.seconds())?;
    let elapsed = now.timestamp() - anchor.timestamp();
    // Whole-second timestamps drop sub-second parts, so the floor can sit up
    // to two multiples below the first one past `now`.
    let mut multiple = elapsed.div_euclid(period);

    // The weekday shift moves a candidate by at most six days, so at most one
    // extra period is needed on top of that.
    for _ in 0..5 {
        let offset = Duration::try_seconds(multiple.checked_mul(period)?)?;
        let mut candidate = anchor.clone().checked_add_signed(offset)?;
        if candidate <= *now {
            multiple += 1;
            continue;
        }
        if let (TimeUnit::Week, Some(target)) = (unit, weekday) {
            let shift = weekday_shift(candidate.weekday(), target);
            candidate = candidate.checked_add_signed(Duration::days(shift))?;
        }
        if candidate > *now {
            return Some(candidate);
        }
        multiple += 1;
    }
    None
}

/// Days to move a candidate falling on `current` so it lands on `target`.
///
/// Days are counted from Sunday, so a Monday target pulls a Wednesday back two
/// days.  A Sunday target is treated as the end of the same week and moves
/// forward instead, while a candidate that itself falls on a Sunday moves
/// forward into the following week.
fn weekday_shift(current: Weekday, target: Weekday) -> i64 {
    let current = i64::from(current.num_days_from_sunday());
    let target = i64::from(target.num_days_from_sunday());
    let mut shift = target - current;
    if target == 0 && current > 0 {
        shift += 7;
    }
    shift
}

fn next_monthly<Tz: TimeZone>(
    anchor: &DateTime<Tz>,
    now: &DateTime<Tz>,
    day: MonthDay,
) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let time = anchor.time();
    let today = now.date_naive();

    let (year, month) = (today.year(), today.month());
    let this_month = month_candidate(&tz, year, month, day, time)?;
    if this_month > *now {
        return Some(this_month);
    }

    let (year, month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    month_candidate(&tz, year, month, day, time)
}

fn month_candidate<Tz: TimeZone>(
    tz: &Tz,
    year: i32,
    month: u32,
    day: MonthDay,
    time: NaiveTime,
) -> Option<DateTime<Tz>> {
    let day = match day {
        MonthDay::Nth(n) => n,
        MonthDay::Last => last_day_of_month(year, month)?,
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    localize(tz, date.and_time(time))
}

pub fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?
        .pred_opt()
        .map(|date| date.day())
}

/// Interpret a wall-clock time in `tz`.  Ambiguous times take the earlier
/// instant; times inside a DST gap are pushed forward by an hour.
pub fn localize<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
}
