//! Opening-hours parsing for texts like `Mo - Fr 11:00 - 14:00 Uhr, Sa 11.30 - 13.30 Uhr`.

use chrono::Weekday;
use once_cell::sync::Lazy;
use regex::Regex;

static RANGE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"([A-Z][a-z])(?:\s*-\s*([A-Z][a-z]))?\s*(\d{1,2})[:.](\d{2})\s*[-–]\s*(\d{1,2})[:.](\d{2})\s*Uhr",
    )
    .expect("valid opening hours pattern")
});

/// Monday first, the order the meta document lists days in.
pub const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Map a two-letter German (or English) day abbreviation to a weekday.
#[must_use]
pub fn weekday_from_short(short: &str) -> Option<Weekday> {
    match short {
        "Mo" => Some(Weekday::Mon),
        "Di" | "Tu" => Some(Weekday::Tue),
        "Mi" | "We" => Some(Weekday::Wed),
        "Do" | "Th" => Some(Weekday::Thu),
        "Fr" => Some(Weekday::Fri),
        "Sa" => Some(Weekday::Sat),
        "So" | "Su" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Element name of a weekday in the meta document.
#[must_use]
pub fn weekday_element(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Per-weekday opening range formatted as `HH:MM-HH:MM`; `None` means closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpeningHours {
    days: [Option<String>; 7],
}

impl OpeningHours {
    /// Parse every `Day[-Day] HH:MM-HH:MM Uhr` range in `text`; ranges without `Uhr` are ignored.
    ///
    /// Returns `None` when no range is found. Later ranges override earlier ones.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut hours = Self::default();
        let mut found = false;

        for caps in RANGE_PATTERN.captures_iter(text) {
            let Some(from) = caps.get(1).and_then(|day| weekday_from_short(day.as_str())) else {
                continue;
            };
            let to = caps
                .get(2)
                .and_then(|day| weekday_from_short(day.as_str()))
                .unwrap_or(from);
            let number = |group: usize| caps.get(group).and_then(|num| num.as_str().parse::<u32>().ok());
            let (Some(from_h), Some(from_m), Some(to_h), Some(to_m)) =
                (number(3), number(4), number(5), number(6))
            else {
                continue;
            };

            hours.set_range(from, to, &format_range(from_h, from_m, to_h, to_m));
            found = true;
        }

        found.then_some(hours)
    }

    /// Open every day from `from` through `to` (week order, stopping at Sunday) with `range`.
    pub fn set_range(&mut self, from: Weekday, to: Weekday, range: &str) {
        let start = from.num_days_from_monday() as usize;
        let end = to.num_days_from_monday() as usize;
        let end = if end < start { WEEK.len() - 1 } else { end };
        for slot in self.days.iter_mut().take(end + 1).skip(start) {
            *slot = Some(range.to_owned());
        }
    }

    /// Opening range for `day`, or `None` when closed.
    #[must_use]
    pub fn on(&self, day: Weekday) -> Option<&str> {
        self.days
            .get(day.num_days_from_monday() as usize)
            .and_then(Option::as_deref)
    }

    /// Days that have an opening range.
    #[must_use]
    pub fn open_days(&self) -> Vec<Weekday> {
        WEEK.into_iter().filter(|day| self.on(*day).is_some()).collect()
    }
}

/// Format a time range as `HH:MM-HH:MM`.
#[must_use]
pub fn format_range(from_h: u32, from_m: u32, to_h: u32, to_m: u32) -> String {
    format!("{from_h:02}:{from_m:02}-{to_h:02}:{to_m:02}")
}
