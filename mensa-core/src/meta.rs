//! Renders the `OpenMensa` meta document that describes a canteen and its feeds.

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, Event};

use crate::builder::{XML_DECLARATION, openmensa_root, write_text_element};
use crate::hours::{OpeningHours, WEEK, weekday_element};
use crate::model::{Canteen, FeedKind};
use crate::ports::PortError;
use crate::registry::UrlTemplate;

/// One `<feed>` entry of the meta document.
#[derive(Debug, Clone)]
pub struct FeedLink {
    /// Which feed this is.
    pub kind: FeedKind,
    /// Where the generated feed is published.
    pub url: String,
    /// Page the feed is scraped from.
    pub source: Option<String>,
}

/// Everything the meta document contains.
#[derive(Debug, Clone)]
pub struct MetaDocument {
    /// Display name.
    pub name: String,
    /// Street address.
    pub address: String,
    /// City.
    pub city: String,
    /// Phone number.
    pub phone: Option<String>,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Opening hours; `None` leaves out the `<times>` element.
    pub times: Option<OpeningHours>,
    /// Published feeds.
    pub feeds: Vec<FeedLink>,
}

impl MetaDocument {
    /// Start a document from a registry record, parsing its opening-hours text.
    #[must_use]
    pub fn for_canteen(canteen: &Canteen) -> Self {
        Self {
            name: canteen.name.clone(),
            address: canteen.address.clone(),
            city: canteen.city.clone(),
            phone: canteen.phone.clone().filter(|phone| !phone.trim().is_empty()),
            latitude: canteen.latitude,
            longitude: canteen.longitude,
            times: canteen.times.as_deref().and_then(OpeningHours::parse),
            feeds: Vec::new(),
        }
    }

    /// Add a feed entry.
    #[must_use]
    pub fn with_feed<U: Into<String>>(mut self, kind: FeedKind, url: U, source: Option<String>) -> Self {
        self.feeds.push(FeedLink {
            kind,
            url: url.into(),
            source,
        });
        self
    }

    /// Add one feed entry per distinct feed name in `kinds`, all scraped from `source`.
    #[must_use]
    pub fn with_feeds(
        mut self,
        kinds: &[FeedKind],
        urls: &UrlTemplate,
        reference: &str,
        source: Option<&str>,
    ) -> Self {
        for kind in kinds {
            if self.feeds.iter().any(|feed| feed.kind.feed_name() == kind.feed_name()) {
                continue;
            }
            self = self.with_feed(*kind, urls.feed(*kind, reference), source.map(str::to_owned));
        }
        self
    }

    /// Replace the opening hours.
    #[must_use]
    pub fn with_times(mut self, times: Option<OpeningHours>) -> Self {
        self.times = times;
        self
    }

    /// Serialize to XML.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] if the XML writer fails.
    pub fn render(&self) -> Result<String, PortError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Start(openmensa_root()))?;
        writer.write_event(Event::Start(BytesStart::new("canteen")))?;

        write_text_element(&mut writer, "name", &self.name)?;
        if !self.address.is_empty() {
            write_text_element(&mut writer, "address", &self.address)?;
        }
        if !self.city.is_empty() {
            write_text_element(&mut writer, "city", &self.city)?;
        }
        if let Some(phone) = &self.phone {
            write_text_element(&mut writer, "phone", phone)?;
        }

        let latitude = self.latitude.to_string();
        let longitude = self.longitude.to_string();
        let mut location = BytesStart::new("location");
        location.push_attribute(("latitude", latitude.as_str()));
        location.push_attribute(("longitude", longitude.as_str()));
        writer.write_event(Event::Empty(location))?;

        if let Some(times) = &self.times {
            let mut start = BytesStart::new("times");
            start.push_attribute(("type", "opening"));
            writer.write_event(Event::Start(start))?;
            for day in WEEK {
                let mut element = BytesStart::new(weekday_element(day));
                match times.on(day) {
                    Some(range) => element.push_attribute(("open", range)),
                    None => element.push_attribute(("closed", "true")),
                }
                writer.write_event(Event::Empty(element))?;
            }
            writer.write_event(Event::End(BytesEnd::new("times")))?;
        }

        for (priority, feed) in self.feeds.iter().enumerate() {
            write_feed(&mut writer, feed, priority)?;
        }

        writer.write_event(Event::End(BytesEnd::new("canteen")))?;
        writer.write_event(Event::End(BytesEnd::new("openmensa")))?;

        let body = String::from_utf8(writer.into_inner())
            .map_err(|err| PortError::Internal(err.to_string()))?;
        Ok(format!("{XML_DECLARATION}{body}\n"))
    }
}

fn write_feed(writer: &mut Writer<Vec<u8>>, feed: &FeedLink, priority: usize) -> Result<(), PortError> {
    let priority = priority.to_string();
    let mut start = BytesStart::new("feed");
    start.push_attribute(("name", feed.kind.feed_name()));
    start.push_attribute(("priority", priority.as_str()));
    writer.write_event(Event::Start(start))?;

    let mut schedule = BytesStart::new("schedule");
    match feed.kind {
        FeedKind::Today => {
            schedule.push_attribute(("dayOfMonth", "*"));
            schedule.push_attribute(("dayOfWeek", "1-5"));
            schedule.push_attribute(("hour", "8-14"));
            schedule.push_attribute(("retry", "30 1"));
        }
        FeedKind::Week | FeedKind::Full => {
            schedule.push_attribute(("dayOfMonth", "*"));
            schedule.push_attribute(("dayOfWeek", "*"));
            schedule.push_attribute(("hour", "8"));
            schedule.push_attribute(("retry", "60 5 1440"));
        }
    }
    writer.write_event(Event::Empty(schedule))?;

    write_text_element(writer, "url", &feed.url)?;
    if let Some(source) = &feed.source {
        write_text_element(writer, "source", source)?;
    }

    writer.write_event(Event::End(BytesEnd::new("feed")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;

    use super::*;

    fn canteen(times: Option<&str>) -> Canteen {
        Canteen {
            reference: "mensa-nord".to_owned(),
            id: "7".to_owned(),
            name: "Mensa Nord & Co".to_owned(),
            address: "Hauptstraße 1".to_owned(),
            city: "Köln".to_owned(),
            latitude: 50.93,
            longitude: 6.95,
            phone: Some("0221 123".to_owned()),
            times: times.map(str::to_owned),
            source: None,
        }
    }

    #[test]
    fn marks_exactly_the_parsed_days_open() {
        let xml = MetaDocument::for_canteen(&canteen(Some("Di - Do 11:30 - 14:00 Uhr")))
            .with_feed(FeedKind::Full, "https://example.org/feed/x.xml", None)
            .render()
            .expect("meta renders");

        for day in WEEK {
            let open = format!("<{} open=\"11:30-14:00\"/>", weekday_element(day));
            let closed = format!("<{} closed=\"true\"/>", weekday_element(day));
            let expect_open = matches!(day, Weekday::Tue | Weekday::Wed | Weekday::Thu);
            assert_eq!(xml.contains(&open), expect_open, "{day} open flag");
            assert_eq!(xml.contains(&closed), !expect_open, "{day} closed flag");
        }
    }

    #[test]
    fn escapes_text_and_omits_unknown_times() {
        let xml = MetaDocument::for_canteen(&canteen(None))
            .with_feed(
                FeedKind::Today,
                "https://example.org/today/x.xml",
                Some("https://menu.example.org/?a=1&b=2".to_owned()),
            )
            .render()
            .expect("meta renders");

        assert!(xml.contains("<name>Mensa Nord &amp; Co</name>"));
        assert!(xml.contains("<source>https://menu.example.org/?a=1&amp;b=2</source>"));
        assert!(xml.contains("<location latitude=\"50.93\" longitude=\"6.95\"/>"));
        assert!(xml.contains("<feed name=\"today\" priority=\"0\">"));
        assert!(!xml.contains("<times"));
    }

    #[test]
    fn week_and_full_share_one_feed_entry() {
        let urls = UrlTemplate::new("https://example.org", "mensenat");
        let meta = MetaDocument::for_canteen(&canteen(None)).with_feeds(
            &[FeedKind::Week, FeedKind::Today, FeedKind::Full],
            &urls,
            "mensa-nord",
            None,
        );
        let names: Vec<_> = meta.feeds.iter().map(|feed| feed.kind.feed_name()).collect();
        assert_eq!(names, vec!["full", "today"]);
        assert_eq!(
            meta.feeds.first().map(|feed| feed.url.as_str()),
            Some("https://example.org/feed/mensenat_mensa-nord.xml")
        );
    }
}
