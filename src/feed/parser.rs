//! Streaming RSS parser.
//!
//! The XML reader is only an event source. [`FeedParser`] is the state machine:
//! it sees start / text / end events one at a time, never holds more than the
//! current element's text, and writes straight into the target [`Feed`].

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use uuid::Uuid;

use super::dates;
use super::reconcile::{reconcile, Reconciled};
use crate::storage::{Feed, LOADING_TITLE};
use crate::util::clean_field;

/// Errors that abort a parse pass. Malformed field values never do.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The XML itself is broken (mismatched tags, unterminated markup, ...)
    #[error("XML parse error: {0}")]
    Xml(String),
    /// Well-formed input that is not an RSS document
    #[error("Document has no <channel> element")]
    MissingChannel,
}

/// One step of the event stream driving [`FeedParser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseEvent<'a> {
    Start(&'a str),
    Text(&'a str),
    End(&'a str),
}

/// Counts of what a parse pass did to the feed's items.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParseStats {
    /// Provisional items kept as new
    pub inserted: usize,
    /// Provisional items folded into an existing item
    pub merged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Channel,
    Item,
}

/// Phase-tagged state machine that turns parse events into feed mutations.
///
/// `title` and `description` appear at both channel and item level; the phase
/// (set by the most recent `<channel>` or `<item>` start tag) decides which
/// one a closing tag belongs to.
///
/// If [`FeedParser::handle`] has been called and the pass is then abandoned,
/// the feed holds provisional items and the loading title. Such a feed must be
/// dropped, never committed.
pub struct FeedParser<'f> {
    feed: &'f mut Feed,
    phase: Option<Phase>,
    current_item: Option<Uuid>,
    text: String,
    previous_title: String,
    has_title: bool,
    saw_channel: bool,
    stats: ParseStats,
}

impl<'f> FeedParser<'f> {
    /// Start a pass over `feed`: show the loading title and stamp the fetch time.
    pub fn begin(feed: &'f mut Feed, fetched_at: DateTime<Utc>) -> Self {
        let previous_title = std::mem::replace(&mut feed.title, LOADING_TITLE.to_string());
        feed.mark_fetched(fetched_at);

        Self {
            feed,
            phase: None,
            current_item: None,
            text: String::new(),
            previous_title,
            has_title: false,
            saw_channel: false,
            stats: ParseStats::default(),
        }
    }

    /// Advance the state machine by one event.
    pub fn handle(&mut self, event: ParseEvent<'_>) {
        match event {
            ParseEvent::Start(name) => self.start_element(name),
            ParseEvent::Text(text) => self.text.push_str(text),
            ParseEvent::End(name) => self.end_element(name),
        }
    }

    fn start_element(&mut self, name: &str) {
        // Text only ever belongs to the innermost element just opened
        self.text.clear();

        match name {
            "channel" => {
                self.phase = Some(Phase::Channel);
                self.saw_channel = true;
            }
            "item" => {
                // An <item> opened inside an unfinished one still gets reconciled
                self.finish_item();
                self.phase = Some(Phase::Item);
                self.current_item = Some(self.feed.create_item());
            }
            _ => {}
        }
    }

    fn end_element(&mut self, name: &str) {
        match self.phase {
            Some(Phase::Channel) => match name {
                "title" => {
                    self.feed.title = clean_field(&self.text);
                    self.has_title = !self.feed.title.is_empty();
                }
                "description" => self.feed.description = clean_field(&self.text),
                _ => {}
            },
            Some(Phase::Item) => {
                if let Some(item) = self.current_item.and_then(|id| self.feed.item_mut(id)) {
                    match name {
                        "title" => item.title = clean_field(&self.text),
                        "description" => item.summary = clean_field(&self.text),
                        "link" => item.link = clean_field(&self.text),
                        "pubDate" => {
                            item.published_at = dates::resolve(&self.text);
                            if item.published_at.is_none() {
                                tracing::debug!(value = %self.text.trim(), "Unrecognized pubDate");
                            }
                        }
                        _ => {}
                    }
                }
            }
            None => {}
        }

        if name == "item" {
            self.finish_item();
        }
    }

    fn finish_item(&mut self) {
        let Some(id) = self.current_item.take() else {
            return;
        };

        match reconcile(self.feed, id) {
            Some(Reconciled::Inserted) => self.stats.inserted += 1,
            Some(Reconciled::Merged { .. }) => self.stats.merged += 1,
            None => {}
        }
    }

    /// Complete the pass.
    ///
    /// A document without a usable channel title keeps the feed's previous
    /// title, or its URL if it never had one, so the loading title never
    /// outlives the pass.
    pub fn finish(mut self) -> Result<ParseStats, ParseError> {
        self.finish_item();

        if !self.has_title {
            self.feed.title = if self.previous_title.is_empty()
                || self.previous_title == LOADING_TITLE
            {
                self.feed.url.clone()
            } else {
                std::mem::take(&mut self.previous_title)
            };
        }

        if !self.saw_channel {
            return Err(ParseError::MissingChannel);
        }

        Ok(self.stats)
    }
}

/// Parse RSS `bytes` into `feed` in a single forward pass.
///
/// Items are created and reconciled as their closing tags are reached; see
/// [`reconcile`](super::reconcile::reconcile). On `Err` the feed is in a
/// half-parsed state and must be discarded.
///
/// # Security
///
/// quick-xml (0.37) never expands `<!ENTITY>` declarations, so XXE payloads in
/// a DOCTYPE are inert. Text with an entity it cannot resolve is kept verbatim
/// rather than failing the document.
pub fn parse(
    bytes: &[u8],
    feed: &mut Feed,
    fetched_at: DateTime<Utc>,
) -> Result<ParseStats, ParseError> {
    let mut reader = Reader::from_reader(bytes);
    let mut parser = FeedParser::begin(feed, fetched_at);
    let mut buf = Vec::new();
    // quick-xml reports Eof without error while elements are still open
    let mut depth: usize = 0;

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| {
            ParseError::Xml(format!("{} at byte {}", e, reader.buffer_position()))
        })? {
            Event::Start(e) => {
                depth += 1;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                parser.handle(ParseEvent::Start(&name));
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                parser.handle(ParseEvent::Start(&name));
                parser.handle(ParseEvent::End(&name));
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                parser.handle(ParseEvent::End(&name));
            }
            Event::Text(e) => match e.unescape() {
                Ok(text) => parser.handle(ParseEvent::Text(&text)),
                Err(err) => {
                    tracing::debug!(error = %err, "Keeping text with unresolved entity verbatim");
                    parser.handle(ParseEvent::Text(&String::from_utf8_lossy(&e)));
                }
            },
            Event::CData(e) => {
                parser.handle(ParseEvent::Text(&String::from_utf8_lossy(&e)));
            }
            Event::Eof if depth > 0 => {
                return Err(ParseError::Xml(format!(
                    "unexpected end of document with {} element(s) open at byte {}",
                    depth,
                    reader.buffer_position()
                )));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    parser.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn rss(channel_body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>{}</channel></rss>"#,
            channel_body
        )
    }

    #[test]
    fn test_channel_and_item_fields() {
        let xml = rss(r#"
            <title>Channel A</title>
            <description>All about A</description>
            <item>
                <title>First</title>
                <description>Summary one</description>
                <link>http://x/1</link>
                <pubDate>Mon, 02 Jan 2006 15:04:05 GMT</pubDate>
            </item>"#);
        let mut feed = Feed::new("https://a.example.com/rss");

        let stats = parse(xml.as_bytes(), &mut feed, now()).unwrap();

        assert_eq!(stats, ParseStats { inserted: 1, merged: 0 });
        assert_eq!(feed.title, "Channel A");
        assert_eq!(feed.description, "All about A");
        assert_eq!(feed.last_fetched, Some(now()));
        assert_eq!(feed.items.len(), 1);

        let item = &feed.items[0];
        assert_eq!(item.title, "First");
        assert_eq!(item.summary, "Summary one");
        assert_eq!(item.link, "http://x/1");
        assert_eq!(item.feed_id, feed.id);
        assert_eq!(
            item.published_at,
            Some(Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap())
        );
    }

    #[test]
    fn test_item_title_does_not_touch_channel_title() {
        let xml = rss("<title>Channel</title><item><title>Item</title></item>");
        let mut feed = Feed::new("https://example.com/rss");

        parse(xml.as_bytes(), &mut feed, now()).unwrap();
        assert_eq!(feed.title, "Channel");
        assert_eq!(feed.items[0].title, "Item");
    }

    #[test]
    fn test_cdata_and_entities() {
        let xml = rss(
            "<title>Tom &amp; Jerry</title>\
             <item><description><![CDATA[<p>Hello <b>world</b></p>]]></description></item>",
        );
        let mut feed = Feed::new("https://example.com/rss");

        parse(xml.as_bytes(), &mut feed, now()).unwrap();
        assert_eq!(feed.title, "Tom & Jerry");
        assert_eq!(feed.items[0].summary, "<p>Hello <b>world</b></p>");
    }

    #[test]
    fn test_unknown_entity_kept_verbatim() {
        let xml = rss("<title>Caf&eacute;</title>");
        let mut feed = Feed::new("https://example.com/rss");

        parse(xml.as_bytes(), &mut feed, now()).unwrap();
        assert_eq!(feed.title, "Caf&eacute;");
    }

    #[test]
    fn test_text_chunks_accumulate() {
        let mut feed = Feed::new("https://example.com/rss");
        let mut parser = FeedParser::begin(&mut feed, now());
        for event in [
            ParseEvent::Start("channel"),
            ParseEvent::Start("title"),
            ParseEvent::Text("Split "),
            ParseEvent::Text("across "),
            ParseEvent::Text("chunks"),
            ParseEvent::End("title"),
            ParseEvent::End("channel"),
        ] {
            parser.handle(event);
        }
        parser.finish().unwrap();

        assert_eq!(feed.title, "Split across chunks");
    }

    #[test]
    fn test_text_resets_on_start() {
        let mut feed = Feed::new("https://example.com/rss");
        let mut parser = FeedParser::begin(&mut feed, now());
        for event in [
            ParseEvent::Start("channel"),
            ParseEvent::Text("stray"),
            ParseEvent::Start("description"),
            ParseEvent::Text("clean"),
            ParseEvent::End("description"),
        ] {
            parser.handle(event);
        }
        parser.finish().unwrap();

        assert_eq!(feed.description, "clean");
    }

    #[test]
    fn test_unresolvable_date_left_unset() {
        let xml = rss("<item><link>http://x/1</link><pubDate>someday</pubDate></item>");
        let mut feed = Feed::new("https://example.com/rss");

        parse(xml.as_bytes(), &mut feed, now()).unwrap();
        assert!(feed.items[0].published_at.is_none());
    }

    #[test]
    fn test_item_without_link_is_kept() {
        let xml = rss("<item><title>A</title></item><item><title>B</title></item>");
        let mut feed = Feed::new("https://example.com/rss");

        let stats = parse(xml.as_bytes(), &mut feed, now()).unwrap();
        assert_eq!(stats.inserted, 2);
        assert!(feed.items.iter().all(|i| i.link.is_empty()));
    }

    #[test]
    fn test_duplicate_links_in_one_document_merge() {
        let xml = rss(
            "<item><link>http://x/1</link><title>Old</title></item>\
             <item><link>http://x/1</link><title>New</title></item>",
        );
        let mut feed = Feed::new("https://example.com/rss");

        let stats = parse(xml.as_bytes(), &mut feed, now()).unwrap();
        assert_eq!(stats, ParseStats { inserted: 1, merged: 1 });
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].title, "New");
    }

    #[test]
    fn test_self_closing_elements() {
        let xml = rss("<title>T</title><item><link/><title>Empty link</title></item>");
        let mut feed = Feed::new("https://example.com/rss");

        parse(xml.as_bytes(), &mut feed, now()).unwrap();
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].link, "");
    }

    #[test]
    fn test_namespaced_elements_ignored() {
        let xml = rss(
            r#"<title>T</title>
               <atom:link href="https://example.com/rss" rel="self"/>
               <item><link>http://x/1</link><dc:title>Other</dc:title><title>Real</title></item>"#,
        );
        let mut feed = Feed::new("https://example.com/rss");

        parse(xml.as_bytes(), &mut feed, now()).unwrap();
        assert_eq!(feed.items[0].title, "Real");
        assert_eq!(feed.items[0].link, "http://x/1");
    }

    #[test]
    fn test_mismatched_tags_fail() {
        let xml = "<rss><channel><title>A</item></channel></rss>";
        let mut feed = Feed::new("https://example.com/rss");

        let result = parse(xml.as_bytes(), &mut feed, now());
        assert!(matches!(result, Err(ParseError::Xml(_))));
    }

    #[test]
    fn test_truncated_document_fails() {
        let xml = "<rss><channel><title>A</title><item><link>http://x/1</link><title>Trunc";
        let mut feed = Feed::new("https://example.com/rss");

        let result = parse(xml.as_bytes(), &mut feed, now());
        assert!(matches!(result, Err(ParseError::Xml(_))));
    }

    #[test]
    fn test_truncated_after_item_fails() {
        let xml = "<rss><channel><title>A</title><item><link>http://x/1</link></item>";
        let mut feed = Feed::new("https://example.com/rss");

        assert!(matches!(
            parse(xml.as_bytes(), &mut feed, now()),
            Err(ParseError::Xml(_))
        ));
    }

    #[test]
    fn test_non_rss_document_fails() {
        let mut feed = Feed::new("https://example.com/rss");
        let result = parse(b"<html><body>Hi</body></html>", &mut feed, now());
        assert!(matches!(result, Err(ParseError::MissingChannel)));
    }

    #[test]
    fn test_missing_title_falls_back_to_url() {
        let xml = rss("<description>No title here</description>");
        let mut feed = Feed::new("https://example.com/rss");

        parse(xml.as_bytes(), &mut feed, now()).unwrap();
        assert_eq!(feed.title, "https://example.com/rss");
    }

    #[test]
    fn test_missing_title_keeps_previous_title() {
        let xml = rss("<title></title>");
        let mut feed = Feed::new("https://example.com/rss");
        feed.title = "Known Good".into();

        parse(xml.as_bytes(), &mut feed, now()).unwrap();
        assert_eq!(feed.title, "Known Good");
    }

    #[test]
    fn test_begin_shows_loading_state() {
        let mut feed = Feed::new("https://example.com/rss");
        feed.title = "Before".into();
        let parser = FeedParser::begin(&mut feed, now());
        drop(parser);

        assert_eq!(feed.title, LOADING_TITLE);
        assert_eq!(feed.last_fetched, Some(now()));
    }
}
