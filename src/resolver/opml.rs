//! OPML subscription list parsing.
//!
//! Podcast apps export subscriptions as OPML: a tree of `<outline>` elements
//! where feed entries carry an `xmlUrl` attribute. Grouping outlines without
//! an `xmlUrl` are skipped; nesting is flattened.

use crate::error::{Error, Result};
use crate::types::Subscription;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// Parse OPML content into a flat subscription list
///
/// Accepts any `<outline>` that carries a non-empty `xmlUrl` attribute; the
/// `type` attribute is ignored since exporters are inconsistent about it.
/// The display title prefers `title`, then `text`.
///
/// # Errors
/// Returns [`Error::InvalidOpml`] if the document is not well-formed XML.
pub fn parse_opml(content: &str) -> Result<Vec<Subscription>> {
    let mut reader = Reader::from_str(content);
    let mut subscriptions = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"outline"
                    && let Some(sub) = outline_to_subscription(&e)?
                {
                    subscriptions.push(sub);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::InvalidOpml(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
        }
    }

    Ok(subscriptions)
}

/// Convert one outline element to a subscription, if it references a feed
fn outline_to_subscription(element: &BytesStart<'_>) -> Result<Option<Subscription>> {
    let mut title = None;
    let mut text = None;
    let mut feed_url = None;

    for attr in element.attributes() {
        let attr = attr.map_err(|e| Error::InvalidOpml(format!("bad attribute: {}", e)))?;
        let value = attr
            .unescape_value()
            .map_err(|e| Error::InvalidOpml(format!("bad attribute value: {}", e)))?
            .into_owned();

        match attr.key.as_ref() {
            b"title" => title = Some(value),
            b"text" => text = Some(value),
            b"xmlUrl" => feed_url = Some(value),
            _ => {}
        }
    }

    // An outline without a feed URL is a folder, not a subscription.
    let Some(feed_url) = feed_url.filter(|u| !u.is_empty()) else {
        return Ok(None);
    };

    let title = title
        .or(text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    Ok(Some(Subscription { title, feed_url }))
}
