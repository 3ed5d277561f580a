//! Now-playing scrape of the station status feed.
//!
//! The feed is the Shoutcast stats document:
//!
//! ```text
//! <SHOUTCASTSERVER>
//!   <CURRENTLISTENERS>12</CURRENTLISTENERS>
//!   <SERVERTITLE>Undeco RadiOnline</SERVERTITLE>
//!   <SONGTITLE>Artist - Title</SONGTITLE>
//!   <BITRATE>128</BITRATE>
//!   ...
//! </SHOUTCASTSERVER>
//! ```
//!
//! Only the first occurrence of each field is read; the root element name is
//! not checked.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::protocol::{NowPlaying, StreamStats};

const ARTIST_SEPARATOR: &str = " - ";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("invalid text in <{element}>: {reason}")]
    Text { element: &'static str, reason: String },

    #[error("document has no root element")]
    NoRoot,

    #[error("unexpected end of document inside <{0}>")]
    Unclosed(String),

    #[error("content after the root element")]
    TrailingContent,
}

/// Result of one successful parse.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedMetadata {
    /// `None` when `SONGTITLE` is missing or blank: callers keep what they had.
    pub now_playing: Option<NowPlaying>,
    pub stats: StreamStats,
}

/// Discriminants double as indices into the captured values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    SongTitle,
    ServerTitle,
    CurrentListeners,
    Bitrate,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"SONGTITLE" => Some(Field::SongTitle),
            b"SERVERTITLE" => Some(Field::ServerTitle),
            b"CURRENTLISTENERS" => Some(Field::CurrentListeners),
            b"BITRATE" => Some(Field::Bitrate),
            _ => None,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Field::SongTitle => "SONGTITLE",
            Field::ServerTitle => "SERVERTITLE",
            Field::CurrentListeners => "CURRENTLISTENERS",
            Field::Bitrate => "BITRATE",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Parse the status feed into now-playing data and diagnostics.
pub fn parse(xml: &str) -> Result<ParsedMetadata, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut values: [Option<String>; 4] = Default::default();
    let mut open: Vec<String> = Vec::new();
    let mut seen_root = false;
    // Field being captured and the depth of its start tag.
    let mut capturing: Option<(Field, usize, String)> = None;

    loop {
        let event = reader.read_event()?;
        // The root has closed: only whitespace, comments and PIs may follow.
        if seen_root && open.is_empty() {
            match &event {
                Event::Start(_) | Event::Empty(_) | Event::CData(_) => {
                    return Err(ParseError::TrailingContent)
                }
                Event::Text(e) if e.iter().any(|b| !b.is_ascii_whitespace()) => {
                    return Err(ParseError::TrailingContent)
                }
                _ => {}
            }
        }
        match event {
            Event::Start(e) => {
                seen_root = true;
                let name = e.name();
                open.push(String::from_utf8_lossy(name.as_ref()).into_owned());
                if capturing.is_none() {
                    if let Some(field) = Field::from_tag(name.as_ref()) {
                        if values[field.index()].is_none() {
                            capturing = Some((field, open.len(), String::new()));
                        }
                    }
                }
            }
            Event::Empty(e) => {
                seen_root = true;
                if let Some(field) = Field::from_tag(e.name().as_ref()) {
                    values[field.index()].get_or_insert_with(String::new);
                }
            }
            Event::End(_) => {
                if let Some((field, depth, text)) = capturing.take() {
                    if depth == open.len() {
                        values[field.index()] = Some(text);
                    } else {
                        capturing = Some((field, depth, text));
                    }
                }
                open.pop();
            }
            Event::Text(e) => {
                if let Some((field, _, text)) = capturing.as_mut() {
                    let chunk = e.unescape().map_err(|err| ParseError::Text {
                        element: field.tag(),
                        reason: err.to_string(),
                    })?;
                    text.push_str(&chunk);
                }
            }
            Event::CData(e) => {
                if let Some((_, _, text)) = capturing.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(unclosed) = open.pop() {
        return Err(ParseError::Unclosed(unclosed));
    }
    if !seen_root {
        return Err(ParseError::NoRoot);
    }

    let [song, server_title, listeners, bitrate] = values;
    let listeners = listeners
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| "0".to_string());

    Ok(ParsedMetadata {
        now_playing: song.as_deref().and_then(split_song_title),
        stats: StreamStats {
            server_title: server_title.unwrap_or_default().trim().to_string(),
            listeners,
            bitrate: bitrate.unwrap_or_default().trim().to_string(),
        },
    })
}

/// Split a raw `SONGTITLE` on the first `" - "` into artist and title.
/// Returns `None` for a blank title.
pub fn split_song_title(raw: &str) -> Option<NowPlaying> {
    let song = raw.trim();
    if song.is_empty() {
        return None;
    }
    let (artist, title) = match song.split_once(ARTIST_SEPARATOR) {
        Some((artist, title)) => (artist.to_string(), title.to_string()),
        None => (String::new(), song.to_string()),
    };
    Some(NowPlaying {
        title,
        artist,
        album: String::new(),
    })
}
