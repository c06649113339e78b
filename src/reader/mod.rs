//! Article reader: turns a content tree into speech.
//!
//! Components, leaves first:
//! - `segment`: picks the speakable headings, paragraphs and list items
//! - `sanitizer`: cleans segment text and chunks it for limited engines
//! - `preferences`: persisted voice/rate/pitch with fallback resolution
//! - `highlight`: "currently reading" feedback
//! - `controller`: the playback state machine driving the speech engine

pub mod controller;
pub mod highlight;
pub mod preferences;
pub mod sanitizer;
pub mod segment;
