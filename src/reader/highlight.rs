//! "Currently reading" feedback.

use tracing::debug;

use super::segment::Segment;

/// Visual focus on the segment being read. `None` clears it.
pub trait Highlighter: Send {
    fn highlight(&mut self, segment: Option<&Segment>);
}

/// Prints each newly focused segment to stdout.
#[derive(Default)]
pub struct TerminalHighlighter {
    current: Option<usize>,
}

impl Highlighter for TerminalHighlighter {
    fn highlight(&mut self, segment: Option<&Segment>) {
        match segment {
            Some(seg) if self.current == Some(seg.index) => {}
            Some(seg) => {
                debug!("Highlighting segment {}", seg.index);
                println!("\n▶ [{}] {}", seg.index + 1, seg.text);
                self.current = Some(seg.index);
            }
            None => {
                if self.current.take().is_some() {
                    debug!("Highlight cleared");
                }
            }
        }
    }
}
