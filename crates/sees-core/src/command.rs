//! Operator commands received as text lines

/// A recognised command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Capture a snap around "now"
    Snap,
    /// Enable the live stream and open a stream buffer file
    StreamOn,
    /// Disable the live stream and close the stream buffer file
    StreamOff,
    /// Anything else, trimmed
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    /// Parse one line. Whitespace is trimmed and keywords are case-insensitive.
    /// Returns `None` for a blank line.
    pub fn parse(line: &'a str) -> Option<Self> {
        let word = line.trim();
        if word.is_empty() {
            return None;
        }

        let command = if word.eq_ignore_ascii_case("snap") {
            Self::Snap
        } else if word.eq_ignore_ascii_case("on") {
            Self::StreamOn
        } else if word.eq_ignore_ascii_case("off") {
            Self::StreamOff
        } else {
            Self::Unknown(word)
        };
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keywords() {
        assert_eq!(Command::parse("snap"), Some(Command::Snap));
        assert_eq!(Command::parse("  SNAP\r"), Some(Command::Snap));
        assert_eq!(Command::parse("On"), Some(Command::StreamOn));
        assert_eq!(Command::parse("off\n"), Some(Command::StreamOff));
    }

    #[test]
    fn test_blank_line_is_ignored() {
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse(" \r\n"), None);
    }

    #[test]
    fn test_unknown_is_trimmed() {
        assert_eq!(Command::parse(" snapshot "), Some(Command::Unknown("snapshot")));
    }
}
