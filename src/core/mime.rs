//! Content-Type lookup by file extension.

use std::path::Path;

use mime_guess::mime::{self, Mime};

/// The media type of a file being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType(Mime);

impl MediaType {
    /// Guess from the extension; unknown extensions are `application/octet-stream`.
    pub fn for_path(path: &Path) -> Self {
        Self(mime_guess::from_path(path).first_or_octet_stream())
    }

    /// Audio and video are kept off the cacheable static-asset path.
    pub fn is_streaming(&self) -> bool {
        let top = self.0.type_();
        top == mime::AUDIO || top == mime::VIDEO
    }

    /// Header value. Text types without a charset are sent as UTF-8.
    pub fn header_value(&self) -> String {
        if self.0.type_() == mime::TEXT && self.0.get_param(mime::CHARSET).is_none() {
            format!("{}; charset=utf-8", self.0.essence_str())
        } else {
            self.0.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(path: &str) -> String {
        MediaType::for_path(Path::new(path)).header_value()
    }

    #[test]
    fn test_common_types() {
        assert_eq!(header("www/index.html"), "text/html; charset=utf-8");
        assert_eq!(header("style.CSS"), "text/css; charset=utf-8");
        assert_eq!(header("logo.png"), "image/png");
        assert_eq!(header("clip.mp4"), "video/mp4");
        assert_eq!(header("song.mp3"), "audio/mpeg");
    }

    #[test]
    fn test_unknown_extension() {
        assert_eq!(header("blob.unknownext"), "application/octet-stream");
        assert_eq!(header("Makefile"), "application/octet-stream");
    }

    #[test]
    fn test_streaming_media() {
        for path in ["a.mp4", "a.webm", "a.mp3", "a.opus", "a.mpeg", "a.mpg", "a.weba", "a.3gp"] {
            assert!(
                MediaType::for_path(Path::new(path)).is_streaming(),
                "{path} should be audio or video"
            );
        }
        for path in ["a.png", "a.html", "a.js", "a.bin"] {
            assert!(!MediaType::for_path(Path::new(path)).is_streaming(), "{path}");
        }
    }
}
