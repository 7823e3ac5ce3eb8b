use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// Decomposes an `application/x-www-form-urlencoded` string into its
/// key/value pairs, percent-decoding both sides.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            params.insert(
                urlencoding::decode(key).unwrap_or_default().to_string(),
                urlencoding::decode(value).unwrap_or_default().to_string(),
            );
        }
    }

    params
}

fn short_duration_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // bare seconds counter, e.g. "59"
            Regex::new(r"^[0-5]?\d$").expect("static regex"),
            // "0:xx" style, e.g. "0:45"
            Regex::new(r"^0:[0-5]\d$").expect("static regex"),
        ]
    })
}

/// True when a rendered duration string describes under-one-minute content.
pub fn is_short_duration(text: &str) -> bool {
    let trimmed = text.trim();
    short_duration_patterns().iter().any(|re| re.is_match(trimmed))
}

/// Extracts the video id from a standard watch URL, if the URL is one.
pub fn watch_video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if parsed.path() != "/watch" {
        return None;
    }
    parsed
        .query_pairs()
        .find(|(key, _)| key == "v")
        .map(|(_, value)| value.to_string())
}

/// Maps a short-form route URL to the equivalent standard watch URL,
/// preserving any query parameters. Ids are 11 characters; anything else is
/// left alone.
pub fn shorts_redirect_target(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let video_id = parsed.path().strip_prefix("/shorts/")?.split('/').next()?;
    if video_id.len() != 11 {
        return None;
    }

    let mut target = format!(
        "{}://{}/watch?v={}",
        parsed.scheme(),
        parsed.host_str()?,
        video_id
    );
    if let Some(query) = parsed.query() {
        if !query.is_empty() {
            target.push('&');
            target.push_str(query);
        }
    }
    Some(target)
}

/// Returns the balanced `{...}` block starting at `start`, honoring string
/// literals and escapes. `None` when `start` is not an opening brace or the
/// block never closes.
pub fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string: Option<u8> = None;
    let mut escaped = false;

    for (i, &byte) in bytes.iter().enumerate().skip(start) {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == quote {
                in_string = None;
            }
            continue;
        }

        match byte {
            b'"' | b'\'' => in_string = Some(byte),
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("s=abc%3D%3D&sp=sig&url=https%3A%2F%2Fexample.com%2Fv");
        assert_eq!(params.get("s").map(String::as_str), Some("abc=="));
        assert_eq!(params.get("sp").map(String::as_str), Some("sig"));
        assert_eq!(
            params.get("url").map(String::as_str),
            Some("https://example.com/v")
        );
    }

    #[test]
    fn test_short_duration_detection() {
        assert!(is_short_duration("45"));
        assert!(is_short_duration("0:59"));
        assert!(is_short_duration(" 0:30 "));
        assert!(!is_short_duration("1:00"));
        assert!(!is_short_duration("10:21"));
        assert!(!is_short_duration("61"));
    }

    #[test]
    fn test_watch_video_id() {
        assert_eq!(
            watch_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(watch_video_id("https://www.youtube.com/feed/trending"), None);
        assert_eq!(watch_video_id("not a url"), None);
    }

    #[test]
    fn test_shorts_redirect() {
        assert_eq!(
            shorts_redirect_target("https://www.youtube.com/shorts/dQw4w9WgXcQ?feature=share"),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ&feature=share".to_string())
        );
        assert_eq!(
            shorts_redirect_target("https://www.youtube.com/shorts/short"),
            None
        );
        assert_eq!(
            shorts_redirect_target("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            None
        );
    }

    #[test]
    fn test_balanced_object() {
        let text = r#"var x = {"a": {"b": "}"}, "c": 1};"#;
        let start = text.find('{').unwrap();
        assert_eq!(balanced_object(text, start), Some(r#"{"a": {"b": "}"}, "c": 1}"#));

        assert_eq!(balanced_object("no brace here", 0), None);
        assert_eq!(balanced_object("{never closed", 0), None);
    }
}
