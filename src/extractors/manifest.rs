//! Player-manifest location and stream URL reconstruction.
//!
//! The manifest is an untrusted blob owned by the host page: it may be
//! missing, partial, or cipher-protected entry by entry. Resolution never
//! fails on a single bad entry — unusable entries are dropped and the rest
//! still resolve.

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::metadata::{MediaKind, StreamDescriptor};
use crate::extractors::cipher::CipherPrograms;
use crate::utils;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("not on a watch page")]
    NotWatchPage,
    #[error("player manifest unavailable")]
    ManifestUnavailable,
}

const MANIFEST_MARKER: &str = "ytInitialPlayerResponse";

/// Locates and parses the embedded player manifest from page text.
///
/// A pair of known assignment regexes runs first; a balanced-brace scan over
/// every marker occurrence covers the shapes the lazy patterns miss. First
/// successful parse wins.
pub fn locate_manifest(html: &str) -> Option<Value> {
    let patterns = [
        r#"var\s+ytInitialPlayerResponse\s*=\s*(\{.+?\});"#,
        r#"ytInitialPlayerResponse\s*=\s*(\{.+?\});"#,
    ];
    for pattern in patterns {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(captures) = re.captures(html) {
                if let Some(json_str) = captures.get(1) {
                    if let Ok(parsed) = serde_json::from_str::<Value>(json_str.as_str()) {
                        return Some(parsed);
                    }
                }
            }
        }
    }

    // the object literal routinely contains `};` inside strings, which the
    // lazy patterns trip over — walk the braces instead
    let mut offset = 0;
    while let Some(found) = html[offset..].find(MANIFEST_MARKER) {
        let after = offset + found + MANIFEST_MARKER.len();
        offset = after;
        let Some(rel_eq) = html[after..].find('=') else {
            continue;
        };
        if rel_eq > 8 {
            continue;
        }
        let Some(rel_brace) = html[after + rel_eq..].find('{') else {
            continue;
        };
        let brace = after + rel_eq + rel_brace;
        if let Some(literal) = utils::balanced_object(html, brace) {
            match serde_json::from_str::<Value>(literal) {
                Ok(parsed) => return Some(parsed),
                Err(e) => debug!("manifest candidate did not parse: {}", e),
            }
        }
    }

    None
}

/// Finds the delivery-script URL referenced by the page, absolutized against
/// `origin` when relative.
pub fn find_player_js_url(html: &str, origin: &str) -> Option<String> {
    let patterns = [
        r#""jsUrl":"([^"]+?\.js)""#,
        r#"'jsUrl':'([^']+?\.js)'"#,
        r#""PLAYER_JS_URL":"([^"]+?\.js)""#,
        r#"<script\s+src="([^"]+?base\.js)""#,
    ];

    for pattern in patterns {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(captures) = re.captures(html) {
                let path = captures.get(1)?.as_str();
                return Some(if path.starts_with('/') {
                    format!("{}{}", origin.trim_end_matches('/'), path)
                } else {
                    path.to_string()
                });
            }
        }
    }
    None
}

/// The manifest's own idea of the video id, when present.
pub fn manifest_video_id(manifest: &Value) -> Option<String> {
    manifest
        .get("videoDetails")
        .and_then(|d| d.get("videoId"))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

/// Reconstructs the fetchable streams of the requested kind, in manifest
/// order. Entries whose signature cannot be resolved yet are dropped.
pub fn resolve_streams(
    manifest: &Value,
    cipher: Option<&CipherPrograms>,
    kind: MediaKind,
) -> Vec<StreamDescriptor> {
    let Some(streaming_data) = manifest.get("streamingData") else {
        warn!("manifest carries no streaming data");
        return Vec::new();
    };

    let mut streams = Vec::new();
    for list in ["formats", "adaptiveFormats"] {
        let Some(entries) = streaming_data.get(list).and_then(Value::as_array) else {
            continue;
        };
        for entry in entries {
            let Some(url) = resolve_entry_url(entry, cipher) else {
                continue;
            };
            if let Some(descriptor) = descriptor_for(entry, url, kind) {
                streams.push(descriptor);
            }
        }
    }
    streams
}

fn resolve_entry_url(entry: &Value, cipher: Option<&CipherPrograms>) -> Option<String> {
    let mut url = match entry.get("url").and_then(Value::as_str) {
        Some(direct) => direct.to_string(),
        None => {
            let compound = entry
                .get("signatureCipher")
                .or_else(|| entry.get("cipher"))
                .and_then(Value::as_str)?;
            let params = utils::parse_query_string(compound);
            let base = params.get("url")?.clone();

            match params.get("s") {
                Some(obfuscated) => {
                    let transform = match cipher.and_then(|c| c.sig.as_ref()) {
                        Some(t) => t,
                        None => {
                            debug!("signature transform not ready, dropping entry");
                            return None;
                        }
                    };
                    let deciphered = transform.apply(obfuscated)?;
                    let sp = params.get("sp").map(String::as_str).unwrap_or("signature");
                    format!("{}&{}={}", base, sp, deciphered)
                }
                None => base,
            }
        }
    };

    if let Some(program) = cipher.and_then(|c| c.n.as_ref()) {
        url = rewrite_n_param(&url, |n| program.apply(n));
    }
    Some(url)
}

/// Rewrites the `n` query parameter in place when present; anything that
/// fails to parse passes through untouched.
fn rewrite_n_param(url: &str, transform: impl Fn(&str) -> String) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return url.to_string();
    };
    if !parsed.query_pairs().any(|(k, _)| k == "n") {
        return url.to_string();
    }

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            let value = if k == "n" {
                transform(&v)
            } else {
                v.to_string()
            };
            (k.to_string(), value)
        })
        .collect();

    parsed.query_pairs_mut().clear();
    for (key, value) in pairs {
        parsed.query_pairs_mut().append_pair(&key, &value);
    }
    parsed.to_string()
}

fn descriptor_for(entry: &Value, url: String, kind: MediaKind) -> Option<StreamDescriptor> {
    let mime = entry.get("mimeType").and_then(Value::as_str).unwrap_or("");
    let quality_label = entry
        .get("qualityLabel")
        .and_then(Value::as_str)
        .filter(|label| !label.is_empty())
        .map(|label| label.to_string());

    match kind {
        MediaKind::Video => {
            if !mime.starts_with("video/") || quality_label.is_none() {
                return None;
            }
        }
        MediaKind::Audio => {
            if !mime.starts_with("audio/") {
                return None;
            }
        }
    }

    let container = mime
        .split('/')
        .nth(1)
        .map(|rest| rest.split(';').next().unwrap_or(rest))
        .unwrap_or("unknown")
        .to_string();

    Some(StreamDescriptor {
        url,
        quality_label,
        container,
        bitrate: entry.get("bitrate").and_then(Value::as_u64),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::cipher::{SigTransform, TokenProgram, TransformOp};
    use serde_json::json;

    fn fixture_manifest() -> Value {
        json!({
            "videoDetails": { "videoId": "dQw4w9WgXcQ" },
            "streamingData": {
                "formats": [
                    {
                        "itag": 18,
                        "url": "https://cdn.example.com/plain?expire=1",
                        "mimeType": "video/mp4; codecs=\"avc1.42001E, mp4a.40.2\"",
                        "qualityLabel": "360p",
                        "bitrate": 500_000
                    }
                ],
                "adaptiveFormats": [
                    {
                        "itag": 137,
                        "signatureCipher": "s=cba&sp=sig&url=https%3A%2F%2Fcdn.example.com%2Fprotected",
                        "mimeType": "video/webm; codecs=\"vp9\"",
                        "qualityLabel": "1080p",
                        "bitrate": 2_500_000
                    },
                    {
                        "itag": 140,
                        "signatureCipher": "s=zyx&sp=sig&url=https%3A%2F%2Fcdn.example.com%2Faudio",
                        "mimeType": "audio/mp4; codecs=\"mp4a.40.2\"",
                        "bitrate": 128_000
                    }
                ]
            }
        })
    }

    fn reverse_cipher() -> CipherPrograms {
        CipherPrograms {
            sig: Some(SigTransform::Tokens(TokenProgram::new(vec![
                TransformOp::Reverse,
            ]))),
            n: None,
        }
    }

    #[test]
    fn test_resolve_with_cipher_ready() {
        let manifest = fixture_manifest();
        let cipher = reverse_cipher();

        let streams = resolve_streams(&manifest, Some(&cipher), MediaKind::Video);
        assert_eq!(streams.len(), 2);
        // manifest order: plain muxed entry first, protected one second
        assert!(streams[0].url.contains("/plain"));
        assert_eq!(streams[1].url, "https://cdn.example.com/protected&sig=abc");
        assert_eq!(streams[1].quality_label.as_deref(), Some("1080p"));
        assert_eq!(streams[1].container, "webm");
    }

    #[test]
    fn test_resolve_before_cipher_ready_drops_protected() {
        let manifest = fixture_manifest();

        let streams = resolve_streams(&manifest, None, MediaKind::Video);
        assert_eq!(streams.len(), 1);
        assert!(streams[0].url.contains("/plain"));
    }

    #[test]
    fn test_resolve_audio_kind() {
        let manifest = fixture_manifest();
        let cipher = reverse_cipher();

        let streams = resolve_streams(&manifest, Some(&cipher), MediaKind::Audio);
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].url, "https://cdn.example.com/audio&sig=xyz");
        assert_eq!(streams[0].kind, MediaKind::Audio);
        assert_eq!(streams[0].container, "mp4");
    }

    #[test]
    fn test_n_param_rewrite() {
        let cipher = CipherPrograms {
            sig: None,
            n: Some(TokenProgram::new(vec![TransformOp::Reverse])),
        };
        let entry = json!({
            "url": "https://cdn.example.com/seg?n=abc&other=1",
            "mimeType": "audio/webm",
        });
        let url = resolve_entry_url(&entry, Some(&cipher)).unwrap();
        assert!(url.contains("n=cba"));
        assert!(url.contains("other=1"));
    }

    #[test]
    fn test_locate_manifest_balanced_scan() {
        // trailing "};" inside a string defeats a lazy regex
        let html = r#"<html><script>
            var ytInitialPlayerResponse = {"videoDetails":{"videoId":"abc","title":"x};y"},"streamingData":{"formats":[]}};
        </script></html>"#;
        let manifest = locate_manifest(html).expect("manifest should parse");
        assert_eq!(manifest_video_id(&manifest).as_deref(), Some("abc"));
    }

    #[test]
    fn test_locate_manifest_absent() {
        assert!(locate_manifest("<html><body>nothing here</body></html>").is_none());
    }

    #[test]
    fn test_find_player_js_url() {
        let html = r#"{"jsUrl":"/s/player/abc123/base.js","other":1}"#;
        assert_eq!(
            find_player_js_url(html, "https://www.youtube.com"),
            Some("https://www.youtube.com/s/player/abc123/base.js".to_string())
        );

        let tag = r#"<script src="https://cdn.example.com/player/base.js" nonce="x"></script>"#;
        assert_eq!(
            find_player_js_url(tag, "https://www.youtube.com"),
            Some("https://cdn.example.com/player/base.js".to_string())
        );

        assert_eq!(find_player_js_url("<html></html>", "https://x"), None);
    }
}
