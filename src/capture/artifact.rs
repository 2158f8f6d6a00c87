//! Artifact naming: deterministic filenames derived from the identifier and
//! the declared content classification.

use serde::Deserialize;

/// Extensions accepted from a direct transfer's suggested filename
const KNOWN_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "gif", "webp", "bmp", "tif", "tiff"];

/// Payload handed back by the in-page artifact fetch script
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PopupFetch {
    pub ok: bool,
    #[serde(default)]
    pub status: u32,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub error: String,
}

/// Map a declared MIME type onto an output extension
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let mime = mime.trim().to_ascii_lowercase();
    if mime.contains("application/pdf") {
        return Some("pdf");
    }
    match mime.split(';').next().unwrap_or("") {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/bmp" => Some("bmp"),
        "image/tiff" => Some("tif"),
        _ => None,
    }
}

/// Infer an extension from a source URL's path, ignoring query/fragment
pub fn extension_from_source(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    if KNOWN_EXTENSIONS.contains(&ext.as_str()) { Some(ext) } else { None }
}

/// Extension for a captured payload: declared MIME first, then the source
/// location, then the document default
pub fn extension_for(mime: &str, source: Option<&str>) -> String {
    if let Some(ext) = extension_for_mime(mime) {
        return ext.to_string();
    }
    source
        .and_then(extension_from_source)
        .unwrap_or_else(|| "pdf".to_string())
}

/// Whether a staged transfer's own extension is worth preserving
pub fn is_known_extension(ext: &str) -> bool {
    KNOWN_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

/// Turn an identifier into a safe, deterministic filename stem
pub fn sanitize_stem(identifier: &str) -> String {
    let stem: String = identifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() { "artifact".to_string() } else { stem }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("application/pdf"), Some("pdf"));
        assert_eq!(extension_for_mime("application/pdf; charset=binary"), Some("pdf"));
        assert_eq!(extension_for_mime("image/jpeg"), Some("jpg"));
        assert_eq!(extension_for_mime("IMAGE/PNG"), Some("png"));
        assert_eq!(extension_for_mime("text/html"), None);
        assert_eq!(extension_for_mime(""), None);
    }

    #[test]
    fn test_extension_from_source() {
        assert_eq!(extension_from_source("https://host/ar/YA1.png?token=abc"), Some("png".to_string()));
        assert_eq!(extension_from_source("https://host/viewer/image.JPEG#top"), Some("jpeg".to_string()));
        assert_eq!(extension_from_source("https://host/ar/render"), None);
        assert_eq!(extension_from_source("https://host/ar/render.cgi"), None);
    }

    #[test]
    fn test_extension_for_prefers_mime_then_source() {
        assert_eq!(extension_for("image/png", Some("https://host/x.jpg")), "png");
        assert_eq!(extension_for("application/octet-stream", Some("https://host/x.jpg")), "jpg");
        assert_eq!(extension_for("", None), "pdf");
    }

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("YA259824691BR"), "YA259824691BR");
        assert_eq!(sanitize_stem("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_stem(""), "artifact");
    }

    #[test]
    fn test_popup_fetch_parses_script_payload() {
        let json = r#"{"ok":true,"status":200,"contentType":"image/png","source":"https://h/x.png","data":"QUJD"}"#;
        let fetched: PopupFetch = serde_json::from_str(json).unwrap();
        assert!(fetched.ok);
        assert_eq!(fetched.status, 200);
        assert_eq!(fetched.content_type, "image/png");
        assert_eq!(fetched.data, "QUJD");

        let failure: PopupFetch = serde_json::from_str(r#"{"ok":false,"status":404}"#).unwrap();
        assert!(!failure.ok);
        assert_eq!(failure.status, 404);
        assert!(failure.error.is_empty());
    }
}
