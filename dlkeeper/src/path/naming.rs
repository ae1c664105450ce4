//! File-name generation and naming helpers.
//!
//! Pure functions only; nothing here touches the file system except
//! [`unique_path_number`], which only checks for existence.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::Uniquifier;

/// Suffix appended to a file name while its download is incomplete.
pub const PARTIAL_SUFFIX: &str = "partial";

/// Highest ` (n)` suffix tried before giving up and prompting.
pub const MAX_UNIQUE_FILES: u32 = 100;

/// MIME type of browser extension packages.
pub const EXTENSION_MIME_TYPE: &str = "application/x-chrome-extension";

/// URL suffix identifying user scripts.
pub const USER_SCRIPT_SUFFIX: &str = ".user.js";

/// Fallback when nothing in the request yields a usable name.
pub const DEFAULT_FILE_NAME: &str = "download";

const UNCONFIRMED_PREFIX: &str = "Unconfirmed";

/// `dir/report.pdf` -> `dir/report.pdf.partial`
pub fn intermediate_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

/// `dir/report.pdf` -> `dir/report (n).pdf`
pub fn append_number_to_path(path: &Path, number: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem} ({number}).{}", ext.to_string_lossy()),
        None => format!("{stem} ({number})"),
    };
    path.with_file_name(name)
}

/// Find the lowest suffix that frees both `path` and its intermediate name.
pub fn unique_path_number(path: &Path) -> Uniquifier {
    if !path.exists() && !intermediate_path(path).exists() {
        return Uniquifier::None;
    }

    for number in 1..=MAX_UNIQUE_FILES {
        let candidate = append_number_to_path(path, number);
        if !candidate.exists() && !intermediate_path(&candidate).exists() {
            return Uniquifier::Applied(number);
        }
    }

    Uniquifier::Exhausted
}

/// Obfuscated name used while a dangerous download awaits acceptance.
pub fn unconfirmed_name(number: u32) -> String {
    format!("{UNCONFIRMED_PREFIX} {number}.{PARTIAL_SUFFIX}")
}

/// Lower-cased extension of `path`, without the dot.
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
}

// =============================================================================
// Name generation
// =============================================================================

/// Derive a file name from request metadata.
///
/// Sources in order of preference: the page-suggested name, the
/// `Content-Disposition` header, the last URL path segment, the URL host.
/// The result is always a single sanitized path component; an extension is
/// added from the MIME type when the chosen name has none.
pub fn generate_file_name(
    url: &str,
    content_disposition: &str,
    suggested_filename: &str,
    mime_type: &str,
) -> String {
    let candidates = [
        Some(suggested_filename.to_string()),
        filename_from_content_disposition(content_disposition),
        last_path_segment(url),
        url_host(url).map(str::to_string),
    ];

    let mut name = candidates
        .into_iter()
        .flatten()
        .find_map(|candidate| sanitize_file_name(&candidate))
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());

    if file_extension(Path::new(&name)).is_none() {
        if let Some(ext) = extension_for_mime(mime_type) {
            name.push('.');
            name.push_str(ext);
        }
    }

    name
}

fn disposition_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // filename="quoted" | filename=token | filename*=charset''encoded
        Regex::new(r#"(?i)filename(\*)?\s*=\s*(?:"([^"]*)"|([^;\s]+))"#).unwrap()
    })
}

/// Extract the file name from a `Content-Disposition` header value.
///
/// The RFC 5987 `filename*` form wins over plain `filename`.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;

    for caps in disposition_pattern().captures_iter(value) {
        let raw = caps.get(2).or_else(|| caps.get(3))?.as_str();
        if caps.get(1).is_some() {
            let encoded = raw.split_once("''").map(|(_, v)| v).unwrap_or(raw);
            if let Ok(decoded) = urlencoding::decode(encoded) {
                if !decoded.is_empty() {
                    return Some(decoded.into_owned());
                }
            }
        } else if plain.is_none() && !raw.is_empty() {
            plain = Some(raw.to_string());
        }
    }

    plain
}

/// Reduce `name` to a safe single path component, or `None` if nothing
/// usable remains.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim_matches(|c: char| c.is_whitespace() || c == '.');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Preferred extension for a MIME type (parameters ignored).
pub fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    let essence = mime_type.split(';').next().unwrap_or("").trim();
    let ext = match essence.to_ascii_lowercase().as_str() {
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/gzip" | "application/x-gzip" => "gz",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        EXTENSION_MIME_TYPE => "crx",
        "text/plain" => "txt",
        "text/html" => "html",
        "text/css" => "css",
        "text/csv" => "csv",
        "text/javascript" | "application/javascript" => "js",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        _ => return None,
    };
    Some(ext)
}

// =============================================================================
// URL helpers
// =============================================================================

/// Host part of an absolute URL (no user info, no port).
pub fn url_host(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    let host = match host_port.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => host_port,
    };
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Path part of an absolute URL, without query or fragment.
fn url_path(url: &str) -> &str {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    match without_query.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or(""),
        None => "",
    }
}

fn last_path_segment(url: &str) -> Option<String> {
    let segment = url_path(url).rsplit('/').next()?;
    if segment.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    Some(decoded)
}

/// True for URLs pointing at a user script.
pub fn is_user_script_url(url: &str) -> bool {
    url_path(url).to_ascii_lowercase().ends_with(USER_SCRIPT_SUFFIX)
}

/// True for downloads that install a browser extension or user script.
pub fn is_extension_install(url: &str, mime_type: &str) -> bool {
    mime_type == EXTENSION_MIME_TYPE || is_user_script_url(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_intermediate_path() {
        assert_eq!(
            intermediate_path(Path::new("/dl/report.pdf")),
            PathBuf::from("/dl/report.pdf.partial")
        );
    }

    #[test]
    fn test_append_number_to_path() {
        assert_eq!(
            append_number_to_path(Path::new("/dl/report.pdf"), 1),
            PathBuf::from("/dl/report (1).pdf")
        );
        assert_eq!(
            append_number_to_path(Path::new("/dl/README"), 3),
            PathBuf::from("/dl/README (3)")
        );
    }

    #[test]
    fn test_unique_path_number_checks_partial_sibling() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.pdf");
        assert_eq!(unique_path_number(&path), Uniquifier::None);

        std::fs::write(intermediate_path(&path), b"").unwrap();
        assert_eq!(unique_path_number(&path), Uniquifier::Applied(1));

        std::fs::write(dir.path().join("report (1).pdf"), b"x").unwrap();
        assert_eq!(unique_path_number(&path), Uniquifier::Applied(2));
    }

    #[test]
    fn test_unique_path_number_exhausts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"").unwrap();
        for n in 1..=MAX_UNIQUE_FILES {
            std::fs::write(append_number_to_path(&path, n), b"").unwrap();
        }
        assert_eq!(unique_path_number(&path), Uniquifier::Exhausted);
    }

    #[test]
    fn test_unconfirmed_name() {
        assert_eq!(unconfirmed_name(42), "Unconfirmed 42.partial");
    }

    #[test]
    fn test_generate_prefers_suggested_name() {
        let name = generate_file_name(
            "https://example.com/get?id=1",
            "attachment; filename=\"server.zip\"",
            "page.zip",
            "application/zip",
        );
        assert_eq!(name, "page.zip");
    }

    #[test]
    fn test_generate_from_content_disposition() {
        let name = generate_file_name(
            "https://example.com/get?id=1",
            "attachment; filename=\"Quarterly Report.pdf\"",
            "",
            "",
        );
        assert_eq!(name, "Quarterly Report.pdf");
    }

    #[test]
    fn test_encoded_disposition_wins() {
        let value = "attachment; filename=\"fallback.txt\"; filename*=UTF-8''na%C3%AFve.txt";
        assert_eq!(
            filename_from_content_disposition(value).as_deref(),
            Some("naïve.txt")
        );
    }

    #[test]
    fn test_generate_from_url_path_and_mime() {
        assert_eq!(
            generate_file_name("https://example.com/files/my%20notes?x=1", "", "", "text/plain"),
            "my notes.txt"
        );
    }

    #[test]
    fn test_generate_falls_back_to_host_then_default() {
        assert_eq!(generate_file_name("https://example.com/", "", "", ""), "example.com");
        assert_eq!(generate_file_name("data:,", "", "", "text/html"), "download.html");
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_file_name("a:b?.txt").as_deref(), Some("a_b_.txt"));
        assert_eq!(sanitize_file_name(" .. "), None);
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host("https://user@files.example.com:8443/a"), Some("files.example.com"));
        assert_eq!(url_host("file:///tmp/a"), None);
        assert_eq!(url_host("not a url"), None);
    }

    #[test]
    fn test_extension_install_detection() {
        assert!(is_extension_install("https://x.test/a.crx", EXTENSION_MIME_TYPE));
        assert!(is_extension_install("https://x.test/cool.user.js?v=2", "text/javascript"));
        assert!(!is_extension_install("https://x.test/app.js", "text/javascript"));
    }

    #[test]
    fn test_extension_for_mime_ignores_parameters() {
        assert_eq!(extension_for_mime("text/plain; charset=utf-8"), Some("txt"));
        assert_eq!(extension_for_mime("application/octet-stream"), None);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_generated_name_is_single_component(
                url in "https?://[a-z]{1,8}\\.test(/[a-zA-Z0-9%._ -]{0,12}){0,3}",
                suggested in "[a-zA-Z0-9/\\\\:. _-]{0,16}",
            ) {
                let name = generate_file_name(&url, "", &suggested, "");
                prop_assert!(!name.is_empty());
                prop_assert!(!name.contains('/'));
                prop_assert!(!name.contains('\\'));
                prop_assert_eq!(Path::new(&name).components().count(), 1);
            }

            #[test]
            fn test_numbered_path_keeps_extension(
                stem in "[a-z]{1,10}",
                ext in "[a-z]{1,4}",
                n in 1u32..=MAX_UNIQUE_FILES,
            ) {
                let path = PathBuf::from(format!("/dl/{stem}.{ext}"));
                let numbered = append_number_to_path(&path, n);
                prop_assert_eq!(file_extension(&numbered), Some(ext));
                prop_assert_eq!(numbered.parent(), path.parent());
            }
        }
    }
}
