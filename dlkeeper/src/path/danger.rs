//! File-type danger tiers.

use std::path::Path;

use super::naming::file_extension;
use super::PathDecision;

/// Extension of packaged browser extensions; never auto-opened.
pub const EXTENSION_PACKAGE_EXT: &str = "crx";

/// How risky a file type is to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DangerLevel {
    NotDangerous,
    /// Acceptable when the user clicked a link on a site visited before.
    AllowOnUserGesture,
    /// Always requires explicit acceptance, unless auto-opened on a gesture.
    Dangerous,
}

const DANGEROUS: &[&str] = &[
    "bat", "cmd", "com", "cpl", "hta", "inf", "jar", "lnk", "msc", "pif", "ps1", "reg", "scr",
    "vbe", "vbs", "wsf", "wsh",
];

const ALLOW_ON_USER_GESTURE: &[&str] = &[
    "apk", "app", "appimage", "crx", "deb", "dmg", "exe", "js", "msi", "pkg", "pl", "py", "rpm",
    "sh",
];

/// Danger tier of a file name, by extension.
pub fn file_danger_level(path: &Path) -> DangerLevel {
    let Some(ext) = file_extension(path) else {
        return DangerLevel::NotDangerous;
    };

    if DANGEROUS.contains(&ext.as_str()) {
        DangerLevel::Dangerous
    } else if ALLOW_ON_USER_GESTURE.contains(&ext.as_str()) {
        DangerLevel::AllowOnUserGesture
    } else {
        DangerLevel::NotDangerous
    }
}

/// True if the user asked for files with this extension to open
/// automatically. Extension packages are excluded.
pub fn should_auto_open(path: &Path, auto_open_extensions: &[String]) -> bool {
    match file_extension(path) {
        Some(ext) if ext != EXTENSION_PACKAGE_EXT => {
            auto_open_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
        }
        _ => false,
    }
}

/// Decide whether the file at `decision.suggested_path` is dangerous.
///
/// `from_gallery` only matters for extension installs: installs that did
/// not come from the trusted gallery are always dangerous.
pub fn is_dangerous_file(
    decision: &PathDecision,
    auto_open: bool,
    visited_referrer_before: bool,
    from_gallery: bool,
) -> bool {
    let file_name = decision
        .suggested_path
        .file_name()
        .map(Path::new)
        .unwrap_or_else(|| Path::new(""));

    let level = file_danger_level(file_name);
    if level == DangerLevel::Dangerous {
        return !(auto_open && decision.has_user_gesture);
    }
    if level == DangerLevel::AllowOnUserGesture
        && (!decision.has_user_gesture || !visited_referrer_before)
    {
        return true;
    }

    decision.is_extension_install && !from_gallery
}
