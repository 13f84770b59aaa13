//! File names for payloads copied into private storage.

use std::fmt;

pub const MAX_BASE_NAME_CHARS: usize = 50;
pub const MAX_TITLE_CHARS: usize = 200;

/// Extension inferred from a MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    Mp3,
    Aac,
    Ogg,
    Wav,
    M4a,
    Audio,
    Mp4,
    ThreeGp,
    Webm,
    Mkv,
    Video,
    Jpg,
    Png,
    Image,
    Bin,
    /// No entry in the table. Written as the generic `.file` suffix.
    Unknown,
}

impl Extension {
    pub fn from_mime(mime_type: Option<&str>) -> Self {
        let Some(mime) = mime_type.map(|m| m.trim().to_ascii_lowercase()) else {
            return Extension::Unknown;
        };

        match mime.as_str() {
            "audio/mpeg" => Extension::Mp3,
            "audio/aac" => Extension::Aac,
            "audio/ogg" => Extension::Ogg,
            "audio/wav" => Extension::Wav,
            "audio/mp4" => Extension::M4a,
            m if m.starts_with("audio/") => Extension::Audio,
            "video/mp4" => Extension::Mp4,
            "video/3gpp" => Extension::ThreeGp,
            "video/webm" => Extension::Webm,
            "video/x-matroska" => Extension::Mkv,
            m if m.starts_with("video/") => Extension::Video,
            "image/jpeg" => Extension::Jpg,
            "image/png" => Extension::Png,
            m if m.starts_with("image/") => Extension::Image,
            "application/octet-stream" => Extension::Bin,
            other => {
                log::warn!("Unknown MIME type, cannot determine extension: {}", other);
                Extension::Unknown
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Extension::Mp3 => "mp3",
            Extension::Aac => "aac",
            Extension::Ogg => "ogg",
            Extension::Wav => "wav",
            Extension::M4a => "m4a",
            Extension::Audio => "audio",
            Extension::Mp4 => "mp4",
            Extension::ThreeGp => "3gp",
            Extension::Webm => "webm",
            Extension::Mkv => "mkv",
            Extension::Video => "video",
            Extension::Jpg => "jpg",
            Extension::Png => "png",
            Extension::Image => "img",
            Extension::Bin => "bin",
            Extension::Unknown => "file",
        }
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keeps `[A-Za-z0-9._-]`, replaces everything else with `_`, caps the length.
pub fn sanitize_base_name(title: &str) -> String {
    title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_BASE_NAME_CHARS)
        .collect()
}

/// `media_<unix-millis>_<sanitized-title>.<ext>`
pub fn private_file_name(title: &str, mime_type: Option<&str>, timestamp_millis: i64) -> String {
    format!(
        "media_{}_{}.{}",
        timestamp_millis,
        sanitize_base_name(title),
        Extension::from_mime(mime_type)
    )
}

/// The download's own title, or `Downloaded File <id>` when it has none.
pub fn title_or_default(download_id: i64, title: Option<&str>) -> String {
    match title {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => format!("Downloaded File {}", download_id),
    }
}

pub fn cap_title(title: &str) -> String {
    title.chars().take(MAX_TITLE_CHARS).collect()
}
