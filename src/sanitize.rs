use std::path::Path;

use unicode_normalization::UnicodeNormalization;

use crate::AppError;

const RESERVED_WINDOWS_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Stripped outright. Slashes are handled separately.
const FORBIDDEN_CHARS: [char; 7] = ['<', '>', ':', '"', '|', '?', '*'];

const MAX_COMPONENT_BYTES: usize = 255;

/// Make a rendered name safe for the filesystem: path separators become `-`,
/// control and reserved characters are dropped, whitespace runs collapse to
/// one space and the ends are trimmed.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_space = false;
    for c in name.chars() {
        let c = match c {
            '/' | '\\' => '-',
            c if c.is_control() || FORBIDDEN_CHARS.contains(&c) => continue,
            c => c,
        };
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilenameError {
    Empty,
    RelativeSegment,
    ReservedName,
    TrailingDotOrSpace,
    ForbiddenCharacter,
    ComponentTooLong,
}

impl FilenameError {
    pub fn code(&self) -> &'static str {
        match self {
            FilenameError::Empty => "empty",
            FilenameError::RelativeSegment => "relative-segment",
            FilenameError::ReservedName => "reserved-name",
            FilenameError::TrailingDotOrSpace => "trailing-dot-or-space",
            FilenameError::ForbiddenCharacter => "forbidden-character",
            FilenameError::ComponentTooLong => "component-too-long",
        }
    }
}

impl From<FilenameError> for AppError {
    fn from(err: FilenameError) -> Self {
        AppError::new(
            "FILENAME/INVALID",
            "Rendered filename cannot be used on this filesystem.",
        )
        .with_context("reason", err.code())
    }
}

fn is_reserved_name(value: &str) -> bool {
    let stem = value
        .split_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(value);

    RESERVED_WINDOWS_NAMES
        .iter()
        .any(|candidate| stem.eq_ignore_ascii_case(candidate))
}

/// Gate applied before a rendered name becomes a file in a partition folder.
/// Returns the NFC form of the name.
pub fn validate_component(name: &str) -> Result<String, FilenameError> {
    if name.is_empty() {
        return Err(FilenameError::Empty);
    }
    if name == "." || name == ".." {
        return Err(FilenameError::RelativeSegment);
    }

    let normalized: String = name.nfc().collect();

    if is_reserved_name(&normalized) {
        return Err(FilenameError::ReservedName);
    }
    if normalized.trim_end_matches([' ', '.']).len() != normalized.len() {
        return Err(FilenameError::TrailingDotOrSpace);
    }
    if normalized
        .chars()
        .any(|c| c.is_control() || c == '/' || c == '\\' || FORBIDDEN_CHARS.contains(&c))
    {
        return Err(FilenameError::ForbiddenCharacter);
    }
    if normalized.len() > MAX_COMPONENT_BYTES {
        return Err(FilenameError::ComponentTooLong);
    }
    Ok(normalized)
}

/// First free name in `dir`: `name`, then `stem_2.ext`, `stem_3.ext`, ...
/// `taken` lets callers exclude names that exist only in the store.
pub fn unique_filename(dir: &Path, name: &str, taken: impl Fn(&str) -> bool) -> String {
    first_free(name, |candidate| !dir.join(candidate).exists() && !taken(candidate))
}

/// Like [`unique_filename`], but `current` (the name the document already
/// has) counts as free so an unchanged name is kept rather than bumped.
pub fn unique_filename_keeping(
    dir: &Path,
    name: &str,
    current: &str,
    taken: impl Fn(&str) -> bool,
) -> String {
    first_free(name, |candidate| {
        candidate == current || (!dir.join(candidate).exists() && !taken(candidate))
    })
}

fn first_free(name: &str, free: impl Fn(&str) -> bool) -> String {
    if free(name) {
        return name.to_string();
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    let mut counter: u32 = 2;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{stem}_{counter}.{ext}"),
            None => format!("{stem}_{counter}"),
        };
        if free(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}
