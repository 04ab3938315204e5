//! Generation identifiers.
//!
//! An id is `<tag>_<YYYY-MM-DD_HH-MM-SS>`. Every field of the timestamp is
//! fixed-width and zero-padded, so for a single folder plain string ordering
//! is chronological ordering.
//!
//! Two generations of one folder created within the same second share an id:
//! the second run writes into the first run's directory and overwrites its
//! artifact (last write wins).

use chrono::NaiveDateTime;
use std::fmt;

/// strftime layout of the timestamp part of an id
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Length of a formatted timestamp, e.g. `2024-01-01_00-00-00`
pub const TIMESTAMP_LEN: usize = 19;

/// Suffix of an archived generation
pub const ARCHIVE_SUFFIX: &str = ".tar.zst";

/// Suffix of the intermediate uncompressed archive
pub const TAR_SUFFIX: &str = ".tar";

/// Appended to an archive while it is being written
pub const PARTIAL_SUFFIX: &str = ".partial";

const SEPARATOR: char = '_';
const RESERVED: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Identity of one generation: the folder tag plus its creation time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationId {
    tag: String,
    timestamp: NaiveDateTime,
}

impl GenerationId {
    pub fn new(logical_folder: &str, timestamp: NaiveDateTime) -> Self {
        Self {
            tag: sanitize_folder_name(logical_folder),
            timestamp,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// File name of the compressed artifact for this generation
    pub fn archive_name(&self) -> String {
        format!("{}{}", self, ARCHIVE_SUFFIX)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.tag,
            SEPARATOR,
            self.timestamp.format(TIMESTAMP_FORMAT)
        )
    }
}

/// Build the directory name for a new generation of `logical_folder`.
pub fn make_generation_id(logical_folder: &str, timestamp: NaiveDateTime) -> String {
    GenerationId::new(logical_folder, timestamp).to_string()
}

/// Map a logical folder (which may be a remote path) to a filesystem-safe tag.
///
/// Separators, reserved characters and control characters become `-`.
/// Surrounding whitespace and dots are trimmed; an empty result becomes `folder`.
pub fn sanitize_folder_name(logical_folder: &str) -> String {
    let replaced: String = logical_folder
        .chars()
        .map(|c| {
            if RESERVED.contains(&c) || c.is_control() {
                '-'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c: char| c.is_whitespace() || c == '.');
    if trimmed.is_empty() {
        "folder".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Physical form encoded in a directory entry name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameForm {
    /// Bare id, expected to be a directory
    Raw,
    /// `<id>.tar.zst`, expected to be a regular file
    Archived,
}

/// Parse a directory entry name as a generation belonging to `tag`.
///
/// Only `<tag>_<timestamp>` and `<tag>_<timestamp>.tar.zst` are accepted, so a
/// folder never claims entries of another folder whose tag merely starts with
/// its own.
pub fn parse_generation_name(name: &str, tag: &str) -> Option<(GenerationId, NameForm)> {
    let rest = name.strip_prefix(tag)?.strip_prefix(SEPARATOR)?;

    let (stamp, form) = match rest.strip_suffix(ARCHIVE_SUFFIX) {
        Some(stamp) => (stamp, NameForm::Archived),
        None => (rest, NameForm::Raw),
    };

    if stamp.len() != TIMESTAMP_LEN {
        return None;
    }
    let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;

    // Reject lenient parses so that the name round-trips exactly.
    if timestamp.format(TIMESTAMP_FORMAT).to_string() != stamp {
        return None;
    }

    Some((
        GenerationId {
            tag: tag.to_string(),
            timestamp,
        },
        form,
    ))
}

/// Parse a leftover of an interrupted archival belonging to `tag`:
/// `<id>.tar` or `<id>.tar.zst.partial`.
pub fn parse_intermediate_name(name: &str, tag: &str) -> Option<GenerationId> {
    let base = name
        .strip_suffix(PARTIAL_SUFFIX)
        .and_then(|n| n.strip_suffix(ARCHIVE_SUFFIX))
        .or_else(|| name.strip_suffix(TAR_SUFFIX))?;

    match parse_generation_name(base, tag)? {
        (id, NameForm::Raw) => Some(id),
        (_, NameForm::Archived) => None,
    }
}
