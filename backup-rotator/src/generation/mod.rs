//! Backup generations on disk.
//!
//! A generation lives in the backup root either as a raw directory named by
//! its id, or as a `<id>.tar.zst` artifact once archived. An archival that was
//! interrupted can leave `<id>.tar` or `<id>.tar.zst.partial` files behind;
//! those are not generations and are listed separately.

pub mod naming;

use naming::{
    parse_generation_name, parse_intermediate_name, sanitize_folder_name, GenerationId, NameForm,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Physical form of a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationForm {
    Raw,
    Archived,
}

/// One directory entry that belongs to a folder's generation set
#[derive(Debug, Clone)]
pub struct Generation {
    pub id: GenerationId,
    pub path: PathBuf,
    pub form: GenerationForm,
}

/// List every generation of `logical_folder` under `backup_root`, oldest first.
///
/// Entries whose name does not parse, or whose file type disagrees with the
/// name (a file without the archive suffix, a directory with it), are ignored.
/// A missing backup root is an empty set.
pub fn scan_generations(
    backup_root: &Path,
    logical_folder: &str,
) -> std::io::Result<Vec<Generation>> {
    let tag = sanitize_folder_name(logical_folder);
    let mut generations = Vec::new();

    let Some(entries) = read_root(backup_root)? else {
        return Ok(generations);
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some((id, name_form)) = parse_generation_name(name, &tag) else {
            continue;
        };

        let file_type = entry.file_type()?;
        let form = match name_form {
            NameForm::Raw if file_type.is_dir() => GenerationForm::Raw,
            NameForm::Archived if file_type.is_file() => GenerationForm::Archived,
            _ => continue,
        };

        generations.push(Generation {
            id,
            path: entry.path(),
            form,
        });
    }

    // Same id: raw sorts before archived, so listings are stable.
    generations.sort_by(|a, b| {
        let archived = |g: &Generation| g.form == GenerationForm::Archived;
        a.id.cmp(&b.id).then_with(|| archived(a).cmp(&archived(b)))
    });

    Ok(generations)
}

/// List leftover archival intermediates of `logical_folder`, oldest first.
pub fn scan_intermediates(
    backup_root: &Path,
    logical_folder: &str,
) -> std::io::Result<Vec<PathBuf>> {
    let tag = sanitize_folder_name(logical_folder);
    let mut leftovers = Vec::new();

    let Some(entries) = read_root(backup_root)? else {
        return Ok(Vec::new());
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(id) = parse_intermediate_name(name, &tag) else {
            continue;
        };
        if entry.file_type()?.is_file() {
            leftovers.push((id, entry.path()));
        }
    }

    leftovers.sort();
    Ok(leftovers.into_iter().map(|(_, path)| path).collect())
}

/// A missing backup root reads as `None`.
fn read_root(backup_root: &Path) -> std::io::Result<Option<std::fs::ReadDir>> {
    match std::fs::read_dir(backup_root) {
        Ok(entries) => Ok(Some(entries)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
