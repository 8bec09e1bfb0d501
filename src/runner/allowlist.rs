//! Command allowlist matching.
//!
//! The allowlist is pure data: a set of permitted command strings from
//! config, consulted before any process spawn. Matching is a three-tier
//! policy, first match wins:
//!
//! 1. absolute, extension-normalized path against absolute entries
//! 2. extension-normalized basename against non-absolute entries,
//!    case preserved
//! 3. case-insensitive basename match (legacy leniency)
//!
//! No allowlist at all permits everything; an empty one denies everything.

use std::path::{Component, Path, PathBuf};

/// Strip a trailing `.exe` (any case) from a command or entry name.
pub fn normalize_command_name(name: &str) -> &str {
    // len() counts bytes, so len - 4 can land inside a multi-byte char
    // where slicing panics. A real ".exe" tail is ASCII; the boundary
    // check only rejects names that cannot carry one.
    if name.len() > 4
        && name.is_char_boundary(name.len() - 4)
        && name[name.len() - 4..].eq_ignore_ascii_case(".exe")
    {
        &name[..name.len() - 4]
    } else {
        name
    }
}

/// Check a resolved command against the configured allowlist.
pub fn is_command_allowed(command: &str, allow: Option<&[String]>) -> bool {
    let Some(entries) = allow else {
        return true;
    };

    let command_path = absolutize(Path::new(normalize_command_name(command)));
    let command_base = basename(command);

    // Tier 1: absolute entries, exact normalized path
    for entry in entries {
        if Path::new(entry).is_absolute() {
            let entry_path = absolutize(Path::new(normalize_command_name(entry)));
            if entry_path == command_path {
                return true;
            }
        }
    }

    // Tier 2: non-absolute entries, case-preserving basename
    for entry in entries {
        if !Path::new(entry).is_absolute() && normalize_command_name(entry) == command_base {
            return true;
        }
    }

    // Tier 3: non-absolute entries, case-insensitive basename
    for entry in entries {
        if !Path::new(entry).is_absolute()
            && normalize_command_name(entry).eq_ignore_ascii_case(&command_base)
        {
            return true;
        }
    }

    false
}

/// Extension-normalized final path component of a command string.
fn basename(command: &str) -> String {
    let name = Path::new(command)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| command.to_string());
    normalize_command_name(&name).to_string()
}

/// Lexically absolute form of a path: joined onto the working directory
/// when relative, with `.` and `..` components resolved without touching
/// the filesystem. A command does not have to exist to be matched.
fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}
