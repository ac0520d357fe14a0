//! The gather protocol's folder walk (§4.3 steps 1-4): a logical
//! (symlink-following) directory walk that diffs observed files against the
//! catalogue, using `jwalk` for parallel directory traversal — the same
//! walker the teacher uses for its volume scans.

use std::path::{Path, PathBuf};

use jwalk::WalkDir;

use crate::catalogue::{Catalogue, Msg};
use crate::error::ScanError;

#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Messages that are new or whose metadata changed — callers schedule a
    /// `Draft` task for each (accounted as `ctx.puts++`).
    pub new_or_changed: Vec<PathBuf>,
    /// Every directory visited, collected for later watch registration.
    pub visited_dirs: Vec<PathBuf>,
}

/// Basename matches `<all-digits><suffix>` for one of the configured
/// suffixes (default `.mew`).
pub fn matches_message_name(name: &str, suffixes: &[String]) -> bool {
    for suffix in suffixes {
        if let Some(stem) = name.strip_suffix(suffix.as_str()) {
            if !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()) {
                return true;
            }
        }
    }
    false
}

/// Walks `folder`'s subtree, inserting new messages and refreshing metadata
/// for changed ones, stamping every observed message's `fstime` to `epoch`.
/// Does NOT perform the deletion pass (step 4); callers run that separately
/// over the catalogue once the walk completes, since it requires comparing
/// against entries the walk did *not* visit.
pub fn walk_folder(
    catalogue: &mut Catalogue,
    folder: &Path,
    suffixes: &[String],
    epoch: u64,
) -> Result<WalkOutcome, ScanError> {
    let mut outcome = WalkOutcome::default();

    for entry in WalkDir::new(folder).follow_links(true).into_iter() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("gather walk error under {}: {e}", folder.display());
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_dir() {
            outcome.visited_dirs.push(path);
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !matches_message_name(&name, suffixes) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                log::warn!("stat failed for {}: {e}", path.display());
                continue;
            }
        };
        let mtime = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        let size = metadata.len();

        match catalogue.get_mut(&path) {
            Some(msg) => {
                if msg.mtime != mtime || msg.size != size {
                    msg.mtime = mtime;
                    msg.size = size;
                    msg.fstime = epoch;
                    outcome.new_or_changed.push(path);
                } else {
                    msg.fstime = epoch;
                }
            }
            None => {
                catalogue.insert(Msg::new(path.clone(), mtime, size, epoch));
                outcome.new_or_changed.push(path);
            }
        }
    }

    Ok(outcome)
}

/// §4.3 step 4: every catalogue entry under `folder` whose `fstime` wasn't
/// refreshed to `epoch` by the walk is a deletion candidate.
pub fn stale_under_prefix(catalogue: &Catalogue, folder: &Path, epoch: u64) -> Vec<PathBuf> {
    let prefix = folder.to_string_lossy().into_owned();
    catalogue
        .range_prefix(&prefix)
        .filter(|m| m.fstime != epoch)
        .map(|m| m.path.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn matches_digit_named_suffixed_files_only() {
        let suffixes = vec![".mew".to_string()];
        assert!(matches_message_name("123.mew", &suffixes));
        assert!(!matches_message_name("abc.mew", &suffixes));
        assert!(!matches_message_name("123.txt", &suffixes));
        assert!(!matches_message_name(".mew", &suffixes));
    }

    #[test]
    fn walk_discovers_new_messages_and_stamps_fstime() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("1.mew"), b"Subject: a\n\nhi").unwrap();
        fs::write(dir.path().join("2.mew"), b"Subject: b\n\nho").unwrap();
        fs::write(dir.path().join("ignore.txt"), b"nope").unwrap();

        let mut cat = Catalogue::new();
        let outcome = walk_folder(&mut cat, dir.path(), &[".mew".to_string()], 1).unwrap();
        assert_eq!(outcome.new_or_changed.len(), 2);
        assert_eq!(cat.len(), 2);
    }

    #[test]
    fn second_walk_with_no_changes_reports_nothing_new() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("1.mew"), b"Subject: a\n\nhi").unwrap();

        let mut cat = Catalogue::new();
        walk_folder(&mut cat, dir.path(), &[".mew".to_string()], 1).unwrap();
        let second = walk_folder(&mut cat, dir.path(), &[".mew".to_string()], 2).unwrap();
        assert!(second.new_or_changed.is_empty());
    }

    #[test]
    fn removed_file_is_detected_as_stale() {
        let dir = tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        fs::create_dir(&inbox).unwrap();
        fs::write(inbox.join("1.mew"), b"Subject: a\n\nhi").unwrap();
        fs::write(inbox.join("2.mew"), b"Subject: b\n\nho").unwrap();

        let mut cat = Catalogue::new();
        walk_folder(&mut cat, &inbox, &[".mew".to_string()], 1).unwrap();
        fs::remove_file(inbox.join("2.mew")).unwrap();
        walk_folder(&mut cat, &inbox, &[".mew".to_string()], 2).unwrap();

        let stale = stale_under_prefix(&cat, &inbox, 2);
        assert_eq!(stale.len(), 1);
        assert!(stale[0].ends_with("2.mew"));
    }
}
