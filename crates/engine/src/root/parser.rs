//! Parsers for the plain-text output of `ls`, `stat`, `wc` and `mount`.
//!
//! Everything here is pure: the executor feeds captured stdout in and gets
//! structured records back.

use std::collections::HashMap;

use fmcore_common::{join_path, Entry, CHILD_COUNT_UNKNOWN};

use crate::clock::parse_ls_timestamp;

/// Fields taken from one `ls -l` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongLine {
    pub is_directory: bool,
    pub size: u64,
    pub modified_millis: i64,
    /// Text after the timestamp, symlink target removed.
    pub tail: String,
    /// Whether `tail` is exactly the name column.
    pub exact: bool,
}

fn is_iso_date(token: &str) -> bool {
    let parts: Vec<&str> = token.split('-').collect();
    parts.len() == 3
        && parts[0].len() == 4
        && parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

/// Parse one long-format line. Returns `None` for headers such as `total 24`.
///
/// ISO timestamps (toybox, `--full-time`) yield the exact name column in
/// `tail`. Other layouts keep the whole line in `tail` so the caller can
/// match names by suffix.
pub fn parse_long_line(line: &str) -> Option<LongLine> {
    let line = line.trim_end_matches('\r');
    let first = line.chars().next()?;
    if !"-dlcbps".contains(first) || line.starts_with("total ") {
        return None;
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    let is_directory = first == 'd';

    let Some(date_idx) = tokens.iter().position(|t| is_iso_date(t)) else {
        // perms links owner group size month day time-or-year name
        let size = tokens.get(4).and_then(|s| s.parse().ok()).unwrap_or(0);
        let mut tail = line.to_string();
        strip_link_target(first, &mut tail);
        return Some(LongLine {
            is_directory,
            size,
            modified_millis: 0,
            tail,
            exact: false,
        });
    };

    let time = tokens.get(date_idx + 1)?;
    let size = date_idx
        .checked_sub(1)
        .and_then(|i| tokens.get(i))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let modified_millis = parse_ls_timestamp(tokens[date_idx], time).unwrap_or(0);

    // Skip an optional timezone token printed by --full-time.
    let mut name_idx = date_idx + 2;
    if tokens
        .get(name_idx)
        .is_some_and(|t| (t.starts_with('+') || t.starts_with('-')) && t.len() == 5)
    {
        name_idx += 1;
    }

    // Walk past the leading columns on the raw line so inner spaces survive.
    let mut rest = line;
    for token in &tokens[..name_idx.min(tokens.len())] {
        let at = rest.find(token)? + token.len();
        rest = &rest[at..];
    }
    let mut tail = rest.strip_prefix(' ').unwrap_or(rest).to_string();
    strip_link_target(first, &mut tail);

    Some(LongLine {
        is_directory,
        size,
        modified_millis,
        tail,
        exact: true,
    })
}

fn strip_link_target(kind: char, tail: &mut String) {
    if kind == 'l' {
        if let Some(idx) = tail.find(" -> ") {
            tail.truncate(idx);
        }
    }
}

/// Combine a long listing and a plain `ls -1` listing of `dir` into entries.
///
/// Names come from the plain listing: each long line's text is matched
/// against the longest plain name it ends with, so names containing spaces
/// survive intact.
pub fn parse_listing(dir: &str, long_output: &str, plain_output: &str) -> Vec<Entry> {
    let mut names: Vec<&str> = plain_output
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.is_empty())
        .collect();
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));
    let mut used = vec![false; names.len()];

    let mut entries = Vec::new();
    for line in long_output.lines() {
        let Some(parsed) = parse_long_line(line) else {
            continue;
        };

        let matched = names.iter().enumerate().find(|(i, name)| {
            !used[*i]
                && (parsed.tail == **name
                    || parsed.tail.ends_with(&format!(" {}", name)))
        });
        let name = match matched {
            Some((i, name)) => {
                used[i] = true;
                name.to_string()
            }
            None if parsed.exact => parsed.tail.clone(),
            None => parsed
                .tail
                .rsplit(' ')
                .next()
                .unwrap_or_default()
                .to_string(),
        };
        if name.is_empty() || name == "." || name == ".." {
            continue;
        }

        let path = join_path(dir, &name);
        entries.push(if parsed.is_directory {
            Entry::directory(path, name, parsed.modified_millis)
        } else {
            Entry::file(path, name, parsed.size, parsed.modified_millis)
        });
    }
    entries
}

/// Parse one count per line, assigned by position.
///
/// Missing or malformed lines yield [`CHILD_COUNT_UNKNOWN`].
pub fn parse_counts(output: &str, expected: usize) -> Vec<i64> {
    let mut counts: Vec<i64> = output
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.parse().unwrap_or(CHILD_COUNT_UNKNOWN))
        .take(expected)
        .collect();
    counts.resize(expected, CHILD_COUNT_UNKNOWN);
    counts
}

/// Parse `stat -c '%n %s'` lines for the given paths.
///
/// Each line is matched against the longest path it starts with; the size
/// is the token that follows.
pub fn parse_sizes(output: &str, paths: &[&str]) -> HashMap<String, u64> {
    let mut sorted: Vec<&str> = paths.to_vec();
    sorted.sort_by_key(|p| std::cmp::Reverse(p.len()));

    let mut sizes = HashMap::new();
    for line in output.lines().map(|l| l.trim_end_matches('\r')) {
        let Some(path) = sorted.iter().find(|p| {
            line.len() > p.len() && line.starts_with(**p) && line.as_bytes()[p.len()] == b' '
        }) else {
            continue;
        };
        if let Some(size) = line[path.len() + 1..]
            .split_whitespace()
            .next()
            .and_then(|s| s.parse().ok())
        {
            sizes.insert(path.to_string(), size);
        }
    }
    sizes
}

/// One row of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
    pub read_only: bool,
}

fn unescape_mount(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let octal = bytes
            .get(i + 1..i + 4)
            .filter(|d| bytes[i] == b'\\' && d.iter().all(|b| (b'0'..=b'7').contains(b)))
            .and_then(|d| {
                let code = d.iter().fold(0u16, |acc, b| acc * 8 + u16::from(b - b'0'));
                u8::try_from(code).ok()
            });
        if let Some(code) = octal {
            out.push(code);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn options_read_only(options: &str) -> bool {
    options
        .trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .any(|o| o == "ro")
}

/// Parse `mount` output (`dev on /mp type fs (opts)`) or `/proc/mounts`
/// rows (`dev /mp fs opts 0 0`).
pub fn parse_mounts(output: &str) -> Vec<MountPoint> {
    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() >= 6 && tokens[1] == "on" && tokens[3] == "type" {
                Some(MountPoint {
                    device: tokens[0].to_string(),
                    mount_point: unescape_mount(tokens[2]),
                    fs_type: tokens[4].to_string(),
                    read_only: options_read_only(tokens[5]),
                })
            } else if tokens.len() >= 4 {
                Some(MountPoint {
                    device: tokens[0].to_string(),
                    mount_point: unescape_mount(tokens[1]),
                    fs_type: tokens[2].to_string(),
                    read_only: options_read_only(tokens[3]),
                })
            } else {
                None
            }
        })
        .collect()
}

/// The mount point with the longest path covering `path`.
pub fn find_mount<'a>(mounts: &'a [MountPoint], path: &str) -> Option<&'a MountPoint> {
    mounts
        .iter()
        .filter(|m| {
            let mp = m.mount_point.trim_end_matches('/');
            mp.is_empty()
                || path == mp
                || (path.starts_with(mp) && path.as_bytes().get(mp.len()) == Some(&b'/'))
        })
        .max_by_key(|m| m.mount_point.trim_end_matches('/').len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmcore_common::CHILD_COUNT_UNKNOWABLE;

    // Captured from toybox ls on Android.
    const LONG: &str = "total 24
drwxrwx--x 3 root sdcard_rw 4096 2024-02-29 12:34 Android
-rw-rw---- 1 root sdcard_rw 1234 2024-02-29 12:35 My  Holiday Photo.jpg
drwxrwx--- 2 root sdcard_rw 4096 2023-11-02 08:00 DCIM
lrwxrwxrwx 1 root root        21 2024-01-01 00:00 sdcard -> /storage/self/primary
-rw-r--r-- 1 root root         0 2024-01-01 00:00 plain
";

    const PLAIN: &str = "Android
My  Holiday Photo.jpg
DCIM
sdcard
plain
";

    #[test]
    fn test_long_line_fields() {
        let line = parse_long_line(
            "-rw-rw---- 1 root sdcard_rw 1234 2024-02-29 12:34 My File.jpg",
        )
        .unwrap();
        assert!(!line.is_directory);
        assert_eq!(line.size, 1234);
        assert_eq!(line.modified_millis, 1_709_210_040_000);
        assert_eq!(line.tail, "My File.jpg");

        assert!(parse_long_line("total 24").is_none());
        assert!(parse_long_line("").is_none());
    }

    #[test]
    fn test_listing_with_spaces() {
        let entries = parse_listing("/data/media/0", LONG, PLAIN);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Android", "My  Holiday Photo.jpg", "DCIM", "sdcard", "plain"]
        );

        let photo = &entries[1];
        assert_eq!(photo.path, "/data/media/0/My  Holiday Photo.jpg");
        assert_eq!(photo.size, 1234);
        assert!(!photo.is_directory);
        assert_eq!(photo.child_count, CHILD_COUNT_UNKNOWABLE);

        assert!(entries[0].is_directory);
        assert_eq!(entries[0].child_count, CHILD_COUNT_UNKNOWN);
        assert!(!entries[3].is_directory);
    }

    #[test]
    fn test_listing_name_suffix_of_another() {
        let long = "-rw-r--r-- 1 root root 1 2024-01-01 00:00 b c
-rw-r--r-- 1 root root 2 2024-01-01 00:00 c
";
        let entries = parse_listing("/x", long, "c\nb c\n");
        assert_eq!(entries[0].name, "b c");
        assert_eq!(entries[0].size, 1);
        assert_eq!(entries[1].name, "c");
        assert_eq!(entries[1].size, 2);
    }

    #[test]
    fn test_listing_full_time() {
        let long = "-rw-r--r-- 1 root root 7 2024-02-29 12:34:56.000000000 +0000 notes.txt\n";
        let entries = parse_listing("/", long, "notes.txt\n");
        assert_eq!(entries[0].path, "/notes.txt");
        assert_eq!(entries[0].modified_millis, 1_709_210_096_000);
    }

    #[test]
    fn test_listing_without_plain_name_falls_back() {
        let long = "-rw-r--r-- 1 root root 3 2024-01-01 00:00 a b\n";
        let entries = parse_listing("/x", long, "");
        assert_eq!(entries[0].name, "a b");
    }

    #[test]
    fn test_listing_locale_dates() {
        // GNU coreutils default layout.
        let long = "total 8
drwxr-xr-x 2 root root 4096 Feb 29 12:34 Camera Roll
-rw-r--r-- 1 root root   42 Jan  1  2023 a.txt
";
        let entries = parse_listing("/x", long, "Camera Roll\na.txt\n");
        assert_eq!(entries[0].name, "Camera Roll");
        assert!(entries[0].is_directory);
        assert_eq!(entries[1].name, "a.txt");
        assert_eq!(entries[1].size, 42);
    }

    #[test]
    fn test_counts_by_position() {
        assert_eq!(parse_counts("3\n-1\n0\n", 3), vec![3, -1, 0]);
        assert_eq!(parse_counts("  12\n", 3), vec![12, -1, -1]);
        assert_eq!(parse_counts("x\n4\n", 2), vec![-1, 4]);
    }

    #[test]
    fn test_sizes() {
        let out = "/sd/a b.txt 120\n/sd/a 7\n/sd/missing: nope\n";
        let sizes = parse_sizes(out, &["/sd/a", "/sd/a b.txt", "/sd/c"]);
        assert_eq!(sizes.get("/sd/a b.txt"), Some(&120));
        assert_eq!(sizes.get("/sd/a"), Some(&7));
        assert_eq!(sizes.get("/sd/c"), None);
    }

    #[test]
    fn test_mount_table_formats() {
        let out = "/dev/block/dm-0 on / type ext4 (ro,seclabel,relatime)
/dev/block/dm-1 on /system type ext4 (ro,seclabel)
/dev/fuse on /storage/emulated type fuse (rw,lazytime,nosuid)
/dev/block/sda1 /mnt/media\\040rw vfat rw,relatime 0 0
";
        let mounts = parse_mounts(out);
        assert_eq!(mounts.len(), 4);
        assert!(mounts[1].read_only);
        assert_eq!(mounts[1].fs_type, "ext4");
        assert!(!mounts[2].read_only);
        assert_eq!(mounts[3].mount_point, "/mnt/media rw");

        assert_eq!(
            find_mount(&mounts, "/system/etc/hosts").unwrap().mount_point,
            "/system"
        );
        assert_eq!(find_mount(&mounts, "/systemx").unwrap().mount_point, "/");
        assert_eq!(find_mount(&mounts, "/system").unwrap().mount_point, "/system");
    }
}
