//! Privileged filesystem operations over a single shell channel.
//!
//! Every command goes through one [`PrivilegedShell`] in submission order.
//! Per-item follow-up queries (child counts, sizes) are joined with `;` into
//! one invocation instead of one round trip per file.

use std::path::Path;
use std::sync::{Mutex, OnceLock};

use fmcore_common::{base_name, Entry, VfsError, VfsResult, CHILD_COUNT_UNKNOWABLE};

use super::parser::{find_mount, parse_counts, parse_listing, parse_mounts, parse_sizes};
use super::shell::{shell_quote, CommandOutput, PrivilegedShell, SuShell};

/// Runs privileged commands and turns their output into entries.
pub struct RootShellExecutor {
    shell: Mutex<Box<dyn PrivilegedShell>>,
    available: OnceLock<bool>,
}

impl RootShellExecutor {
    /// Wrap an existing shell channel.
    pub fn new(shell: Box<dyn PrivilegedShell>) -> Self {
        Self {
            shell: Mutex::new(shell),
            available: OnceLock::new(),
        }
    }

    /// Spawn `su_binary` and wrap it.
    pub fn spawn(su_binary: &str) -> VfsResult<Self> {
        Ok(Self::new(Box::new(SuShell::spawn(su_binary)?)))
    }

    fn run(&self, command: &str) -> VfsResult<CommandOutput> {
        let mut shell = self
            .shell
            .lock()
            .map_err(|_| VfsError::BackendUnavailable("root shell lock poisoned".to_string()))?;
        tracing::debug!(command = %command, "root exec");
        shell.run(command)
    }

    fn run_checked(&self, command: &str) -> VfsResult<CommandOutput> {
        let output = self.run(command)?;
        if output.success() {
            Ok(output)
        } else {
            Err(VfsError::Io(format!(
                "command failed with status {}: {}",
                output.exit_code,
                output.stdout.trim()
            )))
        }
    }

    /// Whether the shell runs as uid 0. Checked once and cached.
    pub fn is_available(&self) -> bool {
        *self.available.get_or_init(|| match self.run("id") {
            Ok(out) => {
                let root = out.stdout.contains("uid=0(") || out.stdout.trim() == "uid=0";
                tracing::info!(available = root, "Root access checked");
                root
            }
            Err(e) => {
                tracing::warn!(error = %e, "Root access check failed");
                false
            }
        })
    }

    fn ensure_available(&self) -> VfsResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(VfsError::BackendUnavailable(
                "root access is not available".to_string(),
            ))
        }
    }

    /// List a directory.
    pub fn list_directory(&self, path: &str, include_hidden: bool) -> VfsResult<Vec<Entry>> {
        self.ensure_available()?;
        let flags = if include_hidden { "A" } else { "" };
        let quoted = shell_quote(path);

        let long = self.run(&format!("ls -l{} {} 2>/dev/null", flags, quoted))?;
        if !long.success() && long.stdout.trim().is_empty() {
            return Err(VfsError::NotFound(path.to_string()));
        }
        let plain = self.run(&format!("ls -1{} {} 2>/dev/null", flags, quoted))?;

        let entries = parse_listing(path, &long.stdout, &plain.stdout);
        tracing::debug!(path = %path, count = entries.len(), "root listing");
        Ok(entries)
    }

    /// Describe a single path.
    pub fn stat(&self, path: &str) -> VfsResult<Entry> {
        self.ensure_available()?;
        let trimmed = path.trim_end_matches('/');
        let name = base_name(trimmed);
        let out = self.run(&format!("ls -ld {} 2>/dev/null", shell_quote(path)))?;
        if !out.success() {
            return Err(VfsError::NotFound(path.to_string()));
        }

        let parent = fmcore_common::parent_path(trimmed).unwrap_or("/");
        let mut entries = parse_listing(parent, &out.stdout, name);
        match entries.pop() {
            Some(mut entry) => {
                if trimmed.is_empty() {
                    entry.path = "/".to_string();
                    entry.name = "/".to_string();
                } else {
                    entry.path = trimmed.to_string();
                    entry.name = name.to_string();
                }
                Ok(entry)
            }
            None => Err(VfsError::NotFound(path.to_string())),
        }
    }

    /// Whether a path exists.
    pub fn exists(&self, path: &str) -> VfsResult<bool> {
        self.ensure_available()?;
        let out = self.run(&format!(
            "if [ -e {0} ] || [ -L {0} ]; then echo 1; else echo 0; fi",
            shell_quote(path)
        ))?;
        Ok(out.stdout.trim() == "1")
    }

    fn count_command(path: &str, include_hidden: bool) -> String {
        let quoted = shell_quote(path);
        let flags = if include_hidden { " -A" } else { "" };
        format!(
            "if [ -r {0} ]; then ls{1} {0} 2>/dev/null | wc -l; else echo -1; fi",
            quoted, flags
        )
    }

    /// Number of children of one directory.
    pub fn child_count(&self, path: &str, include_hidden: bool) -> VfsResult<i64> {
        self.ensure_available()?;
        let out = self.run(&Self::count_command(path, include_hidden))?;
        Ok(parse_counts(&out.stdout, 1)[0])
    }

    /// Fill the child count of every directory in `entries` with one batched call.
    ///
    /// A directory whose count cannot be read becomes unknowable; the rest
    /// are still filled.
    pub fn fill_child_counts(&self, entries: &mut [Entry], include_hidden: bool) -> VfsResult<()> {
        self.ensure_available()?;
        let targets: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.needs_child_count())
            .map(|(i, _)| i)
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let batch = targets
            .iter()
            .map(|&i| Self::count_command(&entries[i].path, include_hidden))
            .collect::<Vec<_>>()
            .join("; ");

        let counts = match self.run(&batch) {
            Ok(out) => parse_counts(&out.stdout, targets.len()),
            Err(e) => {
                for &i in &targets {
                    entries[i].child_count = CHILD_COUNT_UNKNOWABLE;
                }
                return Err(e);
            }
        };
        for (&i, count) in targets.iter().zip(counts) {
            entries[i].set_child_count(count);
        }
        Ok(())
    }

    /// Refresh the size of every file in `entries` with one batched `stat`.
    ///
    /// Symlinks are followed so links report their target's size.
    pub fn fill_file_sizes(&self, entries: &mut [Entry]) -> VfsResult<()> {
        self.ensure_available()?;
        let paths: Vec<String> = entries
            .iter()
            .filter(|e| !e.is_directory && !e.is_synthetic())
            .map(|e| e.path.clone())
            .collect();
        if paths.is_empty() {
            return Ok(());
        }

        let batch = paths
            .iter()
            .map(|p| format!("stat -L -c '%n %s' {} 2>/dev/null", shell_quote(p)))
            .collect::<Vec<_>>()
            .join("; ");
        let out = self.run(&batch)?;

        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let sizes = parse_sizes(&out.stdout, &refs);
        for entry in entries.iter_mut() {
            if let Some(size) = sizes.get(&entry.path) {
                entry.size = *size;
            }
        }
        Ok(())
    }

    /// Remount the mount covering `path` read-write if it is read-only.
    ///
    /// Returns the mount point that was switched, if any.
    pub fn mount_read_write(&self, path: &str) -> VfsResult<Option<String>> {
        self.ensure_available()?;
        let Some(mount_point) = self.read_only_mounts(&[path])?.into_iter().next() else {
            return Ok(None);
        };
        self.remount(&mount_point, "rw")?;
        Ok(Some(mount_point))
    }

    /// Remount a mount point read-only.
    pub fn mount_read_only(&self, mount_point: &str) -> VfsResult<()> {
        self.ensure_available()?;
        self.remount(mount_point, "ro")
    }

    /// Run `op` with the mount covering `path` writable, restoring read-only
    /// afterward whether or not `op` succeeded.
    pub fn with_writable_mount<T>(
        &self,
        path: &str,
        op: impl FnOnce(&Self) -> VfsResult<T>,
    ) -> VfsResult<T> {
        self.with_writable_mounts(&[path], op)
    }

    /// [`with_writable_mount`](Self::with_writable_mount) over several paths.
    /// Each read-only mount is switched once, even when paths share it.
    pub fn with_writable_mounts<T>(
        &self,
        paths: &[&str],
        op: impl FnOnce(&Self) -> VfsResult<T>,
    ) -> VfsResult<T> {
        self.ensure_available()?;
        let mut remounted = Vec::new();
        for mount_point in self.read_only_mounts(paths)? {
            if let Err(e) = self.remount(&mount_point, "rw") {
                let _ = self.restore_read_only(&remounted);
                return Err(e);
            }
            remounted.push(mount_point);
        }

        let result = op(self);
        match (result, self.restore_read_only(&remounted)) {
            (Ok(_), Err(e)) => Err(e),
            (result, _) => result,
        }
    }

    /// Distinct read-only mount points covering `paths`, in path order.
    fn read_only_mounts(&self, paths: &[&str]) -> VfsResult<Vec<String>> {
        let table = self.run("mount")?;
        let mounts = parse_mounts(&table.stdout);
        let mut found: Vec<String> = Vec::new();
        for path in paths {
            if let Some(mount) = find_mount(&mounts, path) {
                if mount.read_only && !found.contains(&mount.mount_point) {
                    found.push(mount.mount_point.clone());
                }
            }
        }
        Ok(found)
    }

    fn remount(&self, mount_point: &str, mode: &str) -> VfsResult<()> {
        self.run_checked(&format!(
            "mount -o remount,{} {} 2>&1",
            mode,
            shell_quote(mount_point)
        ))?;
        tracing::info!(mount_point = %mount_point, mode, "Remounted");
        Ok(())
    }

    /// Switch mounts back to read-only, newest first. Every mount is tried;
    /// the first failure is returned.
    fn restore_read_only(&self, mount_points: &[String]) -> VfsResult<()> {
        let mut first_error = None;
        for mount_point in mount_points.iter().rev() {
            if let Err(e) = self.remount(mount_point, "ro") {
                tracing::warn!(mount_point = %mount_point, error = %e, "Failed to restore read-only mount");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Create a directory and its parents.
    pub fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.ensure_available()?;
        self.with_writable_mount(path, |exec| {
            exec.run_checked(&format!("mkdir -p {} 2>&1", shell_quote(path)))
                .map(|_| ())
        })
    }

    /// Delete a file or directory tree.
    pub fn delete(&self, path: &str) -> VfsResult<()> {
        self.ensure_available()?;
        self.with_writable_mount(path, |exec| {
            exec.run_checked(&format!("rm -rf {} 2>&1", shell_quote(path)))
                .map(|_| ())
        })
    }

    /// Rename a path. Refuses to replace an existing destination.
    pub fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.ensure_available()?;
        if self.exists(to)? {
            return Err(VfsError::PermissionDenied(format!("destination exists: {}", to)));
        }
        self.with_writable_mounts(&[to, from], |exec| {
            exec.run_checked(&format!(
                "mv {} {} 2>&1",
                shell_quote(from),
                shell_quote(to)
            ))
            .map(|_| ())
        })
    }

    /// Copy a privileged file into a local staging file.
    pub fn copy_out(&self, path: &str, staging: &Path) -> VfsResult<()> {
        self.ensure_available()?;
        let staging = staging.to_string_lossy();
        let out = self.run(&format!(
            "cat {} > {} 2>/dev/null",
            shell_quote(path),
            shell_quote(&staging)
        ))?;
        if out.success() {
            Ok(())
        } else {
            Err(VfsError::NotFound(path.to_string()))
        }
    }

    /// Copy a local staging file over a privileged destination.
    pub fn copy_in(&self, staging: &Path, path: &str) -> VfsResult<()> {
        self.ensure_available()?;
        let staging = staging.to_string_lossy();
        self.with_writable_mount(path, |exec| {
            exec.run_checked(&format!(
                "cat {} > {} 2>&1",
                shell_quote(&staging),
                shell_quote(path)
            ))
            .map(|_| ())
        })
    }
}
