//! Chroot + cgroup-v2 + privilege-drop execution environment for signed
//! tasks (steps 3-7).
//!
//! Grounded on `examples/original_source/internal/runner/sandbox.go`
//! (`ensureMinimalRootfs`, `ensureUltaAIUser`, `applyCgroupLimits`,
//! `ExecuteSignedTask`), reworked onto `nix` for the privileged syscalls
//! (`examples/original_source/internal/runner/sandbox.go` calls them
//! directly via `golang.org/x/sys/unix`/`syscall.SysProcAttr`) and
//! `tokio::process::Command` with a `pre_exec` hook instead of Go's
//! `SysProcAttr{Chroot, Credential, Setpgid}`.
//!
//! One deliberate correction from the Go reference (recorded in
//! DESIGN.md): the copied-in script is addressed by its path *inside* the
//! chroot (`/sandbox/task.sh`), not by the host-absolute path the Go code
//! passes as `bash`'s argv after chrooting — the latter would resolve to a
//! nonexistent doubly-nested path once the chroot syscall has taken effect.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::{Gid, Pid, Uid, User};
use tokio::process::Command;
use tracing::warn;

use crate::error::SandboxError;

pub const SANDBOX_ROOT: &str = "/var/lib/ultaai/sandbox";
pub const AUDIT_LOG_PATH: &str = "/var/log/ultaai/audit.log";
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";
pub const CGROUP_DOMAIN: &str = "ultaai";
pub const MAX_RAM_BYTES: u64 = 1024 * 1024 * 1024;
pub const MAX_IO_BPS: u64 = 100 * 1024 * 1024;
pub const CPU_QUOTA_US: u64 = 80_000;
pub const CPU_PERIOD_US: u64 = 100_000;
pub const SOFT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const HARD_TIMEOUT: Duration = Duration::from_secs(35 * 60);

pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub chroot_used: bool,
    pub cgroup_used: bool,
}

/// Runs `script_path`'s bytes (already hash-verified by the caller) inside
/// the sandbox under `task_id`, with `args` forwarded to the script.
pub async fn execute(task_id: &str, script_path: &Path, args: &[String]) -> Result<ExecutionOutcome, SandboxError> {
    if cfg!(not(unix)) {
        return Err(SandboxError::UnsupportedPlatform);
    }

    ensure_minimal_rootfs().await?;

    let chroot_script_host = Path::new(SANDBOX_ROOT).join("sandbox").join("task.sh");
    copy_file(script_path, &chroot_script_host, 0o755).map_err(|e| SandboxError::RootfsPrep(e.to_string()))?;

    let (uid, gid) = ensure_ultaai_user()?;

    let sandbox_root = SANDBOX_ROOT.to_string();
    let mut command = Command::new("/bin/bash");
    command
        .arg("/sandbox/task.sh")
        .args(args)
        .current_dir("/")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    unsafe {
        command.pre_exec(move || {
            nix::unistd::chroot(sandbox_root.as_str()).map_err(to_io_error)?;
            nix::unistd::chdir("/").map_err(to_io_error)?;
            nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(to_io_error)?;
            nix::unistd::setresgid(gid, gid, gid).map_err(to_io_error)?;
            nix::unistd::setresuid(uid, uid, uid).map_err(to_io_error)?;
            Ok(())
        });
    }

    let mut child = command.spawn().map_err(SandboxError::Spawn)?;
    let pid = child.id().ok_or_else(|| SandboxError::Spawn(std::io::Error::other("no pid after spawn")))?;

    let cgroup_used = apply_cgroup_limits(task_id, pid as i32);

    let exit_code = match tokio::time::timeout(SOFT_TIMEOUT, child.wait()).await {
        Ok(status) => exit_code_of(status.map_err(SandboxError::Wait)?),
        Err(_elapsed) => {
            warn!(task_id, "soft timeout reached, sending SIGTERM to process group");
            let _ = signal::kill(Pid::from_raw(-(pid as i32)), Signal::SIGTERM);
            match tokio::time::timeout(HARD_TIMEOUT - SOFT_TIMEOUT, child.wait()).await {
                Ok(status) => exit_code_of(status.map_err(SandboxError::Wait)?),
                Err(_elapsed) => {
                    warn!(task_id, "hard timeout reached, sending SIGKILL");
                    let _ = signal::kill(Pid::from_raw(-(pid as i32)), Signal::SIGKILL);
                    let _ = child.wait().await;
                    -1
                }
            }
        }
    };

    let stdout = read_all(child.stdout.take()).await;
    let stderr = read_all(child.stderr.take()).await;

    Ok(ExecutionOutcome {
        exit_code,
        stdout,
        stderr,
        chroot_used: true,
        cgroup_used,
    })
}

fn to_io_error(e: nix::Error) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.code().unwrap_or_else(|| -(status.signal().unwrap_or(0)))
}

async fn read_all(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
    use tokio::io::AsyncReadExt;
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf).await;
    }
    buf
}

fn ensure_dirs() -> std::io::Result<()> {
    for dir in [
        SANDBOX_ROOT.to_string(),
        PathBuf::from(AUDIT_LOG_PATH).parent().unwrap().display().to_string(),
        format!("{CGROUP_ROOT}/{CGROUP_DOMAIN}"),
    ] {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn ensure_ultaai_user() -> Result<(Uid, Gid), SandboxError> {
    let user = User::from_name("ultaai")
        .ok()
        .flatten()
        .or_else(|| User::from_name("nobody").ok().flatten());
    user.map(|u| (u.uid, u.gid)).ok_or(SandboxError::NoUnprivilegedUser)
}

fn copy_file(src: &Path, dst: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, dst)?;
    std::fs::set_permissions(dst, std::fs::Permissions::from_mode(mode))
}

/// Resolves `/bin/bash`'s shared-library dependencies via the system
/// linker's reporting tool (`ldd`), matching the Go reference's `lddList`.
async fn ldd_libs(bin: &str) -> std::io::Result<Vec<PathBuf>> {
    let output = Command::new("ldd").arg(bin).output().await?;
    let text = String::from_utf8_lossy(&output.stdout);
    let mut libs = Vec::new();
    for line in text.lines() {
        if let Some((_, right)) = line.split_once("=>") {
            let right = right.trim();
            if let Some(path) = right.split_whitespace().next() {
                if path.starts_with('/') {
                    libs.push(PathBuf::from(path));
                }
            }
        } else if line.trim().starts_with('/') {
            if let Some(path) = line.trim().split_whitespace().next() {
                libs.push(PathBuf::from(path));
            }
        }
    }
    Ok(libs)
}

async fn ensure_minimal_rootfs() -> Result<(), SandboxError> {
    ensure_dirs().map_err(|e| SandboxError::RootfsPrep(e.to_string()))?;

    let dest_bash = Path::new(SANDBOX_ROOT).join("bin/bash");
    if !dest_bash.exists() {
        copy_file(Path::new("/bin/bash"), &dest_bash, 0o755)
            .map_err(|e| SandboxError::RootfsPrep(format!("copy bash: {e}")))?;
        let libs = ldd_libs("/bin/bash")
            .await
            .map_err(|e| SandboxError::RootfsPrep(format!("ldd: {e}")))?;
        for lib in libs {
            let dest = Path::new(SANDBOX_ROOT).join(lib.strip_prefix("/").unwrap_or(&lib));
            // Best effort: some entries are symlinks or virtual (vdso) and
            // copying them can fail harmlessly, matching the Go reference.
            let _ = copy_file(&lib, &dest, 0o644);
        }
    }

    let tmp_dir = Path::new(SANDBOX_ROOT).join("tmp");
    std::fs::create_dir_all(&tmp_dir).map_err(|e| SandboxError::RootfsPrep(e.to_string()))?;
    set_mode(&tmp_dir, 0o777).map_err(|e| SandboxError::RootfsPrep(e.to_string()))?;

    let proc_dir = Path::new(SANDBOX_ROOT).join("proc");
    std::fs::create_dir_all(&proc_dir).map_err(|e| SandboxError::RootfsPrep(e.to_string()))?;
    set_mode(&proc_dir, 0o555).map_err(|e| SandboxError::RootfsPrep(e.to_string()))?;

    Ok(())
}

fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

/// Enables `cpu`/`memory`/`io` controllers on the parent cgroup, creates a
/// leaf under `ultaai/<task_id>`, writes the resource limits, and moves
/// the child into it. Every write is best-effort: failure to apply any
/// limit is non-fatal, but the returned flag records whether all of them
/// succeeded.
fn apply_cgroup_limits(task_id: &str, pid: i32) -> bool {
    let parent = Path::new(CGROUP_ROOT);
    let _ = std::fs::write(parent.join("cgroup.subtree_control"), "+cpu +memory +io");
    let domain = parent.join(CGROUP_DOMAIN);
    let _ = std::fs::create_dir_all(&domain);
    let _ = std::fs::write(domain.join("cgroup.subtree_control"), "+cpu +memory +io");

    let leaf = domain.join(task_id);
    if std::fs::create_dir_all(&leaf).is_err() {
        return false;
    }

    let mut ok = true;
    ok &= std::fs::write(leaf.join("cpu.max"), format!("{CPU_QUOTA_US} {CPU_PERIOD_US}")).is_ok();
    ok &= std::fs::write(leaf.join("memory.max"), MAX_RAM_BYTES.to_string()).is_ok();
    if let Some(majmin) = detect_root_device_majmin() {
        ok &= std::fs::write(leaf.join("io.max"), format!("{majmin} rbps={MAX_IO_BPS} wbps={MAX_IO_BPS}")).is_ok();
    } else {
        ok = false;
    }
    ok &= std::fs::write(leaf.join("cgroup.procs"), pid.to_string()).is_ok();
    ok
}

/// Parses `/proc/self/mountinfo` for the `major:minor` device backing `/`,
/// used to target `io.max` at the right block device.
fn detect_root_device_majmin() -> Option<String> {
    let contents = std::fs::read_to_string("/proc/self/mountinfo").ok()?;
    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // mountinfo layout: ... major:minor root mount-point ... " - " fstype ...
        if fields.len() > 4 && fields[4] == "/" {
            return Some(fields[2].to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_root_device_majmin_parses_self_mountinfo() {
        // Only asserts the parser doesn't panic and returns a well-formed
        // "major:minor" on a real Linux host; sandboxes without
        // `/proc/self/mountinfo` (e.g. some CI containers) legitimately
        // return `None`.
        if let Some(majmin) = detect_root_device_majmin() {
            assert!(majmin.contains(':'));
        }
    }
}
