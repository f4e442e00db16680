//! Privilege drop and chroot, run once before the multiplexer enters its
//! poll loop (spec.md §4.6).

use std::io;
use std::path::{Path, PathBuf};

use nix::unistd::{self, Gid, Group, Uid, User};

use crate::config::PreflightConfig;
use crate::error::{Error, Result};

/// Resolve a user name to a numeric uid.
///
/// # Errors
/// Returns [`Error::UnknownUser`] if the name doesn't resolve.
pub(crate) fn resolve_uid(name: &str) -> Result<u32> {
    User::from_name(name)
        .map_err(|e| Error::io("getpwnam", io::Error::from(e)))?
        .map(|u| u.uid.as_raw())
        .ok_or_else(|| Error::UnknownUser(name.to_string()))
}

/// Resolve a group name to a numeric gid.
///
/// # Errors
/// Returns [`Error::UnknownGroup`] if the name doesn't resolve.
pub(crate) fn resolve_gid(name: &str) -> Result<u32> {
    Group::from_name(name)
        .map_err(|e| Error::io("getgrnam", io::Error::from(e)))?
        .map(|g| g.gid.as_raw())
        .ok_or_else(|| Error::UnknownGroup(name.to_string()))
}

/// Run the pre-flight privilege-drop sequence: if running as root, warm
/// the name-resolution libraries, resolve `config.user`/`config.group`,
/// `chdir`+`chroot` into `config.chroot_dir` (if set), rewrite any
/// `jail_paths` that fall under the jail so they remain valid afterwards,
/// then `setgid`/`setuid` and verify name lookups still work. If not
/// running as root, this is a no-op that logs a warning (spec.md §4.6).
///
/// # Errors
/// Returns [`Error::UnknownUser`]/[`Error::UnknownGroup`] if `config.user`/
/// `config.group` don't resolve, [`Error::Io`] if `chroot`/`setuid`/etc
/// fail, or [`Error::Fatal`] if the post-chroot sanity check fails.
pub fn drop_privileges(config: &PreflightConfig, jail_paths: &mut [PathBuf]) -> Result<()> {
    if !Uid::effective().is_root() {
        log::warn!("pre-flight: not running as root, skipping privilege drop");
        return Ok(());
    }

    warm_libraries();

    let gid = resolve_gid(&config.group)?;
    let uid = resolve_uid(&config.user)?;

    if let Some(dir) = &config.chroot_dir {
        unistd::chdir(dir.as_path()).map_err(|e| Error::io("chdir", io::Error::from(e)))?;
        unistd::chroot(dir.as_path()).map_err(|e| Error::io("chroot", io::Error::from(e)))?;
        unistd::chdir("/").map_err(|e| Error::io("chdir", io::Error::from(e)))?;
        rewrite_jail_paths(dir, jail_paths);
    }

    unistd::setgid(Gid::from_raw(gid)).map_err(|e| Error::io("setgid", io::Error::from(e)))?;
    unistd::setuid(Uid::from_raw(uid)).map_err(|e| Error::io("setuid", io::Error::from(e)))?;

    if User::from_name("root").is_err() {
        return Err(Error::Fatal("post-chroot identity lookup failed; chroot jail is misconfigured"));
    }

    Ok(())
}

/// Force the NSS/resolver and threading libraries to load their shared
/// objects before `chroot` makes the filesystem they live on unreachable
/// (spec.md §4.6 step 1).
fn warm_libraries() {
    let _ = User::from_uid(Uid::current());
}

fn rewrite_jail_paths(jail: &Path, paths: &mut [PathBuf]) {
    for path in paths.iter_mut() {
        if let Ok(relative) = path.strip_prefix(jail) {
            *path = Path::new("/").join(relative);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_paths_under_the_jail() {
        let jail = PathBuf::from("/var/jail");
        let mut paths = vec![PathBuf::from("/var/jail/etc/conf"), PathBuf::from("/etc/outside")];
        rewrite_jail_paths(&jail, &mut paths);
        assert_eq!(paths[0], PathBuf::from("/etc/conf"));
        assert_eq!(paths[1], PathBuf::from("/etc/outside"));
    }

    #[test]
    fn non_root_drop_is_a_noop() {
        if Uid::effective().is_root() {
            return;
        }
        let config = PreflightConfig::default();
        assert!(drop_privileges(&config, &mut []).is_ok());
    }
}
