//! The bootstrap environment channel.
//!
//! Process memory does not survive `exec`, so everything the pre-namespace
//! process learns (data directory, root location, loop device, debug switch)
//! is handed to the post-namespace process through environment variables.
//! [`BootstrapEnv`] is the only place those variables are read or written.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::process::Command;

use crate::error::{EnterError, Result};

/// Persistent data directory.
pub const ENV_DATA: &str = "ENTER_DATA";
/// Resolved root path.
pub const ENV_ROOT: &str = "ENTER_ROOT";
/// Attached loop device, empty when the root is a directory.
pub const ENV_DEVICE: &str = "ENTER_DEVICE";
/// Debug logging switch, `true` to enable.
pub const ENV_DEBUG: &str = "ENTER_DEBUG";
/// Format marker of the variables above.
pub const ENV_VERSION: &str = "ENTER_VERSION";

/// Keys that are meaningless after the pivot and never reach the final init.
pub const SCRUBBED_KEYS: [&str; 4] = [ENV_ROOT, ENV_DATA, ENV_DEVICE, ENV_VERSION];

/// State carried across the re-exec boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapEnv {
    /// Persistent data directory.
    pub data: Option<PathBuf>,
    /// Resolved root directory or image file.
    pub root: Option<PathBuf>,
    /// Loop device holding the root image.
    pub device: Option<PathBuf>,
    /// Whether debug logging is enabled.
    pub debug: bool,
}

impl BootstrapEnv {
    /// Current format of the environment channel.
    pub const VERSION: u32 = 1;

    /// Reads the channel from the current process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment was written by an incompatible version.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars_os())
    }

    /// Reads the channel from an explicit set of variables.
    ///
    /// Empty values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if `ENTER_VERSION` names an unknown format.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let mut env = Self::default();
        for (key, value) in vars {
            let value = value.as_ref();
            if value.is_empty() {
                continue;
            }
            match key.as_ref().as_bytes() {
                k if k == ENV_DATA.as_bytes() => env.data = Some(PathBuf::from(value)),
                k if k == ENV_ROOT.as_bytes() => env.root = Some(PathBuf::from(value)),
                k if k == ENV_DEVICE.as_bytes() => env.device = Some(PathBuf::from(value)),
                k if k == ENV_DEBUG.as_bytes() => env.debug = value == "true",
                k if k == ENV_VERSION.as_bytes() => check_version(value)?,
                _ => {}
            }
        }
        Ok(env)
    }

    /// Returns the variables describing this state.
    ///
    /// Unset fields are omitted except the device, which is written empty so
    /// a stale value inherited from the parent cannot leak through.
    #[must_use]
    pub fn to_vars(&self) -> Vec<(&'static str, OsString)> {
        let mut vars = vec![(ENV_VERSION, OsString::from(Self::VERSION.to_string()))];
        if let Some(data) = &self.data {
            vars.push((ENV_DATA, data.clone().into_os_string()));
        }
        if let Some(root) = &self.root {
            vars.push((ENV_ROOT, root.clone().into_os_string()));
        }
        vars.push((
            ENV_DEVICE,
            self.device
                .clone()
                .map(PathBuf::into_os_string)
                .unwrap_or_default(),
        ));
        if self.debug {
            vars.push((ENV_DEBUG, OsString::from("true")));
        }
        vars
    }

    /// Writes this state into the environment of a command about to be spawned.
    pub fn apply(&self, command: &mut Command) {
        let _ = command.envs(self.to_vars());
    }

    /// Returns the persistent data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `ENTER_DATA` was not provided.
    pub fn require_data(&self) -> Result<&PathBuf> {
        self.data.as_ref().ok_or_else(|| EnterError::Config {
            message: format!("{ENV_DATA} is not set"),
        })
    }

    /// Removes the bootstrap-only keys from an environment snapshot.
    ///
    /// `ENTER_DEBUG` is kept so the final init can honour it.
    #[must_use]
    pub fn scrub<I, K, V>(vars: I) -> Vec<(OsString, OsString)>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        vars.into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| !SCRUBBED_KEYS.iter().any(|s| k.as_bytes() == s.as_bytes()))
            .collect()
    }
}

fn check_version(value: &OsStr) -> Result<()> {
    let version = value.to_string_lossy();
    if version == BootstrapEnv::VERSION.to_string() {
        Ok(())
    } else {
        Err(EnterError::Config {
            message: format!(
                "{ENV_VERSION}={version} is not supported (expected {})",
                BootstrapEnv::VERSION
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
        pairs
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    #[test]
    fn reads_all_keys() {
        let env = BootstrapEnv::from_vars(vars(&[
            ("ENTER_DATA", "/k3os/data"),
            ("ENTER_ROOT", "/sbin/init.squashfs"),
            ("ENTER_DEVICE", "/dev/loop3"),
            ("ENTER_DEBUG", "true"),
            ("PATH", "/bin"),
        ]))
        .unwrap();
        assert_eq!(env.data, Some(PathBuf::from("/k3os/data")));
        assert_eq!(env.root, Some(PathBuf::from("/sbin/init.squashfs")));
        assert_eq!(env.device, Some(PathBuf::from("/dev/loop3")));
        assert!(env.debug);
    }

    #[test]
    fn empty_device_means_bind_mount() {
        let env = BootstrapEnv::from_vars(vars(&[("ENTER_DEVICE", "")])).unwrap();
        assert_eq!(env.device, None);
    }

    #[test]
    fn debug_requires_literal_true() {
        let env = BootstrapEnv::from_vars(vars(&[("ENTER_DEBUG", "1")])).unwrap();
        assert!(!env.debug);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let err = BootstrapEnv::from_vars(vars(&[("ENTER_VERSION", "7")])).unwrap_err();
        assert!(matches!(err, EnterError::Config { .. }));
    }

    #[test]
    fn vars_survive_a_round_trip() {
        let env = BootstrapEnv {
            data: Some("/data".into()),
            root: Some("/root.img".into()),
            device: Some("/dev/loop0".into()),
            debug: true,
        };
        let parsed = BootstrapEnv::from_vars(env.to_vars()).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn device_is_always_written() {
        let env = BootstrapEnv {
            data: Some("/data".into()),
            ..BootstrapEnv::default()
        };
        let vars = env.to_vars();
        assert!(vars.iter().any(|(k, v)| *k == ENV_DEVICE && v.is_empty()));
        assert!(!vars.iter().any(|(k, _)| *k == ENV_ROOT));
    }

    #[test]
    fn scrub_removes_bootstrap_keys_only() {
        let scrubbed = BootstrapEnv::scrub(vars(&[
            ("ENTER_DATA", "/data"),
            ("ENTER_ROOT", "/root"),
            ("ENTER_DEVICE", "/dev/loop0"),
            ("ENTER_VERSION", "1"),
            ("ENTER_DEBUG", "true"),
            ("HOME", "/root"),
        ]));
        let keys: Vec<_> = scrubbed.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![OsString::from("ENTER_DEBUG"), OsString::from("HOME")]);
    }

    #[test]
    fn require_data_reports_missing_key() {
        let err = BootstrapEnv::default().require_data().unwrap_err();
        assert!(err.to_string().contains("ENTER_DATA"));
    }
}
