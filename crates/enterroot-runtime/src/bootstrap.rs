//! The root-switch state machine.
//!
//! Runs inside the fresh namespaces and walks the data directory from an
//! ordinary directory to the new `/`:
//!
//! ```text
//! Init -> DataBound -> RootResolved -> [LoopAttached] -> UsrMounted
//!      -> SymlinksReady -> ArtifactsMigrated -> PivotDone -> Chrooted -> Exec
//! ```
//!
//! Every step before the pivot aborts the boot on failure. Mounts already made
//! are not rolled back; the namespace they live in dies with the process.

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use enterroot_common::config::BootstrapEnv;
use enterroot_common::constants::{ARTIFACT_SOURCE, BASE_DIR, COMPAT_SYMLINKS, INIT_PATH, USR_DIR};
use enterroot_common::error::{EnterError, Result};
use enterroot_common::types::{BootStage, RootKind, RootSource};
use enterroot_core::locate::RootLocator;

use crate::backend::{BootBackend, ExecRequest};

/// Drives one boot from the data directory to the final init.
#[derive(Debug)]
pub struct Bootstrap<B> {
    backend: B,
    env: BootstrapEnv,
    inherited: Vec<(OsString, OsString)>,
    argv: Vec<OsString>,
    locator: RootLocator,
    stage: BootStage,
}

impl<B: BootBackend> Bootstrap<B> {
    /// Creates a bootstrap.
    ///
    /// `inherited` is the process environment as received; it is forwarded
    /// to the final init minus the bootstrap keys. `argv` is the argument
    /// vector handed to the final init, `argv[0]` included.
    #[must_use]
    pub fn new(
        backend: B,
        env: BootstrapEnv,
        inherited: Vec<(OsString, OsString)>,
        argv: Vec<OsString>,
        locator: RootLocator,
    ) -> Self {
        Self {
            backend,
            env,
            inherited,
            argv,
            locator,
            stage: BootStage::Init,
        }
    }

    /// Returns the last stage reached.
    #[must_use]
    pub const fn stage(&self) -> BootStage {
        self.stage
    }

    /// Returns the bootstrap state accumulated so far.
    #[must_use]
    pub const fn env(&self) -> &BootstrapEnv {
        &self.env
    }

    /// Runs the full sequence and hands over to the final init.
    ///
    /// With a real backend this only returns on failure.
    ///
    /// # Errors
    ///
    /// Returns the first error hit. Errors after the pivot are logged before
    /// they are returned.
    pub fn run(&mut self) -> Result<()> {
        let data = self.bind_data()?;
        let root = self.resolve_root()?;
        self.mount_usr(&data, &root)?;
        self.link_compat(&data)?;
        self.migrate_artifacts(&data);
        self.pivot(&data)?;

        let result = self.enter_new_root().and_then(|()| self.exec_init());
        if let Err(e) = &result {
            tracing::error!(stage = %self.stage, error = %e, "boot failed after pivot");
        }
        result
    }

    /// Prepares the data directory and returns its path.
    ///
    /// # Errors
    ///
    /// Returns an error if `ENTER_DATA` is missing or the data directory
    /// cannot be created or bound.
    pub fn bind_data(&mut self) -> Result<PathBuf> {
        let data = self.env.require_data()?.clone();
        create_dir_all(&data)?;
        if self.backend.is_mounted(&data)? {
            tracing::debug!(data = %data.display(), "data directory already mounted");
        } else {
            self.backend.bind_mount(&data, &data, true)?;
        }
        self.advance(BootStage::DataBound);
        Ok(data)
    }

    /// Locates the root and records it in the bootstrap state.
    ///
    /// # Errors
    ///
    /// Returns an error if no root can be found.
    pub fn resolve_root(&mut self) -> Result<RootSource> {
        let root = self.locator.find()?;
        self.env.root = Some(root.path().to_path_buf());
        self.advance(BootStage::RootResolved);
        Ok(root)
    }

    /// Mounts the root on `<data>/usr`, attaching a loop device first for
    /// image roots.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created, no loop device
    /// can be attached, or the mount fails. A failed squashfs mount carries
    /// the result of the support check.
    pub fn mount_usr(&mut self, data: &Path, root: &RootSource) -> Result<()> {
        let usr = data.join(USR_DIR);
        create_dir_all(&usr)?;
        create_dir_all(&data.join(BASE_DIR))?;

        match root.kind() {
            RootKind::Directory => {
                self.backend.bind_mount(root.path(), &usr, false)?;
            }
            RootKind::ImageFile { offset } => {
                let device = self.attach(root.path(), offset)?;
                self.mount_image(&device, &usr)?;
            }
        }
        self.advance(BootStage::UsrMounted);
        Ok(())
    }

    fn attach(&mut self, image: &Path, offset: u64) -> Result<PathBuf> {
        let device = match &self.env.device {
            Some(device) => {
                tracing::debug!(device = %device.display(), "reusing attached loop device");
                device.clone()
            }
            None => self.backend.attach_loop(image, offset)?,
        };
        self.env.device = Some(device.clone());
        self.advance(BootStage::LoopAttached);
        Ok(device)
    }

    fn mount_image(&self, device: &Path, usr: &Path) -> Result<()> {
        let support = self.backend.check_squashfs().err();
        if let Some(e) = &support {
            tracing::warn!(error = %e, "squashfs support check failed, trying the mount anyway");
        }
        self.backend
            .mount_squashfs(device, usr)
            .map_err(|e| EnterError::SquashfsMount {
                device: device.to_path_buf(),
                target: usr.to_path_buf(),
                message: e.to_string(),
                support: support.map(|s| s.to_string()),
            })
    }

    /// Creates `lib`, `bin`, and `sbin` links into `usr` where nothing exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a link location cannot be inspected or a link cannot
    /// be created.
    pub fn link_compat(&mut self, data: &Path) -> Result<()> {
        for name in COMPAT_SYMLINKS {
            let link = data.join(name);
            match fs::symlink_metadata(&link) {
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(EnterError::Io { path: link, source: e }),
            }
            let target = Path::new(USR_DIR).join(name);
            std::os::unix::fs::symlink(&target, &link).map_err(|e| EnterError::Io {
                path: link.clone(),
                source: e,
            })?;
            tracing::debug!(link = %link.display(), target = %target.display(), "created symlink");
        }
        self.advance(BootStage::SymlinksReady);
        Ok(())
    }

    /// Moves the early-boot `/var` into `<data>/var`. Failures are logged only.
    pub fn migrate_artifacts(&mut self, data: &Path) {
        tracing::info!("preparing files");
        let dest = data.join("var");
        if let Err(e) = self.backend.migrate(Path::new(ARTIFACT_SOURCE), &dest) {
            tracing::warn!(error = %e, dest = %dest.display(), "artifact migration incomplete");
        }
        self.advance(BootStage::ArtifactsMigrated);
    }

    /// Makes the data directory the new root, parking the old one on `.base`.
    ///
    /// # Errors
    ///
    /// Returns an error if `chdir` or `pivot_root` fails.
    pub fn pivot(&mut self, data: &Path) -> Result<()> {
        self.backend.change_dir(data)?;
        self.backend.pivot_root(Path::new("."), Path::new(BASE_DIR))?;
        self.advance(BootStage::PivotDone);
        Ok(())
    }

    fn enter_new_root(&mut self) -> Result<()> {
        let root = Path::new("/");
        self.backend.make_private(root)?;
        self.backend.chroot(root)?;
        self.backend.change_dir(root)?;
        self.advance(BootStage::Chrooted);
        Ok(())
    }

    fn exec_init(&mut self) -> Result<()> {
        let program = PathBuf::from(INIT_PATH);
        if !self.backend.exists(&program) {
            return Err(EnterError::NotFound {
                kind: "init",
                path: program,
            });
        }

        let request = ExecRequest {
            program,
            argv: self.argv.clone(),
            env: BootstrapEnv::scrub(self.inherited.clone()),
        };
        self.advance(BootStage::Exec);
        tracing::info!(program = %request.program.display(), "handing over to init");
        self.backend.exec(&request)
    }

    fn advance(&mut self, stage: BootStage) {
        tracing::info!(from = %self.stage, to = %stage, "boot stage");
        self.stage = stage;
    }
}

fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| EnterError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}
