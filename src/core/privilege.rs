//! SP-008: Privilege elevation for `become`.
//!
//! A run that contains any `become` must start as root. Statements switch
//! the effective uid/gid through a `BecomeGuard`, which puts the saved
//! identity back when dropped, whether the statement succeeded or not.

use super::error::{Error, Result};
use super::types::Become;
use nix::unistd::{getegid, geteuid, getuid, setegid, seteuid, Gid, Uid, User};
use tracing::{debug, error};

/// A uid/gid pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    pub const ROOT: Identity = Identity { uid: 0, gid: 0 };
}

/// Process identity operations.
pub trait Privileges: Send + Sync {
    /// Real uid is 0.
    fn running_as_root(&self) -> bool;
    fn effective(&self) -> Identity;
    fn set_effective(&self, identity: Identity) -> Result<(), String>;
    fn lookup_user(&self, name: &str) -> Result<Option<Identity>, String>;
    /// The invoking user when started through `sudo`.
    fn sudo_identity(&self) -> Option<Identity>;
}

/// Backed by the process's real credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPrivileges;

impl Privileges for SystemPrivileges {
    fn running_as_root(&self) -> bool {
        getuid().is_root()
    }

    fn effective(&self) -> Identity {
        Identity {
            uid: geteuid().as_raw(),
            gid: getegid().as_raw(),
        }
    }

    fn set_effective(&self, identity: Identity) -> Result<(), String> {
        let set_uid = || {
            seteuid(Uid::from_raw(identity.uid))
                .map_err(|e| format!("seteuid({}) failed: {}", identity.uid, e))
        };
        let set_gid = || {
            setegid(Gid::from_raw(identity.gid))
                .map_err(|e| format!("setegid({}) failed: {}", identity.gid, e))
        };

        // The gid can only change while the effective uid is still root
        if geteuid().is_root() {
            set_gid()?;
            set_uid()
        } else {
            set_uid()?;
            set_gid()
        }
    }

    fn lookup_user(&self, name: &str) -> Result<Option<Identity>, String> {
        User::from_name(name)
            .map(|user| {
                user.map(|u| Identity {
                    uid: u.uid.as_raw(),
                    gid: u.gid.as_raw(),
                })
            })
            .map_err(|e| format!("unable to look up user '{}': {}", name, e))
    }

    fn sudo_identity(&self) -> Option<Identity> {
        let uid = std::env::var("SUDO_UID").ok()?.parse().ok()?;
        let gid = std::env::var("SUDO_GID").ok()?.parse().ok()?;
        Some(Identity { uid, gid })
    }
}

/// Fail unless the whole-run elevation precondition holds.
pub fn check_run_precondition(privileges: &dyn Privileges, any_becomes: bool) -> Result<()> {
    if any_becomes && !privileges.running_as_root() {
        return Err(Error::Privilege(
            "Not running as root; scripts with 'become' must be run with sudo".to_string(),
        ));
    }
    Ok(())
}

/// Identity a statement should run under, or `None` to leave it unchanged.
///
/// Without `become`, a root process started through `sudo` drops back to the
/// invoking user.
pub fn statement_identity(
    privileges: &dyn Privileges,
    elevation: Option<&Become>,
) -> Result<Option<Identity>> {
    match elevation {
        Some(Become::Root) => Ok(Some(Identity::ROOT)),
        Some(Become::User(name)) => privileges
            .lookup_user(name)
            .map_err(Error::Privilege)?
            .map(Some)
            .ok_or_else(|| Error::Privilege(format!("User '{}' does not exist", name))),
        None if privileges.running_as_root() => Ok(privileges.sudo_identity()),
        None => Ok(None),
    }
}

/// Scoped effective-identity switch.
pub struct BecomeGuard<'a> {
    privileges: &'a dyn Privileges,
    saved: Option<Identity>,
}

impl<'a> BecomeGuard<'a> {
    /// Switch to `target`. A `None` target, or the current identity, is a no-op.
    pub fn enter(privileges: &'a dyn Privileges, target: Option<Identity>) -> Result<Self> {
        let current = privileges.effective();
        let saved = match target {
            Some(target) if target != current => {
                debug!(uid = target.uid, gid = target.gid, "switching effective identity");
                privileges.set_effective(target).map_err(Error::Privilege)?;
                Some(current)
            }
            _ => None,
        };
        Ok(Self { privileges, saved })
    }
}

impl Drop for BecomeGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(e) = self.privileges.set_effective(saved) {
                error!(uid = saved.uid, gid = saved.gid, "unable to restore identity: {}", e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records identity switches instead of making them.
    pub struct FakePrivileges {
        pub root: bool,
        pub sudo: Option<Identity>,
        pub current: Mutex<Identity>,
        pub switches: Mutex<Vec<Identity>>,
    }

    impl FakePrivileges {
        pub fn new(root: bool) -> Self {
            let current = if root {
                Identity::ROOT
            } else {
                Identity { uid: 1000, gid: 1000 }
            };
            Self {
                root,
                sudo: None,
                current: Mutex::new(current),
                switches: Mutex::new(Vec::new()),
            }
        }

        pub fn switches(&self) -> Vec<Identity> {
            self.switches.lock().unwrap().clone()
        }
    }

    impl Privileges for FakePrivileges {
        fn running_as_root(&self) -> bool {
            self.root
        }

        fn effective(&self) -> Identity {
            *self.current.lock().unwrap()
        }

        fn set_effective(&self, identity: Identity) -> Result<(), String> {
            *self.current.lock().unwrap() = identity;
            self.switches.lock().unwrap().push(identity);
            Ok(())
        }

        fn lookup_user(&self, name: &str) -> Result<Option<Identity>, String> {
            Ok(match name {
                "fred" => Some(Identity { uid: 1001, gid: 1001 }),
                _ => None,
            })
        }

        fn sudo_identity(&self) -> Option<Identity> {
            self.sudo
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakePrivileges;
    use super::*;

    const FRED: Identity = Identity { uid: 1001, gid: 1001 };

    #[test]
    fn test_sp008_precondition() {
        assert!(check_run_precondition(&FakePrivileges::new(false), false).is_ok());
        assert!(matches!(
            check_run_precondition(&FakePrivileges::new(false), true),
            Err(Error::Privilege(_))
        ));
        assert!(check_run_precondition(&FakePrivileges::new(true), true).is_ok());
    }

    #[test]
    fn test_sp008_guard_restores_on_drop() {
        let privs = FakePrivileges::new(true);
        {
            let _guard = BecomeGuard::enter(&privs, Some(FRED)).unwrap();
            assert_eq!(privs.effective(), FRED);
        }
        assert_eq!(privs.effective(), Identity::ROOT);
        assert_eq!(privs.switches(), vec![FRED, Identity::ROOT]);
    }

    #[test]
    fn test_sp008_guard_noop_for_current_identity() {
        let privs = FakePrivileges::new(true);
        drop(BecomeGuard::enter(&privs, Some(Identity::ROOT)).unwrap());
        drop(BecomeGuard::enter(&privs, None).unwrap());
        assert!(privs.switches().is_empty());
    }

    #[test]
    fn test_sp008_statement_identity() {
        let mut privs = FakePrivileges::new(true);
        assert_eq!(
            statement_identity(&privs, Some(&Become::Root)).unwrap(),
            Some(Identity::ROOT)
        );
        assert_eq!(
            statement_identity(&privs, Some(&Become::User("fred".into()))).unwrap(),
            Some(FRED)
        );
        assert!(statement_identity(&privs, Some(&Become::User("nobody-here".into()))).is_err());
        assert_eq!(statement_identity(&privs, None).unwrap(), None);

        privs.sudo = Some(Identity { uid: 500, gid: 500 });
        assert_eq!(
            statement_identity(&privs, None).unwrap(),
            Some(Identity { uid: 500, gid: 500 })
        );
    }

    #[test]
    fn test_sp008_system_privileges_reads_identity() {
        let privs = SystemPrivileges;
        let id = privs.effective();
        assert_eq!(privs.running_as_root(), getuid().is_root());
        assert_eq!(id.uid, geteuid().as_raw());
    }
}
