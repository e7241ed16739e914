use nix::unistd::{Gid, Group, Uid, User};

use super::KernelError;

/// Resolved launch credentials for a child process. Zero values mean
/// "inherit from the daemon".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    pub fn is_set(&self) -> bool {
        self.uid != 0 || self.gid != 0
    }
}

/// Looks up a user by name, falling back to a numeric uid when the name is
/// not in passwd but parses as a number.
pub fn lookup_user(name: &str) -> Result<User, KernelError> {
    let by_name = User::from_name(name).map_err(|err| KernelError::os("getpwnam", err))?;
    if let Some(user) = by_name {
        return Ok(user);
    }
    if let Ok(uid) = name.parse::<u32>() {
        let by_uid =
            User::from_uid(Uid::from_raw(uid)).map_err(|err| KernelError::os("getpwuid", err))?;
        if let Some(user) = by_uid {
            return Ok(user);
        }
    }
    Err(KernelError::UserNotFound(name.to_string()))
}

/// Looks up a group by name with the same numeric fallback as [`lookup_user`].
pub fn lookup_group(name: &str) -> Result<Group, KernelError> {
    let by_name = Group::from_name(name).map_err(|err| KernelError::os("getgrnam", err))?;
    if let Some(group) = by_name {
        return Ok(group);
    }
    if let Ok(gid) = name.parse::<u32>() {
        let by_gid =
            Group::from_gid(Gid::from_raw(gid)).map_err(|err| KernelError::os("getgrgid", err))?;
        if let Some(group) = by_gid {
            return Ok(group);
        }
    }
    Err(KernelError::GroupNotFound(name.to_string()))
}

/// Resolves the configured user/group names into uid/gid.
///
/// An empty user means "do not switch" (the group alone may still apply). An
/// empty group defaults to the user's primary group. A user that is purely
/// numeric but absent from passwd is accepted as a raw uid.
pub fn resolve(user: &str, group: &str) -> Result<Credentials, KernelError> {
    let mut creds = Credentials::default();

    if !user.is_empty() {
        match lookup_user(user) {
            Ok(u) => {
                creds.uid = u.uid.as_raw();
                creds.gid = u.gid.as_raw();
            }
            Err(KernelError::UserNotFound(_)) if user.parse::<u32>().is_ok() => {
                // Numeric uid with no passwd entry: accepted as-is, no
                // primary group to inherit.
                creds.uid = user.parse().expect("checked numeric");
            }
            Err(err) => return Err(err),
        }
    }

    if !group.is_empty() {
        match lookup_group(group) {
            Ok(g) => creds.gid = g.gid.as_raw(),
            Err(KernelError::GroupNotFound(_)) if group.parse::<u32>().is_ok() => {
                creds.gid = group.parse().expect("checked numeric");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(creds)
}
