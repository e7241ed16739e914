use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::unistd::{self, Gid, Pid, Uid};

use super::credentials::Credentials;
use super::KernelError;

/// Arranges for the child to lead a brand-new process group and, when
/// credentials are set, to drop to them, both applied between fork and exec.
///
/// Group membership first: signals forwarded to `-pgid` must reach the whole
/// service subtree, and setgid must run before setuid or the process loses
/// the privilege to switch groups.
pub fn prepare(cmd: &mut Command, creds: Credentials) {
    unsafe {
        cmd.pre_exec(move || {
            unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(io_err)?;
            if creds.gid != 0 {
                unistd::setgid(Gid::from_raw(creds.gid)).map_err(io_err)?;
            }
            if creds.uid != 0 {
                unistd::setuid(Uid::from_raw(creds.uid)).map_err(io_err)?;
            }
            Ok(())
        });
    }
}

fn io_err(err: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}

/// Process group of a live process.
pub fn process_group_of(pid: u32) -> Result<u32, KernelError> {
    unistd::getpgid(Some(Pid::from_raw(pid as i32)))
        .map(|pgid| pgid.as_raw() as u32)
        .map_err(|err| KernelError::os("getpgid", err))
}
