#![allow(unused)]

use anyhow::{Context, Result, anyhow};
use std::ffi::CString;

/// Linux caps thread names at 16 bytes including the nul terminator.
const MAX_NAME_LEN: usize = 15;

/// Cuts `name` down to what the platform will accept. The cut lands on a
/// UTF-8 boundary, so a builder-supplied name with multibyte characters
/// stays a valid string instead of ending mid-character.
pub(crate) fn truncate_thread_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }

    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Renames the *current* thread. `std::thread::Builder::name` covers spawned
/// workers, but worker 0 is the caller's own thread and there is no std way
/// to rename it, so we go through the platform interface. A name with an
/// interior nul cannot cross the C boundary; the thread keeps its old name.
#[cfg(target_os = "linux")]
pub(crate) fn set_current_thread_name(name: &str) {
    let Ok(c_name) = CString::new(truncate_thread_name(name)) else {
        return;
    };

    unsafe {
        libc::pthread_setname_np(libc::pthread_self(), c_name.as_ptr());
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_current_thread_name(_name: &str) {}

/// Counterpart to `set_current_thread_name`, via `pthread_getname_np`.
#[cfg(target_os = "linux")]
pub(crate) fn get_current_thread_name() -> Result<String> {
    let mut buf = [0u8; MAX_NAME_LEN + 1];

    let ret = unsafe {
        libc::pthread_getname_np(libc::pthread_self(), buf.as_mut_ptr().cast(), buf.len())
    };
    if ret != 0 {
        return Err(anyhow!("pthread_getname_np failed with error code: {ret}"));
    }

    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = std::str::from_utf8(&buf[..len]).context("thread name is not valid UTF-8")?;
    Ok(name.to_owned())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn get_current_thread_name() -> Result<String> {
    Err(anyhow!("thread names are only readable on Linux"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_lands_on_char_boundaries() {
        assert_eq!(truncate_thread_name("short"), "short");
        assert_eq!(truncate_thread_name("exactly-15-byte"), "exactly-15-byte");
        assert_eq!(truncate_thread_name("sixteen-byte-name"), "sixteen-byte-na");
        // 'é' is two bytes and straddles the cut: it must be dropped whole.
        assert_eq!(truncate_thread_name("worker-quatorzé"), "worker-quatorz");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn set_and_get_round_trip() {
        set_current_thread_name("grid-check");
        assert_eq!(get_current_thread_name().unwrap(), "grid-check");

        set_current_thread_name("a-name-well-over-the-limit");
        assert_eq!(get_current_thread_name().unwrap(), "a-name-well-ove");
    }
}
