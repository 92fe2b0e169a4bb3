//! Safe wrappers for platform-specific unsafe operations.
//!
//! Every `unsafe` block in the codebase lives here (plus the cpal stream
//! wrapper). Call sites use the safe public API and never touch `unsafe` directly.

use std::io;

/// Number of processing units this process may schedule on.
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn check_core(core: usize) -> io::Result<()> {
    let cores = available_cores();
    if core >= cores {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("core {core} out of range ({cores} available)"),
        ));
    }
    Ok(())
}

/// Pin the calling thread to a single processing unit.
///
/// # Safety
/// `sched_setaffinity` only reads the zero-initialised `cpu_set_t` we pass;
/// the core index is range-checked first so `CPU_SET` stays in bounds.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(core: usize) -> io::Result<()> {
    check_core(core)?;
    // SAFETY: the set is zeroed, the index is range-checked, and pid 0 refers
    // to the calling thread.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Pin the calling thread to a single processing unit.
///
/// Thread affinity is only implemented for Linux.
#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(core: usize) -> io::Result<()> {
    check_core(core)?;
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "thread pinning is not supported on this platform",
    ))
}

/// Run a closure with stderr temporarily redirected to `/dev/null`.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
#[cfg(feature = "cpal-audio")]
pub fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    // SAFETY: Safe as long as no other thread is concurrently manipulating fd 2.
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Suppress noisy JACK/ALSA error messages that occur during audio backend probing.
///
/// # Safety
/// This modifies environment variables which is safe when called before spawning threads.
#[cfg(feature = "cpal-audio")]
pub fn suppress_audio_warnings() {
    // SAFETY: Called at startup before any threads are spawned
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}
