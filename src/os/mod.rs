//! Platform backends
//!
//! Every backend provides the same three items:
//! - `DefaultProtect`, the [`Protect`](crate::protect::Protect) implementation
//!   for the target;
//! - `write_stderr`, an unbuffered write to the standard error handle that is
//!   safe to call before the C runtime finished initializing;
//! - `terminate`, which ends the process after a fatal diagnostic.

#[cfg(all(not(windows), any(unix, feature = "use-syscall")))]
pub(crate) mod maps;

cfg_if::cfg_if! {
    if #[cfg(windows)]{
        pub(crate) mod windows;
        pub use windows::*;
    }else if #[cfg(feature = "use-syscall")]{
        pub(crate) mod linux_syscall;
        pub use linux_syscall::*;
    }else if #[cfg(unix)]{
        pub(crate) mod unix;
        pub use unix::*;
    }else {
        pub(crate) mod baremetal;
        pub use baremetal::*;
    }
}
