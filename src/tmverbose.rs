use core::fmt::Arguments;

/// Walk the heap and every free-block index after each public call.
pub const HEAP_CHECKS: bool = cfg!(any(test, feature = "debug"));
/// Trace allocator activity.
pub const HEAP_VERBOSE: bool = cfg!(feature = "verbose");
pub static VERBOSE_DEL: &str = "====================================";

#[cfg(unix)]
mod ext {
    pub fn debug(s: &str) {
        libc_print::libc_println!("{}", s);
    }
}

#[cfg(not(unix))]
mod ext {
    pub fn debug(_s: &str) {}
}

/// Static out buffer type
type StaticStr = str_buf::StrBuf<200>;
/// Static out buffer - we use it to avoid memory allocations,
/// when something is printed inside allocator code.
static OUT_BUFFER: spin::Mutex<StaticStr> = spin::Mutex::new(StaticStr::new());

/// Prints string with args.
/// What is the out stream defines in @ext module.
#[inline(never)]
pub fn tmprint_fn(args: Arguments<'_>) {
    let mut buffer = OUT_BUFFER.lock();
    let _ = core::fmt::write(&mut *buffer, args);
    ext::debug(&buffer);
    *buffer = StaticStr::new();
}

/// Prints string with args if @HEAP_VERBOSE is set.
/// What is the out stream defines in @ext module.
#[macro_export]
macro_rules! tmverbose {
    ($($arg:tt)*) => {
        if $crate::tmverbose::HEAP_VERBOSE {
            $crate::tmverbose::tmprint_fn(format_args!($($arg)*))
        }
    }
}
