
/* Fatal error reporting
 *
 * Every diagnostic the linker aborts on is prefixed by the name of the
 * program that hit it, the way the original ULM toolchain prefixes its
 * cmdname. The macro expands in whichever binary invokes it, so ulmld
 * and ulmranlib each report under their own name.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

/* print a program-name-prefixed message to stderr and exit immediately */
#[macro_export]
macro_rules! fatal_msg
{
    ($fmt:expr) => ({
        eprintln!("{}: {}", env!("CARGO_CRATE_NAME"), $fmt);
        std::process::exit(1)
    });
    ($fmt:expr, $($arg:tt)*) => ({
        eprintln!("{}: {}", env!("CARGO_CRATE_NAME"), format!($fmt, $($arg)*));
        std::process::exit(1)
    });
}
