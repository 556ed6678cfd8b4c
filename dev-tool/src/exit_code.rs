/// The command ran successfully.
pub const NO_ERROR: i32 = 0;
/// The command ran but some checks failed.
pub const NON_FATAL_ERROR: i32 = 1;
/// The command failed.
pub const FATAL_ERROR: i32 = 2;
