//! Process exit codes, one per failure class.

use directgma::{ConfigError, DirectGmaError};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_GENERIC_FAIL: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_DISCOVERY: i32 = 3;
pub const EXIT_SETUP: i32 = 4;
pub const EXIT_TRANSFER: i32 = 5;
pub const EXIT_VALIDATION: i32 = 6;

/// Exit code for the first library error found in `err`'s chain.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<DirectGmaError>() {
            return match e {
                DirectGmaError::Discovery(_) => EXIT_DISCOVERY,
                DirectGmaError::Setup(_) => EXIT_SETUP,
                DirectGmaError::Transfer(_) => EXIT_TRANSFER,
                DirectGmaError::Validation(_) => EXIT_VALIDATION,
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return EXIT_CONFIG;
        }
    }
    EXIT_GENERIC_FAIL
}
