//! Error handling foundation for groupgate.
//!
//! Only the `Result` alias lives here. Each crate owns its domain error enum
//! and layers context onto reports with `.context()` as errors move upward.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_alias_defaults_to_unit_context() {
        let ok: Result<&str> = Ok("granted");
        assert_eq!(ok.expect("should be ok"), "granted");
    }
}
