//! Error handling foundation for waypoint.
//!
//! Only the `Result` alias lives here. Every crate owns its error enums in
//! its own `error` module and wraps them in a rootcause `Report`, attaching
//! context with `.context()` as a failure crosses a crate boundary
//! (store -> engine -> server).

use rootcause::Report;

/// Result alias carrying a rootcause `Report` typed by its outermost context.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Boom;

    impl std::fmt::Display for Boom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "boom")
        }
    }

    impl std::error::Error for Boom {}

    fn fails() -> Result<u8, Boom> {
        Err(Boom.into())
    }

    #[test]
    fn typed_report_displays_context() {
        let err = fails().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
