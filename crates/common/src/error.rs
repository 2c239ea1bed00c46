//! Message-based error context shared by every tabwire crate.
//!
//! Each crate keeps its own `Error` enum. Implementing [`FromMessage`] for it
//! and invoking [`impl_context!`] next to it gives that crate a local
//! `Context` trait, so `?` chains can attach a human-readable prefix without
//! depending on `anyhow` below the binary.

/// Error types that can be built from a plain message string.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Build a crate error from `context` and the error it wraps.
pub fn prefixed<E: FromMessage>(context: &str, source: &dyn std::fmt::Display) -> E {
    E::from_message(format!("{context}: {source}"))
}

/// Generate a crate-local `Context` trait for `Result` and `Option`.
///
/// Expects `Error: FromMessage` and `Result<T>` in scope of the invoking
/// module.
///
/// ```ignore
/// // crates/peer/src/error.rs
/// tabwire_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;

            fn with_context<C: Into<String>>(self, f: impl FnOnce() -> C) -> Result<T>;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.map_err(|source| $crate::error::prefixed(&context.into(), &source))
            }

            fn with_context<C: Into<String>>(self, f: impl FnOnce() -> C) -> Result<T> {
                self.map_err(|source| $crate::error::prefixed(&f().into(), &source))
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }

            fn with_context<C: Into<String>>(self, f: impl FnOnce() -> C) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}
