//! Per-test capture buffer and the scoped stdout redirect.
//!
//! Rust has no safe way to swap the process stdout handle, so the redirect is
//! a per-thread slot consulted by [`regtest_print!`](crate::regtest_print) and
//! [`regtest_println!`](crate::regtest_println). libtest runs each test on its
//! own thread, which makes the slot per-test. While a [`StdoutRedirect`] is
//! alive the buffer lives in the slot; dropping the guard (normally or while
//! unwinding) moves it back to its owner.

use std::cell::RefCell;
use std::fmt;
use std::io;

use crate::error::{RegtestError, Result};
use crate::identity::TestIdentity;

thread_local! {
    static STDOUT_SLOT: RefCell<Option<CaptureBuffer>> = const { RefCell::new(None) };
}

/// Append-only sink for one test invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CaptureBuffer {
    bytes: Vec<u8>,
}

impl CaptureBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, text: &str) {
        self.bytes.extend_from_slice(text.as_bytes());
    }

    /// Accumulated text; invalid UTF-8 is shown with replacement characters.
    pub fn current_contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Tear the buffer down into text.
    ///
    /// With `strict`, bytes that are not valid UTF-8 fail with
    /// [`RegtestError::UnprintableOutput`]; otherwise they are replaced.
    pub fn into_text(self, strict: bool, identity: &TestIdentity) -> Result<String> {
        match String::from_utf8(self.bytes) {
            Ok(text) => Ok(text),
            Err(err) if strict => {
                let offset = err.utf8_error().valid_up_to();
                let found = err
                    .as_bytes()
                    .get(offset)
                    .map(|byte| format!("\\x{byte:02x}"))
                    .unwrap_or_default();
                Err(RegtestError::UnprintableOutput {
                    identity: identity.to_string(),
                    offset,
                    found,
                })
            }
            Err(err) => Ok(String::from_utf8_lossy(err.as_bytes()).into_owned()),
        }
    }
}

impl fmt::Write for CaptureBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.append(s);
        Ok(())
    }
}

impl io::Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Guard that owns this thread's stdout slot until dropped.
#[derive(Debug)]
pub struct StdoutRedirect<'a> {
    target: &'a mut CaptureBuffer,
}

impl<'a> StdoutRedirect<'a> {
    /// Route capture-aware printing on this thread into `target`.
    ///
    /// # Errors
    ///
    /// Returns [`RegtestError::RedirectActive`] if another buffer already owns
    /// the slot; redirects never stack.
    pub fn install(target: &'a mut CaptureBuffer) -> Result<Self> {
        STDOUT_SLOT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_some() {
                return Err(RegtestError::RedirectActive);
            }
            *slot = Some(std::mem::take(target));
            Ok(())
        })?;
        Ok(Self { target })
    }
}

impl Drop for StdoutRedirect<'_> {
    fn drop(&mut self) {
        let restored = STDOUT_SLOT
            .try_with(|slot| slot.borrow_mut().take())
            .ok()
            .flatten();
        if let Some(buffer) = restored {
            *self.target = buffer;
        }
    }
}

/// True while a [`StdoutRedirect`] is installed on the current thread.
pub fn is_redirected() -> bool {
    STDOUT_SLOT.with(|slot| slot.borrow().is_some())
}

/// Backend of the print macros: the installed buffer, else real stdout.
pub fn print_fmt(args: fmt::Arguments<'_>) {
    // Format first so a Display impl that prints does not re-borrow the slot.
    let text = args.to_string();
    let captured = STDOUT_SLOT.with(|slot| match slot.borrow_mut().as_mut() {
        Some(buffer) => {
            buffer.append(&text);
            true
        }
        None => false,
    });
    if !captured {
        print!("{text}");
    }
}

/// `print!` that lands in the active regtest capture, if any.
#[macro_export]
macro_rules! regtest_print {
    ($($arg:tt)*) => {
        $crate::capture::print_fmt(::std::format_args!($($arg)*))
    };
}

/// `println!` that lands in the active regtest capture, if any.
#[macro_export]
macro_rules! regtest_println {
    () => {
        $crate::capture::print_fmt(::std::format_args!("\n"))
    };
    ($($arg:tt)*) => {
        $crate::capture::print_fmt(::std::format_args!(
            "{}\n",
            ::std::format_args!($($arg)*)
        ))
    };
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn identity() -> TestIdentity {
        TestIdentity::new("capture.rs::case")
    }

    #[test]
    fn append_and_write_accumulate() {
        let mut buffer = CaptureBuffer::new();
        buffer.append("a");
        fmt::Write::write_fmt(&mut buffer, format_args!("{}", 1)).expect("fmt write");
        buffer.write_all(b"-bytes").expect("io write");
        assert_eq!(buffer.current_contents(), "a1-bytes");
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn redirect_captures_print_macros_and_restores() {
        let mut buffer = CaptureBuffer::new();
        buffer.append("before\n");
        {
            let _guard = StdoutRedirect::install(&mut buffer).expect("install");
            assert!(is_redirected());
            crate::regtest_println!("value = {}", 42);
            crate::regtest_print!("tail");
        }
        assert!(!is_redirected());
        assert_eq!(buffer.current_contents(), "before\nvalue = 42\ntail");
    }

    #[test]
    fn second_redirect_is_refused() {
        let mut first = CaptureBuffer::new();
        let mut second = CaptureBuffer::new();
        let _guard = StdoutRedirect::install(&mut first).expect("install");
        let err = StdoutRedirect::install(&mut second).expect_err("nested");
        assert!(matches!(err, RegtestError::RedirectActive));
    }

    #[test]
    fn redirect_is_released_when_the_body_panics() {
        let mut buffer = CaptureBuffer::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _guard = StdoutRedirect::install(&mut buffer).expect("install");
            crate::regtest_println!("partial");
            panic!("body failed");
        }));
        assert!(result.is_err());
        assert!(!is_redirected());
        assert_eq!(buffer.current_contents(), "partial\n");
    }

    #[test]
    fn strict_teardown_rejects_invalid_utf8() {
        let mut buffer = CaptureBuffer::new();
        buffer.write_all(b"ok\xff").expect("io write");
        match buffer.clone().into_text(true, &identity()) {
            Err(RegtestError::UnprintableOutput { offset, found, .. }) => {
                assert_eq!(offset, 2);
                assert_eq!(found, "\\xff");
            }
            other => panic!("expected UnprintableOutput, got {other:?}"),
        }
        let lossy = buffer.into_text(false, &identity()).expect("lenient");
        assert_eq!(lossy, "ok\u{fffd}");
    }
}
