//! Per-thread last-error slot backing the C-style return-code functions in
//! [`crate::compat`].
//!
//! Structured [`Error`] values are only mirrored here at that boundary. Each thread
//! sees the error of its own last call.

use std::cell::RefCell;

use crate::error::Error;

/// The last recorded failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// Stable error number, see [`crate::ErrorKind::code`]
    pub code: i32,

    /// Human readable message
    pub message: String,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<LastError>> = const { RefCell::new(None) };
}

/// Records `err` as the last error of this thread
pub fn set(err: &Error) {
    let last = LastError {
        code: err.kind().code(),
        message: err.to_string(),
    };
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(last));
}

/// Returns a copy of the last error of this thread
#[must_use]
pub fn last_error() -> Option<LastError> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Code of the last error, 0 if the slot is empty
#[must_use]
pub fn error_num() -> i32 {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(0, |e| e.code))
}

/// Copies the last error message into `buf` as a NUL-terminated string
///
/// At most `buf.len() - 1` message bytes are copied, the message is truncated if needed.
/// Returns the number of message bytes copied, not counting the terminator.
pub fn error_message(buf: &mut [u8]) -> usize {
    let Some(room) = buf.len().checked_sub(1) else {
        return 0;
    };
    LAST_ERROR.with(|slot| {
        let slot = slot.borrow();
        let message = slot.as_ref().map_or(&[][..], |e| e.message.as_bytes());
        let n = message.len().min(room);
        buf[..n].copy_from_slice(&message[..n]);
        buf[n] = 0;
        n
    })
}

/// Empties the slot
pub fn error_clear() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Puts back a previously taken copy of the slot
pub(crate) fn restore(last: Option<LastError>) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = last);
}

/// Runs `f` with a fresh slot, recording its error on failure
pub(crate) fn guard<T, F>(f: F) -> Option<T>
where
    F: FnOnce() -> crate::Result<T>,
{
    error_clear();
    match f() {
        Ok(value) => Some(value),
        Err(e) => {
            set(&e);
            None
        }
    }
}
