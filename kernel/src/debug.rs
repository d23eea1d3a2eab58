// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Support for in-kernel debugging.
//!
//! The board registers a single byte sink with [`set_debug_writer`] during
//! bring-up. After that, kernel and chip code can print with:
//!
//! ```ignore
//! debug!("Yes the code gets here with value {}", i);
//! debug_verbose!("got here"); // includes the file and line
//! ```
//!
//! Output is best effort. The sink reports how many bytes it accepted and
//! anything beyond that is dropped, so a full sink never blocks the caller.
//! If no sink has been registered, messages are discarded.

use core::cell::Cell;
use core::fmt::{write, Arguments, Result, Write};

/// A byte sink that debug output can be written into.
pub trait IoWrite {
    /// Write as much of `buf` as the sink can take, returning how many bytes
    /// were accepted.
    fn write(&self, buf: &[u8]) -> usize;
}

struct DebugWriterCell(Cell<Option<&'static dyn IoWrite>>);

// SAFETY: the firmware runs on a single core. The writer is registered once
// during board bring-up, before interrupts are enabled, and only read after.
unsafe impl Sync for DebugWriterCell {}

static DEBUG_WRITER: DebugWriterCell = DebugWriterCell(Cell::new(None));

/// Register the sink that `debug!` writes into.
pub fn set_debug_writer(writer: &'static dyn IoWrite) {
    DEBUG_WRITER.0.set(Some(writer));
}

fn get_debug_writer() -> Option<&'static dyn IoWrite> {
    DEBUG_WRITER.0.get()
}

/// Adapter from `core::fmt::Write` to an [`IoWrite`] sink that counts the
/// bytes the sink refused.
struct DebugWriter<'a> {
    sink: &'a dyn IoWrite,
    dropped: usize,
}

impl Write for DebugWriter<'_> {
    fn write_str(&mut self, s: &str) -> Result {
        let written = self.sink.write(s.as_bytes());
        self.dropped += s.len() - written;
        Ok(())
    }
}

fn write_message(sink: &dyn IoWrite, args: Arguments, file_line: Option<&(&str, u32)>) -> usize {
    let mut writer = DebugWriter { sink, dropped: 0 };
    if let Some((file, line)) = file_line {
        let _ = writer.write_fmt(format_args!("{}:{}: ", file, line));
    }
    let _ = write(&mut writer, args);
    let _ = writer.write_str("\r\n");
    writer.dropped
}

/// Write a debug message. Returns the number of bytes the sink dropped.
pub fn debug_fmt(args: Arguments) -> usize {
    get_debug_writer().map_or(0, |sink| write_message(sink, args, None))
}

/// Write a debug message prefixed with its source location.
pub fn debug_verbose_fmt(args: Arguments, file_line: &(&'static str, u32)) -> usize {
    get_debug_writer().map_or(0, |sink| write_message(sink, args, Some(file_line)))
}

/// In-kernel `println()` debugging.
#[macro_export]
macro_rules! debug {
    () => ({
        // Allow an empty debug!() to print the location when hit
        $crate::debug!("")
    });
    ($msg:expr $(,)?) => ({
        $crate::debug::debug_fmt(format_args!($msg))
    });
    ($fmt:expr, $($arg:tt)+) => ({
        $crate::debug::debug_fmt(format_args!($fmt, $($arg)+))
    });
}

/// In-kernel `println()` debugging with the file and line number.
#[macro_export]
macro_rules! debug_verbose {
    () => ({
        // Allow an empty debug_verbose!() to print the location when hit
        $crate::debug_verbose!("")
    });
    ($msg:expr $(,)?) => ({
        $crate::debug::debug_verbose_fmt(format_args!($msg), {
            static _FILE_LINE: (&'static str, u32) = (file!(), line!());
            &_FILE_LINE
        })
    });
    ($fmt:expr, $($arg:tt)+) => ({
        $crate::debug::debug_verbose_fmt(format_args!($fmt, $($arg)+), {
            static _FILE_LINE: (&'static str, u32) = (file!(), line!());
            &_FILE_LINE
        })
    });
}

#[cfg(test)]
mod test {
    use super::{write_message, IoWrite};
    use core::cell::RefCell;
    use std::vec::Vec;

    struct Capped {
        limit: usize,
        out: RefCell<Vec<u8>>,
    }

    impl IoWrite for Capped {
        fn write(&self, buf: &[u8]) -> usize {
            let mut out = self.out.borrow_mut();
            let n = buf.len().min(self.limit - out.len());
            out.extend_from_slice(&buf[..n]);
            n
        }
    }

    #[test]
    fn message_is_terminated() {
        let sink = Capped {
            limit: 64,
            out: RefCell::new(Vec::new()),
        };
        let dropped = write_message(&sink, format_args!("ep {} len {}", 2, 64), None);
        assert_eq!(dropped, 0);
        assert_eq!(&sink.out.borrow()[..], b"ep 2 len 64\r\n");
    }

    #[test]
    fn location_prefix() {
        let sink = Capped {
            limit: 64,
            out: RefCell::new(Vec::new()),
        };
        write_message(&sink, format_args!("reset"), Some(&("usbd.rs", 12)));
        assert_eq!(&sink.out.borrow()[..], b"usbd.rs:12: reset\r\n");
    }

    #[test]
    fn full_sink_drops_tail() {
        let sink = Capped {
            limit: 4,
            out: RefCell::new(Vec::new()),
        };
        let dropped = write_message(&sink, format_args!("abcdef"), None);
        assert_eq!(&sink.out.borrow()[..], b"abcd");
        assert_eq!(dropped, 4);
    }
}
