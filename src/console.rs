//! Kernel console
//!
//! Line-oriented log output for the pager. Completed lines are kept in a
//! bounded history (oldest dropped first) and forwarded to an optional sink,
//! which is how a hosted driver puts them on a terminal.

use alloc::string::{String as HeapString, ToString};
use alloc::vec::Vec;
use core::fmt::{self, Write};
use heapless::{Deque, String};
use spin::Mutex;

/// Longest line kept; longer lines are truncated
pub const LINE_MAX: usize = 160;

/// Lines kept in the history
pub const HISTORY: usize = 64;

/// Line consumer installed by the host
pub type Sink = fn(&str);

/// Console writer
pub struct Console {
    current: String<LINE_MAX>,
    history: Deque<String<LINE_MAX>, HISTORY>,
    sink: Option<Sink>,
}

impl Console {
    /// Create an empty console with no sink
    pub const fn new() -> Self {
        Console {
            current: String::new(),
            history: Deque::new(),
            sink: None,
        }
    }

    /// Write a byte to the console
    pub fn write_byte(&mut self, byte: u8) {
        if byte == b'\n' {
            self.end_line();
        } else if byte.is_ascii() {
            // Overlong lines are cut, not wrapped
            let _ = self.current.push(byte as char);
        }
    }

    fn end_line(&mut self) {
        let line = core::mem::take(&mut self.current);
        if let Some(sink) = self.sink {
            sink(&line);
        }
        if self.history.is_full() {
            self.history.pop_front();
        }
        let _ = self.history.push_back(line);
    }

    /// Write a string to the console
    pub fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
    }

    /// Drop the history and any partial line
    pub fn clear(&mut self) {
        self.current.clear();
        self.history.clear();
    }

    /// Install or remove the line sink
    pub fn set_sink(&mut self, sink: Option<Sink>) {
        self.sink = sink;
    }

    /// Completed lines, oldest first
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(|l| l.as_str())
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Console::write_str(self, s);
        Ok(())
    }
}

/// Global console instance
static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// Reset the console history
pub fn init() {
    CONSOLE.lock().clear();
}

/// Install the line sink (hosted drivers print through this)
pub fn set_sink(sink: Option<Sink>) {
    CONSOLE.lock().set_sink(sink);
}

/// Print formatted text to console
pub fn print(args: fmt::Arguments) {
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Copy of the retained history
pub fn history() -> Vec<HeapString> {
    CONSOLE.lock().lines().map(|l| l.to_string()).collect()
}

/// Whether any retained line contains `needle`
pub fn history_contains(needle: &str) -> bool {
    CONSOLE.lock().lines().any(|l| l.contains(needle))
}

/// Print macro for kernel use
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::console::print(format_args!($($arg)*));
    };
}

/// Print with newline macro
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint!("\n");
    };
    ($($arg:tt)*) => {
        $crate::console::print(format_args!("{}\n", format_args!($($arg)*)))
    };
}

/// Informational line tagged with its subsystem
#[macro_export]
macro_rules! kinfo {
    ($tag:expr, $($arg:tt)*) => {
        $crate::kprintln!("[{}] {}", $tag, format_args!($($arg)*))
    };
}

/// Warning line tagged with its subsystem
#[macro_export]
macro_rules! kwarn {
    ($tag:expr, $($arg:tt)*) => {
        $crate::kprintln!("[{}] warning: {}", $tag, format_args!($($arg)*))
    };
}

/// Debug line, compiled in only with debug assertions
#[macro_export]
macro_rules! kdebug {
    ($tag:expr, $($arg:tt)*) => {
        if cfg!(debug_assertions) {
            $crate::kprintln!("[{}] {}", $tag, format_args!($($arg)*))
        }
    };
}
