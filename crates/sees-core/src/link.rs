//! Hand-off between the serial I/O tasks and the acquisition loop
//!
//! Serial reception and transmission run as their own tasks on the device
//! (or threads in the simulator). They never touch the instrument directly:
//!
//! - incoming bytes are assembled into lines and queued on [`COMMANDS`]
//! - outgoing lines are written into a byte [`Pipe`] through [`PipeLink`]
//!
//! Both queues are non-blocking on the acquisition side, so a slow host link
//! drops telemetry instead of stalling sampling.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::pipe::Pipe;

use crate::telemetry::SerialLink;

/// Longest accepted command line.
pub const COMMAND_LINE_CAPACITY: usize = 64;

/// Command lines waiting for the acquisition loop.
pub const COMMAND_QUEUE_DEPTH: usize = 4;

pub type CommandLine = heapless::String<COMMAND_LINE_CAPACITY>;

pub type CommandChannel = Channel<CriticalSectionRawMutex, CommandLine, COMMAND_QUEUE_DEPTH>;

/// Global queue of received command lines (single consumer: the instrument loop).
pub static COMMANDS: CommandChannel = Channel::new();

/// Assembles command lines from a byte stream.
///
/// Lines end at `\n`; `\r` is dropped. An over-long line is discarded in
/// full rather than truncated into a different command.
#[derive(Debug, Default)]
pub struct LineAssembler {
    line: CommandLine,
    overflowed: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            line: CommandLine::new(),
            overflowed: false,
        }
    }

    /// Feed one byte; returns a finished line at each terminator.
    pub fn push(&mut self, byte: u8) -> Option<CommandLine> {
        match byte {
            b'\n' => {
                let overflowed = core::mem::replace(&mut self.overflowed, false);
                let line = core::mem::take(&mut self.line);
                (!overflowed).then_some(line)
            }
            b'\r' => None,
            _ => {
                if !byte.is_ascii() || self.line.push(byte as char).is_err() {
                    self.overflowed = true;
                }
                None
            }
        }
    }
}

/// [`SerialLink`] that writes whole lines into a byte pipe, or drops them.
pub struct PipeLink<'a, const N: usize> {
    pipe: &'a Pipe<CriticalSectionRawMutex, N>,
}

impl<'a, const N: usize> PipeLink<'a, N> {
    pub const fn new(pipe: &'a Pipe<CriticalSectionRawMutex, N>) -> Self {
        Self { pipe }
    }
}

impl<const N: usize> SerialLink for PipeLink<'_, N> {
    fn send_line(&mut self, line: &str) -> bool {
        let bytes = line.as_bytes();
        if self.pipe.free_capacity() < bytes.len() + 1 {
            return false;
        }

        // Single producer: the free space checked above cannot shrink.
        let written = self.pipe.try_write(bytes).unwrap_or(0);
        let terminated = self.pipe.try_write(b"\n").unwrap_or(0);
        written == bytes.len() && terminated == 1
    }
}
