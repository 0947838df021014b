//! Scripted in-memory port for protocol tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

/// Port double that answers each write with the next scripted reply.
///
/// A write arms the port; the first read after that loads the next reply
/// into the receive buffer. Reads with nothing pending behave like a serial
/// timeout.
#[derive(Debug, Default)]
pub(crate) struct MockPort {
    replies: VecDeque<Vec<u8>>,
    rx: VecDeque<u8>,
    armed: bool,
    pub(crate) tx: Vec<u8>,
    pub(crate) writes: Vec<Vec<u8>>,
    pub(crate) baud_history: Vec<u32>,
    pub(crate) clears: usize,
    timeout: Duration,
    baud_rate: u32,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self {
            timeout: Duration::from_millis(100),
            baud_rate: 57600,
            ..Default::default()
        }
    }

    /// Queue the reply to the next write.
    #[must_use]
    pub(crate) fn reply(mut self, bytes: &[u8]) -> Self {
        self.replies.push_back(bytes.to_vec());
        self
    }

    /// Queue a write that gets no answer.
    #[must_use]
    pub(crate) fn silence(self) -> Self {
        self.reply(&[])
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rx.is_empty() && self.armed {
            self.armed = false;
            if let Some(reply) = self.replies.pop_front() {
                self.rx.extend(reply);
            }
        }
        if self.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "mock timeout"));
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx.extend_from_slice(buf);
        self.writes.push(buf.to_vec());
        self.armed = true;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        self.baud_history.push(baud_rate);
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx.clear();
        self.clears += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Port double that emits one byte per read after a fixed pause, forever,
/// without ever sending a line terminator.
#[derive(Debug)]
pub(crate) struct TricklePort {
    pub(crate) pause: Duration,
    pub(crate) reads: usize,
}

impl TricklePort {
    pub(crate) fn new(pause: Duration) -> Self {
        Self { pause, reads: 0 }
    }
}

impl Read for TricklePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        thread::sleep(self.pause);
        self.reads += 1;
        match buf.first_mut() {
            Some(slot) => {
                *slot = b'x';
                Ok(1)
            },
            None => Ok(0),
        }
    }
}

impl Write for TricklePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for TricklePort {
    fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.pause
    }

    fn set_baud_rate(&mut self, _baud_rate: u32) -> Result<()> {
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        57600
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "trickle"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
