//! Module entry-point ABI
//!
//! Every module exports `load_<name>` and `unload_<name>` with the
//! [`EntryPoint`] signature. The first argument is the host's opaque
//! capability table ([`HostContext`]); the second is either null or a
//! host-owned [`StateChannel`] used to hand bytes from the outgoing version
//! of a module to the incoming one during a reload.
//!
//! The channel carries its own `read`/`write` callbacks, so a module never
//! needs to link against the host to use it. Inside a module, a channel is
//! just an [`std::io::Read`] (on load) or [`std::io::Write`] (on unload).

use std::ffi::c_void;
use std::io::{self, Cursor, Read, Write};
use std::marker::PhantomData;

/// Signature shared by `load_<name>` and `unload_<name>`.
pub type EntryPoint = unsafe extern "C" fn(context: *mut c_void, channel: *mut StateChannel);

/// Opaque pointer to the host capability table.
///
/// The runtime never dereferences it; it is handed unchanged to every entry
/// point invoked during a `load`/`unload`/`reload` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct HostContext(*mut c_void);

impl HostContext {
    /// A context that carries nothing
    pub const fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    /// Wrap a host-owned pointer
    pub fn from_ptr<T>(ptr: *mut T) -> Self {
        Self(ptr.cast())
    }

    /// Raw pointer passed to entry points
    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::null()
    }
}

/// Which way bytes flow through a [`StateChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChannelDirection {
    /// Host -> module, handed to `load_<name>` during a reload
    Input = 0,
    /// Module -> host, handed to `unload_<name>` before a reload
    Output = 1,
}

/// Host-owned byte stream passed to entry points by pointer.
///
/// Modules obtain one with [`StateChannel::from_raw`]; hosts build one
/// through [`StateSink`] or [`StateSource`], which tie the channel to the
/// lifetime of the backing buffer.
#[repr(C)]
pub struct StateChannel {
    direction: ChannelDirection,
    state: *mut c_void,
    read: unsafe extern "C" fn(state: *mut c_void, buf: *mut u8, len: usize) -> usize,
    write: unsafe extern "C" fn(state: *mut c_void, buf: *const u8, len: usize) -> usize,
}

impl StateChannel {
    /// Borrow the channel behind an entry-point argument.
    ///
    /// Returns `None` when the host passed no channel.
    ///
    /// # Safety
    /// `ptr` must be null or the channel pointer received by an entry point,
    /// and the returned reference must not outlive that call.
    pub unsafe fn from_raw<'a>(ptr: *mut StateChannel) -> Option<&'a mut StateChannel> {
        unsafe { ptr.as_mut() }
    }

    pub fn direction(&self) -> ChannelDirection {
        self.direction
    }

    /// Read everything left in an input channel
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl Read for StateChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.direction != ChannelDirection::Input {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "state channel is write-only",
            ));
        }
        Ok(unsafe { (self.read)(self.state, buf.as_mut_ptr(), buf.len()) })
    }
}

impl Write for StateChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.direction != ChannelDirection::Output {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "state channel is read-only",
            ));
        }
        Ok(unsafe { (self.write)(self.state, buf.as_ptr(), buf.len()) })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

unsafe extern "C" fn sink_write(state: *mut c_void, buf: *const u8, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let buffer = unsafe { &mut *state.cast::<Vec<u8>>() };
    buffer.extend_from_slice(unsafe { std::slice::from_raw_parts(buf, len) });
    len
}

unsafe extern "C" fn source_read(state: *mut c_void, buf: *mut u8, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let cursor = unsafe { &mut *state.cast::<Cursor<&[u8]>>() };
    let out = unsafe { std::slice::from_raw_parts_mut(buf, len) };
    cursor.read(out).unwrap_or(0)
}

unsafe extern "C" fn refuse_read(_state: *mut c_void, _buf: *mut u8, _len: usize) -> usize {
    0
}

unsafe extern "C" fn refuse_write(_state: *mut c_void, _buf: *const u8, _len: usize) -> usize {
    0
}

/// Output channel appending everything a module writes to a buffer
pub struct StateSink<'a> {
    channel: StateChannel,
    _buffer: PhantomData<&'a mut Vec<u8>>,
}

impl<'a> StateSink<'a> {
    pub fn new(buffer: &'a mut Vec<u8>) -> Self {
        Self {
            channel: StateChannel {
                direction: ChannelDirection::Output,
                state: (buffer as *mut Vec<u8>).cast(),
                read: refuse_read,
                write: sink_write,
            },
            _buffer: PhantomData,
        }
    }

    /// Pointer handed to `unload_<name>`; valid while `self` is borrowed
    pub fn as_ptr(&mut self) -> *mut StateChannel {
        &mut self.channel
    }
}

/// Input channel replaying previously captured bytes
pub struct StateSource<'a> {
    channel: StateChannel,
    cursor: Box<Cursor<&'a [u8]>>,
}

impl<'a> StateSource<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        let mut cursor = Box::new(Cursor::new(bytes));
        let state = (&mut *cursor as *mut Cursor<&'a [u8]>).cast();
        Self {
            channel: StateChannel {
                direction: ChannelDirection::Input,
                state,
                read: source_read,
                write: refuse_write,
            },
            cursor,
        }
    }

    /// Bytes the module has not consumed yet
    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    /// Pointer handed to `load_<name>`; valid while `self` is borrowed
    pub fn as_ptr(&mut self) -> *mut StateChannel {
        &mut self.channel
    }
}
