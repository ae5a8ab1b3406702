//! The Windows I/O completion port channel.

use crate::channel::{Channel, Entry};
use crate::sys::RawSocket;
use std::convert::TryFrom as _;
use std::fmt;
use std::io;
use std::mem;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;
use winapi::ctypes::{c_char, c_int};
use winapi::shared::minwindef::{DWORD, FALSE, ULONG};
use winapi::shared::winerror;
use winapi::um::errhandlingapi;
use winapi::um::handleapi;
use winapi::um::ioapiset;
use winapi::um::minwinbase;
use winapi::um::winbase;
use winapi::um::winnt::HANDLE;
use winapi::um::winsock2;

/// The maximum number of entries dequeued by a single wait.
const MAX_ENTRIES: usize = 64;

const SOL_SOCKET: c_int = 0xffff;
const SO_UPDATE_ACCEPT_CONTEXT: c_int = 0x700b;
const SO_UPDATE_CONNECT_CONTEXT: c_int = 0x7010;

/// The `OVERLAPPED` structure embedded in every op-context.
#[repr(transparent)]
pub struct Overlapped(minwinbase::OVERLAPPED);

impl Default for Overlapped {
    fn default() -> Self {
        // Safety: OVERLAPPED structure is valid when zeroed.
        Self(unsafe { mem::MaybeUninit::zeroed().assume_init() })
    }
}

struct Inner {
    handle: HANDLE,
}

impl Drop for Inner {
    fn drop(&mut self) {
        unsafe {
            // NB: intentionally ignored.
            let _ = handleapi::CloseHandle(self.handle);
        }
    }
}

/// A handle to a Windows I/O completion port.
///
/// Clones share the same port, which is closed once the last clone is
/// dropped.
#[derive(Clone)]
pub struct CompletionPort {
    inner: Arc<Inner>,
}

unsafe impl Send for CompletionPort {}
unsafe impl Sync for CompletionPort {}

impl CompletionPort {
    /// Create a new completion port serving a single thread.
    pub fn create() -> io::Result<Self> {
        unsafe {
            let handle = ioapiset::CreateIoCompletionPort(
                handleapi::INVALID_HANDLE_VALUE,
                ptr::null_mut(),
                0,
                1,
            );

            if handle.is_null() {
                return Err(io::Error::last_os_error());
            }

            Ok(Self {
                inner: Arc::new(Inner { handle }),
            })
        }
    }
}

fn last_socket_error() -> io::Error {
    io::Error::from_raw_os_error(unsafe { winsock2::WSAGetLastError() })
}

/// Convert a timeout into milliseconds, rounding up so that a sub-millisecond
/// timeout doesn't turn into a busy loop.
fn timeout_millis(timeout: Option<Duration>) -> DWORD {
    let timeout = match timeout {
        Some(timeout) => timeout,
        None => return winbase::INFINITE,
    };

    let mut millis = timeout.as_millis();

    if timeout.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }

    // INFINITE is reserved.
    DWORD::try_from(millis).unwrap_or(winbase::INFINITE - 1).min(winbase::INFINITE - 1)
}

unsafe impl Channel for CompletionPort {
    type Overlapped = Overlapped;

    fn associate(&self, socket: RawSocket) -> io::Result<()> {
        // Safety: there's nothing inherently unsafe about this.
        unsafe {
            let handle = ioapiset::CreateIoCompletionPort(
                socket as HANDLE,
                self.inner.handle,
                0,
                0,
            );

            if handle.is_null() {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(())
    }

    fn wait(
        &self,
        entries: &mut Vec<Entry<Self::Overlapped>>,
        capacity: usize,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let capacity = capacity.clamp(1, MAX_ENTRIES);

        unsafe {
            let mut raw: [minwinbase::OVERLAPPED_ENTRY; MAX_ENTRIES] = mem::zeroed();
            let mut removed: ULONG = 0;

            let result = ioapiset::GetQueuedCompletionStatusEx(
                self.inner.handle,
                raw.as_mut_ptr(),
                capacity as ULONG,
                &mut removed,
                timeout_millis(timeout),
                FALSE,
            );

            if result == FALSE {
                return match errhandlingapi::GetLastError() {
                    winerror::WAIT_TIMEOUT => Ok(()),
                    other => Err(io::Error::from_raw_os_error(other as i32)),
                };
            }

            for entry in &raw[..removed as usize] {
                entries.push(Entry {
                    overlapped: entry.lpOverlapped as *mut Overlapped,
                    bytes_transferred: entry.dwNumberOfBytesTransferred,
                });
            }
        }

        Ok(())
    }

    fn wake(&self) -> io::Result<()> {
        unsafe {
            let result =
                ioapiset::PostQueuedCompletionStatus(self.inner.handle, 0, 0, ptr::null_mut());

            if result == FALSE {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(())
    }

    unsafe fn result(
        &self,
        socket: RawSocket,
        overlapped: *mut Self::Overlapped,
        _: u32,
    ) -> io::Result<usize> {
        let mut transferred: DWORD = 0;
        let mut flags: DWORD = 0;

        let result = winsock2::WSAGetOverlappedResult(
            socket as winsock2::SOCKET,
            overlapped as *mut minwinbase::OVERLAPPED,
            &mut transferred,
            FALSE,
            &mut flags,
        );

        if result == FALSE {
            return Err(last_socket_error());
        }

        Ok(transferred as usize)
    }

    fn update_accept_context(&self, listener: RawSocket, accepted: RawSocket) -> io::Result<()> {
        let listener = listener as winsock2::SOCKET;

        let result = unsafe {
            winsock2::setsockopt(
                accepted as winsock2::SOCKET,
                SOL_SOCKET,
                SO_UPDATE_ACCEPT_CONTEXT,
                &listener as *const winsock2::SOCKET as *const c_char,
                mem::size_of::<winsock2::SOCKET>() as c_int,
            )
        };

        if result == winsock2::SOCKET_ERROR {
            return Err(last_socket_error());
        }

        Ok(())
    }

    fn update_connect_context(&self, socket: RawSocket) -> io::Result<()> {
        let result = unsafe {
            winsock2::setsockopt(
                socket as winsock2::SOCKET,
                SOL_SOCKET,
                SO_UPDATE_CONNECT_CONTEXT,
                ptr::null(),
                0,
            )
        };

        if result == winsock2::SOCKET_ERROR {
            return Err(last_socket_error());
        }

        Ok(())
    }

    fn close(&self, socket: RawSocket) {
        unsafe {
            // NB: intentionally ignored.
            let _ = winsock2::closesocket(socket as winsock2::SOCKET);
        }
    }

    fn is_pending(&self, error: &io::Error) -> bool {
        error.raw_os_error() == Some(winerror::ERROR_IO_PENDING as i32)
    }
}

impl fmt::Debug for CompletionPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionPort")
            .field("handle", &self.inner.handle)
            .finish()
    }
}
