pub use std::os::windows::io::RawSocket;
