/// Raw socket handle, mirroring the representation used on Windows.
pub type RawSocket = u64;
