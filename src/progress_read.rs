use std::io::Read;

/// A reader that reports the total amount of bytes read so far, and the amount read in the latest call, to a
/// callback.
pub struct ProgressRead<R, F>
where
    R: Read,
    F: FnMut(u64, u64),
{
    reader: R,
    total: u64,
    callback: F,
}

impl<R, F> ProgressRead<R, F>
where
    R: Read,
    F: FnMut(u64, u64),
{
    pub fn new(reader: R, callback: F) -> Self {
        Self {
            reader,
            total: 0,
            callback,
        }
    }
}

impl<R, F> Read for ProgressRead<R, F>
where
    R: Read,
    F: FnMut(u64, u64),
{
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let amt = self.reader.read(buf)?;
        if amt > 0 {
            self.total += amt as u64;
            (self.callback)(self.total, amt as u64);
        }
        Ok(amt)
    }
}
