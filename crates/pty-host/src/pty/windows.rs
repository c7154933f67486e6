//! Windows is out of scope for this build; the type exists so the rest of
//! the crate compiles against one name, but every constructor fails loudly
//! rather than pretending to own a PTY it doesn't have.

use std::io;

use super::SpawnOptions;
use crate::error::PtyHostError;

pub struct WindowsPty;

impl WindowsPty {
    pub fn spawn(_opts: SpawnOptions) -> Result<Self, PtyHostError> {
        Err(PtyHostError::Platform("windows conpty backend is not implemented"))
    }

    pub async fn read_output(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other("windows backend unavailable"))
    }

    pub async fn write_input(&mut self, _data: &[u8]) -> io::Result<()> {
        Err(io::Error::other("windows backend unavailable"))
    }

    pub fn resize(&self, _cols: u16, _rows: u16) -> Result<(), PtyHostError> {
        Err(PtyHostError::Platform("windows conpty backend is not implemented"))
    }

    pub fn terminate(&mut self) {}

    pub fn try_wait_exit_code(&mut self) -> Option<i32> {
        Some(-1)
    }

    pub fn pid(&self) -> u32 {
        0
    }
}
