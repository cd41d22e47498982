use std::io::{stdin, stderr, Write};

use crate::error::{ProviderError, Result};
use crate::messages::PinMatrixRequestType;

/// Source of PIN and passphrase input for a device that asks for it.
///
/// Called from the device worker's blocking thread, so implementations may
/// block while the user types.
#[cfg_attr(test, mockall::automock)]
pub trait PinProvider: Send + Sync {
    /// Return the PIN as scrambled matrix positions (digits 1-9).
    fn request_pin(&self, kind: PinMatrixRequestType) -> Result<String>;

    fn request_passphrase(&self) -> Result<String> {
        Ok(String::new())
    }
}

/// Reads the PIN from one line of standard input.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPinProvider;

impl PinProvider for StdinPinProvider {
    fn request_pin(&self, kind: PinMatrixRequestType) -> Result<String> {
        let prompt = match kind {
            PinMatrixRequestType::Current => "Please enter PIN.",
            PinMatrixRequestType::NewFirst => "Please enter new PIN.",
            PinMatrixRequestType::NewSecond => "Please re-enter new PIN.",
        };
        let mut err = stderr();
        writeln!(err, "{} The positions:", prompt).map_err(io_error)?;
        writeln!(err, "7 8 9").map_err(io_error)?;
        writeln!(err, "4 5 6").map_err(io_error)?;
        writeln!(err, "1 2 3").map_err(io_error)?;
        err.flush().map_err(io_error)?;

        read_line()
    }

    fn request_passphrase(&self) -> Result<String> {
        let mut err = stderr();
        write!(err, "Enter passphrase: ").map_err(io_error)?;
        err.flush().map_err(io_error)?;
        read_line()
    }
}

fn read_line() -> Result<String> {
    let mut line = String::new();
    stdin().read_line(&mut line).map_err(io_error)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn io_error(e: std::io::Error) -> ProviderError {
    ProviderError::Transport(format!("failed to read user input: {}", e))
}

/// Answers every PIN request with a fixed value. Handy for scripted setups.
#[derive(Debug, Clone)]
pub struct FixedPinProvider {
    pin: String,
}

impl FixedPinProvider {
    pub fn new(pin: impl Into<String>) -> Self {
        Self { pin: pin.into() }
    }
}

impl PinProvider for FixedPinProvider {
    fn request_pin(&self, _kind: PinMatrixRequestType) -> Result<String> {
        Ok(self.pin.clone())
    }
}
