use super::Message;
use core::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(5000);
const QUICK_TIMEOUT: Duration = Duration::from_millis(2000);
// Replies that wait on a human pressing a button or typing a PIN.
const LONG_TIMEOUT: Duration = Duration::from_millis(5 * 60 * 1000);

impl Message {
    pub fn read_timeout(&self) -> Duration {
        match self {
            Message::ButtonAck(_) => LONG_TIMEOUT,
            Message::PinMatrixAck(_) => LONG_TIMEOUT,
            Message::PassphraseAck(_) => LONG_TIMEOUT,
            Message::EthereumGetAddress(m) if m.show_display == Some(true) => LONG_TIMEOUT,
            Message::Initialize(_) => QUICK_TIMEOUT,
            Message::GetFeatures(_) => QUICK_TIMEOUT,
            _ => TIMEOUT,
        }
    }

    pub fn write_timeout(&self) -> Duration {
        match self {
            Message::Initialize(_) => QUICK_TIMEOUT,
            Message::GetFeatures(_) => QUICK_TIMEOUT,
            _ => TIMEOUT,
        }
    }
}
