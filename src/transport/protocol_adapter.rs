use super::{ProtocolAdapter, Transport};
use crate::error::{ProviderError, Result};
use crate::messages::Message;

use log::{debug, info};

fn transport_error<E: std::error::Error>(e: E) -> ProviderError {
    ProviderError::Transport(e.to_string())
}

impl<T, E> ProtocolAdapter for T
where
    T: Transport<Error = E>,
    E: std::error::Error,
{
    fn reset(&mut self) -> Result<()> {
        <T as Transport>::reset(self).map_err(transport_error)
    }

    fn send(&mut self, msg: Message) -> Result<()> {
        debug!("ProtocolAdapter::send: -> {:?}", msg);

        let mut out_buf = Vec::<u8>::with_capacity(msg.encoded_len());
        msg.encode(&mut out_buf)?;

        debug!("ProtocolAdapter::send: Encoded message size: {} bytes", out_buf.len());

        self.write(&out_buf, msg.write_timeout()).map_err(transport_error)?;

        Ok(())
    }

    fn as_mut_dyn(&mut self) -> &mut dyn ProtocolAdapter {
        self
    }

    fn handle(&mut self, msg: Message) -> Result<Message> {
        info!("ProtocolAdapter::handle: Processing message type: {:?}", msg.message_type());

        let read_timeout = msg.read_timeout();
        self.send(msg)?;

        let mut in_buf = Vec::<u8>::new();
        self.read(&mut in_buf, read_timeout).map_err(transport_error)?;

        let out = Message::decode(&mut in_buf.as_slice())?;
        info!("ProtocolAdapter::handle: Decoded response type: {:?}", out.message_type());
        debug!("ProtocolAdapter::handle: <- {:?}", out);

        Ok(out)
    }
}
