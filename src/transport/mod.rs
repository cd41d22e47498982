pub mod emulator;
pub mod protocol_adapter;

pub use emulator::*;

use crate::error::{ProviderError, Result};
use crate::messages::{self, Message};
use crate::pin::PinProvider;
use core::time::Duration;
use log::info;

/// Byte-level link to the device. USB report chunking lives behind this trait.
pub trait Transport {
    type Error: std::error::Error;
    fn write(&mut self, msg: &[u8], timeout: Duration) -> core::result::Result<usize, Self::Error>;
    fn read(&mut self, buf: &mut Vec<u8>, timeout: Duration) -> core::result::Result<(), Self::Error>;
    fn reset(&mut self) -> core::result::Result<(), Self::Error>;
}

/// Answers the device's interaction requests until it sends a real reply.
///
/// Buttons are acknowledged, PIN and passphrase prompts go to `pin`, and a
/// `Failure` ends the exchange with `DeviceRejected`.
pub fn interaction_handler(msg: &Message, pin: &dyn PinProvider) -> Result<Option<Message>> {
    Ok(match msg {
        Message::ButtonRequest(req) => {
            info!("InteractionHandler: ButtonRequest received, code: {:?}", req.code);
            eprintln!("Confirm action on device...");
            Some(messages::ButtonAck::default().into())
        }
        Message::PinMatrixRequest(x) => {
            let kind = match x.r#type {
                Some(t) => messages::PinMatrixRequestType::from_i32(t).ok_or_else(|| {
                    ProviderError::Protocol(format!("unrecognized PinMatrixRequestType ({})", t))
                })?,
                None => messages::PinMatrixRequestType::Current,
            };
            info!("InteractionHandler: PinMatrixRequest received ({:?})", kind);
            let pin = pin.request_pin(kind)?;
            Some(messages::PinMatrixAck { pin: pin.trim().to_owned() }.into())
        }
        Message::PassphraseRequest(_) => {
            info!("InteractionHandler: PassphraseRequest received");
            let passphrase = pin.request_passphrase()?;
            Some(messages::PassphraseAck { passphrase: Some(passphrase) }.into())
        }
        Message::Failure(x) => return Err(ProviderError::DeviceRejected(x.message().to_string())),
        _ => None,
    })
}

pub trait ProtocolAdapter {
    fn reset(&mut self) -> Result<()>;
    fn send(&mut self, msg: Message) -> Result<()>;
    fn handle(&mut self, msg: Message) -> Result<Message>;
    fn as_mut_dyn(&mut self) -> &mut dyn ProtocolAdapter;
    fn with_handler<'a: 'b, 'b>(
        &'a mut self,
        handler: &'b MessageHandler<'b>,
    ) -> Box<dyn ProtocolAdapter + 'b> {
        Box::from(MessageHandlerStack {
            parent_adapter: self.as_mut_dyn(),
            handler,
        })
    }
}

pub type MessageHandler<'a> = dyn Fn(&Message) -> Result<Option<Message>> + 'a;

pub struct MessageHandlerStack<'a, 'b> {
    parent_adapter: &'a mut dyn ProtocolAdapter,
    handler: &'b MessageHandler<'b>,
}

impl ProtocolAdapter for MessageHandlerStack<'_, '_> {
    fn reset(&mut self) -> Result<()> {
        self.parent_adapter.reset()
    }
    fn send(&mut self, msg: Message) -> Result<()> {
        self.parent_adapter.send(msg)
    }
    fn handle(&mut self, msg: Message) -> Result<Message> {
        let mut msg = msg;
        loop {
            let msg_out = self.parent_adapter.handle(msg)?;
            match (self.handler)(&msg_out)? {
                Some(x) => {
                    info!(
                        "MessageHandlerStack::handle: answering {:?} with {:?}",
                        msg_out.message_type(),
                        x.message_type()
                    );
                    msg = x;
                }
                None => return Ok(msg_out),
            }
        }
    }
    fn as_mut_dyn(&mut self) -> &mut dyn ProtocolAdapter {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ButtonRequest, Failure, PinMatrixRequest, PinMatrixRequestType, Success};
    use crate::pin::MockPinProvider;

    #[test]
    fn button_requests_are_acknowledged() {
        let pin = MockPinProvider::new();
        let reply = interaction_handler(&ButtonRequest::default().into(), &pin).unwrap();
        assert!(matches!(reply, Some(Message::ButtonAck(_))));
    }

    #[test]
    fn pin_requests_go_to_the_provider() {
        let mut pin = MockPinProvider::new();
        pin.expect_request_pin()
            .withf(|kind| *kind == PinMatrixRequestType::Current)
            .times(1)
            .returning(|_| Ok("1234\n".to_string()));

        let request = PinMatrixRequest { r#type: Some(PinMatrixRequestType::Current as i32) };
        match interaction_handler(&request.into(), &pin).unwrap() {
            Some(Message::PinMatrixAck(ack)) => assert_eq!(ack.pin, "1234"),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn failure_becomes_device_rejected() {
        let pin = MockPinProvider::new();
        let failure = Failure { code: Some(4), message: Some("Action cancelled by user".into()) };
        let err = interaction_handler(&failure.into(), &pin).unwrap_err();
        match err {
            ProviderError::DeviceRejected(reason) => assert_eq!(reason, "Action cancelled by user"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn final_replies_pass_through() {
        let pin = MockPinProvider::new();
        assert!(interaction_handler(&Success::default().into(), &pin).unwrap().is_none());
    }
}
