/// Declares the `Message` enum over the protobuf payload types together with
/// their wire type ids, and the dispatch used by the frame codec.
macro_rules! trezor_message {
    ($($name:ident = $id:literal),* $(,)?) => {
        #[derive(Debug, Clone, PartialEq)]
        pub enum Message {
            $($name($name)),*
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum MessageType {
            $($name = $id),*
        }

        impl MessageType {
            pub fn from_u16(id: u16) -> Option<Self> {
                match id {
                    $($id => Some(MessageType::$name),)*
                    _ => None,
                }
            }
        }

        impl Message {
            pub fn message_type(&self) -> MessageType {
                match self {
                    $(Message::$name(_) => MessageType::$name),*
                }
            }

            fn payload_len(&self) -> usize {
                match self {
                    $(Message::$name(m) => ::prost::Message::encoded_len(m)),*
                }
            }

            fn encode_payload(&self, buf: &mut impl ::bytes::BufMut) -> Result<(), ::prost::EncodeError> {
                match self {
                    $(Message::$name(m) => ::prost::Message::encode(m, buf)),*
                }
            }

            fn decode_payload(kind: MessageType, payload: &[u8]) -> Result<Self, ::prost::DecodeError> {
                Ok(match kind {
                    $(MessageType::$name => Message::$name(<$name as ::prost::Message>::decode(payload)?)),*
                })
            }
        }

        $(
            impl From<$name> for Message {
                fn from(m: $name) -> Self {
                    Message::$name(m)
                }
            }
        )*
    };
}

pub(crate) use trezor_message;
