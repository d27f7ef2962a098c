use proptest::prelude::*;

use hub_protocol::encoding::{MAX_PREFIXED_LENGTH, read_length_prefix, write_length_prefix};
use hub_protocol::{
    Argument, Encoding, HubMessage, Invocation, MessageBuffer, ProtocolError, handshake,
};

fn arb_encoding() -> impl Strategy<Value = Encoding> {
    prop_oneof![Just(Encoding::Json), Just(Encoding::MessagePack)]
}

fn arb_echo(encoding: Encoding) -> impl Strategy<Value = HubMessage> {
    let arg = if encoding == Encoding::Json {
        ".*".prop_map(Argument::Text).boxed()
    } else {
        prop_oneof![
            ".*".prop_map(Argument::Text),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(Argument::Binary),
        ]
        .boxed()
    };
    (proptest::option::of("[0-9]{1,4}"), arg).prop_map(|(id, arg)| {
        let mut inv = Invocation::new("EchoMessage", vec![arg]);
        inv.invocation_id = id;
        HubMessage::Invocation(inv)
    })
}

fn arb_frame() -> impl Strategy<Value = (Encoding, Vec<HubMessage>)> {
    arb_encoding().prop_flat_map(|encoding| {
        (
            Just(encoding),
            proptest::collection::vec(arb_echo(encoding), 1..6),
        )
    })
}

// --- Length prefix ---

proptest! {
    #[test]
    fn length_prefix_fits_in_five_bytes(len in 0..=MAX_PREFIXED_LENGTH) {
        let mut out = Vec::new();
        write_length_prefix(len, &mut out).unwrap();
        prop_assert!(out.len() <= 5);
        prop_assert_eq!(read_length_prefix(&out).unwrap(), (len, out.len()));
    }

    #[test]
    fn length_prefix_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..8)) {
        let _ = read_length_prefix(&bytes);
    }
}

// --- Framing ---

proptest! {
    #[test]
    fn concatenated_messages_split_back_apart((encoding, messages) in arb_frame()) {
        let mut frame = Vec::new();
        for msg in &messages {
            frame.extend(encoding.write_message(msg).unwrap());
        }
        let parsed = encoding.parse_messages(&frame).unwrap();
        prop_assert_eq!(parsed, messages);
    }

    #[test]
    fn truncated_frames_are_incomplete((encoding, messages) in arb_frame(), cut in 1usize..64) {
        let frame = encoding.write_message(&messages[0]).unwrap();
        let cut = cut.min(frame.len() - 1);
        // JSON loses its record separator; MessagePack stops short of the announced length.
        let result = encoding.parse_messages(&frame[..frame.len() - cut]);
        prop_assert!(matches!(result, Err(ProtocolError::Incomplete)));
    }

    #[test]
    fn messages_survive_any_frame_boundaries(
        (encoding, messages) in arb_frame(),
        cuts in proptest::collection::vec(any::<usize>(), 0..6),
    ) {
        let mut bytes = Vec::new();
        for msg in &messages {
            bytes.extend(encoding.write_message(msg).unwrap());
        }
        let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c % (bytes.len() + 1)).collect();
        cuts.push(0);
        cuts.push(bytes.len());
        cuts.sort_unstable();

        let mut buffer = MessageBuffer::new(encoding, bytes.len());
        let mut parsed = Vec::new();
        for pair in cuts.windows(2) {
            parsed.extend(buffer.push(&bytes[pair[0]..pair[1]]).unwrap());
        }
        prop_assert_eq!(parsed, messages);
        prop_assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn arbitrary_json_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        let _ = Encoding::Json.parse_messages(&bytes);
        let _ = handshake::parse_request(&bytes);
    }
}

// --- Handshake ---

proptest! {
    #[test]
    fn handshake_selects_requested_encoding(encoding in arb_encoding()) {
        let bytes = handshake::write_request(&hub_protocol::HandshakeRequest::new(encoding)).unwrap();
        let (req, rest) = handshake::parse_request(&bytes).unwrap();
        prop_assert!(rest.is_empty());
        prop_assert_eq!(req.encoding().unwrap(), encoding);
    }

    #[test]
    fn handshake_rejects_other_versions(encoding in arb_encoding(), version in 2u32..100) {
        let req = hub_protocol::HandshakeRequest {
            protocol: encoding.name().to_string(),
            version,
        };
        prop_assert!(req.encoding().is_err());
    }
}
