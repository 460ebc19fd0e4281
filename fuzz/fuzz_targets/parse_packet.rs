#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use mysql_protocol::PacketHeader;
use tokio_util::codec::Decoder;
use wsql_codec::{MessageAssembler, MySqlCodec};

fuzz_target!(|data: &[u8]| {
    if data.len() >= 4 {
        let mut cursor = data;
        let _ = PacketHeader::decode(&mut cursor);
    }

    // Frame a byte stream and reassemble split messages
    let mut codec = MySqlCodec::new().with_max_message_size(1 << 20);
    let mut assembler = MessageAssembler::new();
    let mut buf = BytesMut::from(data);
    while let Ok(Some(packet)) = codec.decode(&mut buf) {
        let _ = assembler.push(packet);
    }
});
