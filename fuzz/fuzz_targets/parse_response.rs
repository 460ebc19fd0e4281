#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use mysql_protocol::{ColumnDefinition, CommandResponse, EofPacket, ErrPacket, OkPacket, QueryResponse};

fuzz_target!(|data: &[u8]| {
    let bytes = Bytes::copy_from_slice(data);
    let _ = QueryResponse::decode(bytes.clone());
    let _ = CommandResponse::decode(bytes.clone());
    let _ = OkPacket::decode(bytes.clone());
    let _ = ErrPacket::decode(bytes.clone());
    let _ = EofPacket::decode(bytes.clone());
    let _ = ColumnDefinition::decode(bytes);
});
