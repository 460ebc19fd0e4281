#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use mysql_protocol::row::{decode_text_row, text_row_lengths};

fuzz_target!(|data: &[u8]| {
    let Some((&columns, payload)) = data.split_first() else {
        return;
    };
    let columns = usize::from(columns);
    let payload = Bytes::copy_from_slice(payload);

    let decoded = decode_text_row(&payload, columns);
    let lengths = text_row_lengths(&payload, columns);
    // Both walks must agree on what they accept
    if let (Ok(values), Ok(lengths)) = (decoded, lengths) {
        let seen: Vec<Option<usize>> = values.iter().map(|v| v.as_ref().map(Bytes::len)).collect();
        assert_eq!(seen, lengths);
    }
});
