#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use mysql_protocol::{AuthSwitchRequest, Handshake, HandshakeResponse, scramble_native_password};

fuzz_target!(|data: &[u8]| {
    let bytes = Bytes::copy_from_slice(data);
    if let Ok(greeting) = Handshake::decode(bytes.clone()) {
        // Whatever the server sent must yield an encodable reply
        let response = HandshakeResponse::new(greeting.capabilities, 45, "fuzz", "secret", Some("db"), &greeting);
        let _ = response.encode();
        let _ = scramble_native_password("secret", &greeting.auth_plugin_data);
    }
    let _ = AuthSwitchRequest::decode(bytes);
});
