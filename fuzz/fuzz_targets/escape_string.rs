#![no_main]

use libfuzzer_sys::fuzz_target;
use mysql_protocol::Charset;
use mysql_protocol::escape::{escape_string, quote_string};

fuzz_target!(|data: &[u8]| {
    let Some((&selector, input)) = data.split_first() else {
        return;
    };
    let Some(charset) = Charset::by_number(selector) else {
        return;
    };
    let no_backslash_escapes = selector & 1 == 1;
    let escaped = escape_string(charset, no_backslash_escapes, input);
    assert!(escaped.len() <= input.len() * 2);
    let quoted = quote_string(charset, no_backslash_escapes, input);
    assert_eq!(quoted.len(), escaped.len() + 2);
});
