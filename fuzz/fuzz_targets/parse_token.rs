#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_protocol::Token;

fuzz_target!(|data: &[u8]| {
    let mut cursor = data;
    // Walk the stream as far as it parses; accepting or failing cleanly are
    // both fine, panicking is not.
    while !cursor.is_empty() {
        let before = cursor.len();
        match Token::decode(&mut cursor) {
            Ok(_) => {
                if cursor.len() == before {
                    break;
                }
            }
            Err(_) => break,
        }
    }
});
