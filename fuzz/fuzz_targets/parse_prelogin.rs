#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_protocol::PreLogin;

fuzz_target!(|data: &[u8]| {
    let _ = PreLogin::decode(data);
});
