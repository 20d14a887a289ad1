#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_protocol::PacketHeader;

fuzz_target!(|data: &[u8]| {
    let mut cursor = data;
    // Header parsing must never panic or read past the buffer.
    let _ = PacketHeader::decode(&mut cursor);
});
