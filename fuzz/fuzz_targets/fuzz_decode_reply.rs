#![no_main]

use heatmiser_rs::hmbus::frame::{decode_reply, Function};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // arbitrary bytes must be rejected cleanly, never panic
    let _ = decode_reply(data, 0x81, 1, Function::Read);
    let _ = decode_reply(data, 0x81, 1, Function::Write);

    // a reply with a valid CRC exercises the header checks past the checksum
    if data.len() > 2 {
        let mut framed = data.to_vec();
        let body = framed.len() - 2;
        let crc = heatmiser_rs::hmbus::frame::checksum(&framed[..body]);
        framed[body..].copy_from_slice(&crc.to_le_bytes());
        let _ = decode_reply(&framed, 0x81, framed.get(3).copied().unwrap_or(1), Function::Read);
    }
});
