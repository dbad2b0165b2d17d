#![no_main]

use iproto_client::core::packet::Packet;
use iproto_client::Response;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Framing must reject bad headers and short buffers without panicking
    if let Ok(packet) = Packet::from_bytes(data) {
        if let Ok(response) = Response::decode(&packet.payload) {
            let _ = response.sync_id();
            let _ = response.into_tuple();
        }
    }

    // Unframed payloads straight from the socket
    if let Ok(response) = Response::decode(data) {
        let _ = response.into_tuple();
    }
});
