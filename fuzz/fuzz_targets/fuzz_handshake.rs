#![no_main]

use iproto_client::protocol::handshake::{auth_request, Welcome};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Greeting parsing and salt decoding on arbitrary input
    if let Ok(welcome) = Welcome::parse(data) {
        let _ = welcome.version();
        if welcome.salt().is_ok() {
            let _ = auth_request(&welcome, "guest", "secret");
        }
    }
});
