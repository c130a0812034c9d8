pub mod retry;

use rand::Rng;

/// Random lowercase hex string, used for the per-process session and device
/// identifiers Twitch expects in request headers.
pub fn hex_nonce(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let n: u8 = rng.random_range(0..16);
            char::from_digit(n as u32, 16).unwrap_or('0')
        })
        .collect()
}
