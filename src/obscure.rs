// Reversible obscuring of the configuration file contents.
//
// This only keeps the user token from being readable at a glance. It is
// NOT encryption: anyone with this source can decode the file.

use base64::{engine::general_purpose::STANDARD, Engine as _};

const KEY: &[u8] = b"classinet-configure";

fn mask(index: usize) -> u8 {
    KEY[index % KEY.len()] ^ (index as u8).wrapping_mul(31)
}

fn apply(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ mask(i))
        .collect()
}

/// Obscure `plain` into printable text.
pub fn encode(plain: &str) -> String {
    STANDARD.encode(apply(plain.as_bytes()))
}

/// Reverse [`encode`]. Returns `None` when `cipher` was not produced by it.
pub fn decode(cipher: &str) -> Option<String> {
    let bytes = STANDARD.decode(cipher.trim()).ok()?;
    String::from_utf8(apply(&bytes)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for plain in [
            "",
            "user_token: abc\n",
            "debug: api=sync,stats=yes\ninstance_description: lab: bench 3\nuser_token: t0k3n\n",
            "ünïcödé: ✓\n",
        ] {
            assert_eq!(decode(&encode(plain)).as_deref(), Some(plain));
        }
    }

    #[test]
    fn encoded_text_hides_plain_value() {
        let cipher = encode("user_token: secret-token\n");
        assert!(!cipher.contains("secret"));
        assert!(cipher.is_ascii());
    }

    #[test]
    fn byte_positions_are_preserved() {
        let a = apply(b"abcdef");
        let b = apply(b"abcXef");
        let differing: Vec<_> = (0..6).filter(|&i| a[i] != b[i]).collect();
        assert_eq!(differing, vec![3]);
    }

    #[test]
    fn garbage_does_not_decode() {
        assert_eq!(decode("not base64 at all!"), None);
    }
}
