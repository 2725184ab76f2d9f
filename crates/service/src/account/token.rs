use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;

/// Bytes of entropy per verification token (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Source of single-use verification tokens.
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// OS CSPRNG, URL-safe base64 without padding.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsTokenGenerator;

impl TokenGenerator for OsTokenGenerator {
    fn generate(&self) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

pub mod mock {
    use super::TokenGenerator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic `token-1`, `token-2`, ...
    #[derive(Default)]
    pub struct SequentialTokens {
        next: AtomicUsize,
    }

    impl TokenGenerator for SequentialTokens {
        fn generate(&self) -> String {
            let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            format!("token-{n}")
        }
    }
}
