use rand::RngExt;

/// Alphabet used for short keys and session ids
pub const DEFAULT_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of generated short keys unless configured otherwise
pub const DEFAULT_KEY_LENGTH: usize = 9;

/// Produces fixed-length random keys drawn uniformly from an alphabet.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    length: usize,
    alphabet: Vec<u8>,
}

impl KeyGenerator {
    pub fn new(length: usize) -> Self {
        Self::with_alphabet(length, DEFAULT_ALPHABET)
    }

    /// Falls back to the default alphabet when `alphabet` is empty.
    pub fn with_alphabet(length: usize, alphabet: &[u8]) -> Self {
        let alphabet = if alphabet.is_empty() {
            DEFAULT_ALPHABET.to_vec()
        } else {
            alphabet.to_vec()
        };
        Self { length, alphabet }
    }

    pub fn alphabet(&self) -> &[u8] {
        &self.alphabet
    }

    pub fn generate(&self) -> String {
        let mut rng = rand::rng();
        (0..self.length)
            .map(|_| self.alphabet[rng.random_range(0..self.alphabet.len())] as char)
            .collect()
    }

    /// Whether `key` could have been produced by this generator.
    pub fn is_well_formed(&self, key: &str) -> bool {
        key.len() == self.length && key.bytes().all(|b| self.alphabet.contains(&b))
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_LENGTH)
    }
}
