use bitflags::bitflags;

bitflags! {
    /// Client engine behaviour switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClientOptions: u32 {
        /// Give tasks submitted without a unique id a random UUID.
        const GENERATE_UNIQUE = 1 << 0;
        /// Ask each server to forward `WORK_EXCEPTION` packets.
        const EXCEPTIONS = 1 << 1;
        /// Keep only the latest `WORK_DATA` chunk on a task.
        const UNBUFFERED_RESULT = 1 << 2;
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions::GENERATE_UNIQUE | ClientOptions::EXCEPTIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = ClientOptions::default();
        assert!(opts.contains(ClientOptions::GENERATE_UNIQUE));
        assert!(opts.contains(ClientOptions::EXCEPTIONS));
        assert!(!opts.contains(ClientOptions::UNBUFFERED_RESULT));
    }

    #[test]
    fn bits_roundtrip() {
        let opts = ClientOptions::UNBUFFERED_RESULT | ClientOptions::EXCEPTIONS;
        assert_eq!(ClientOptions::from_bits(opts.bits()), Some(opts));
        assert_eq!(ClientOptions::from_bits(1 << 9), None);
    }
}
