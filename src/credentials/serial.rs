//! Credential serial numbers

use rand::rngs::OsRng;
use rand::RngCore;

/// Random bytes per serial (96 bits)
pub const SERIAL_BYTES: usize = 12;

/// Serial namespaces. Prefixes keep them disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialNamespace {
    Certificate,
    PhysicalReward,
}

impl SerialNamespace {
    pub fn prefix(&self) -> &'static str {
        match self {
            SerialNamespace::Certificate => "CERT-",
            SerialNamespace::PhysicalReward => "SN-",
        }
    }

    /// Does `serial` have the shape of a serial from this namespace?
    pub fn matches(&self, serial: &str) -> bool {
        serial
            .strip_prefix(self.prefix())
            .map(|body| {
                body.len() == SERIAL_BYTES * 2
                    && body.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
            })
            .unwrap_or(false)
    }
}

/// Source of fresh serials
pub trait SerialSource: Send + Sync {
    fn next_serial(&self, namespace: SerialNamespace) -> String;
}

/// Serials from the operating system CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSerialSource;

impl SerialSource for OsSerialSource {
    fn next_serial(&self, namespace: SerialNamespace) -> String {
        let mut bytes = [0u8; SERIAL_BYTES];
        OsRng.fill_bytes(&mut bytes);
        format!("{}{}", namespace.prefix(), hex::encode_upper(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_serial_shape() {
        let serial = OsSerialSource.next_serial(SerialNamespace::Certificate);
        assert!(serial.starts_with("CERT-"));
        assert_eq!(serial.len(), 5 + SERIAL_BYTES * 2);
        assert!(SerialNamespace::Certificate.matches(&serial));
        assert!(!SerialNamespace::PhysicalReward.matches(&serial));
    }

    #[test]
    fn test_serials_unique() {
        let serials: HashSet<String> = (0..10_000)
            .map(|_| OsSerialSource.next_serial(SerialNamespace::PhysicalReward))
            .collect();
        assert_eq!(serials.len(), 10_000);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(!SerialNamespace::Certificate.matches("CERT-1234"));
        assert!(!SerialNamespace::Certificate.matches(""));
        assert!(!SerialNamespace::Certificate.matches("CERT-zzzzzzzzzzzzzzzzzzzzzzzz"));
    }
}
