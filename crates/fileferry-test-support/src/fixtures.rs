//! Request builders and deterministic payloads.

use fileferry_core::{DestinationDescriptor, Priority, SourceLocator, TransferRequest};

/// Bucket used by [`transfer_request`].
pub const BUCKET: &str = "finance-exports";
/// Destination host used by [`transfer_request`].
pub const HOST: &str = "partner.example";

/// Request copying `BUCKET/key` to `HOST:/inbound/<key>` over `protocol`.
#[must_use]
pub fn transfer_request(approval_ref: &str, key: &str, protocol: &str) -> TransferRequest {
    TransferRequest {
        requester: "alice".to_string(),
        approval_ref: approval_ref.to_string(),
        source: SourceLocator {
            bucket: BUCKET.to_string(),
            key: key.to_string(),
        },
        destination: DestinationDescriptor {
            host: HOST.to_string(),
            port: if protocol.eq_ignore_ascii_case("ftp") { 21 } else { 22 },
            protocol: protocol.to_string(),
            path: format!("/inbound/{key}"),
            credentials_ref: "partner-key".to_string(),
        },
        priority: Priority::Normal,
        recipient: Some("ops@example.com".to_string()),
    }
}

/// Binary bytes with no repeating run shorter than 251, so misplaced chunks are detectable.
#[must_use]
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len)
        .map(|index| u8::try_from(index % 251).unwrap_or_default())
        .collect()
}

/// CSV text of at least `len` bytes, truncated to exactly `len`.
#[must_use]
pub fn csv_bytes(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 64);
    out.extend_from_slice(b"id,account,amount\n");
    let mut row = 0_u64;
    while out.len() < len {
        let line = format!("{row},ACC-{:06},{}.{:02}\n", row % 9_973, row * 7, row % 100);
        out.extend_from_slice(line.as_bytes());
        row += 1;
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_builders_honour_length() {
        assert_eq!(patterned_bytes(1_000).len(), 1_000);
        assert_eq!(csv_bytes(4_096).len(), 4_096);
        assert!(csv_bytes(0).is_empty());
    }

    #[test]
    fn ftp_requests_use_ftp_port() {
        assert_eq!(transfer_request("REQ1", "a.csv", "ftp").destination.port, 21);
        assert_eq!(transfer_request("REQ1", "a.csv", "sftp").destination.port, 22);
    }
}
