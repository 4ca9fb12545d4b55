//! Composite keys flattened to fixed-width byte arrays rather than
//! relying on `redb`'s native tuple-key support.

use storagesync_core::Digest256;

pub type HeaderKey = [u8; 64];
pub type PartKey = [u8; 96];
pub type DescriptorKey = [u8; 32];

pub fn header_key(head_digest: Digest256, file_digest: Digest256) -> HeaderKey {
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(head_digest.as_bytes());
    out[32..].copy_from_slice(file_digest.as_bytes());
    out
}

pub fn descriptor_key(file_digest: Digest256) -> DescriptorKey {
    *file_digest.as_bytes()
}

pub fn part_key(head_digest: Digest256, file_digest: Digest256, part_digest: Digest256) -> PartKey {
    let mut out = [0u8; 96];
    out[..32].copy_from_slice(head_digest.as_bytes());
    out[32..64].copy_from_slice(file_digest.as_bytes());
    out[64..].copy_from_slice(part_digest.as_bytes());
    out
}

pub fn split_header_key(key: &HeaderKey) -> (Digest256, Digest256) {
    let mut head = [0u8; 32];
    let mut file = [0u8; 32];
    head.copy_from_slice(&key[..32]);
    file.copy_from_slice(&key[32..]);
    (Digest256::from_bytes(head), Digest256::from_bytes(file))
}

pub fn split_part_key(key: &PartKey) -> (Digest256, Digest256, Digest256) {
    let mut head = [0u8; 32];
    let mut file = [0u8; 32];
    let mut part = [0u8; 32];
    head.copy_from_slice(&key[..32]);
    file.copy_from_slice(&key[32..64]);
    part.copy_from_slice(&key[64..]);
    (
        Digest256::from_bytes(head),
        Digest256::from_bytes(file),
        Digest256::from_bytes(part),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use storagesync_core::digest;

    #[test]
    fn header_key_round_trips() {
        let h = digest(b"h");
        let f = digest(b"f");
        let key = header_key(h, f);
        let (h2, f2) = split_header_key(&key);
        assert_eq!(h, h2);
        assert_eq!(f, f2);
    }

    #[test]
    fn part_key_round_trips() {
        let h = digest(b"h");
        let f = digest(b"f");
        let p = digest(b"p");
        let key = part_key(h, f, p);
        let (h2, f2, p2) = split_part_key(&key);
        assert_eq!(h, h2);
        assert_eq!(f, f2);
        assert_eq!(p, p2);
    }
}
