//! Adversarial tests for pgp-envelope
//!
//! These tests feed the decoder tampered, truncated and hostile envelopes and
//! verify it fails with a typed error instead of panicking, looping or
//! allocating without bound.

use pgp_envelope::{
    codec::{decrypt_bytes, encrypt_bytes, DecryptOptions, EncryptOptions, IntegrityVerdict},
    crypto::{KeyPair, Passphrase, ProtectionMode},
    keyring::KeyRing,
    packet::{write_packet, PacketBody, PacketHeader, Tag},
    PgpError,
};
use rand::{rngs::OsRng, Rng};

const PASSPHRASE: &str = "adversarial";

fn setup() -> (KeyPair, KeyRing) {
    let mut rng = OsRng;
    let keypair = KeyPair::generate_mlkem1024(&mut rng).unwrap();
    let secret = keypair
        .export_secret(&Passphrase::new(PASSPHRASE), ProtectionMode::Cfb, &mut rng)
        .unwrap();
    (keypair, KeyRing::load_secret(&secret).unwrap())
}

fn decrypt(envelope: &[u8], ring: &KeyRing, options: &DecryptOptions) -> Result<Vec<u8>, PgpError> {
    decrypt_bytes(envelope, ring, &Passphrase::new(PASSPHRASE), options).map(|d| d.plaintext)
}

/// Splits an envelope into its first packet and the rest
fn split_first_packet(envelope: &[u8]) -> (&[u8], &[u8]) {
    let mut cursor = envelope;
    let header = PacketHeader::read(&mut cursor).unwrap().unwrap();
    PacketBody::new(&mut cursor, &header).skip().unwrap();
    envelope.split_at(envelope.len() - cursor.len())
}

/// Flipping any ciphertext bit of a protected message never passes silently
#[test]
fn test_bit_flips_in_protected_data() {
    let (keypair, ring) = setup();
    let plaintext = b"bit flipping target ".repeat(40);
    let envelope =
        encrypt_bytes(&plaintext, keypair.public_key(), &EncryptOptions::default()).unwrap();
    let (pkesk, data) = split_first_packet(&envelope);
    let mut rng = OsRng;

    for _ in 0..40 {
        let mut tampered = data.to_vec();
        // Skip the data packet header and version octet
        let position = rng.gen_range(4..tampered.len());
        tampered[position] ^= 1 << rng.gen_range(0..8);

        let mut message = pkesk.to_vec();
        message.extend_from_slice(&tampered);

        match decrypt_bytes(
            &message,
            &ring,
            &Passphrase::new(PASSPHRASE),
            &DecryptOptions::default(),
        ) {
            Ok(decrypted) => assert_eq!(decrypted.verdict, IntegrityVerdict::ProtectedFailed),
            Err(PgpError::IntegrityCheckFailed)
            | Err(PgpError::Parse(_))
            | Err(PgpError::MalformedEnvelope(_))
            | Err(PgpError::UnsupportedContent(_)) => {}
            Err(other) => panic!("Unexpected error for tampered data: {other:?}"),
        }

        assert!(decrypt(&message, &ring, &DecryptOptions::fail_closed()).is_err());
    }
}

/// Removing the MDC packet must not yield a "protected and valid" verdict
#[test]
fn test_stripped_mdc() {
    let (keypair, ring) = setup();
    let envelope =
        encrypt_bytes(b"short message", keypair.public_key(), &EncryptOptions::default()).unwrap();
    let (pkesk, data) = split_first_packet(&envelope);

    // Rewrite the data packet with its last 22 octets cut off
    let mut cursor = data;
    let header = PacketHeader::read(&mut cursor).unwrap().unwrap();
    let body = PacketBody::new(&mut cursor, &header).read_to_vec().unwrap();
    let mut message = pkesk.to_vec();
    write_packet(&mut message, header.tag, &body[..body.len() - 22]).unwrap();

    if let Ok(decrypted) = decrypt_bytes(
        &message,
        &ring,
        &Passphrase::new(PASSPHRASE),
        &DecryptOptions::default(),
    ) {
        assert_ne!(decrypted.verdict, IntegrityVerdict::ProtectedValid);
    }
}

/// Downgrading SEIPD to SED with the same ciphertext does not decrypt cleanly
#[test]
fn test_protected_to_legacy_downgrade() {
    let (keypair, ring) = setup();
    let envelope =
        encrypt_bytes(b"downgrade me", keypair.public_key(), &EncryptOptions::default()).unwrap();
    let (pkesk, data) = split_first_packet(&envelope);

    let mut cursor = data;
    let header = PacketHeader::read(&mut cursor).unwrap().unwrap();
    let body = PacketBody::new(&mut cursor, &header).read_to_vec().unwrap();
    let mut message = pkesk.to_vec();
    // Drop the version octet and relabel as tag 9
    write_packet(&mut message, Tag::SymmetricallyEncryptedData, &body[1..]).unwrap();

    if let Ok(plaintext) = decrypt(&message, &ring, &DecryptOptions::default()) {
        assert_ne!(plaintext, b"downgrade me");
    }
}

/// Every prefix of a valid envelope fails with an error, never a panic
#[test]
fn test_every_truncation() {
    let (keypair, ring) = setup();
    let envelope = encrypt_bytes(
        b"truncate me",
        keypair.public_key(),
        &EncryptOptions::default().with_armor(true),
    )
    .unwrap();

    for cut in (0..envelope.len()).step_by(7) {
        assert!(
            decrypt(&envelope[..cut], &ring, &DecryptOptions::default()).is_err(),
            "Truncation at {cut} decrypted"
        );
    }
}

/// Length fields announcing huge bodies are rejected before allocation
#[test]
fn test_oversized_length_fields() {
    let (_, ring) = setup();

    // PKESK announcing 4GB
    let message = [0xC1, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x03];
    assert!(matches!(
        decrypt(&message, &ring, &DecryptOptions::default()),
        Err(PgpError::Parse(_))
    ));

    // Key ring announcing a 4GB secret key packet
    let ring_bytes = [0xC5, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x04];
    assert!(KeyRing::load_secret(&ring_bytes).is_err());
}

/// Endless marker packets hit the packet count limit
#[test]
fn test_packet_flood() {
    let (_, ring) = setup();
    let mut message = Vec::new();
    for _ in 0..2000 {
        write_packet(&mut message, Tag::Marker, b"PGP").unwrap();
    }
    assert!(matches!(
        decrypt(&message, &ring, &DecryptOptions::default()),
        Err(PgpError::MalformedEnvelope(_))
    ));
}

/// Random bytes with a packet-looking first octet are rejected
#[test]
fn test_random_garbage() {
    let (_, ring) = setup();
    let mut rng = OsRng;
    for _ in 0..200 {
        let len = rng.gen_range(1..512);
        let mut garbage = vec![0u8; len];
        rng.fill(&mut garbage[..]);
        garbage[0] |= 0x80;
        assert!(decrypt(&garbage, &ring, &DecryptOptions::default()).is_err());
        // Random rings fail or come back without secret keys
        assert!(KeyRing::load_secret(&garbage).is_err());
    }
}

/// A session key packet for a key the ring does not hold is not an opening
#[test]
fn test_foreign_session_key_packet_first() {
    let (keypair, ring) = setup();
    let stranger = KeyPair::generate_mlkem1024(&mut OsRng).unwrap();

    let ours =
        encrypt_bytes(b"ours", keypair.public_key(), &EncryptOptions::default()).unwrap();
    let theirs =
        encrypt_bytes(b"theirs", stranger.public_key(), &EncryptOptions::default()).unwrap();

    let (their_pkesk, _) = split_first_packet(&theirs);
    let mut message = their_pkesk.to_vec();
    message.extend_from_slice(&ours);

    assert_eq!(
        decrypt(&message, &ring, &DecryptOptions::default()).unwrap(),
        b"ours"
    );
}
