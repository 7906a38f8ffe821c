//! Randomized property tests
//!
//! These tests check that the pipeline's properties hold across generated
//! inputs: message sizes around chunk boundaries, every option combination,
//! armor round trips and packet framing of arbitrary lengths.

use pgp_envelope::{
    armor::{self, crc24, ArmorType},
    codec::{decrypt_bytes, encrypt_bytes, DecryptOptions, EncryptOptions, IntegrityVerdict},
    crypto::{CompressionAlgorithm, KeyPair, Passphrase, ProtectionMode, SymmetricAlgorithm},
    keyring::KeyRing,
    packet::{PacketBody, PacketHeader, PartialBodyWriter, Tag},
};
use rand::{rngs::OsRng, seq::SliceRandom, Rng};
use std::io::Write;

const PASSPHRASE: &str = "property";

fn setup() -> (KeyPair, KeyRing) {
    let mut rng = OsRng;
    let keypair = KeyPair::generate_mlkem1024(&mut rng).unwrap();
    let secret = keypair
        .export_secret(&Passphrase::new(PASSPHRASE), ProtectionMode::Cfb, &mut rng)
        .unwrap();
    (keypair, KeyRing::load_secret(&secret).unwrap())
}

/// Property: decrypt(encrypt(m)) == m for any non-empty m and any options
#[test]
fn property_round_trip_any_options() {
    let (keypair, ring) = setup();
    let mut rng = OsRng;
    let symmetric = [
        SymmetricAlgorithm::Cast5,
        SymmetricAlgorithm::Aes128,
        SymmetricAlgorithm::Aes192,
        SymmetricAlgorithm::Aes256,
    ];
    let compression = [
        CompressionAlgorithm::Uncompressed,
        CompressionAlgorithm::Zip,
        CompressionAlgorithm::Zlib,
    ];

    for _ in 0..30 {
        let size = rng.gen_range(1..40_000);
        let mut message = vec![0u8; size];
        rng.fill(&mut message[..]);

        let options = EncryptOptions::default()
            .with_symmetric(*symmetric.choose(&mut rng).unwrap())
            .with_compression(*compression.choose(&mut rng).unwrap())
            .with_integrity_check(rng.gen())
            .with_armor(rng.gen());
        let envelope = encrypt_bytes(&message, keypair.public_key(), &options).unwrap();
        let decrypted = decrypt_bytes(
            &envelope,
            &ring,
            &Passphrase::new(PASSPHRASE),
            &DecryptOptions::default(),
        )
        .unwrap();

        assert_eq!(decrypted.plaintext, message, "Round trip failed for {options:?}");
        assert_eq!(
            decrypted.verdict == IntegrityVerdict::ProtectedValid,
            options.integrity_check
        );
    }
}

/// Property: sizes straddling the partial length chunk size survive
#[test]
fn property_chunk_boundaries() {
    let (keypair, ring) = setup();
    for size in [1, 511, 512, 513, 8191, 8192, 8193, 16_384, 16_385] {
        let message = vec![0x5Au8; size];
        let envelope =
            encrypt_bytes(&message, keypair.public_key(), &EncryptOptions::default()).unwrap();
        let decrypted = decrypt_bytes(
            &envelope,
            &ring,
            &Passphrase::new(PASSPHRASE),
            &DecryptOptions::default(),
        )
        .unwrap();
        assert_eq!(decrypted.plaintext.len(), size);
    }
}

/// Property: two encryptions of one message never share ciphertext
#[test]
fn property_fresh_session_keys() {
    let (keypair, _) = setup();
    let options = EncryptOptions::default().with_modification_time(0);
    let first = encrypt_bytes(b"same message", keypair.public_key(), &options).unwrap();
    let second = encrypt_bytes(b"same message", keypair.public_key(), &options).unwrap();
    assert_ne!(first, second);
}

/// Property: armor decode inverts encode for arbitrary payloads
#[test]
fn property_armor_round_trip() {
    let mut rng = OsRng;
    for _ in 0..100 {
        let size = rng.gen_range(0..3000);
        let mut data = vec![0u8; size];
        rng.fill(&mut data[..]);

        let armored = armor::encode(ArmorType::Message, &data);
        assert!(armored.lines().all(|line| line.len() <= 64));
        let decoded = armor::decode(armored.as_bytes()).unwrap();
        assert_eq!(decoded.data, data);

        let crlf = armored.replace('\n', "\r\n");
        assert_eq!(armor::decode(crlf.as_bytes()).unwrap().data, data);
    }
}

/// Property: a single corrupted base64 character is caught by the CRC or the decoder
#[test]
fn property_armor_corruption_detected() {
    let mut rng = OsRng;
    let data: Vec<u8> = (0..600).map(|_| rng.gen()).collect();
    let armored = armor::encode(ArmorType::Message, &data);
    let lines: Vec<&str> = armored.lines().collect();

    for _ in 0..50 {
        // Pick a full base64 line between the blank line and the checksum
        let line_index = rng.gen_range(2..lines.len() - 3);
        let mut line: Vec<u8> = lines[line_index].bytes().collect();
        let column = rng.gen_range(0..line.len());
        line[column] = if line[column] == b'A' { b'B' } else { b'A' };

        let replaced = String::from_utf8(line).unwrap();
        let mut corrupted = lines.clone();
        corrupted[line_index] = &replaced;
        let text = corrupted.join("\n");
        assert!(armor::decode(text.as_bytes()).is_err());
    }
    assert_ne!(crc24(&data), crc24(&data[1..]));
}

/// Property: partial body framing is transparent for any length and chunk size
#[test]
fn property_partial_body_framing() {
    let mut rng = OsRng;
    for _ in 0..50 {
        let size = rng.gen_range(0..20_000);
        let chunk_size = 1usize << rng.gen_range(9..14);
        let mut data = vec![0u8; size];
        rng.fill(&mut data[..]);

        let mut writer =
            PartialBodyWriter::with_chunk_size(Vec::new(), Tag::LiteralData, chunk_size).unwrap();
        // Feed in uneven pieces
        for piece in data.chunks(rng.gen_range(1..1000)) {
            writer.write_all(piece).unwrap();
        }
        let framed = writer.finish().unwrap();

        let mut cursor = framed.as_slice();
        let header = PacketHeader::read(&mut cursor).unwrap().unwrap();
        assert_eq!(header.tag, Tag::LiteralData);
        let body = PacketBody::new(&mut cursor, &header).read_to_vec().unwrap();
        assert_eq!(body, data);
        assert!(cursor.is_empty());
    }
}

/// Property: truncating framed packets always yields an error
#[test]
fn property_truncated_framing_is_error() {
    let mut rng = OsRng;
    let data = vec![1u8; 5000];
    let mut writer = PartialBodyWriter::with_chunk_size(Vec::new(), Tag::LiteralData, 512).unwrap();
    writer.write_all(&data).unwrap();
    let framed = writer.finish().unwrap();

    for _ in 0..50 {
        let cut = rng.gen_range(1..framed.len());
        let mut cursor = &framed[..cut];
        let result = PacketHeader::read(&mut cursor)
            .and_then(|header| PacketBody::new(&mut cursor, &header.unwrap()).read_to_vec());
        assert!(result.is_err(), "Truncation at {cut} parsed");
    }
}
