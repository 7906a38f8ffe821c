//! Integration tests for pgp-envelope
//!
//! These tests drive the public API end to end: key generation and export,
//! key ring loading, the session orchestrator with populated keys, file
//! operations and the integrity verdicts recorded in the event log.

use pgp_envelope::{
    armor::{self, ArmorType},
    codec::{
        decrypt_bytes, decrypt_stream, encrypt_bytes, encrypt_stream, DecryptOptions,
        EncryptOptions, EncryptWriter, IntegrityVerdict, INTEGRITY_ABSENT, INTEGRITY_PASSED,
    },
    crypto::{CompressionAlgorithm, KeyPair, Passphrase, ProtectionMode, SymmetricAlgorithm},
    keyring::{load_public_key, KeyRing},
    EnvelopeConfig, PgpError, Session,
};
use rand::rngs::OsRng;
use std::fs;
use std::io::Write;
use tempfile::TempDir;

const PASSPHRASE: &str = "integration passphrase";
const EXPECTED_TEXT: &[u8] = b"Test this encryption!!!";

struct Identity {
    keypair: KeyPair,
    public_ring: Vec<u8>,
    secret_ring: Vec<u8>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn identity(name: &str) -> Identity {
    init_tracing();
    let mut rng = OsRng;
    let keypair = KeyPair::generate_mlkem1024(&mut rng)
        .expect("Failed to generate key pair")
        .with_user_id(&format!("{name} <{}@example.com>", name.to_lowercase()))
        .expect("Invalid user ID");
    let public_ring = keypair.export_public().expect("Failed to export public key");
    let secret_ring = keypair
        .export_secret(&Passphrase::new(PASSPHRASE), ProtectionMode::Cfb, &mut rng)
        .expect("Failed to export secret key");
    Identity {
        keypair,
        public_ring,
        secret_ring,
    }
}

/// The canonical round trip: populate both sides, encrypt, decrypt
#[test]
fn test_populated_session_round_trip() {
    let alice = identity("Alice");
    let session = Session::new();

    session
        .populate_public_key(&alice.public_ring)
        .expect("Failed to populate public key");
    session
        .populate_private_key_and_passphrase(&alice.secret_ring, PASSPHRASE)
        .expect("Failed to populate secret key");

    for armor in [false, true] {
        let options = EncryptOptions::default().with_armor(armor);
        let envelope = session
            .encrypt(EXPECTED_TEXT, &options)
            .expect("Failed to encrypt");
        assert_eq!(armor::is_armored(&envelope), armor);
        assert!(!envelope
            .windows(EXPECTED_TEXT.len())
            .any(|window| window == EXPECTED_TEXT));

        let plaintext = session.decrypt_populated(&envelope).expect("Failed to decrypt");
        assert_eq!(plaintext, EXPECTED_TEXT);
        assert_eq!(session.event_log(), vec![INTEGRITY_PASSED.to_string()]);
    }
}

#[test]
fn test_explicit_keys_leave_session_untouched() {
    let bob = identity("Bob");
    let session = Session::new();

    let public_key = load_public_key(&bob.public_ring).unwrap();
    let envelope = encrypt_bytes(b"explicit", &public_key, &EncryptOptions::default()).unwrap();
    let plaintext = session
        .decrypt(&envelope, &bob.secret_ring, PASSPHRASE)
        .expect("Failed to decrypt with explicit ring");

    assert_eq!(plaintext, b"explicit");
    assert!(!session.is_public_key_populated());
    assert!(!session.is_private_key_populated());
}

#[test]
fn test_rsa_recipient_with_aead_protected_key() {
    let mut rng = OsRng;
    let keypair = KeyPair::generate_rsa(&mut rng, 2048)
        .unwrap()
        .with_user_id("Rsa User <rsa@example.com>")
        .unwrap();
    let passphrase = Passphrase::new(PASSPHRASE);
    let armored_secret = keypair
        .export_secret_armored(&passphrase, ProtectionMode::Aead, &mut rng)
        .unwrap();
    let ring = KeyRing::load_secret(armored_secret.as_bytes()).unwrap();

    let public_key = load_public_key(keypair.export_public_armored().unwrap().as_bytes()).unwrap();
    assert_eq!(public_key.key_id(), keypair.key_id());

    let options = EncryptOptions::default()
        .with_compression(CompressionAlgorithm::Zlib)
        .with_symmetric(SymmetricAlgorithm::Aes192);
    let envelope = encrypt_bytes(b"rsa payload", &public_key, &options).unwrap();
    let decrypted = decrypt_bytes(&envelope, &ring, &passphrase, &DecryptOptions::default())
        .expect("Failed to decrypt RSA message");
    assert_eq!(decrypted.plaintext, b"rsa payload");
    assert_eq!(decrypted.key_id, keypair.key_id());
}

#[test]
fn test_multiple_recipients() {
    let alice = identity("Alice");
    let bob = identity("Bob");
    let carol = identity("Carol");

    let recipients = [alice.keypair.public_key(), bob.keypair.public_key()];
    let mut input: &[u8] = b"for alice and bob";
    let envelope = encrypt_stream(
        &mut input,
        Vec::new(),
        &recipients,
        &EncryptOptions::default(),
        &mut OsRng,
    )
    .unwrap();

    for who in [&alice, &bob] {
        let ring = KeyRing::load_secret(&who.secret_ring).unwrap();
        let decrypted = decrypt_bytes(
            &envelope,
            &ring,
            &Passphrase::new(PASSPHRASE),
            &DecryptOptions::default(),
        )
        .unwrap();
        assert_eq!(decrypted.plaintext, b"for alice and bob");
        assert_eq!(decrypted.key_id, who.keypair.key_id());
    }

    let ring = KeyRing::load_secret(&carol.secret_ring).unwrap();
    assert!(matches!(
        decrypt_bytes(
            &envelope,
            &ring,
            &Passphrase::new(PASSPHRASE),
            &DecryptOptions::default()
        ),
        Err(PgpError::KeyNotFound(_))
    ));
}

#[test]
fn test_combined_ring_resolves_the_right_key() {
    let alice = identity("Alice");
    let bob = identity("Bob");

    let mut combined = alice.secret_ring.clone();
    combined.extend_from_slice(&bob.secret_ring);
    let ring = KeyRing::load_secret(&combined).unwrap();
    assert_eq!(ring.secret_keys().count(), 2);

    let envelope =
        encrypt_bytes(b"to bob", bob.keypair.public_key(), &EncryptOptions::default()).unwrap();
    let decrypted = decrypt_bytes(
        &envelope,
        &ring,
        &Passphrase::new(PASSPHRASE),
        &DecryptOptions::default(),
    )
    .unwrap();
    assert_eq!(decrypted.key_id, bob.keypair.key_id());
    assert_eq!(
        ring.find(bob.keypair.key_id()).unwrap().public_key().user_ids(),
        ["Bob <bob@example.com>".to_string()]
    );
}

#[test]
fn test_unprotected_message_verdict() {
    let alice = identity("Alice");
    let session = Session::new();
    session.populate_public_key(&alice.public_ring).unwrap();

    let options = EncryptOptions::default().with_integrity_check(false);
    let envelope = session.encrypt(b"no mdc", &options).unwrap();
    let decrypted = session
        .decrypt_detailed(&envelope, &alice.secret_ring, PASSPHRASE)
        .unwrap();
    assert_eq!(decrypted.verdict, IntegrityVerdict::Unprotected);
    assert_eq!(session.event_log(), vec![INTEGRITY_ABSENT.to_string()]);
}

#[test]
fn test_population_preconditions() {
    let alice = identity("Alice");
    let session = Session::new();

    assert!(matches!(
        session.encrypt(b"early", &EncryptOptions::default()),
        Err(PgpError::KeyNotPopulated(_))
    ));
    assert!(matches!(
        session.decrypt_populated(b"early"),
        Err(PgpError::KeyNotPopulated(_))
    ));

    // A bad key leaves the flag false, a good one afterwards succeeds
    assert!(session.populate_public_key(b"-----BEGIN GARBAGE-----").is_err());
    assert!(!session.is_public_key_populated());
    session.populate_public_key(&alice.public_ring).unwrap();
    assert!(session.is_public_key_populated());

    assert!(session
        .populate_private_key_and_passphrase(b"\x99\x00", PASSPHRASE)
        .is_err());
    assert!(!session.is_private_key_populated());
    session
        .populate_private_key_and_passphrase(&alice.secret_ring, PASSPHRASE)
        .unwrap();
    assert!(session.is_private_key_populated());
}

#[test]
fn test_empty_input_rejected() {
    let alice = identity("Alice");
    let session = Session::new();
    session.populate_public_key(&alice.public_ring).unwrap();

    assert!(matches!(
        session.encrypt(b"", &EncryptOptions::default()),
        Err(PgpError::EmptyInput)
    ));
    assert!(matches!(
        encrypt_bytes(b"", alice.keypair.public_key(), &EncryptOptions::default()),
        Err(PgpError::EmptyInput)
    ));
}

#[test]
fn test_non_pgp_input_is_parse_error() {
    let alice = identity("Alice");
    let session = Session::new();
    for input in [&b"plain text, not a message"[..], b"", b"-----BEGIN PGP MESSAGE-----\n"] {
        assert!(matches!(
            session.decrypt(input, &alice.secret_ring, PASSPHRASE),
            Err(PgpError::Parse(_))
        ));
    }
    assert!(matches!(
        session.decrypt(b"\xC1\x01", b"not a ring", PASSPHRASE),
        Err(PgpError::Parse(_))
    ));
}

#[test]
fn test_armor_reencoding_is_idempotent() {
    let alice = identity("Alice");
    let envelope = encrypt_bytes(
        b"armor me",
        alice.keypair.public_key(),
        &EncryptOptions::default().with_armor(true),
    )
    .unwrap();

    let decoded = armor::decode(&envelope).unwrap();
    assert_eq!(decoded.kind, ArmorType::Message);
    let reencoded = armor::encode(ArmorType::Message, &decoded.data);
    assert_eq!(reencoded.as_bytes(), &envelope[..]);

    let binary = decrypt_bytes(
        &decoded.data,
        &KeyRing::load_secret(&alice.secret_ring).unwrap(),
        &Passphrase::new(PASSPHRASE),
        &DecryptOptions::default(),
    )
    .unwrap();
    assert_eq!(binary.plaintext, b"armor me");
}

#[test]
fn test_file_encryption_and_decryption() {
    let alice = identity("Alice");
    let temp_dir = TempDir::new().unwrap();
    let session = Session::new();
    session.populate_public_key(&alice.public_ring).unwrap();

    let input = temp_dir.path().join("report.csv");
    let sealed = temp_dir.path().join("report.csv.asc");
    let opened = temp_dir.path().join("report.out.csv");
    let contents = b"id,value\n1,42\n".repeat(5000);
    fs::write(&input, &contents).unwrap();

    let options = EncryptOptions::default()
        .with_armor(true)
        .with_compression(CompressionAlgorithm::Zip);
    session.encrypt_file(&input, &sealed, &options).unwrap();
    assert!(armor::is_armored(&fs::read(&sealed).unwrap()));

    let info = session
        .decrypt_file(&sealed, &opened, &alice.secret_ring, PASSPHRASE)
        .expect("Failed to decrypt file");
    assert_eq!(info.file_name, "report.csv");
    assert_eq!(info.verdict, IntegrityVerdict::ProtectedValid);
    assert_eq!(fs::read(&opened).unwrap(), contents);
}

#[test]
fn test_streaming_writer_and_reader() {
    let alice = identity("Alice");
    let ring = KeyRing::load_secret(&alice.secret_ring).unwrap();

    let mut writer = EncryptWriter::new(
        Vec::new(),
        &[alice.keypair.public_key()],
        &EncryptOptions::default().with_file_name("stream.bin"),
        &mut OsRng,
    )
    .unwrap();
    for chunk in 0..100u8 {
        writer.write_all(&[chunk; 1000]).unwrap();
    }
    assert_eq!(writer.bytes_written(), 100_000);
    let envelope = writer.finish().unwrap();

    let mut plaintext = Vec::new();
    let info = decrypt_stream(
        envelope.as_slice(),
        &mut plaintext,
        &ring,
        &Passphrase::new(PASSPHRASE),
        &DecryptOptions::default(),
    )
    .unwrap();
    assert_eq!(info.file_name, "stream.bin");
    assert_eq!(plaintext.len(), 100_000);
    assert!(plaintext.chunks(1000).enumerate().all(|(i, c)| c.iter().all(|&b| b == i as u8)));
}

#[test]
fn test_session_from_config() {
    let alice = identity("Alice");
    let config = EnvelopeConfig::from_json(r#"{"decrypt": {"integrity_policy": "fail_closed"}}"#)
        .unwrap();
    let session = Session::with_config(config);
    session.populate_public_key(&alice.public_ring).unwrap();
    session
        .populate_private_key_and_passphrase(&alice.secret_ring, PASSPHRASE)
        .unwrap();

    let options = session.config().encrypt.clone();
    let mut envelope = session.encrypt(b"strict", &options).unwrap();
    assert_eq!(session.decrypt_populated(&envelope).unwrap(), b"strict");

    let last = envelope.len() - 1;
    envelope[last] ^= 0x02;
    assert!(matches!(
        session.decrypt_populated(&envelope),
        Err(PgpError::IntegrityCheckFailed)
    ));
}
