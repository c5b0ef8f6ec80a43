//! CLI integration tests
//!
//! Tests the command-line interface end-to-end.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// Get path to the layercrypt binary
fn layercrypt_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_layercrypt"))
}

/// Run layercrypt with password from stdin
fn run_layercrypt_with_passphrase(
    args: &[&str],
    passphrase: &str,
) -> Result<std::process::Output, std::io::Error> {
    let mut child = Command::new(layercrypt_bin())
        .arg("--passphrase-stdin")
        .args(args)
        .env_remove("LAYERCRYPT_LAYERS")
        .env_remove("LAYERCRYPT_JOBS")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    {
        let stdin = child.stdin.as_mut().expect("failed to open stdin");
        // Ignore BrokenPipe errors - the command may exit before reading stdin
        // if it encounters an error (e.g., bad arguments)
        let _ = stdin.write_all(passphrase.as_bytes());
    }

    child.wait_with_output()
}

fn encrypt(input: &Path, output: &Path, passphrase: &str, extra: &[&str]) -> std::process::Output {
    let mut args = vec![
        "encrypt",
        "-i",
        input.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
    ];
    args.extend_from_slice(extra);
    run_layercrypt_with_passphrase(&args, passphrase).unwrap()
}

fn decrypt(input: &Path, output: &Path, passphrase: &str) -> std::process::Output {
    run_layercrypt_with_passphrase(
        &[
            "decrypt",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ],
        passphrase,
    )
    .unwrap()
}

#[test]
fn test_encrypt_decrypt_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext_path = temp_dir.path().join("hello.txt");
    let encrypted_path = temp_dir.path().join("hello.txt.enc");
    let decrypted_path = temp_dir.path().join("hello-decrypted.txt");
    fs::write(&plaintext_path, "This is a test file for encryption.\n").unwrap();

    let result = encrypt(&plaintext_path, &encrypted_path, "test", &[]);
    assert!(
        result.status.success(),
        "encrypt failed: {}",
        String::from_utf8_lossy(&result.stderr)
    );

    // Default layer count is recorded in the outermost marker.
    let encrypted = fs::read(&encrypted_path).unwrap();
    assert_eq!(encrypted[0], 5);

    let result = decrypt(&encrypted_path, &decrypted_path, "test");
    assert!(
        result.status.success(),
        "decrypt failed: {}",
        String::from_utf8_lossy(&result.stderr)
    );

    let original = fs::read_to_string(&plaintext_path).unwrap();
    let decrypted = fs::read_to_string(&decrypted_path).unwrap();
    assert_eq!(original, decrypted);
}

#[test]
fn test_layers_flag() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("data.bin");
    let encrypted = temp_dir.path().join("data.bin.enc");
    let decrypted = temp_dir.path().join("data.out");
    fs::write(&plaintext, b"layered").unwrap();

    let result = encrypt(&plaintext, &encrypted, "pw", &["--layers", "3"]);
    assert!(result.status.success());
    assert_eq!(fs::read(&encrypted).unwrap()[0], 3);

    let result = decrypt(&encrypted, &decrypted, "pw");
    assert!(result.status.success());
    assert_eq!(fs::read(&decrypted).unwrap(), b"layered");
}

#[test]
fn test_invalid_layer_count_fails() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("data.bin");
    let encrypted = temp_dir.path().join("data.bin.enc");
    fs::write(&plaintext, b"data").unwrap();

    for layers in ["0", "201"] {
        let result = encrypt(&plaintext, &encrypted, "pw", &["-l", layers]);
        assert!(!result.status.success());
        assert!(!encrypted.exists());
    }
}

#[test]
fn test_wrong_passphrase_fails_without_output() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("secret.txt");
    let encrypted = temp_dir.path().join("secret.txt.enc");
    let decrypted = temp_dir.path().join("secret-decrypted.txt");
    fs::write(&plaintext, "Original").unwrap();

    let result = encrypt(&plaintext, &encrypted, "correct_password", &["-l", "2"]);
    assert!(result.status.success());

    let result = decrypt(&encrypted, &decrypted, "wrong_password");
    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(
        stderr.contains("wrong password or corrupted file"),
        "Expected error message about wrong password, got: {}",
        stderr
    );
    assert!(!decrypted.exists());
}

#[test]
fn test_empty_passphrase_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("secret.txt");
    let encrypted = temp_dir.path().join("secret.txt.enc");
    fs::write(&plaintext, "Original").unwrap();

    let result = encrypt(&plaintext, &encrypted, "", &[]);
    assert!(!result.status.success());
    assert!(!encrypted.exists());
}

#[test]
fn test_decrypt_nonexistent_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let nonexistent = temp_dir.path().join("nonexistent.enc");
    let output = temp_dir.path().join("output.txt");

    let result = decrypt(&nonexistent, &output, "test");
    assert!(!result.status.success());
    assert!(!output.exists());
}

#[test]
fn test_output_requires_single_input() {
    let temp_dir = TempDir::new().unwrap();
    let a = temp_dir.path().join("a.txt");
    let b = temp_dir.path().join("b.txt");
    let out = temp_dir.path().join("out.enc");
    fs::write(&a, "a").unwrap();
    fs::write(&b, "b").unwrap();

    let result = run_layercrypt_with_passphrase(
        &[
            "encrypt",
            "-i",
            a.to_str().unwrap(),
            "-i",
            b.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
        ],
        "pw",
    )
    .unwrap();
    assert!(!result.status.success());
    assert!(!out.exists());
}

#[test]
fn test_default_output_names_and_delete_original() {
    let temp_dir = TempDir::new().unwrap();
    let first = temp_dir.path().join("first.txt");
    let second = temp_dir.path().join("second.txt");
    fs::write(&first, "first").unwrap();
    fs::write(&second, "second").unwrap();

    let result = run_layercrypt_with_passphrase(
        &[
            "e",
            "-i",
            first.to_str().unwrap(),
            "-i",
            second.to_str().unwrap(),
            "-l",
            "2",
            "--delete-original",
            "-j",
            "2",
        ],
        "pw",
    )
    .unwrap();
    assert!(
        result.status.success(),
        "encrypt failed: {}",
        String::from_utf8_lossy(&result.stderr)
    );
    assert!(!first.exists());
    assert!(!second.exists());
    assert!(temp_dir.path().join("first.txt.enc").exists());
    assert!(temp_dir.path().join("second.txt.enc").exists());

    let out_dir = TempDir::new().unwrap();
    let result = run_layercrypt_with_passphrase(
        &[
            "d",
            "-i",
            temp_dir.path().join("first.txt.enc").to_str().unwrap(),
            "-i",
            temp_dir.path().join("second.txt.enc").to_str().unwrap(),
            "--output-dir",
            out_dir.path().to_str().unwrap(),
        ],
        "pw",
    )
    .unwrap();
    assert!(result.status.success());
    assert_eq!(
        fs::read_to_string(out_dir.path().join("first.txt")).unwrap(),
        "first"
    );
    assert_eq!(
        fs::read_to_string(out_dir.path().join("second.txt")).unwrap(),
        "second"
    );
}

#[test]
fn test_batch_reports_failure_but_processes_siblings() {
    let temp_dir = TempDir::new().unwrap();
    let good = temp_dir.path().join("good.txt");
    let missing = temp_dir.path().join("missing.txt");
    fs::write(&good, "good").unwrap();

    let result = run_layercrypt_with_passphrase(
        &[
            "encrypt",
            "-i",
            missing.to_str().unwrap(),
            "-i",
            good.to_str().unwrap(),
            "-l",
            "1",
        ],
        "pw",
    )
    .unwrap();
    assert!(!result.status.success());
    assert!(temp_dir.path().join("good.txt.enc").exists());
    assert!(!temp_dir.path().join("missing.txt.enc").exists());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("missing.txt"), "got: {}", stderr);
}

#[test]
fn test_empty_file_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("empty.txt");
    let encrypted = temp_dir.path().join("empty.txt.enc");
    let decrypted = temp_dir.path().join("empty-decrypted.txt");

    fs::write(&plaintext, b"").unwrap();

    let result = encrypt(&plaintext, &encrypted, "test", &["-l", "2"]);
    assert!(result.status.success());

    let result = decrypt(&encrypted, &decrypted, "test");
    assert!(result.status.success());
    let content = fs::read(&decrypted).unwrap();
    assert_eq!(content, b"");
}

#[test]
fn test_large_file_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("large.txt");
    let encrypted = temp_dir.path().join("large.txt.enc");
    let decrypted = temp_dir.path().join("large-decrypted.txt");

    let large_content: Vec<u8> = (0..1024 * 1024 + 7).map(|i| (i % 251) as u8).collect();
    fs::write(&plaintext, &large_content).unwrap();

    let result = encrypt(&plaintext, &encrypted, "test", &["-l", "3"]);
    assert!(result.status.success());

    let result = decrypt(&encrypted, &decrypted, "test");
    assert!(result.status.success());
    let decrypted_content = fs::read(&decrypted).unwrap();
    assert_eq!(decrypted_content, large_content);
}

#[test]
#[cfg(unix)]
fn test_interrupt_cancels_and_cleans_up() {
    use std::time::{Duration, Instant};

    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("big.bin");
    let encrypted = temp_dir.path().join("big.bin.enc");
    fs::write(&plaintext, vec![0x5Au8; 16 * 1024 * 1024]).unwrap();

    let mut child = Command::new(layercrypt_bin())
        .args([
            "--passphrase-stdin",
            "encrypt",
            "-i",
            plaintext.to_str().unwrap(),
            "-o",
            encrypted.to_str().unwrap(),
            "-l",
            "200",
        ])
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    {
        let mut stdin = child.stdin.take().unwrap();
        stdin.write_all(b"pw").unwrap();
    }

    let scratch_present = |dir: &Path| {
        fs::read_dir(dir).unwrap().any(|e| {
            e.unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with(".layercrypt-")
        })
    };
    let deadline = Instant::now() + Duration::from_secs(30);
    while !scratch_present(temp_dir.path()) {
        assert!(Instant::now() < deadline, "encryption never started");
        std::thread::sleep(Duration::from_millis(10));
    }

    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let result = child.wait_with_output().unwrap();
    assert!(!result.status.success());
    assert!(!encrypted.exists());
    assert!(
        !scratch_present(temp_dir.path()),
        "scratch files left behind"
    );
    assert!(plaintext.exists());
}
