use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Truncate `input` to at most `max_chars` Unicode characters, stripping
/// control characters and appending `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input.chars().filter(|c| !c.is_control()).collect();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}

/// SHA-256 over the given files in order, each prefixed by its length so that
/// moving bytes between files changes the digest.
pub fn fingerprint_files(paths: &[&Path]) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    for path in paths {
        let mut file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();
        hasher.update(len.to_le_bytes());
        loop {
            let n = file
                .read(&mut buf)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 * 100.0 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn truncate_appends_ellipsis_only_when_needed() {
        assert_eq!(truncate_with_ellipsis("https://x/y.png", 30), "https://x/y.png");
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc…");
    }

    #[test]
    fn fingerprint_changes_with_content_and_split() {
        let tmp = tempdir().expect("tempdir");
        let a = tmp.path().join("a.csv");
        let b = tmp.path().join("b.csv");
        fs::write(&a, "ab").expect("write a");
        fs::write(&b, "c").expect("write b");
        let first = fingerprint_files(&[&a, &b]).expect("fp");
        assert_eq!(first, fingerprint_files(&[&a, &b]).expect("fp again"));

        fs::write(&a, "a").expect("rewrite a");
        fs::write(&b, "bc").expect("rewrite b");
        assert_ne!(first, fingerprint_files(&[&a, &b]).expect("fp split"));
    }

    #[test]
    fn percent_handles_empty_total() {
        assert_eq!(percent(3, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }
}
